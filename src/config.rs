use crate::frame::Category;

#[derive(Clone, Debug)]
pub struct Config {
    pub server_base: String,
    pub model_name: String,
    pub tick_ms: u64,
    /// Number of most recent steps kept as full frames.
    pub retention_window: u64,
    pub marker_margin: u64,
    pub steps_per_day: u64,
    pub request_timeout_ms: u64,
    pub params_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            server_base: std::env::var("SIM_SERVER").unwrap_or_else(|_| "http://localhost:8082".to_string()),
            model_name: std::env::var("MODEL_NAME").unwrap_or_else(|_| "default".to_string()),
            tick_ms: std::env::var("TICK_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(400),
            retention_window: std::env::var("RETENTION_STEPS").ok().and_then(|v| v.parse().ok()).unwrap_or(24),
            marker_margin: std::env::var("MARKER_MARGIN").ok().and_then(|v| v.parse().ok()).unwrap_or(20),
            steps_per_day: std::env::var("STEPS_PER_DAY").ok().and_then(|v| v.parse().ok()).unwrap_or(24),
            request_timeout_ms: std::env::var("REQUEST_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(10_000),
            params_path: std::env::var("PARAMS_PATH").ok(),
        }
    }

    pub fn playback(&self) -> PlaybackConfig {
        PlaybackConfig {
            retention_window: self.retention_window,
            marker_margin: self.marker_margin,
            steps_per_day: self.steps_per_day.max(1),
            categories: Category::ALL.iter().map(|c| c.label().to_string()).collect(),
        }
    }
}

/// Settings owned by one playback controller.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    pub retention_window: u64,
    pub marker_margin: u64,
    pub steps_per_day: u64,
    /// Series labels tracked from the first step, in plot order.
    pub categories: Vec<String>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            retention_window: 24,
            marker_margin: 20,
            steps_per_day: 24,
            categories: Category::ALL.iter().map(|c| c.label().to_string()).collect(),
        }
    }
}
