//! Render-ready payload for one resolved step. Colours and sizes are the
//! renderer's business; this only carries what they are derived from.

use serde::Serialize;

use crate::frame::Frame;
use crate::series::SeriesSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PointMarker {
    /// Agent is at its home location (drawn as a triangle).
    AtHome,
    /// Agent is elsewhere (drawn as a square).
    Away,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentPoint {
    pub x: f64,
    pub y: f64,
    pub category: String,
    pub marker: PointMarker,
    pub masked: bool,
    pub doses: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepView {
    pub step: u64,
    pub day: f64,
    pub points: Vec<AgentPoint>,
    pub series: SeriesSnapshot,
    pub marker: [(u64, u64); 2],
}

pub fn agent_points(frame: &Frame) -> Vec<AgentPoint> {
    frame
        .positions
        .iter()
        .enumerate()
        .map(|(i, p)| AgentPoint {
            x: p[0],
            y: p[1],
            category: frame.infection_status.get(i).cloned().unwrap_or_default(),
            marker: if frame.is_home(i) { PointMarker::AtHome } else { PointMarker::Away },
            masked: frame.mask.get(i).copied().unwrap_or(false),
            doses: frame.vaccination_doses.get(i).copied().unwrap_or(0),
        })
        .collect()
}

/// Step expressed in days, three significant figures.
pub fn day_of(step: u64, steps_per_day: u64) -> f64 {
    let day = step as f64 / steps_per_day.max(1) as f64;
    if day == 0.0 {
        return 0.0;
    }
    let digits = 3 - 1 - day.abs().log10().floor() as i32;
    let scale = 10f64.powi(digits);
    (day * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::sample_frame;

    #[test]
    fn test_points_follow_agent_order() {
        let mut frame = sample_frame(4, &["S", "ID", "R"]);
        frame.mask[2] = true;
        frame.vaccination_doses[1] = 2;
        let points = agent_points(&frame);
        assert_eq!(points.len(), 3);
        assert_eq!(points[1].category, "ID");
        assert_eq!(points[0].marker, PointMarker::AtHome);
        assert_eq!(points[1].marker, PointMarker::Away);
        assert!(points[2].masked);
        assert_eq!(points[1].doses, 2);
        assert_eq!((points[2].x, points[2].y), (2.0, 4.0));
    }

    #[test]
    fn test_day_of_rounds_to_three_figures() {
        assert_eq!(day_of(0, 24), 0.0);
        assert_eq!(day_of(24, 24), 1.0);
        assert_eq!(day_of(10, 24), 0.417);
        assert_eq!(day_of(250, 24), 10.4);
    }
}
