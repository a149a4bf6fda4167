//! Simulation frames and world layout as delivered by the simulation service.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Infection categories reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Susceptible,
    Undetected,
    Detected,
    Recovered,
    Deceased,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Susceptible,
        Category::Undetected,
        Category::Detected,
        Category::Recovered,
        Category::Deceased,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Category::Susceptible => "S",
            Category::Undetected => "IU",
            Category::Detected => "ID",
            Category::Recovered => "R",
            Category::Deceased => "D",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Category::Susceptible => "Susceptible",
            Category::Undetected => "Undetected",
            Category::Detected => "Detected",
            Category::Recovered => "Recovered",
            Category::Deceased => "Deceased",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Category::ALL.into_iter().find(|c| c.label() == label)
    }
}

/// Complete simulation state for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub step: u64,
    #[serde(alias = "pos")]
    pub positions: Vec<[f64; 2]>,
    #[serde(alias = "home_loc_ids")]
    pub home_location_id: Vec<u64>,
    #[serde(alias = "current_loc_ids")]
    pub current_location_id: Vec<u64>,
    pub infection_status: Vec<String>,
    pub mask: Vec<bool>,
    pub vaccination_doses: Vec<u32>,
    /// Agents per category label. Derived from `infection_status` when the
    /// service omits it.
    #[serde(default)]
    pub category_counts: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field} length {got} does not match agent count {expected}")]
pub struct FrameMismatch {
    pub field: &'static str,
    pub expected: usize,
    pub got: usize,
}

impl Frame {
    pub fn agent_count(&self) -> usize {
        self.positions.len()
    }

    /// Check that every per-agent sequence has the same length as `positions`.
    pub fn validate(&self) -> Result<(), FrameMismatch> {
        let expected = self.agent_count();
        let lengths = [
            ("home_location_id", self.home_location_id.len()),
            ("current_location_id", self.current_location_id.len()),
            ("infection_status", self.infection_status.len()),
            ("mask", self.mask.len()),
            ("vaccination_doses", self.vaccination_doses.len()),
        ];
        for (field, got) in lengths {
            if got != expected {
                return Err(FrameMismatch { field, expected, got });
            }
        }
        Ok(())
    }

    /// Fill `category_counts` from the per-agent statuses if it is empty.
    pub fn ensure_counts(&mut self) {
        if !self.category_counts.is_empty() {
            return;
        }
        for status in &self.infection_status {
            *self.category_counts.entry(status.clone()).or_insert(0) += 1;
        }
    }

    pub fn is_home(&self, agent: usize) -> bool {
        self.home_location_id.get(agent) == self.current_location_id.get(agent)
    }
}

/// One location box on the world map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRect {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    #[serde(rename = "type")]
    pub kind: String,
}

impl LocationRect {
    /// Closed outline, first corner repeated last.
    pub fn outline(&self) -> [(f64, f64); 5] {
        [
            (self.x_min, self.y_min),
            (self.x_max, self.y_min),
            (self.x_max, self.y_max),
            (self.x_min, self.y_max),
            (self.x_min, self.y_min),
        ]
    }
}

/// World map fetched once per model initiation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorldLayout {
    pub locations: Vec<LocationRect>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLayout {
    Rows(Vec<LocationRect>),
    Wrapped { locations: Box<RawLayout> },
    Columns(Vec<Vec<Value>>),
}

impl<'de> Deserialize<'de> for WorldLayout {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawLayout::deserialize(deserializer)?;
        WorldLayout::from_raw(raw).map_err(serde::de::Error::custom)
    }
}

impl WorldLayout {
    fn from_raw(raw: RawLayout) -> Result<Self, String> {
        match raw {
            RawLayout::Rows(locations) => Ok(Self { locations }),
            RawLayout::Wrapped { locations } => Self::from_raw(*locations),
            RawLayout::Columns(cols) => Self::from_columns(&cols),
        }
    }

    /// Column-major form: `[x_min[], x_max[], y_min[], y_max[], type[]]`.
    pub fn from_columns(cols: &[Vec<Value>]) -> Result<Self, String> {
        if cols.len() != 5 {
            return Err(format!("expected 5 location columns, got {}", cols.len()));
        }
        let n = cols[0].len();
        if cols.iter().any(|c| c.len() != n) {
            return Err("location columns differ in length".to_string());
        }
        let num = |col: usize, i: usize| -> Result<f64, String> {
            cols[col][i]
                .as_f64()
                .ok_or_else(|| format!("non-numeric coordinate at column {} row {}", col, i))
        };
        let mut locations = Vec::with_capacity(n);
        for i in 0..n {
            let kind = match &cols[4][i] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            locations.push(LocationRect {
                x_min: num(0, i)?,
                x_max: num(1, i)?,
                y_min: num(2, i)?,
                y_max: num(3, i)?,
                kind,
            });
        }
        Ok(Self { locations })
    }

    /// Outer box enclosing every location, anchored at the origin.
    pub fn bounds(&self) -> Option<LocationRect> {
        if self.locations.is_empty() {
            return None;
        }
        let x_max = self.locations.iter().map(|l| l.x_max).fold(f64::MIN, f64::max);
        let y_max = self.locations.iter().map(|l| l.y_max).fold(f64::MIN, f64::max);
        Some(LocationRect { x_min: 0.0, x_max, y_min: 0.0, y_max, kind: "bounds".to_string() })
    }
}

#[cfg(test)]
pub(crate) fn sample_frame(step: u64, statuses: &[&str]) -> Frame {
    let n = statuses.len();
    Frame {
        step,
        positions: (0..n).map(|i| [i as f64, step as f64]).collect(),
        home_location_id: (0..n as u64).collect(),
        current_location_id: (0..n as u64).map(|i| if i % 2 == 0 { i } else { i + 100 }).collect(),
        infection_status: statuses.iter().map(|s| s.to_string()).collect(),
        mask: vec![false; n],
        vaccination_doses: vec![0; n],
        category_counts: BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_accepts_service_field_names() {
        let body = json!({
            "step": 3,
            "pos": [[1.0, 2.0], [3.0, 4.0]],
            "home_loc_ids": [1, 2],
            "current_loc_ids": [1, 5],
            "infection_status": ["S", "IU"],
            "mask": [true, false],
            "vaccination_doses": [0, 2],
        });
        let mut frame: Frame = serde_json::from_value(body).unwrap();
        assert!(frame.validate().is_ok());
        frame.ensure_counts();
        assert_eq!(frame.category_counts.get("S"), Some(&1));
        assert_eq!(frame.category_counts.get("IU"), Some(&1));
        assert!(frame.is_home(0));
        assert!(!frame.is_home(1));
    }

    #[test]
    fn test_validate_reports_short_field() {
        let mut frame = sample_frame(1, &["S", "S", "R"]);
        frame.mask.pop();
        let err = frame.validate().unwrap_err();
        assert_eq!(err.field, "mask");
        assert_eq!(err.expected, 3);
        assert_eq!(err.got, 2);
        assert_eq!(err.to_string(), "mask length 2 does not match agent count 3");
    }

    #[test]
    fn test_ensure_counts_keeps_reported_counts() {
        let mut frame = sample_frame(1, &["S", "S"]);
        frame.category_counts.insert("R".to_string(), 9);
        frame.ensure_counts();
        assert_eq!(frame.category_counts.len(), 1);
    }

    #[test]
    fn test_world_layout_from_columns() {
        let body = json!([[0, 10], [5, 20], [0, 0], [5, 8], ["home", "hospital"]]);
        let layout: WorldLayout = serde_json::from_value(body).unwrap();
        assert_eq!(layout.locations.len(), 2);
        assert_eq!(layout.locations[1].kind, "hospital");
        assert_eq!(layout.locations[1].x_max, 20.0);
        let bounds = layout.bounds().unwrap();
        assert_eq!((bounds.x_max, bounds.y_max), (20.0, 8.0));
    }

    #[test]
    fn test_world_layout_from_rows() {
        let body = json!({"locations": [
            {"x_min": 0, "x_max": 1, "y_min": 0, "y_max": 1, "type": "road"}
        ]});
        let layout: WorldLayout = serde_json::from_value(body).unwrap();
        assert_eq!(layout.locations[0].kind, "road");
        assert_eq!(layout.locations[0].outline()[4], (0.0, 0.0));
    }

    #[test]
    fn test_category_round_trip_labels() {
        for c in Category::ALL {
            assert_eq!(Category::from_label(c.label()), Some(c));
        }
        assert_eq!(Category::from_label("X"), None);
    }
}
