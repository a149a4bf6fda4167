//! Run parameters submitted to the simulation service on initiation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationQuota {
    pub kind: String,
    /// Grid cells assigned to this location type.
    pub capacity: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParams {
    pub num_agents: u64,
    pub grid_width: u64,
    pub grid_height: u64,
    #[serde(default)]
    pub initial_infected: u64,
    pub locations: Vec<LocationQuota>,
    /// Percentage of agents per dose count: index 0 is one dose, 1 is two.
    #[serde(default)]
    pub vaccinated_pct: Vec<f64>,
    /// Passed through to the service untouched.
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamsError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("location capacities sum to {got} but the map area is {expected}")]
    AreaMismatch { expected: u64, got: u64 },

    #[error("vaccinated percentage for {doses} dose(s) is {value}, outside [0, 100]")]
    PercentOutOfRange { doses: usize, value: f64 },

    #[error("vaccinated percentages sum to {sum}, above 100")]
    PercentSumExceeded { sum: f64 },

    #[error("initial_infected {infected} exceeds num_agents {agents}")]
    TooManyInfected { infected: u64, agents: u64 },
}

impl RunParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.num_agents == 0 {
            return Err(ParamsError::Zero { field: "num_agents" });
        }
        if self.grid_width == 0 {
            return Err(ParamsError::Zero { field: "grid_width" });
        }
        if self.grid_height == 0 {
            return Err(ParamsError::Zero { field: "grid_height" });
        }
        if self.initial_infected > self.num_agents {
            return Err(ParamsError::TooManyInfected {
                infected: self.initial_infected,
                agents: self.num_agents,
            });
        }

        let area = self.grid_width.saturating_mul(self.grid_height);
        let capacity = self
            .locations
            .iter()
            .fold(0u64, |acc, l| acc.saturating_add(l.capacity));
        if capacity != area {
            return Err(ParamsError::AreaMismatch { expected: area, got: capacity });
        }

        for (i, &value) in self.vaccinated_pct.iter().enumerate() {
            if !(0.0..=100.0).contains(&value) {
                return Err(ParamsError::PercentOutOfRange { doses: i + 1, value });
            }
        }
        let sum: f64 = self.vaccinated_pct.iter().sum();
        if sum > 100.0 {
            return Err(ParamsError::PercentSumExceeded { sum });
        }
        Ok(())
    }

    /// SHA-256 of the JSON form, hex encoded.
    pub fn fingerprint(&self) -> String {
        let body = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&body))
    }
}

#[cfg(test)]
pub(crate) fn sample_params() -> RunParams {
    RunParams {
        num_agents: 20,
        grid_width: 10,
        grid_height: 10,
        initial_infected: 2,
        locations: vec![
            LocationQuota { kind: "home".to_string(), capacity: 60 },
            LocationQuota { kind: "road".to_string(), capacity: 30 },
            LocationQuota { kind: "hospital".to_string(), capacity: 10 },
        ],
        vaccinated_pct: vec![30.0, 20.0],
        extra: Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_params_pass() {
        assert_eq!(sample_params().validate(), Ok(()));
    }

    #[test]
    fn test_area_mismatch() {
        let mut p = sample_params();
        p.locations[0].capacity = 59;
        assert_eq!(
            p.validate(),
            Err(ParamsError::AreaMismatch { expected: 100, got: 99 })
        );
    }

    #[test]
    fn test_percent_out_of_range() {
        let mut p = sample_params();
        p.vaccinated_pct = vec![-1.0];
        assert!(matches!(p.validate(), Err(ParamsError::PercentOutOfRange { doses: 1, .. })));
        p.vaccinated_pct = vec![10.0, 101.0];
        assert!(matches!(p.validate(), Err(ParamsError::PercentOutOfRange { doses: 2, .. })));
    }

    #[test]
    fn test_percent_sum_exceeded() {
        let mut p = sample_params();
        p.vaccinated_pct = vec![60.0, 50.0];
        assert!(matches!(p.validate(), Err(ParamsError::PercentSumExceeded { .. })));
    }

    #[test]
    fn test_too_many_infected() {
        let mut p = sample_params();
        p.initial_infected = 21;
        assert!(matches!(p.validate(), Err(ParamsError::TooManyInfected { .. })));
    }

    #[test]
    fn test_extra_fields_pass_through() {
        let body = serde_json::json!({
            "num_agents": 5, "grid_width": 2, "grid_height": 2,
            "locations": [{"kind": "home", "capacity": 4}],
            "mask_compliance": 0.4
        });
        let p: RunParams = serde_json::from_value(body).unwrap();
        assert_eq!(p.extra.get("mask_compliance"), Some(&serde_json::json!(0.4)));
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = sample_params();
        let mut b = sample_params();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.num_agents += 1;
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
