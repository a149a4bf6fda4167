//! Per-category aggregate time series.
//!
//! Steps can be confirmed out of order (a seek jumps past the sequential
//! frontier), so each recorded value is also written backward into the
//! unset positions right before it. Recorded positions never change.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::frame::Category;
use crate::logging::{log, obj, v_str, Domain, Level};
use serde_json::json;

/// First step a series carries values for; step 0 is the initial layout.
pub const FIRST_STEP: u64 = 1;

#[derive(Debug, Clone)]
struct Series {
    label: String,
    values: Vec<Option<u64>>,
}

impl Series {
    fn new(label: String) -> Self {
        Self { label, values: Vec::new() }
    }

    /// Returns false if `step` already held a value.
    fn record(&mut self, step: u64, value: u64) -> bool {
        let idx = step as usize;
        if self.values.len() <= idx {
            self.values.resize(idx + 1, None);
        }
        if self.values[idx].is_some() {
            return false;
        }
        self.values[idx] = Some(value);

        let mut i = idx;
        while i > FIRST_STEP as usize {
            i -= 1;
            if self.values[i].is_some() {
                break;
            }
            self.values[i] = Some(value);
        }
        true
    }

    fn filled(&self, upto: u64) -> Vec<u64> {
        let mut last = 0;
        (0..=upto as usize)
            .map(|i| {
                if let Some(Some(v)) = self.values.get(i) {
                    last = *v;
                }
                last
            })
            .collect()
    }
}

/// Gap-filled series ready for a chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSnapshot {
    pub labels: Vec<String>,
    /// Legend text per label; unknown labels are shown as-is.
    pub names: Vec<String>,
    /// One row per label, indexed by step from 0.
    pub values: Vec<Vec<u64>>,
    pub running_max: u64,
}

#[derive(Debug, Clone)]
pub struct SeriesAggregator {
    series: Vec<Series>,
    running_max: u64,
    margin: u64,
}

impl SeriesAggregator {
    pub fn new(labels: &[String], margin: u64) -> Self {
        Self {
            series: labels.iter().cloned().map(Series::new).collect(),
            running_max: 0,
            margin,
        }
    }

    pub fn running_max(&self) -> u64 {
        self.running_max
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.series.iter().map(|s| s.label.as_str())
    }

    /// Record one step's category counts. Labels never seen before are
    /// appended; known labels missing from `counts` record 0.
    pub fn record(&mut self, step: u64, counts: &BTreeMap<String, u64>) {
        for label in counts.keys() {
            if !self.series.iter().any(|s| &s.label == label) {
                self.series.push(Series::new(label.clone()));
            }
        }

        let mut recorded = 0;
        for series in self.series.iter_mut() {
            let value = counts.get(&series.label).copied().unwrap_or(0);
            if series.record(step, value) {
                recorded += 1;
                self.running_max = self.running_max.max(value);
            }
        }

        log(
            Level::Trace,
            Domain::Series,
            "record",
            obj(&[
                ("step", json!(step)),
                ("recorded", json!(recorded)),
                ("running_max", json!(self.running_max)),
                ("labels", v_str(&counts.keys().cloned().collect::<Vec<_>>().join(","))),
            ]),
        );
    }

    /// Raw recorded value, no carry-forward.
    pub fn value_at(&self, label: &str, step: u64) -> Option<u64> {
        self.series
            .iter()
            .find(|s| s.label == label)
            .and_then(|s| s.values.get(step as usize).copied().flatten())
    }

    /// Values for steps `0..=upto`, carrying the last known value forward.
    pub fn values(&self, label: &str, upto: u64) -> Option<Vec<u64>> {
        self.series.iter().find(|s| s.label == label).map(|s| s.filled(upto))
    }

    pub fn snapshot(&self, upto: u64) -> SeriesSnapshot {
        SeriesSnapshot {
            labels: self.series.iter().map(|s| s.label.clone()).collect(),
            names: self
                .series
                .iter()
                .map(|s| Category::from_label(&s.label).map_or(s.label.as_str(), |c| c.name()).to_string())
                .collect(),
            values: self.series.iter().map(|s| s.filled(upto)).collect(),
            running_max: self.running_max,
        }
    }

    /// Vertical line marking `step` on the aggregate plot.
    pub fn marker_at(&self, step: u64) -> [(u64, u64); 2] {
        [(step, 0), (step, self.running_max + self.margin)]
    }

    pub fn reset(&mut self) {
        for series in self.series.iter_mut() {
            series.values.clear();
        }
        self.running_max = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(&str, u64)]) -> BTreeMap<String, u64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn agg() -> SeriesAggregator {
        SeriesAggregator::new(&["A".to_string(), "B".to_string()], 20)
    }

    #[test]
    fn test_backfill_covers_gap() {
        let mut a = agg();
        a.record(5, &counts(&[("A", 3)]));
        for s in 1..=5 {
            assert_eq!(a.value_at("A", s), Some(3), "step {}", s);
        }
        assert_eq!(a.value_at("A", 0), None);

        a.record(7, &counts(&[("A", 9)]));
        for s in 1..=5 {
            assert_eq!(a.value_at("A", s), Some(3));
        }
        assert_eq!(a.value_at("A", 6), Some(9));
        assert_eq!(a.value_at("A", 7), Some(9));
    }

    #[test]
    fn test_missing_label_records_zero() {
        let mut a = agg();
        a.record(1, &counts(&[("A", 4)]));
        assert_eq!(a.value_at("B", 1), Some(0));
    }

    #[test]
    fn test_recorded_value_is_immutable() {
        let mut a = agg();
        a.record(2, &counts(&[("A", 5)]));
        a.record(2, &counts(&[("A", 50)]));
        assert_eq!(a.value_at("A", 2), Some(5));
        assert_eq!(a.running_max(), 5);
    }

    #[test]
    fn test_backfilled_positions_are_not_overwritten() {
        let mut a = agg();
        a.record(8, &counts(&[("A", 8)]));
        a.record(3, &counts(&[("A", 1)]));
        assert_eq!(a.value_at("A", 3), Some(8));
        assert_eq!(a.value_at("A", 1), Some(8));
    }

    #[test]
    fn test_out_of_order_fill_stops_at_recorded() {
        let mut a = agg();
        a.record(2, &counts(&[("A", 2)]));
        a.record(9, &counts(&[("A", 9)]));
        a.record(5, &counts(&[("A", 5)]));
        assert_eq!(a.value_at("A", 2), Some(2));
        assert_eq!(a.value_at("A", 3), Some(9));
        assert_eq!(a.value_at("A", 5), Some(9));
    }

    #[test]
    fn test_new_label_is_adopted() {
        let mut a = agg();
        a.record(1, &counts(&[("C", 2)]));
        assert!(a.labels().any(|l| l == "C"));
        assert_eq!(a.value_at("C", 1), Some(2));
    }

    #[test]
    fn test_values_carry_forward_past_last_observation() {
        let mut a = agg();
        a.record(2, &counts(&[("A", 6)]));
        assert_eq!(a.values("A", 4).unwrap(), vec![0, 6, 6, 6, 6]);
        assert!(a.values("Z", 4).is_none());
    }

    #[test]
    fn test_marker_uses_running_max_plus_margin() {
        let mut a = agg();
        a.record(1, &counts(&[("A", 10), ("B", 40)]));
        a.record(2, &counts(&[("A", 30), ("B", 12)]));
        assert_eq!(a.marker_at(2), [(2, 0), (2, 60)]);
    }

    #[test]
    fn test_reset_clears_series_and_max() {
        let mut a = agg();
        a.record(3, &counts(&[("A", 7)]));
        a.reset();
        assert_eq!(a.running_max(), 0);
        assert_eq!(a.value_at("A", 3), None);
        let snap = a.snapshot(1);
        assert_eq!(snap.values[0], vec![0, 0]);
    }

    #[test]
    fn test_snapshot_names_known_categories() {
        let mut a = SeriesAggregator::new(&["S".to_string(), "ID".to_string()], 20);
        a.record(1, &counts(&[("S", 3), ("X", 1)]));
        let snap = a.snapshot(1);
        assert_eq!(snap.labels, vec!["S", "ID", "X"]);
        assert_eq!(snap.names, vec!["Susceptible", "Detected", "X"]);
    }
}
