//! Aggregate statistics over the sensor-metrics log.

use carbrain_types::MetricsLogEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minimum, maximum and mean of one reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReadingStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Summary of every entry currently held in the metrics log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsStats {
    pub total_records: usize,
    pub distance: ReadingStats,
    pub light: ReadingStats,
    /// Share of records flagged dark, in percent.
    pub dark_percentage: f64,
    pub images_captured: usize,
    pub first_record: DateTime<Utc>,
    pub last_record: DateTime<Utc>,
}

impl MetricsStats {
    /// Summarise `entries` (oldest first).  Returns `None` when there are no
    /// entries.
    pub fn from_entries<'a, I>(entries: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a MetricsLogEntry>,
    {
        let mut iter = entries.into_iter();
        let first = iter.next()?;

        let mut distance = Accumulator::new(first.distance_cm);
        let mut light = Accumulator::new(f64::from(first.light_raw));
        let mut dark = usize::from(first.light_dark);
        let mut images = usize::from(first.image_available);
        let mut last = first;

        for entry in iter {
            distance.push(entry.distance_cm);
            light.push(f64::from(entry.light_raw));
            dark += usize::from(entry.light_dark);
            images += usize::from(entry.image_available);
            last = entry;
        }

        let total = distance.count;
        Some(Self {
            total_records: total,
            distance: distance.finish(),
            light: light.finish(),
            dark_percentage: dark as f64 / total as f64 * 100.0,
            images_captured: images,
            first_record: first.received_at,
            last_record: last.received_at,
        })
    }
}

struct Accumulator {
    min: f64,
    max: f64,
    sum: f64,
    count: usize,
}

impl Accumulator {
    fn new(value: f64) -> Self {
        Self {
            min: value,
            max: value,
            sum: value,
            count: 1,
        }
    }

    fn push(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.count += 1;
    }

    fn finish(&self) -> ReadingStats {
        ReadingStats {
            min: self.min,
            max: self.max,
            avg: self.sum / self.count as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(distance_cm: f64, light_raw: i32, light_dark: bool, image: bool) -> MetricsLogEntry {
        MetricsLogEntry {
            session_id: 1,
            step: 1,
            snapshot_timestamp: String::new(),
            received_at: Utc::now(),
            distance_cm,
            light_raw,
            light_dark,
            inertial: None,
            image_available: image,
        }
    }

    #[test]
    fn empty_log_has_no_stats() {
        assert!(MetricsStats::from_entries(&Vec::<MetricsLogEntry>::new()).is_none());
    }

    #[test]
    fn aggregates_min_max_avg() {
        let entries = vec![
            entry(10.0, 100, true, false),
            entry(30.0, 300, false, true),
            entry(20.0, 500, true, true),
            entry(40.0, 700, false, false),
        ];
        let stats = MetricsStats::from_entries(&entries).unwrap();
        assert_eq!(stats.total_records, 4);
        assert_eq!(stats.distance.min, 10.0);
        assert_eq!(stats.distance.max, 40.0);
        assert!((stats.distance.avg - 25.0).abs() < 1e-9);
        assert_eq!(stats.light.min, 100.0);
        assert_eq!(stats.light.max, 700.0);
        assert!((stats.light.avg - 400.0).abs() < 1e-9);
        assert!((stats.dark_percentage - 50.0).abs() < 1e-9);
        assert_eq!(stats.images_captured, 2);
        assert_eq!(stats.first_record, entries[0].received_at);
        assert_eq!(stats.last_record, entries[3].received_at);
    }

    #[test]
    fn single_entry_is_its_own_range() {
        let entries = [entry(55.5, 420, false, false)];
        let stats = MetricsStats::from_entries(&entries).unwrap();
        assert_eq!(stats.distance.min, stats.distance.max);
        assert_eq!(stats.dark_percentage, 0.0);
    }
}
