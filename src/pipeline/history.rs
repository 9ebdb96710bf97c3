//! Local read caches of published predictions
//!
//! Two views over the same stream of published records:
//! - full history: append-only, read through `list_all` (optionally capped)
//! - recent: fixed-capacity ring, oldest evicted first

use super::types::EnrichedRecord;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Snapshot returned by `PredictionHistory::list_all`
#[derive(Debug, Clone, Serialize)]
pub struct HistorySnapshot {
    pub predictions: Vec<EnrichedRecord>,
    pub total: usize,
}

#[derive(Default)]
struct Caches {
    all: VecDeque<EnrichedRecord>,
    recent: VecDeque<EnrichedRecord>,
}

/// History of published predictions
pub struct PredictionHistory {
    caches: Mutex<Caches>,
    recent_capacity: usize,
    /// 0 keeps every record
    max_records: usize,
}

impl PredictionHistory {
    /// # Arguments
    /// * `recent_capacity` - Size of the recent ring
    /// * `max_records` - Cap on the full history, 0 for unbounded
    pub fn new(recent_capacity: usize, max_records: usize) -> Self {
        Self {
            caches: Mutex::new(Caches {
                all: VecDeque::new(),
                recent: VecDeque::with_capacity(recent_capacity),
            }),
            recent_capacity,
            max_records,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Caches> {
        self.caches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a published record to both caches
    pub fn record(&self, record: EnrichedRecord) {
        let mut caches = self.lock();

        caches.recent.push_back(record.clone());
        while caches.recent.len() > self.recent_capacity {
            caches.recent.pop_front();
        }

        caches.all.push_back(record);
        if self.max_records > 0 {
            while caches.all.len() > self.max_records {
                caches.all.pop_front();
            }
        }
    }

    /// Every retained record in publish order, plus the count
    pub fn list_all(&self) -> HistorySnapshot {
        let caches = self.lock();
        let predictions: Vec<EnrichedRecord> = caches.all.iter().cloned().collect();
        HistorySnapshot {
            total: predictions.len(),
            predictions,
        }
    }

    /// Most recent records, oldest first
    pub fn recent(&self) -> Vec<EnrichedRecord> {
        self.lock().recent.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().all.is_empty()
    }
}

impl Default for PredictionHistory {
    fn default() -> Self {
        Self::new(50, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{ActualTelemetry, ConfidenceInterval};
    use chrono::Utc;

    fn make_record(lap_number: i64) -> EnrichedRecord {
        EnrichedRecord {
            driver: "OCO".to_string(),
            lap_number,
            predicted_lap_time: 90.0,
            confidence_interval: ConfidenceInterval {
                lower: 89.0,
                upper: 91.0,
            },
            actual_telemetry: ActualTelemetry {
                avg_speed: Some(200.0),
                avg_throttle: Some(0.7),
                avg_rpm: Some(10_000.0),
                used_drs: false,
                used_brake: true,
            },
            timestamp: Utc::now(),
            model_version: "2.0.0".to_string(),
        }
    }

    #[test]
    fn test_history_keeps_every_record_in_order() {
        let history = PredictionHistory::default();
        for lap in 0..120 {
            history.record(make_record(lap));
        }

        let snapshot = history.list_all();
        assert_eq!(snapshot.total, 120);
        assert_eq!(snapshot.predictions.len(), 120);
        let laps: Vec<i64> = snapshot.predictions.iter().map(|r| r.lap_number).collect();
        assert_eq!(laps, (0..120).collect::<Vec<_>>());
    }

    #[test]
    fn test_recent_ring_holds_latest_fifty() {
        let history = PredictionHistory::default();
        for lap in 0..75 {
            history.record(make_record(lap));
            assert!(history.recent().len() <= 50);
        }

        let recent = history.recent();
        assert_eq!(recent.len(), 50);
        assert_eq!(recent.first().unwrap().lap_number, 25);
        assert_eq!(recent.last().unwrap().lap_number, 74);
    }

    #[test]
    fn test_optional_history_cap_evicts_oldest() {
        let history = PredictionHistory::new(5, 10);
        for lap in 0..15 {
            history.record(make_record(lap));
        }

        let snapshot = history.list_all();
        assert_eq!(snapshot.total, 10);
        assert_eq!(snapshot.predictions[0].lap_number, 5);
    }

    #[test]
    fn test_snapshot_serializes_with_total() {
        let history = PredictionHistory::default();
        history.record(make_record(1));

        let json = serde_json::to_value(history.list_all()).unwrap();
        assert_eq!(json["total"], 1);
        assert_eq!(json["predictions"][0]["driver"], "OCO");
    }
}
