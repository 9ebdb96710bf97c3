//! Window Aggregator - keyed lap state shared by ingestion and the scan loop
//!
//! ## Concurrency
//!
//! State lives in a `DashMap<WindowKey, WindowState>`. Every operation on a
//! single key runs under that key's shard lock:
//! - `add` mutates through the map entry (create-or-append in one step)
//! - `drain_closed` uses `remove_if`, so the inactivity check and the
//!   removal happen in one critical section
//!
//! A sample racing a drain is therefore either fully applied before the
//! check (and the advanced `last_seen` keeps the window open) or lands
//! after removal and opens a fresh window. Distinct keys never contend
//! beyond sharing a shard.
//!
//! ## Overload
//!
//! `max_open_windows` caps how many laps may be open at once. A sample for
//! an already-open lap is always accepted; a sample that would open a new
//! lap beyond the cap is shed and counted. The cap is checked before the
//! entry is taken, so concurrent creators may overshoot it slightly.

use super::types::{Sample, Summary, WindowKey};
use super::windows::WindowState;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Result of `WindowAggregator::add`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// First sample for this key, a new window was opened
    Created,
    /// Appended to an already-open window
    Updated,
    /// Dropped because the open-window cap was reached
    Shed,
}

/// Counters describing aggregator activity since startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    pub open_windows: usize,
    pub summaries_emitted: u64,
    pub short_windows_discarded: u64,
    pub samples_shed: u64,
}

/// Keyed per-lap accumulation with inactivity-based closing
pub struct WindowAggregator {
    windows: DashMap<WindowKey, WindowState>,

    /// 0 disables the cap
    max_open_windows: usize,

    summaries_emitted: AtomicU64,
    short_windows_discarded: AtomicU64,
    samples_shed: AtomicU64,

    /// Unix milliseconds (swappable for deterministic tests)
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl WindowAggregator {
    /// Create an aggregator using wall-clock time
    ///
    /// # Arguments
    /// * `max_open_windows` - Cap on concurrently open laps (0 = unbounded)
    pub fn new(max_open_windows: usize) -> Self {
        Self::new_with_clock(
            max_open_windows,
            Box::new(|| Utc::now().timestamp_millis()),
        )
    }

    /// Create an aggregator with a custom clock returning Unix milliseconds
    pub fn new_with_clock(
        max_open_windows: usize,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        Self {
            windows: DashMap::new(),
            max_open_windows,
            summaries_emitted: AtomicU64::new(0),
            short_windows_discarded: AtomicU64::new(0),
            samples_shed: AtomicU64::new(0),
            now_fn,
        }
    }

    /// Add a sample to its lap window
    ///
    /// Creates the window on the first sample for an unseen key, otherwise
    /// appends. `last_seen` is the ingest time, not the sample's own
    /// timestamp.
    pub fn add(&self, sample: Sample) -> AddOutcome {
        let now = (self.now_fn)();
        let key = sample.key();

        // len() takes every shard lock, so it must run before entry() holds one
        let at_capacity = self.max_open_windows > 0
            && self.windows.len() >= self.max_open_windows
            && !self.windows.contains_key(&key);

        match self.windows.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().push(&sample, now);
                AddOutcome::Updated
            }
            Entry::Vacant(entry) => {
                if at_capacity {
                    let shed = self.samples_shed.fetch_add(1, Ordering::Relaxed) + 1;
                    if shed == 1 || shed % 1000 == 0 {
                        log::warn!(
                            "⚠️  Open window cap reached ({}), shedding new laps (total shed: {})",
                            self.max_open_windows,
                            shed
                        );
                    }
                    return AddOutcome::Shed;
                }
                log::debug!("🆕 Opened window {}", entry.key());
                entry.insert(WindowState::open(&sample, now));
                AddOutcome::Created
            }
        }
    }

    /// Close every window that has been inactive longer than the threshold
    ///
    /// Keys are snapshotted at call time. For each inactive key the window
    /// is removed; it yields a `Summary` only if it holds more than
    /// `min_samples` samples, otherwise it is discarded. Active windows are
    /// left untouched.
    ///
    /// # Arguments
    /// * `inactivity_threshold` - Maximum quiet period before a lap is closed
    /// * `min_samples` - Windows with this many samples or fewer are dropped
    ///
    /// # Returns
    /// Summaries of the closed laps, in no particular order
    pub fn drain_closed(&self, inactivity_threshold: Duration, min_samples: usize) -> Vec<Summary> {
        let now = (self.now_fn)();
        let threshold_ms = inactivity_threshold.as_millis() as i64;
        let drained_at = DateTime::<Utc>::from_timestamp_millis(now).unwrap_or_else(Utc::now);

        let keys: Vec<WindowKey> = self.windows.iter().map(|e| e.key().clone()).collect();

        let mut summaries = Vec::new();
        let mut discarded = 0u64;

        for key in keys {
            let removed = self
                .windows
                .remove_if(&key, |_, state| state.is_inactive(now, threshold_ms));

            let Some((key, state)) = removed else {
                continue;
            };

            if state.len() > min_samples {
                summaries.push(state.summarize(&key, drained_at));
            } else {
                log::debug!(
                    "🗑️  Discarding short window {} ({} samples <= {})",
                    key,
                    state.len(),
                    min_samples
                );
                discarded += 1;
            }
        }

        self.summaries_emitted
            .fetch_add(summaries.len() as u64, Ordering::Relaxed);
        self.short_windows_discarded
            .fetch_add(discarded, Ordering::Relaxed);

        summaries
    }

    /// Number of currently open windows
    pub fn open_windows(&self) -> usize {
        self.windows.len()
    }

    /// Sample count of an open window, `None` if the key is not open
    pub fn window_len(&self, key: &WindowKey) -> Option<usize> {
        self.windows.get(key).map(|state| state.len())
    }

    pub fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            open_windows: self.windows.len(),
            summaries_emitted: self.summaries_emitted.load(Ordering::Relaxed),
            short_windows_discarded: self.short_windows_discarded.load(Ordering::Relaxed),
            samples_shed: self.samples_shed.load(Ordering::Relaxed),
        }
    }
}

impl Default for WindowAggregator {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicI64};
    use std::sync::Arc;

    const THRESHOLD: Duration = Duration::from_secs(10);

    /// Aggregator driven by a manually advanced clock
    fn make_aggregator(max_open: usize) -> (WindowAggregator, Arc<AtomicI64>) {
        let clock = Arc::new(AtomicI64::new(1_700_000_000_000));
        let reader = clock.clone();
        let aggregator = WindowAggregator::new_with_clock(
            max_open,
            Box::new(move || reader.load(Ordering::SeqCst)),
        );
        (aggregator, clock)
    }

    fn advance(clock: &AtomicI64, ms: i64) {
        clock.fetch_add(ms, Ordering::SeqCst);
    }

    fn make_sample(driver: &str, lap: i64, speed: f64) -> Sample {
        Sample {
            speed: Some(speed),
            throttle: Some(50.0),
            ..Sample::new(driver, lap)
        }
    }

    #[test]
    fn test_add_creates_then_updates() {
        let (aggregator, _clock) = make_aggregator(0);

        assert_eq!(aggregator.add(make_sample("VER", 1, 100.0)), AddOutcome::Created);
        assert_eq!(aggregator.add(make_sample("VER", 1, 110.0)), AddOutcome::Updated);
        assert_eq!(aggregator.add(make_sample("VER", 2, 120.0)), AddOutcome::Created);

        assert_eq!(aggregator.open_windows(), 2);
        assert_eq!(aggregator.window_len(&WindowKey::new("VER", 1)), Some(2));
    }

    #[test]
    fn test_drained_mean_matches_submitted_values() {
        let (aggregator, clock) = make_aggregator(0);
        let speeds: Vec<f64> = (0..15).map(|i| 200.0 + i as f64 * 3.5).collect();

        for speed in &speeds {
            aggregator.add(make_sample("LEC", 8, *speed));
        }
        advance(&clock, 10_001);

        let summaries = aggregator.drain_closed(THRESHOLD, 10);
        assert_eq!(summaries.len(), 1);

        let expected = speeds.iter().sum::<f64>() / speeds.len() as f64;
        let actual = summaries[0].speed.unwrap();
        assert!((actual - expected).abs() < 1e-9);
        assert_eq!(summaries[0].sample_count, 15);
    }

    #[test]
    fn test_window_at_min_samples_is_discarded() {
        let (aggregator, clock) = make_aggregator(0);

        for i in 0..10 {
            aggregator.add(make_sample("SAI", 3, 150.0 + i as f64));
        }
        advance(&clock, 20_000);

        let summaries = aggregator.drain_closed(THRESHOLD, 10);
        assert!(summaries.is_empty());
        assert_eq!(aggregator.open_windows(), 0, "short window must still be removed");
        assert_eq!(aggregator.stats().short_windows_discarded, 1);
    }

    #[test]
    fn test_drain_only_after_threshold_exceeded() {
        let (aggregator, clock) = make_aggregator(0);
        for i in 0..11 {
            aggregator.add(make_sample("HAM", 44, 250.0 + i as f64));
        }

        advance(&clock, 10_000);
        assert!(aggregator.drain_closed(THRESHOLD, 10).is_empty(), "exactly at threshold stays open");
        assert_eq!(aggregator.open_windows(), 1);

        advance(&clock, 1);
        assert_eq!(aggregator.drain_closed(THRESHOLD, 10).len(), 1);
        assert_eq!(aggregator.open_windows(), 0);
    }

    #[test]
    fn test_redrain_without_new_samples_yields_nothing() {
        let (aggregator, clock) = make_aggregator(0);
        for i in 0..12 {
            aggregator.add(make_sample("NOR", 4, 180.0 + i as f64));
        }
        advance(&clock, 15_000);

        assert_eq!(aggregator.drain_closed(THRESHOLD, 10).len(), 1);
        assert!(aggregator.drain_closed(THRESHOLD, 10).is_empty());
    }

    #[test]
    fn test_active_windows_keep_accumulating() {
        let (aggregator, clock) = make_aggregator(0);
        for i in 0..11 {
            aggregator.add(make_sample("RUS", 1, 200.0 + i as f64));
        }
        advance(&clock, 9_000);
        aggregator.add(make_sample("RUS", 1, 300.0));
        advance(&clock, 2_000);

        // 2s since the last sample, so the lap is still open
        assert!(aggregator.drain_closed(THRESHOLD, 10).is_empty());
        assert_eq!(aggregator.window_len(&WindowKey::new("RUS", 1)), Some(12));
    }

    #[test]
    fn test_late_sample_after_drain_opens_fresh_window() {
        let (aggregator, clock) = make_aggregator(0);
        for i in 0..11 {
            aggregator.add(make_sample("ALB", 9, 210.0 + i as f64));
        }
        advance(&clock, 11_000);
        assert_eq!(aggregator.drain_closed(THRESHOLD, 10).len(), 1);

        assert_eq!(aggregator.add(make_sample("ALB", 9, 999.0)), AddOutcome::Created);
        assert_eq!(aggregator.window_len(&WindowKey::new("ALB", 9)), Some(1));
    }

    #[test]
    fn test_open_window_cap_sheds_new_laps_only() {
        let (aggregator, _clock) = make_aggregator(2);

        assert_eq!(aggregator.add(make_sample("A", 1, 1.0)), AddOutcome::Created);
        assert_eq!(aggregator.add(make_sample("B", 1, 1.0)), AddOutcome::Created);
        assert_eq!(aggregator.add(make_sample("C", 1, 1.0)), AddOutcome::Shed);
        assert_eq!(aggregator.add(make_sample("A", 1, 2.0)), AddOutcome::Updated);

        assert_eq!(aggregator.open_windows(), 2);
        assert_eq!(aggregator.stats().samples_shed, 1);
    }

    #[test]
    fn test_summary_timestamp_is_drain_time() {
        let (aggregator, clock) = make_aggregator(0);
        for i in 0..11 {
            aggregator.add(make_sample("GAS", 10, 100.0 + i as f64));
        }
        advance(&clock, 30_000);
        let drain_ms = clock.load(Ordering::SeqCst);

        let summaries = aggregator.drain_closed(THRESHOLD, 10);
        assert_eq!(summaries[0].timestamp.timestamp_millis(), drain_ms);
    }

    #[test]
    fn test_concurrent_adds_on_distinct_keys() {
        let aggregator = Arc::new(WindowAggregator::new(0));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let aggregator = aggregator.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        aggregator.add(make_sample(&format!("D{}", t), 1, i as f64));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(aggregator.open_windows(), 4);
        for t in 0..4 {
            assert_eq!(aggregator.window_len(&WindowKey::new(format!("D{}", t), 1)), Some(250));
        }
    }

    #[test]
    fn test_concurrent_add_and_drain_on_same_key_loses_nothing() {
        const TOTAL: usize = 20_000;

        let (aggregator, clock) = make_aggregator(0);
        let aggregator = Arc::new(aggregator);
        let done = Arc::new(AtomicBool::new(false));

        // Every add is followed by a tick, so each drain sees the lap as idle
        let writer = {
            let aggregator = aggregator.clone();
            let clock = clock.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                for i in 0..TOTAL {
                    aggregator.add(make_sample("VER", 1, i as f64));
                    advance(&clock, 1);
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let drainer = {
            let aggregator = aggregator.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                let mut drained = 0;
                let mut batches = 0;
                while !done.load(Ordering::SeqCst) {
                    for summary in aggregator.drain_closed(Duration::ZERO, 0) {
                        drained += summary.sample_count;
                        batches += 1;
                    }
                }
                (drained, batches)
            })
        };

        writer.join().unwrap();
        let (mut drained, batches) = drainer.join().unwrap();

        advance(&clock, 1);
        for summary in aggregator.drain_closed(Duration::ZERO, 0) {
            drained += summary.sample_count;
        }

        assert_eq!(drained, TOTAL);
        assert_eq!(aggregator.open_windows(), 0);
        assert!(aggregator.stats().summaries_emitted as usize >= batches);
    }
}
