//! Pipeline schedulers for background tasks
//!
//! - `scan_loop_task` drains completed laps and drives prediction + publish
//! - `health_monitor_task` refreshes the predictor health gate
//!
//! Both run on `tokio::time::interval` until the shared `Shutdown` fires.
//! A tick in progress always completes; shutdown is observed between ticks.

use super::aggregator::WindowAggregator;
use super::health::HealthMonitor;
use super::predictor::PredictorClient;
use super::publisher::ResultPublisher;
use super::shutdown::Shutdown;
use std::sync::Arc;
use tokio::time::{interval, interval_at, Duration, Instant, MissedTickBehavior};

/// Scan loop timing and completion rules
#[derive(Debug, Clone, Copy)]
pub struct ScanSettings {
    pub interval: Duration,
    pub inactivity_threshold: Duration,
    pub min_samples: usize,
}

/// Outcome counts for one scan pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub closed: usize,
    pub predicted: usize,
    pub published: usize,
}

/// Run one scan pass
///
/// Drains every lap that has been inactive longer than the threshold, then
/// for each summary asks the predictor and publishes the result. A failure
/// on one summary never affects the others.
pub async fn scan_once(
    aggregator: &WindowAggregator,
    predictor: &PredictorClient,
    publisher: &ResultPublisher,
    settings: &ScanSettings,
) -> ScanReport {
    let summaries = aggregator.drain_closed(settings.inactivity_threshold, settings.min_samples);

    let mut report = ScanReport {
        closed: summaries.len(),
        ..ScanReport::default()
    };

    for summary in &summaries {
        log::info!(
            "🏎️  Lap completed: {} lap {} ({} samples)",
            summary.driver,
            summary.lap_number,
            summary.sample_count
        );

        let Some(prediction) = predictor.predict(summary).await else {
            continue;
        };
        report.predicted += 1;

        if publisher.publish(summary, &prediction).await {
            report.published += 1;
        }
    }

    if report.closed > 0 {
        log::debug!(
            "Scan pass: {} closed, {} predicted, {} published",
            report.closed,
            report.predicted,
            report.published
        );
    }

    report
}

/// Scan loop task - periodically close laps and publish predictions
///
/// # Arguments
/// * `aggregator` - Shared window aggregator
/// * `predictor` - Gate-aware predictor client
/// * `publisher` - Result publisher
/// * `settings` - Interval, inactivity threshold and minimum sample count
/// * `shutdown` - Stops the loop between ticks
pub async fn scan_loop_task(
    aggregator: Arc<WindowAggregator>,
    predictor: Arc<PredictorClient>,
    publisher: Arc<ResultPublisher>,
    settings: ScanSettings,
    shutdown: Shutdown,
) {
    log::info!(
        "⏰ Starting lap scan loop (interval: {}ms, inactivity: {}ms, min samples: {})",
        settings.interval.as_millis(),
        settings.inactivity_threshold.as_millis(),
        settings.min_samples
    );

    // First scan one full interval after start
    let mut timer = interval_at(Instant::now() + settings.interval, settings.interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = timer.tick() => {}
            _ = shutdown.wait() => break,
        }

        if !shutdown.is_running() {
            break;
        }

        scan_once(&aggregator, &predictor, &publisher, &settings).await;
    }

    log::info!("✅ Lap scan loop stopped");
}

/// Health monitor task - probe the predictor on a fixed interval
///
/// The first probe runs immediately so the gate opens as soon as the
/// predictor is reachable.
pub async fn health_monitor_task(
    monitor: Arc<HealthMonitor>,
    check_interval: Duration,
    shutdown: Shutdown,
) {
    log::info!(
        "💓 Starting predictor health monitor (interval: {}ms)",
        check_interval.as_millis()
    );

    let mut timer = interval(check_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = timer.tick() => {}
            _ = shutdown.wait() => break,
        }

        if !shutdown.is_running() {
            break;
        }

        monitor.check_once().await;
    }

    log::info!("✅ Health monitor stopped");
}
