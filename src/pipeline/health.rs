//! Predictor liveness gate and the monitor that refreshes it
//!
//! The gate is a shared flag read by `PredictorClient` before every call.
//! Only `HealthMonitor` writes it.

use super::predictor::PredictorTransport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared predictor availability flag (starts closed)
#[derive(Debug, Clone, Default)]
pub struct HealthGate {
    available: Arc<AtomicBool>,
}

impl HealthGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Returns the previous value
    fn set(&self, available: bool) -> bool {
        self.available.swap(available, Ordering::AcqRel)
    }
}

/// Probes the predictor and writes the gate
pub struct HealthMonitor {
    transport: Arc<dyn PredictorTransport>,
    gate: HealthGate,
}

impl HealthMonitor {
    pub fn new(transport: Arc<dyn PredictorTransport>, gate: HealthGate) -> Self {
        Self { transport, gate }
    }

    /// Run one liveness probe and update the gate
    ///
    /// Any 2xx response marks the predictor available; a non-2xx status
    /// or a network failure marks it unavailable. Only transitions are
    /// logged above debug.
    ///
    /// # Returns
    /// The new gate value
    pub async fn check_once(&self) -> bool {
        let available = match self.transport.probe_health().await {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Predictor health probe failed: {}", e);
                false
            }
        };

        let previous = self.gate.set(available);
        if previous != available {
            if available {
                log::info!("✅ Predictor service is available");
            } else {
                log::warn!("⚠️  Predictor service is not responding, predictions paused");
            }
        }

        available
    }
}
