//! # Lap Analytics Pipeline
//!
//! In-memory pipeline turning raw telemetry into lap predictions and
//! threshold events.
//!
//! ## Data flow
//!
//! 1. Bus payloads are normalized (`normalizer`) and handed to a bounded
//!    ingest channel (`ingestion`)
//! 2. The single consumer runs every message through the rule engine
//!    (`rules`), publishing events immediately, and adds identified samples
//!    to the window aggregator (`aggregator`)
//! 3. The scan loop (`scheduler`) drains laps that have gone quiet, asks the
//!    predictor (`predictor`) and publishes enriched records (`publisher`)
//!    into the output bus and the history caches (`history`)
//! 4. The health monitor (`health`) keeps the predictor gate current
//!
//! **Key Principle:** nothing is persisted. A lap lives in memory only
//! until it is drained; a dropped message or failed call is logged and
//! forgotten.
//!
//! ## Module Organization
//!
//! - `types` - Core data structures (Sample, Summary, TelemetryEvent, EnrichedRecord)
//! - `normalizer` - Field aliasing and value coercion
//! - `windows` - Per-lap accumulation state
//! - `aggregator` - Keyed window map with atomic drain
//! - `rules` - Stateless threshold rules
//! - `predictor` / `health` - Predictor transport, client and liveness gate
//! - `publisher` / `history` - Result output and read caches
//! - `ingestion` / `scheduler` / `service` - Tasks and wiring
//! - `config` / `shutdown` - Environment configuration and cooperative stop

pub mod types;
pub mod normalizer;
pub mod windows;
pub mod aggregator;
pub mod rules;
pub mod predictor;
pub mod health;
pub mod history;
pub mod publisher;
pub mod ingestion;
pub mod scheduler;
pub mod service;
pub mod config;
pub mod shutdown;

// Re-export commonly used types
pub use types::{EnrichedRecord, EventType, PredictionResult, Sample, Summary, TelemetryEvent, WindowKey};
pub use normalizer::TelemetryMessage;
pub use aggregator::{AddOutcome, WindowAggregator};
pub use rules::{RuleEngine, RuleLimits};
pub use predictor::{HttpPredictorTransport, PredictorClient, PredictorTransport};
pub use health::{HealthGate, HealthMonitor};
pub use history::PredictionHistory;
pub use publisher::ResultPublisher;
pub use ingestion::{IngestHandle, IngestStats};
pub use service::{AnalyticsService, ServiceComponents};
pub use config::{ConfigError, PipelineConfig};
pub use shutdown::Shutdown;
