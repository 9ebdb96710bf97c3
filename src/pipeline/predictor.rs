//! Lap time predictor client
//!
//! Bridges closed lap summaries to the external prediction service.
//!
//! ## API Reference
//!
//! - `POST {base_url}/predict` - body `PredictionRequest`, returns `PredictionResponse`
//! - `GET {base_url}/health` - any 2xx means available
//!
//! Calls are at-most-once: no retries, no requeue. A lap whose prediction
//! fails is simply not published.

use super::health::HealthGate;
use super::types::{throttle_ratio, ConfidenceInterval, PredictionResult, Summary};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum PredictorError {
    #[error("Predictor request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Predictor returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Flat feature object sent to the predictor
///
/// Throttle is sent on a 0-1 scale. Fields never observed during the lap
/// are sent as 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub driver: String,
    pub lap_number: i64,
    pub speed: f64,
    pub throttle: f64,
    pub brake: bool,
    pub n_gear: i64,
    pub rpm: f64,
    pub drs: bool,
    pub x: f64,
    pub y: f64,
}

impl PredictionRequest {
    pub fn from_summary(summary: &Summary) -> Self {
        Self {
            driver: summary.driver.clone(),
            lap_number: summary.lap_number,
            speed: summary.speed.unwrap_or(0.0),
            throttle: summary.throttle.map(throttle_ratio).unwrap_or(0.0),
            brake: summary.brake,
            n_gear: summary.n_gear.unwrap_or(0),
            rpm: summary.rpm.unwrap_or(0.0),
            drs: summary.drs,
            x: summary.x.unwrap_or(0.0),
            y: summary.y.unwrap_or(0.0),
        }
    }
}

/// Predictor response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub predicted_lap_time: f64,
    pub confidence_interval: ConfidenceInterval,
    #[serde(default)]
    pub model_version: Option<String>,
}

impl From<PredictionResponse> for PredictionResult {
    fn from(response: PredictionResponse) -> Self {
        Self {
            predicted_lap_time: response.predicted_lap_time,
            confidence_interval: response.confidence_interval,
            model_version: response
                .model_version
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

/// Transport to the predictor service
#[async_trait]
pub trait PredictorTransport: Send + Sync {
    /// Request one prediction
    async fn predict(&self, request: &PredictionRequest)
        -> Result<PredictionResponse, PredictorError>;

    /// Liveness probe; `Ok` means available
    async fn probe_health(&self) -> Result<(), PredictorError>;
}

/// HTTP transport backed by `reqwest`
pub struct HttpPredictorTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPredictorTransport {
    /// Create a transport with a per-request timeout
    ///
    /// # Arguments
    /// * `base_url` - Service root, e.g. `http://mlaas:8000`
    /// * `timeout` - Applies to both prediction and health requests
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PredictorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PredictorTransport for HttpPredictorTransport {
    async fn predict(
        &self,
        request: &PredictionRequest,
    ) -> Result<PredictionResponse, PredictorError> {
        let url = format!("{}/predict", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PredictorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }

    async fn probe_health(&self) -> Result<(), PredictorError> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(PredictorError::Status {
                status: status.as_u16(),
                body: String::new(),
            })
        }
    }
}

/// Gate-aware prediction client
pub struct PredictorClient {
    transport: Arc<dyn PredictorTransport>,
    gate: HealthGate,
}

impl PredictorClient {
    pub fn new(transport: Arc<dyn PredictorTransport>, gate: HealthGate) -> Self {
        Self { transport, gate }
    }

    /// Ask the predictor for a lap time estimate
    ///
    /// Returns `None` immediately (no request issued) while the health gate
    /// is closed. Otherwise makes exactly one request; any failure is
    /// logged and yields `None`.
    pub async fn predict(&self, summary: &Summary) -> Option<PredictionResult> {
        if !self.gate.is_available() {
            log::warn!(
                "⚠️  Predictor not available, skipping prediction for {} lap {}",
                summary.driver,
                summary.lap_number
            );
            return None;
        }

        let request = PredictionRequest::from_summary(summary);
        match self.transport.predict(&request).await {
            Ok(response) => Some(response.into()),
            Err(e) => {
                log::error!(
                    "❌ Prediction failed for {} lap {}: {}",
                    summary.driver,
                    summary.lap_number,
                    e
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_summary(throttle: Option<f64>) -> Summary {
        Summary {
            driver: "BOT".to_string(),
            lap_number: 21,
            speed: Some(198.4),
            throttle,
            rpm: None,
            x: Some(3.0),
            y: Some(4.0),
            brake: true,
            drs: true,
            n_gear: Some(5),
            sample_count: 30,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_request_rescales_throttle_and_zero_fills() {
        let request = PredictionRequest::from_summary(&make_summary(Some(82.0)));

        assert_eq!(request.throttle, 0.82);
        assert_eq!(request.rpm, 0.0);
        assert_eq!(request.n_gear, 5);
        assert!(request.brake);
        assert!(request.drs);
    }

    #[test]
    fn test_response_without_version_is_unknown() {
        let response: PredictionResponse = serde_json::from_str(
            r#"{"predicted_lap_time": 93.4, "confidence_interval": {"lower": 92.0, "upper": 94.8}}"#,
        )
        .unwrap();

        let result: PredictionResult = response.into();
        assert_eq!(result.model_version, "unknown");
        assert_eq!(result.confidence_interval.lower, 92.0);
        assert_eq!(result.predicted_lap_time, 93.4);
    }

    /// Stub transport counting prediction calls
    struct CountingTransport {
        healthy: bool,
        fail_predictions: bool,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl CountingTransport {
        fn new(healthy: bool, fail_predictions: bool) -> Arc<Self> {
            Arc::new(Self {
                healthy,
                fail_predictions,
                calls: std::sync::atomic::AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PredictorTransport for CountingTransport {
        async fn predict(
            &self,
            request: &PredictionRequest,
        ) -> Result<PredictionResponse, PredictorError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if self.fail_predictions {
                return Err(PredictorError::Status {
                    status: 500,
                    body: "model not trained".to_string(),
                });
            }
            Ok(PredictionResponse {
                predicted_lap_time: 80.0 + request.lap_number as f64,
                confidence_interval: ConfidenceInterval {
                    lower: 79.0,
                    upper: 81.0,
                },
                model_version: Some("2.0.0".to_string()),
            })
        }

        async fn probe_health(&self) -> Result<(), PredictorError> {
            if self.healthy {
                Ok(())
            } else {
                Err(PredictorError::Status {
                    status: 503,
                    body: String::new(),
                })
            }
        }
    }

    #[tokio::test]
    async fn test_closed_gate_makes_no_call() {
        let transport = CountingTransport::new(false, false);
        let gate = HealthGate::new();
        let monitor = crate::pipeline::health::HealthMonitor::new(transport.clone(), gate.clone());
        monitor.check_once().await;

        let client = PredictorClient::new(transport.clone(), gate);
        assert!(client.predict(&make_summary(Some(50.0))).await.is_none());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_open_gate_makes_exactly_one_call() {
        let transport = CountingTransport::new(true, false);
        let gate = HealthGate::new();
        let monitor = crate::pipeline::health::HealthMonitor::new(transport.clone(), gate.clone());
        monitor.check_once().await;

        let client = PredictorClient::new(transport.clone(), gate);
        let result = client.predict(&make_summary(Some(50.0))).await.unwrap();

        assert_eq!(transport.calls(), 1);
        assert_eq!(result.predicted_lap_time, 101.0);
        assert_eq!(result.model_version, "2.0.0");
    }

    #[tokio::test]
    async fn test_failed_prediction_is_not_retried() {
        let transport = CountingTransport::new(true, true);
        let gate = HealthGate::new();
        let monitor = crate::pipeline::health::HealthMonitor::new(transport.clone(), gate.clone());
        monitor.check_once().await;

        let client = PredictorClient::new(transport.clone(), gate);
        assert!(client.predict(&make_summary(None)).await.is_none());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_http_transport_reports_unreachable_service() {
        // Port 9 (discard) is not expected to have an HTTP listener
        let transport =
            HttpPredictorTransport::new("http://127.0.0.1:9/", Duration::from_millis(500)).unwrap();

        assert!(transport.probe_health().await.is_err());
        assert!(transport
            .predict(&PredictionRequest::from_summary(&make_summary(None)))
            .await
            .is_err());
    }
}
