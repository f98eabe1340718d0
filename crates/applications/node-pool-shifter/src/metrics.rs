//! Cycle outcome metrics and their Prometheus endpoint

use crate::error::Result;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Name of the outcome counter
pub const NODE_TOTALS_METRIC: &str = "node_pool_shifter_node_totals";

/// Result of one control loop cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleOutcome {
    /// One node per zone moved from the source to the target pool
    Shifted,
    /// Nothing to do this cycle
    Skipped,
    /// A fetch, resize or verification step failed
    Failed,
}

impl CycleOutcome {
    /// All outcomes, in label order
    pub const ALL: [CycleOutcome; 3] = [Self::Shifted, Self::Skipped, Self::Failed];

    /// Metric label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shifted => "shifted",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink for cycle outcomes
pub trait OutcomeRecorder: Send + Sync {
    /// Count one cycle with the given outcome
    fn record(&self, outcome: CycleOutcome);
}

/// Prometheus registry holding the shifter's counters
#[derive(Clone)]
pub struct ShifterMetrics {
    registry: Registry,
    node_totals: IntCounterVec,
}

impl ShifterMetrics {
    /// Create and register the outcome counter
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let node_totals = IntCounterVec::new(
            Opts::new(NODE_TOTALS_METRIC, "Number of processed nodes."),
            &["status"],
        )?;
        registry.register(Box::new(node_totals.clone()))?;

        Ok(Self {
            registry,
            node_totals,
        })
    }

    /// Current value of the counter for one outcome
    pub fn count(&self, outcome: CycleOutcome) -> u64 {
        self.node_totals
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    /// Render every registered metric in the Prometheus text format
    pub fn export(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl OutcomeRecorder for ShifterMetrics {
    fn record(&self, outcome: CycleOutcome) {
        self.node_totals
            .with_label_values(&[outcome.as_str()])
            .inc();
    }
}

async fn metrics_handler(State(metrics): State<Arc<ShifterMetrics>>) -> Response {
    match metrics.export() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Path of the liveness probe endpoint
pub const LIVENESS_PATH: &str = "/liveness";

async fn liveness_handler() -> &'static str {
    "I'm alive!"
}

/// Router exposing metrics on `metrics_path` and `/liveness`
pub fn router(metrics: Arc<ShifterMetrics>, metrics_path: &str) -> Router {
    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route(LIVENESS_PATH, get(liveness_handler))
        .with_state(metrics)
}

/// Serve the metrics router until `shutdown` fires
pub async fn serve(
    addr: SocketAddr,
    metrics_path: &str,
    metrics: Arc<ShifterMetrics>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Serving metrics on http://{}{}", addr, metrics_path);

    axum::serve(listener, router(metrics, metrics_path))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        let labels: Vec<_> = CycleOutcome::ALL.iter().map(|o| o.as_str()).collect();
        assert_eq!(labels, vec!["shifted", "skipped", "failed"]);
        assert_eq!(CycleOutcome::Failed.to_string(), "failed");
    }

    #[test]
    fn test_record_increments_labelled_counter() {
        let metrics = ShifterMetrics::new().unwrap();
        metrics.record(CycleOutcome::Skipped);
        metrics.record(CycleOutcome::Skipped);
        metrics.record(CycleOutcome::Shifted);

        assert_eq!(metrics.count(CycleOutcome::Skipped), 2);
        assert_eq!(metrics.count(CycleOutcome::Shifted), 1);
        assert_eq!(metrics.count(CycleOutcome::Failed), 0);

        let output = metrics.export().unwrap();
        assert!(output.contains(r#"node_pool_shifter_node_totals{status="skipped"} 2"#));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let metrics = Arc::new(ShifterMetrics::new().unwrap());
        metrics.record(CycleOutcome::Failed);

        let shutdown = CancellationToken::new();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn({
            let shutdown = shutdown.clone();
            let app = router(metrics.clone(), "/metrics");
            async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown.cancelled_owned())
                    .await
            }
        });

        let body = reqwest::get(format!("http://{}/metrics", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains(r#"status="failed"} 1"#));

        let live = reqwest::get(format!("http://{}/liveness", addr)).await.unwrap();
        assert!(live.status().is_success());

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
