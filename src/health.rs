//! Health server for Kubernetes health checks and Prometheus metrics
//!
//! Provides HTTP endpoints for:
//! - `/healthz` - Liveness check (is the process alive?)
//! - `/readyz` - Readiness check (is the operator ready to serve?)
//! - `/metrics` - Prometheus metrics

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// Labels for metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReconcileLabels {
    pub namespace: String,
    pub name: String,
}

impl prometheus_client::encoding::EncodeLabelSet for ReconcileLabels {
    fn encode(
        &self,
        encoder: &mut prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for the installation stage gauge
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct StageLabels {
    pub stage: String,
}

impl prometheus_client::encoding::EncodeLabelSet for StageLabels {
    fn encode(
        &self,
        encoder: &mut prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("stage", self.stage.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for the version and quota info gauges
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct InfoLabels {
    pub current: String,
    pub target: String,
}

impl prometheus_client::encoding::EncodeLabelSet for InfoLabels {
    fn encode(
        &self,
        encoder: &mut prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("current", self.current.as_str()).encode(encoder.encode_label())?;
        ("target", self.target.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics state
pub struct Metrics {
    /// Total reconciliations counter
    pub reconciliations_total: Family<ReconcileLabels, Counter>,
    /// Failed reconciliations counter
    pub reconciliation_errors_total: Family<ReconcileLabels, Counter>,
    /// Reconciliation duration histogram
    pub reconcile_duration_seconds: Family<ReconcileLabels, Histogram>,

    /// 1 for the stage the installation is in, 0 for every other stage seen
    pub status: Family<StageLabels, Gauge>,
    /// 1 once every install stage has completed
    pub status_available: Gauge,
    /// Installed and target version
    pub version: Family<InfoLabels, Gauge>,
    /// Applied and target capacity tier
    pub quota: Family<InfoLabels, Gauge>,
    /// 1 when the last preflight run passed
    pub preflight_passed: Gauge,
    /// Completed reconciles that asked for pods to be rebalanced
    pub pod_rebalance_requests: Counter,

    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "integreatly_operator_reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "integreatly_operator_reconciliation_errors",
            "Total number of reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ReconcileLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "integreatly_operator_reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let status = Family::<StageLabels, Gauge>::default();
        registry.register(
            "rhoam_status",
            "Current stage of the installation",
            status.clone(),
        );

        let status_available = Gauge::default();
        registry.register(
            "rhoam_status_available",
            "Whether every install stage has completed",
            status_available.clone(),
        );

        let version = Family::<InfoLabels, Gauge>::default();
        registry.register(
            "rhoam_version",
            "Installed and target version of the installation",
            version.clone(),
        );

        let quota = Family::<InfoLabels, Gauge>::default();
        registry.register(
            "rhoam_quota",
            "Applied and target quota of the installation",
            quota.clone(),
        );

        let preflight_passed = Gauge::default();
        registry.register(
            "rhoam_preflight_passed",
            "Whether the last preflight run passed",
            preflight_passed.clone(),
        );

        let pod_rebalance_requests = Counter::default();
        registry.register(
            "rhoam_pod_rebalance_requests",
            "Completed reconciles that requested pod rebalancing",
            pod_rebalance_requests.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            status,
            status_available,
            version,
            quota,
            preflight_passed,
            pod_rebalance_requests,
            registry,
        }
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = ReconcileLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, namespace: &str, name: &str) {
        let labels = ReconcileLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.reconciliation_errors_total
            .get_or_create(&labels)
            .inc();
    }

    /// Point the stage gauge at `stage`
    pub fn set_stage(&self, stage: &str) {
        self.status.clear();
        self.status
            .get_or_create(&StageLabels {
                stage: stage.to_string(),
            })
            .set(1);
        self.status_available.set(i64::from(stage == "complete"));
    }

    pub fn set_version(&self, version: &str, to_version: &str) {
        self.version.clear();
        self.version
            .get_or_create(&InfoLabels {
                current: version.to_string(),
                target: to_version.to_string(),
            })
            .set(1);
    }

    pub fn set_quota(&self, quota: &str, to_quota: &str) {
        self.quota.clear();
        self.quota
            .get_or_create(&InfoLabels {
                current: quota.to_string(),
                target: to_quota.to_string(),
            })
            .set(1);
    }

    pub fn set_preflight_passed(&self, passed: bool) {
        self.preflight_passed.set(i64::from(passed));
    }

    pub fn record_rebalance_request(&self) {
        self.pod_rebalance_requests.inc();
    }

    /// Encode metrics to Prometheus text format
    ///
    /// Returns an empty string if encoding fails (should never happen with valid metrics).
    fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator is ready (connected to K8s API)
    pub ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
    /// Last successful reconcile timestamp
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    /// Mark the operator as ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the operator is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness handler
///
/// Returns 200 OK if the process is alive.
/// This is a simple check - if we can respond, we're alive.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness handler
///
/// Returns 200 OK if the operator is ready to serve.
/// Returns 503 Service Unavailable if not ready.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
///
/// Returns Prometheus-formatted metrics.
async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Run the health server
///
/// Binds to 0.0.0.0:8080 and serves health/metrics endpoints.
pub async fn run_health_server(state: Arc<HealthState>) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let listener = TcpListener::bind("0.0.0.0:8080").await?;
    tracing::info!("Health server listening on 0.0.0.0:8080");

    axum::serve(listener, app).await
}
