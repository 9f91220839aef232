//! adguidsync ensures every OS2mo employee carries their Active Directory
//! object GUID as an IT user.

#![forbid(unsafe_code)]
pub mod config;
pub mod error;
pub mod ldap;
pub mod loader;
#[cfg(test)]
mod mock;
pub mod model;
pub mod ports;
pub mod registry;
pub mod resolver;
mod router;
pub mod sync;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

pub use error::{Error, Result};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: axum::http::Method,
    path: &str,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .body(axum::body::Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub synchronizer: Arc<sync::Synchronizer>,
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout);
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout));

    let mut router = Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        .nest("/trigger", router::trigger_router());

    if state.metrics.is_some() {
        // `GET /metrics` renders Prometheus metrics.
        router = router.route("/metrics", get(render_metrics));
    }

    router
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

async fn render_metrics(State(state): State<AppState>) -> String {
    state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

/// Initialize the application state.
pub async fn initialize_state(
    config: Arc<config::Configuration>,
    metrics: Option<PrometheusHandle>,
) -> std::result::Result<AppState, Box<dyn std::error::Error>> {
    let registry: Arc<dyn ports::Registry> =
        Arc::new(registry::GraphQlRegistry::new(&config.registry)?);
    tracing::info!(endpoint = %config.registry.graphql_url(), "OS2mo client ready");

    // the directory is only ever searched, never written.
    let directory: Arc<dyn ports::Directory> =
        Arc::new(ldap::Ldap::connect(&config.ldap).await?);

    let resolvers = resolver::Resolvers::new(
        Arc::clone(&registry),
        directory,
        config.ldap.cpr_attribute.clone(),
        config.ldap.search_base.clone(),
        config.batch.policy(),
    );
    let synchronizer = sync::Synchronizer::new(
        resolvers,
        registry,
        Arc::new(ports::SystemClock),
        sync::ItSystemRef::from(&config.it_system),
        config.sync.concurrency,
    );

    Ok(AppState {
        config,
        synchronizer: Arc::new(synchronizer),
        metrics,
    })
}
