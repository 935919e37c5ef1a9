//! # imgrelay: a relay in front of a remote image-editing API
//!
//! `imgrelay` exposes one endpoint, `POST /api/v1/relay`. A caller names a publicly reachable
//! image, a remote tool and that tool's parameters; the relay does the staging work the
//! image-editing API expects and answers once the remote job has finished.
//!
//! ## Request Flow
//!
//! For each request the relay:
//!
//! 1. validates the body ([`api::models::relay::RelayRequestBody::validate`])
//! 2. probes the source image for its type, size and file name
//! 3. asks the image-editing API for an upload slot
//! 4. downloads the source and `PUT`s it into the slot
//! 5. invokes the tool on the uploaded file
//! 6. polls the returned job until it succeeds, fails, or runs out of polls
//!
//! Steps 2-6 live in [`relay`]; the HTTP surface in [`api`]. The upstream is reached through the
//! [`relay::ImageEditingApi`] trait, so the pipeline can be driven against a scripted API in tests.
//!
//! Every reply is JSON. Success is `{"success": true, "output": ..., "job_id": ..., "polls": ...}`;
//! any failure is `{"success": false, "error": ..., "data": ...}` where `data` carries the
//! upstream's raw reply when there was one (see [`errors::Error`]).
//!
//! ## Configuration
//!
//! See [`config`] for the YAML file and `IMGRELAY_` environment overrides.
//!
//! ## Observability
//!
//! Logs and optional OTLP span export are set up in [`telemetry`]. With `enable_metrics`, HTTP
//! metrics plus `imgrelay_relays_total` and `imgrelay_job_polls` are served at `/internal/metrics`.

pub mod api;
pub mod config;
pub mod errors;
pub mod openapi;
pub mod relay;
pub mod telemetry;

#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{self, Method},
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument, warn};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use config::Config;

use crate::{
    api::handlers::fallback::{method_not_allowed, not_found},
    config::CorsOrigin,
    openapi::ApiDoc,
    relay::{PollPolicy, RelayOrchestrator, ReqwestImageApi, SourceFetcher},
};

/// Shared state handed to every handler.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .relay(orchestrator)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub relay: RelayOrchestrator,
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let origins = &config.cors.allowed_origins;

    // A wildcard can't be mixed into an origin list, so it takes over
    let allow_origin = if origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut list = Vec::new();
        for origin in origins {
            if let CorsOrigin::Url(url) = origin {
                list.push(url.origin().ascii_serialization().parse::<http::HeaderValue>()?);
            }
        }
        AllowOrigin::list(list)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([http::header::CONTENT_TYPE]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router.
///
/// Routes: `/healthz`, `/api/v1/relay`, `/api/openapi.json`, `/docs`, and `/internal/metrics`
/// when metrics are enabled. Unmatched paths and methods get JSON error bodies.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let relay_routes = Router::new().route(
        "/relay",
        post(api::handlers::relay::relay).layer(DefaultBodyLimit::max(state.config.limits.max_request_body_bytes)),
    );

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/api/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .nest("/api/v1", relay_routes)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(state.clone());

    let mut router = router.layer(create_cors_layer(&state.config)?);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        ServiceBuilder::new().layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        ),
    );

    Ok(router)
}

/// Owns the router and configuration for the lifetime of the process.
///
/// 1. **Create**: [`Application::new`] builds the HTTP client, the upstream API client and the
///    router
/// 2. **Serve**: [`Application::serve`] binds the configured address and handles requests until
///    the shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting relay with configuration: {:#?}", config);

        if config.upstream.api_key.is_none() {
            warn!("No upstream.api_key configured; calls to the image-editing API are unauthenticated");
        }

        let client = relay::http_client(config.upstream.request_timeout)?;
        let source = SourceFetcher::new(client.clone(), config.limits.max_image_bytes);
        let api = Arc::new(ReqwestImageApi::new(client, &config.upstream));
        let orchestrator = RelayOrchestrator::new(source, api, PollPolicy::from(&config.polling));

        let state = AppState::builder().config(config.clone()).relay(orchestrator).build();
        let router = build_router(&state)?;

        Ok(Self { router, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Relay listening on http://{}, forwarding to {}",
            bind_addr, self.config.upstream.base_url
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
