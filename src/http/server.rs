//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy and favicon handlers
//! - Wire up middleware (request ID, tracing)
//! - Build the shared, immutable collaborators once at startup
//! - Serve until the shutdown signal, draining in-flight responses

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, RawQuery, State},
    http::{HeaderMap, Request, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::compress::{CompressionPolicy, Transcoder, TranscoderConfig};
use crate::config::ProxyConfig;
use crate::http::proxy;
use crate::http::request::ProxyParams;
use crate::http::request_id::{request_id, MakeRequestUuidV4};
use crate::identity::{IdentityGenerator, RandomIdentity};
use crate::lifecycle::shutdown;
use crate::origin::OriginFetcher;
use crate::security::LoopGuard;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub fetcher: OriginFetcher,
    pub transcoder: Transcoder,
    pub policy: CompressionPolicy,
    pub loop_guard: LoopGuard,
    pub identity: Arc<dyn IdentityGenerator>,
    pub request_timeout_secs: u64,
}

impl AppState {
    pub fn from_config(config: &ProxyConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            fetcher: OriginFetcher::new(&config.origin, &config.timeouts)?,
            transcoder: Transcoder::new(TranscoderConfig {
                animate: config.compression.animate,
                max_dimension: config.compression.max_dimension,
            }),
            policy: CompressionPolicy::from(&config.compression),
            loop_guard: LoopGuard,
            identity: Arc::new(RandomIdentity),
            request_timeout_secs: config.timeouts.request_secs,
        })
    }

    /// Replace the sentinel identity source.
    pub fn with_identity(mut self, identity: Arc<dyn IdentityGenerator>) -> Self {
        self.identity = identity;
        self
    }
}

/// HTTP server for the image proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Result<Self, reqwest::Error> {
        let state = AppState::from_config(&config)?;
        Ok(Self::with_state(config, state))
    }

    /// Create a server around prebuilt state.
    pub fn with_state(config: ProxyConfig, state: AppState) -> Self {
        Self {
            router: build_router(state),
            config,
        }
    }

    /// The fully layered router, for driving requests without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            animate = self.config.compression.animate,
            max_redirects = self.config.origin.max_redirects,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown::wait(shutdown_rx))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Build the Axum router with all middleware layers.
pub fn build_router(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV4))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            tracing::info_span!(
                "request",
                request_id = %request_id(request),
                method = %request.method(),
                uri = %request.uri(),
            )
        }))
        .layer(PropagateRequestIdLayer::x_request_id());

    Router::new()
        .route("/", get(proxy_handler))
        .route("/favicon.ico", get(favicon_handler))
        .with_state(state)
        .layer(middleware)
}

async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let params = ProxyParams::from_query(query.as_deref());
    proxy::handle(&state, params, headers, peer.ip()).await
}

async fn favicon_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}
