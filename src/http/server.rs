//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the session store and relay engine from config
//! - Create the Axum router for the uplink and downlink endpoints
//! - Wire up middleware (tracing, request ID, body limit, timeouts)
//! - Run the eviction sweeper alongside the listener
//! - Close every session on shutdown

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use axum::routing::{get, post};
use axum::{middleware, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::admin;
use crate::config::{validate_config, ConfigError, TunnelConfig, ValidationError};
use crate::http::handlers;
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::http::response::decorate;
use crate::relay::{Connector, RelayEngine, RelaySettings, TcpConnector};
use crate::session::{SessionStore, StoreSettings, Sweeper, Timeouts};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub config: Arc<TunnelConfig>,
}

/// HTTP front end of the tunnel.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a server that dials destinations over TCP.
    pub fn new(config: TunnelConfig) -> Result<Self, ConfigError> {
        let connector = TcpConnector::new(Duration::from_secs(config.timeouts.connect_secs));
        Self::with_connector(config, Arc::new(connector))
    }

    /// Create a server that opens upstream channels through `connector`.
    pub fn with_connector(
        config: TunnelConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        let secret = config.secret().ok_or_else(|| {
            ConfigError::Validation(vec![ValidationError::new("tunnel.secret", "must be a UUID")])
        })?;

        let tunnel = &config.tunnel;
        let engine = RelayEngine::new(
            connector,
            RelaySettings {
                uplink_queue_chunks: tunnel.max_buffered_chunks,
                downlink_read_bytes: tunnel.downlink_read_bytes,
            },
        );
        let store = SessionStore::new(
            secret,
            engine,
            StoreSettings {
                max_chunk_bytes: tunnel.max_chunk_bytes,
                downlink_queue_chunks: tunnel.downlink_queue_chunks,
                timeouts: Timeouts {
                    idle: tunnel.idle_timeout(),
                    bootstrap: tunnel.bootstrap_timeout(),
                },
            },
        );

        let state = AppState {
            store: Arc::new(store),
            config: Arc::new(config),
        };
        let router = Self::build_router(state.clone());
        Ok(Self { router, state })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState) -> Router {
        let config = state.config.clone();
        let base = config.tunnel.base_path.trim_end_matches('/');

        // GET streams live as long as the session, so only uploads are bounded.
        let uplink = post(handlers::upload_chunk).layer(TimeoutLayer::new(Duration::from_secs(
            config.timeouts.request_secs,
        )));

        let mut app = Router::new()
            .route(&format!("{base}/{{session_id}}/{{seq}}"), uplink)
            .route(&format!("{base}/{{session_id}}"), get(handlers::open_downlink))
            .route_layer(middleware::map_response_with_state(config.padding.clone(), decorate))
            .layer(DefaultBodyLimit::max(config.tunnel.max_chunk_bytes))
            .with_state(state.clone());

        if config.admin.enabled {
            app = app.merge(admin::router(state));
        }

        app.layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = %request_id(request.headers()),
                )
            }))
            .layer(set_request_id_layer())
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            base_path = %self.state.config.tunnel.base_path,
            "HTTP server starting"
        );

        let sweeper = Sweeper::new(
            self.state.store.clone(),
            self.state.config.tunnel.sweep_interval(),
        );
        let sweeper_task = tokio::spawn(sweeper.run(shutdown.resubscribe()));

        // Open downlinks only end when their session closes, so sessions
        // are closed before the server waits for connections to drain.
        let store = self.state.store.clone();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
                store.close_all().await;
            })
            .await?;

        let _ = sweeper_task.await;
        self.state.store.close_all().await;
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn store(&self) -> Arc<SessionStore> {
        self.state.store.clone()
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.state.config
    }
}
