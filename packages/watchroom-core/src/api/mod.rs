//! Relay server: pub/sub over WebSocket plus the room directory and catalog.
//!
//! Handlers are thin. Topics live in a [`LocalChannelHub`], so the relay and
//! any in-process sessions share the same broker.

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::channel::LocalChannelHub;
use crate::collaborators::{CatalogVideo, RoomInfo};

pub mod http;
pub mod ws;
pub mod ws_connection;

pub use ws_connection::WsConnectionManager;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),

    /// No available ports in the specified range.
    #[error("No available ports in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },
}

/// Port range probed when no port is configured.
const FALLBACK_PORT_RANGE: (u16, u16) = (49500, 49510);

/// Shared state of the relay.
#[derive(Clone)]
pub struct RelayState {
    /// Topic broker shared by every WebSocket connection.
    pub hub: LocalChannelHub,
    /// Rooms created through `POST /api/rooms`, keyed by id.
    pub rooms: Arc<DashMap<String, RoomInfo>>,
    /// Videos served by `GET /video/list`.
    pub catalog: Arc<RwLock<Vec<CatalogVideo>>>,
    /// Tracks live WebSocket connections.
    pub ws_manager: Arc<WsConnectionManager>,
    /// Origin prefixes allowed by CORS. Empty allows any origin.
    pub trusted_origins: Arc<Vec<String>>,
}

/// Builder for constructing a [`RelayState`].
#[derive(Default)]
pub struct RelayStateBuilder {
    hub: Option<LocalChannelHub>,
    catalog: Vec<CatalogVideo>,
    ws_manager: Option<Arc<WsConnectionManager>>,
    trusted_origins: Vec<String>,
}

impl RelayStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shares an existing hub instead of creating a private one.
    pub fn hub(mut self, hub: LocalChannelHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Sets the catalog listing.
    pub fn catalog(mut self, catalog: Vec<CatalogVideo>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Sets the WebSocket connection manager.
    pub fn ws_manager(mut self, manager: Arc<WsConnectionManager>) -> Self {
        self.ws_manager = Some(manager);
        self
    }

    /// Sets the CORS origin prefixes.
    pub fn trusted_origins(mut self, origins: Vec<String>) -> Self {
        self.trusted_origins = origins;
        self
    }

    pub fn build(self) -> RelayState {
        RelayState {
            hub: self.hub.unwrap_or_default(),
            rooms: Arc::new(DashMap::new()),
            catalog: Arc::new(RwLock::new(self.catalog)),
            ws_manager: self.ws_manager.unwrap_or_default(),
            trusted_origins: Arc::new(self.trusted_origins),
        }
    }
}

impl RelayState {
    pub fn builder() -> RelayStateBuilder {
        RelayStateBuilder::new()
    }

    /// Replaces the catalog listing.
    pub fn set_catalog(&self, catalog: Vec<CatalogVideo>) {
        *self.catalog.write() = catalog;
    }
}

async fn find_available_port(
    start: u16,
    end: u16,
) -> Result<(u16, tokio::net::TcpListener), ServerError> {
    for port in start..=end {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => return Ok((port, listener)),
            Err(_) => continue,
        }
    }
    Err(ServerError::NoAvailablePort { start, end })
}

/// Binds `preferred_port`, or the first free port of the fallback range when it is 0.
pub async fn bind(preferred_port: u16) -> Result<(u16, tokio::net::TcpListener), ServerError> {
    if preferred_port > 0 {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], preferred_port));
        Ok((preferred_port, tokio::net::TcpListener::bind(&addr).await?))
    } else {
        let (start, end) = FALLBACK_PORT_RANGE;
        find_available_port(start, end).await
    }
}

fn cors_layer(trusted_origins: Arc<Vec<String>>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    if trusted_origins.is_empty() {
        return cors.allow_origin(Any);
    }
    cors.allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let origin = origin.to_str().unwrap_or("");
        trusted_origins
            .iter()
            .any(|allowed| origin.starts_with(allowed.as_str()))
    }))
}

/// Serves the relay on an already bound listener until the server stops.
pub async fn serve(listener: tokio::net::TcpListener, state: RelayState) -> Result<(), ServerError> {
    let cors = cors_layer(Arc::clone(&state.trusted_origins));
    let app = http::create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    axum::serve(listener, app).await?;
    Ok(())
}

/// Binds and serves the relay.
pub async fn start_server(state: RelayState, preferred_port: u16) -> Result<(), ServerError> {
    let (port, listener) = bind(preferred_port).await?;
    log::info!("Relay listening on http://0.0.0.0:{}", port);
    serve(listener, state).await
}
