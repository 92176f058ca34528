//! HTTP listener using Axum.
//!
//! A single catch-all route feeds every request to [`dispatch`]. Response
//! headers for CORS and caching are attached by layers so that every
//! response carries them, error responses and preflights included.

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Request, State},
    http::{
        HeaderValue,
        header::{ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL},
    },
    response::Response,
};
use mc_protocol::{ExecutionContext, LogLevel, LogSubSystem};
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;

use crate::dispatch::dispatch;
use crate::error::TransportError;

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Hostname or address to bind to
    pub hostname: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            hostname: "0.0.0.0".into(),
            port: 8869,
        }
    }
}

/// Shared state for the router.
#[derive(Clone)]
struct AppState {
    context: Arc<dyn ExecutionContext>,
}

/// Build the catch-all REST router around an execution context.
pub fn rest_router(context: Arc<dyn ExecutionContext>) -> Router {
    Router::new()
        .fallback(rest_handler)
        .with_state(AppState { context })
        .layer(CompressionLayer::new())
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        ))
}

async fn rest_handler(State(state): State<AppState>, request: Request) -> Response {
    dispatch(&state.context, request).await
}

/// A bound REST listener, ready to serve.
pub struct RestServer {
    listener: TcpListener,
    router: Router,
    addr: SocketAddr,
    /// `host:port` as configured, or the bound address for a pre-bound listener
    endpoint: String,
    context: Arc<dyn ExecutionContext>,
}

impl RestServer {
    /// Bind to the configured host and port.
    pub async fn bind(
        config: &TransportConfig,
        context: Arc<dyn ExecutionContext>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind((config.hostname.as_str(), config.port))
            .await
            .map_err(|source| TransportError::Bind {
                host: config.hostname.clone(),
                port: config.port,
                source,
            })?;
        let mut server = Self::from_listener(listener, context)?;
        server.endpoint = format!("{}:{}", config.hostname, config.port);
        Ok(server)
    }

    /// Serve on an already bound listener.
    pub fn from_listener(
        listener: TcpListener,
        context: Arc<dyn ExecutionContext>,
    ) -> Result<Self, TransportError> {
        let addr = listener.local_addr().map_err(TransportError::LocalAddr)?;
        Ok(Self {
            listener,
            router: rest_router(context.clone()),
            addr,
            endpoint: addr.to_string(),
            context,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Accept connections until the server fails or `shutdown` resolves.
    ///
    /// Requests still in flight when `shutdown` resolves are not waited for.
    pub async fn serve_until<F>(self, shutdown: F) -> Result<(), TransportError>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = self.addr;
        self.context.log(
            &format!("Listening on {}", self.endpoint),
            LogSubSystem::Network,
            LogLevel::Message,
        );
        info!(endpoint = %self.endpoint, "REST server listening on http://{addr}");

        tokio::select! {
            result = axum::serve(self.listener, self.router).into_future() => {
                result.map_err(|source| TransportError::Serve { addr, source })
            }
            _ = shutdown => {
                info!("REST server on {addr} stopped");
                Ok(())
            }
        }
    }
}
