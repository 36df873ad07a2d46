//! HTTP front end for analysis requests.
//!
//! Every `POST /api/analyze` passes through the rate limiter once before the
//! analysis pipeline sees it.

mod auth;
mod handlers;
mod routes;

pub use auth::{bearer_token, IdentityProvider, StaticTokenIdentity};
pub use handlers::AnalyzeRequest;
pub use routes::create_router;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::{Result, WebInsightError};
use crate::pipeline::AnalysisPipeline;
use crate::ratelimit::RateLimiter;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub identity: Arc<dyn IdentityProvider>,
    pub pipeline: Arc<dyn AnalysisPipeline>,
}

impl AppState {
    pub fn new(
        limiter: Arc<RateLimiter>,
        identity: Arc<dyn IdentityProvider>,
        pipeline: Arc<dyn AnalysisPipeline>,
    ) -> Self {
        Self {
            limiter,
            identity,
            pipeline,
        }
    }
}

/// HTTP server for the analysis API.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self { addr, state }
    }

    /// Serve until `signal` resolves, then drain in-flight requests.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = create_router(self.state);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "Starting HTTP server");

        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                WebInsightError::Server(e.to_string())
            })
    }
}
