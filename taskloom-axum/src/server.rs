use axum::http::{header::HeaderName, HeaderValue, Method};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{info, warn};

use taskloom::RequestHandler;

use crate::routes::{create_routes, ServerState};

/// CORS settings for the protocol endpoint. Unset fields fall back to
/// allowing anything, which suits same-trust deployments; preflight
/// `OPTIONS` requests are answered by the layer itself.
#[derive(Debug, Clone, Default)]
pub struct CorsConfig {
    /// Value for `Access-Control-Allow-Origin`.
    pub allow_origin: Option<String>,
    /// Comma-separated list for `Access-Control-Allow-Headers`.
    pub allow_headers: Option<String>,
    /// Comma-separated list for `Access-Control-Allow-Methods`.
    pub allow_methods: Option<String>,
}

impl CorsConfig {
    fn layer(&self) -> CorsLayer {
        let origin = match self.allow_origin.as_deref() {
            None | Some("*") => AllowOrigin::any(),
            Some(origin) => match origin.parse::<HeaderValue>() {
                Ok(value) => AllowOrigin::exact(value),
                Err(err) => {
                    warn!(origin, error = %err, "invalid CORS origin, allowing any");
                    AllowOrigin::any()
                }
            },
        };

        let headers = match self.allow_headers.as_deref() {
            None | Some("*") => AllowHeaders::any(),
            Some(list) => AllowHeaders::list(
                list.split(',')
                    .filter_map(|name| name.trim().parse::<HeaderName>().ok()),
            ),
        };

        let methods = match self.allow_methods.as_deref() {
            None | Some("*") => AllowMethods::any(),
            Some(list) => AllowMethods::list(
                list.split(',')
                    .filter_map(|name| name.trim().parse::<Method>().ok()),
            ),
        };

        CorsLayer::new()
            .allow_origin(origin)
            .allow_headers(headers)
            .allow_methods(methods)
    }
}

/// A2A protocol server over a [`RequestHandler`].
pub struct A2AServer {
    handler: Arc<RequestHandler>,
    base_path: String,
    cors: CorsConfig,
}

impl A2AServer {
    /// Create a new server builder.
    pub fn builder(handler: Arc<RequestHandler>) -> A2AServerBuilder {
        A2AServerBuilder::new(handler)
    }

    /// Convert the server into an Axum router.
    pub fn into_router(self) -> Router {
        let state = ServerState {
            handler: self.handler,
        };
        create_routes(state, &self.base_path).layer(self.cors.layer())
    }

    /// Run the server on the specified address.
    pub async fn serve(self, addr: impl tokio::net::ToSocketAddrs) -> Result<(), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let card = self.handler.agent_card();
        info!("A2A server listening at http://{local_addr}{}", self.base_path);
        info!(
            "agent card: {} v{} at http://{local_addr}{}/.well-known/agent.json",
            card.name,
            card.version,
            self.base_path.trim_end_matches('/')
        );
        if card.url.is_empty() {
            warn!("agent card has no URL; other agents cannot reach this one");
        }

        axum::serve(listener, self.into_router()).await
    }
}

/// Builder for configuring an [`A2AServer`].
pub struct A2AServerBuilder {
    handler: Arc<RequestHandler>,
    base_path: String,
    cors: CorsConfig,
}

impl A2AServerBuilder {
    fn new(handler: Arc<RequestHandler>) -> Self {
        Self {
            handler,
            base_path: "/".to_string(),
            cors: CorsConfig::default(),
        }
    }

    /// Mount the JSON-RPC endpoint somewhere other than `/`.
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        let mut base_path = base_path.into();
        if !base_path.starts_with('/') {
            base_path.insert(0, '/');
        }
        self.base_path = base_path;
        self
    }

    /// Configure CORS response headers.
    pub fn with_cors(mut self, cors: CorsConfig) -> Self {
        self.cors = cors;
        self
    }

    pub fn build(self) -> A2AServer {
        A2AServer {
            handler: self.handler,
            base_path: self.base_path,
            cors: self.cors,
        }
    }
}
