//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with sandbox, keyed and health handlers
//! - Wire up middleware (timeout, CORS, request ID, tracing)
//! - Normalize doubled slashes before routing
//! - Bind server to listener and drain on shutdown

use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::{header, HeaderName, Method};
use axum::routing::{any, get};
use axum::{Router, ServiceExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::util::MapRequestLayer;
use tower::Layer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::chaos::FaultInjector;
use crate::config::ProxyConfig;
use crate::forwarding::Forwarder;
use crate::http::handlers::{health, key_proxy_handler, missing_key, sandbox_handler};
use crate::http::request::{collapse_slashes, propagate_request_id_layer, set_request_id_layer};
use crate::store::{KeyStore, UsageSink};
use crate::usage::UsageRecorder;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub key_store: Arc<dyn KeyStore>,
    pub recorder: UsageRecorder,
    pub injector: Arc<FaultInjector>,
    pub forwarder: Forwarder,
}

/// HTTP server for the chaos proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration and stores.
    pub fn new(config: ProxyConfig, key_store: Arc<dyn KeyStore>, usage_sink: Arc<dyn UsageSink>) -> Self {
        let state = AppState {
            key_store,
            recorder: UsageRecorder::new(
                usage_sink,
                Duration::from_millis(config.usage.settle_grace_ms),
            ),
            injector: Arc::new(FaultInjector::new()),
            forwarder: Forwarder::new(&config.upstream, &config.timeouts),
        };

        let router = Self::build_router(&config, state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::PATCH,
                Method::OPTIONS,
            ])
            .allow_headers([
                header::ORIGIN,
                header::CONTENT_TYPE,
                header::ACCEPT,
                header::AUTHORIZATION,
                HeaderName::from_static("x-api-key"),
            ]);

        // `/{key}/{*rest}` does not match an empty remainder, hence `/{key}/`.
        Router::new()
            .route("/health", get(health))
            .route("/sandbox", get(sandbox_handler))
            .route("/{key}", any(key_proxy_handler))
            .route("/{key}/", any(key_proxy_handler))
            .route("/{key}/{*rest}", any(key_proxy_handler))
            .fallback(missing_key)
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(cors)
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// The router without slash normalization, for in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            request_timeout_secs = self.config.timeouts.request_secs,
            "HTTP server starting"
        );

        // Path rewriting has to happen before the router picks a route.
        let app = MapRequestLayer::new(collapse_slashes).layer(self.router);

        axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt as _;

    use crate::store::MemoryStore;

    fn server() -> HttpServer {
        let store = MemoryStore::new();
        HttpServer::new(ProxyConfig::default(), Arc::new(store.clone()), Arc::new(store))
    }

    #[tokio::test]
    async fn test_root_without_key_is_unauthorized() {
        let response = server()
            .router()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "API key path segment is required");
    }

    #[tokio::test]
    async fn test_health_carries_request_id() {
        let response = server()
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-request-id").is_some());
    }

    #[tokio::test]
    async fn test_cors_preflight_answered_locally() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/k1/items")
            .header(header::ORIGIN, "http://dashboard.test")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();
        let response = server().router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
    }
}
