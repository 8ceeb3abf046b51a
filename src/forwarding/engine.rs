//! Upstream request reconstruction and forwarding.

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, Request, Response, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::config::{TimeoutConfig, UpstreamConfig};
use crate::policy::TargetUrl;

/// Pooled client used for every forwarded request.
pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [&str; 9] = [
    "host",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Error type for forwarding.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("invalid upstream URI `{uri}`: {source}")]
    InvalidTarget {
        uri: String,
        source: axum::http::uri::InvalidUri,
    },
    #[error("failed to build upstream request: {0}")]
    Request(#[from] axum::http::Error),
    #[error("upstream request failed: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),
    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),
}

impl ForwardError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardError::InvalidTarget { .. } => "invalid_target",
            ForwardError::Request(_) => "request",
            ForwardError::Transport(_) => "transport",
            ForwardError::Timeout(_) => "timeout",
        }
    }
}

/// Build the upstream URI from the policy target, the path remainder after
/// the key, and the inbound query string.
///
/// `http://up.test/` + `/items` + `x=1` gives `http://up.test/items?x=1`.
pub fn build_upstream_uri(target: &TargetUrl, rest: &str, query: Option<&str>) -> String {
    let mut uri = target.as_str().trim_end_matches('/').to_string();
    let rest = rest.trim_start_matches('/');
    if !rest.is_empty() {
        uri.push('/');
        uri.push_str(rest);
    }
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        uri.push('?');
        uri.push_str(query);
    }
    uri
}

/// Remove hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Issues exactly one upstream attempt per request over a shared pool.
#[derive(Clone)]
pub struct Forwarder {
    client: UpstreamClient,
    response_timeout: Duration,
}

impl Forwarder {
    /// Build the shared pooled client.
    pub fn new(upstream: &UpstreamConfig, timeouts: &TimeoutConfig) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(timeouts.connect_secs)));
        http.set_keepalive(Some(Duration::from_secs(upstream.keepalive_secs)));

        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(upstream.pool_idle_timeout_secs))
            .pool_max_idle_per_host(upstream.pool_max_idle_per_host)
            .build(connector);

        tracing::info!(
            max_idle_per_host = upstream.pool_max_idle_per_host,
            idle_timeout_secs = upstream.pool_idle_timeout_secs,
            connect_timeout_secs = timeouts.connect_secs,
            "Upstream connection pool configured"
        );

        Self {
            client,
            response_timeout: Duration::from_secs(timeouts.upstream_secs),
        }
    }

    /// Forward the inbound request to `upstream_uri` and stream back the result.
    ///
    /// Dropping the returned future abandons the upstream request.
    pub async fn forward(
        &self,
        request: Request<Body>,
        upstream_uri: &str,
    ) -> Result<Response<Body>, ForwardError> {
        let uri: Uri = upstream_uri.parse().map_err(|source| ForwardError::InvalidTarget {
            uri: upstream_uri.to_string(),
            source,
        })?;

        let (parts, body) = request.into_parts();
        let mut builder = Request::builder().method(parts.method).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            *headers = parts.headers;
            strip_hop_by_hop(headers);
        }
        let upstream_request = builder.body(body)?;

        let response = tokio::time::timeout(self.response_timeout, self.client.request(upstream_request))
            .await
            .map_err(|_| ForwardError::Timeout(self.response_timeout))??;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn target(raw: &str) -> TargetUrl {
        TargetUrl::parse(raw).unwrap()
    }

    #[test]
    fn test_build_upstream_uri() {
        assert_eq!(
            build_upstream_uri(&target("http://up.test"), "items", Some("x=1")),
            "http://up.test/items?x=1"
        );
        assert_eq!(
            build_upstream_uri(&target("http://up.test/api/"), "//v1/items", None),
            "http://up.test/api/v1/items"
        );
        assert_eq!(build_upstream_uri(&target("https://up.test/"), "", Some("")), "https://up.test");
        assert_eq!(
            build_upstream_uri(&target("http://up.test/base"), "", Some("a=1&b=2")),
            "http://up.test/base?a=1&b=2"
        );
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("proxy.local"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-trace-hop"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-trace-hop", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        strip_hop_by_hop(&mut headers);

        assert!(headers.get(header::HOST).is_none());
        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get("x-trace-hop").is_none());
        assert!(headers.get(header::TRANSFER_ENCODING).is_none());
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer abc");
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/json");
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let forwarder = Forwarder::new(&UpstreamConfig::default(), &TimeoutConfig::default());
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let err = forwarder
            .forward(request, &format!("http://{}/ping", addr))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transport");
    }

    #[tokio::test]
    async fn test_invalid_uri() {
        let forwarder = Forwarder::new(&UpstreamConfig::default(), &TimeoutConfig::default());
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let err = forwarder.forward(request, "http://up.test/a b").await.unwrap_err();
        assert!(matches!(err, ForwardError::InvalidTarget { .. }));
    }
}
