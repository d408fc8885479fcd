//! Upstream forwarding
//!
//! Relays an admitted request to the provider's real service, preserving
//! method, path, query, and body. Hop-by-hop headers are stripped, Host is
//! rewritten from the target, and two diagnostic headers are injected: the
//! original client IP and the presented API key. A transport-level failure
//! (refused connection, DNS, timeout) is a gateway-origin error; any status
//! the upstream itself returns is a successfully forwarded, billable call.

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

/// Forwarding failure, all variants gateway-origin (synthesized 502)
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to read request body: {0}")]
    RequestBody(String),
    #[error("failed to build upstream request: {0}")]
    BadRequest(String),
    #[error("upstream transport failure: {0}")]
    Transport(String),
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),
}

/// A captured upstream response
#[derive(Debug)]
pub struct ForwardOutcome {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub elapsed: Duration,
}

type HttpsClient = Client<
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
    http_body_util::combinators::BoxBody<Bytes, hyper::Error>,
>;

/// Forwards admitted requests to the configured upstream
#[derive(Clone)]
pub struct UpstreamForwarder {
    client: HttpsClient,
    base_url: String,
    timeout: Duration,
}

impl UpstreamForwarder {
    /// Create a forwarder supporting both HTTP and HTTPS upstreams
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();

        let client = Client::builder(TokioExecutor::new()).build(https);

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Build the upstream URL for a request path and query
    pub fn target_url(&self, path: &str, query: Option<&str>) -> String {
        let path_part = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        match query {
            Some(q) if !q.is_empty() => format!("{}{}?{}", self.base_url, path_part, q),
            _ => format!("{}{}", self.base_url, path_part),
        }
    }

    /// Issue the equivalent request against the upstream and capture the
    /// response, latency, and size.
    pub async fn forward(
        &self,
        req: Request<Body>,
        api_key: &str,
        client_ip: Option<&str>,
    ) -> Result<ForwardOutcome, ForwardError> {
        let path = req.uri().path().to_string();
        let query = req.uri().query().map(String::from);
        let target_url = self.target_url(&path, query.as_deref());

        let (parts, body) = req.into_parts();

        let mut builder = Request::builder().method(parts.method).uri(&target_url);

        if let Some(headers) = builder.headers_mut() {
            for (key, value) in parts.headers.iter() {
                if !is_hop_by_hop_header(key.as_str()) {
                    headers.insert(key.clone(), value.clone());
                }
            }

            // Host must match the target for HTTPS upstreams to work
            match extract_host_from_url(&target_url) {
                Some(target_host) => match target_host.parse::<axum::http::HeaderValue>() {
                    Ok(header_value) => {
                        headers.insert(axum::http::header::HOST, header_value);
                    }
                    Err(e) => {
                        warn!("failed to parse target host '{}': {}", target_host, e);
                    }
                },
                None => {
                    warn!("failed to extract host from '{}'", target_url);
                }
            }

            // Diagnostic headers for the provider; not used for re-authorization
            if let Some(ip) = client_ip {
                let forwarded = match parts.headers.get("x-forwarded-for") {
                    Some(existing) => match existing.to_str() {
                        Ok(chain) => format!("{}, {}", chain, ip),
                        Err(_) => ip.to_string(),
                    },
                    None => ip.to_string(),
                };
                if let Ok(value) = forwarded.parse::<axum::http::HeaderValue>() {
                    headers.insert("x-forwarded-for", value);
                }
            }
            if let Ok(value) = api_key.parse::<axum::http::HeaderValue>() {
                headers.insert("x-api-key", value);
            }
        }

        let body_bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| ForwardError::RequestBody(e.to_string()))?;

        let boxed_body = http_body_util::Full::new(body_bytes)
            .map_err(|e| match e {})
            .boxed();

        let upstream_req = builder
            .body(boxed_body)
            .map_err(|e| ForwardError::BadRequest(e.to_string()))?;

        // One deadline covers the whole round trip: an upstream that
        // answers headers and then stalls the body must not hold the
        // caller's request open past the configured timeout
        let start = Instant::now();
        let (status, headers, body) = tokio::time::timeout(self.timeout, async {
            let response = self
                .client
                .request(upstream_req)
                .await
                .map_err(|e| ForwardError::Transport(e.to_string()))?;

            let status = response.status();
            let (parts, body) = response.into_parts();
            let body = BodyExt::collect(body)
                .await
                .map_err(|e| ForwardError::Transport(e.to_string()))?
                .to_bytes();
            Ok::<_, ForwardError>((status, parts.headers, body))
        })
        .await
        .map_err(|_| ForwardError::Timeout(self.timeout))??;
        let elapsed = start.elapsed();

        Ok(ForwardOutcome {
            status,
            headers,
            body,
            elapsed,
        })
    }
}

/// Hop-by-hop headers that must not be relayed.
///
/// Host is included even though RFC 7230 does not classify it as
/// hop-by-hop: the proxy replaces it with the target's host.
pub fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host"
    )
}

/// Extract host (and optional port) from a URL string
fn extract_host_from_url(url: &str) -> Option<String> {
    if let Ok(parsed) = url.parse::<axum::http::Uri>() {
        if let Some(authority) = parsed.authority() {
            return Some(authority.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forwarder() -> UpstreamForwarder {
        UpstreamForwarder::new("http://localhost:8081/", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_target_url_preserves_path() {
        let f = forwarder();
        assert_eq!(f.target_url("/v1/data", None), "http://localhost:8081/v1/data");
        assert_eq!(
            f.target_url("/v1/data/42", None),
            "http://localhost:8081/v1/data/42"
        );
    }

    #[test]
    fn test_target_url_preserves_query() {
        let f = forwarder();
        assert_eq!(
            f.target_url("/v1/data", Some("page=1&limit=10")),
            "http://localhost:8081/v1/data?page=1&limit=10"
        );
        assert_eq!(f.target_url("/v1/data", Some("")), "http://localhost:8081/v1/data");
    }

    #[test]
    fn test_target_url_adds_leading_slash() {
        let f = forwarder();
        assert_eq!(f.target_url("v1/data", None), "http://localhost:8081/v1/data");
    }

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop_header("connection"));
        assert!(is_hop_by_hop_header("Transfer-Encoding"));
        assert!(is_hop_by_hop_header("host"));
        assert!(is_hop_by_hop_header("HOST"));
        assert!(!is_hop_by_hop_header("content-type"));
        assert!(!is_hop_by_hop_header("authorization"));
    }

    #[tokio::test]
    async fn test_stalled_body_is_bounded_by_timeout() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Upstream that answers headers, then never sends the promised body
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 1000000\r\n\r\n")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let forwarder =
            UpstreamForwarder::new(&format!("http://{}", addr), Duration::from_millis(300))
                .unwrap();
        let req = Request::builder()
            .method("GET")
            .uri("/slow")
            .body(Body::empty())
            .unwrap();

        let started = Instant::now();
        let result = forwarder.forward(req, "mk_live_abcd1234", None).await;
        assert!(matches!(result, Err(ForwardError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_extract_host_from_url() {
        assert_eq!(
            extract_host_from_url("http://example.com/path"),
            Some("example.com".to_string())
        );
        assert_eq!(
            extract_host_from_url("https://api.example.com:8443/v1"),
            Some("api.example.com:8443".to_string())
        );
        assert_eq!(extract_host_from_url("/just/a/path"), None);
    }
}
