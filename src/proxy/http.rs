//! Censoring HTTP proxy.
//!
//! Receives plain HTTP/1.1 requests redirected by the firewall's HTTP hijack
//! rule and decides on the `Host` header:
//! - Requests already carrying our `Via` token, or with no host, get 400
//!   (we are seeing our own redirected traffic)
//! - Hosts containing a blocked keyword get 451 and the block page
//! - Everything else is rewritten to `http://<host>` and sent through the
//!   injected [`RoundTripper`]
//!
//! The handler never resolves or dials on its own; connectivity belongs
//! entirely to the transport.

use super::error::ProxyError;
use super::handle::{ServerHandle, accept_loop, bind};
use super::keyword::KeywordSet;
use crate::telemetry::{AuditEvent, AuditLogger};
use crate::upstream::{ProxyBody, RoundTripper};
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Product token carried in `Via` for loop detection.
pub const VIA_TOKEN: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Body served with status 451.
pub const BLOCK_PAGE: &str = "<html><head>
  <title>451 Unavailable For Legal Reasons</title>
</head><body>
  <center><h1>451 Unavailable For Legal Reasons</h1></center>
  <p>This content is not available in your jurisdiction.</p>
</body></html>
";

/// Headers meaningful only for a single transport-level connection.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// HTTP proxy that censors by `Host`.
pub struct CensoringHttpProxy {
    blocked: KeywordSet,
    transport: Arc<dyn RoundTripper>,
    audit: Arc<AuditLogger>,
}

impl CensoringHttpProxy {
    /// Create a proxy blocking hosts containing one of `blocked`.
    pub fn new(
        blocked: KeywordSet,
        transport: Arc<dyn RoundTripper>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            blocked,
            transport,
            audit,
        }
    }

    /// Produce the response for one request.
    pub async fn handle(&self, mut req: Request<ProxyBody>) -> Response<ProxyBody> {
        if carries_our_via(req.headers()) {
            debug!("Rejecting looped request for {}", req.uri());
            return status_response(StatusCode::BAD_REQUEST);
        }

        let host = request_host(&req);
        if host.is_empty() {
            debug!("Rejecting request without host: {}", req.uri());
            return status_response(StatusCode::BAD_REQUEST);
        }

        if let Some(keyword) = self.blocked.find(&host) {
            info!("Blocking HTTP request for {} (keyword '{}')", host, keyword);
            self.audit.log(AuditEvent::HttpBlock {
                host,
                keyword: keyword.to_string(),
            });
            return block_page_response();
        }

        let uri = match rewrite_uri(req.uri(), &host) {
            Ok(uri) => uri,
            Err(e) => {
                debug!("Cannot forward request for {}: {}", host, e);
                return status_response(StatusCode::BAD_REQUEST);
            }
        };
        *req.uri_mut() = uri;
        strip_hop_by_hop(req.headers_mut());
        req.headers_mut()
            .append(header::VIA, HeaderValue::from_static(VIA_TOKEN));

        debug!("Forwarding HTTP request to {}", req.uri());
        match self.transport.round_trip(req).await {
            Ok(mut resp) => {
                strip_hop_by_hop(resp.headers_mut());
                resp.headers_mut()
                    .append(header::VIA, HeaderValue::from_static(VIA_TOKEN));
                resp
            }
            Err(e) => {
                debug!("Upstream round trip for {} failed: {}", host, e);
                status_response(StatusCode::BAD_GATEWAY)
            }
        }
    }

    /// Bind `addr` and start serving HTTP/1.1.
    pub async fn start(self, addr: SocketAddr) -> Result<ServerHandle, ProxyError> {
        let listener = bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("HTTP proxy listening on {}", local_addr);

        let proxy = Arc::new(self);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(
            listener,
            shutdown_rx,
            "HTTP proxy",
            move |stream, peer| {
                let proxy = proxy.clone();
                async move {
                    if let Err(e) = serve_connection(stream, proxy).await {
                        debug!("HTTP connection from {} ended: {}", peer, e);
                    }
                }
            },
        ));

        Ok(ServerHandle::new("http_proxy", local_addr, shutdown_tx, task))
    }
}

impl std::fmt::Debug for CensoringHttpProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CensoringHttpProxy")
            .field("blocked", &self.blocked)
            .finish_non_exhaustive()
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    proxy: Arc<CensoringHttpProxy>,
) -> Result<(), ProxyError> {
    let service = service_fn(move |req: Request<Incoming>| {
        let proxy = proxy.clone();
        async move { Ok::<_, Infallible>(proxy.handle(req.map(|b| b.boxed())).await) }
    });

    http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(TokioIo::new(stream), service)
        .await
        .map_err(ProxyError::from)
}

fn carries_our_via(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::VIA)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains(VIA_TOKEN))
}

/// Host from the `Host` header, falling back to the request-target authority.
fn request_host<B>(req: &Request<B>) -> String {
    req.headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.to_string()))
        .unwrap_or_default()
}

fn rewrite_uri(uri: &Uri, host: &str) -> Result<Uri, ProxyError> {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    Uri::builder()
        .scheme("http")
        .authority(host)
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ProxyError::InvalidRequest(e.to_string()))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
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
        headers.remove(*name);
    }
}

fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

fn full_body(content: &'static str) -> ProxyBody {
    Full::new(Bytes::from_static(content.as_bytes()))
        .map_err(|never| match never {})
        .boxed()
}

fn status_response(status: StatusCode) -> Response<ProxyBody> {
    let mut resp = Response::new(empty_body());
    *resp.status_mut() = status;
    resp
}

fn block_page_response() -> Response<ProxyBody> {
    let mut resp = Response::new(full_body(BLOCK_PAGE));
    *resp.status_mut() = StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    resp
}
