//! HTTP/1.1 transport for the uncensored path.

use super::{BoxFuture, ProxyBody, RoundTripper};
use crate::proxy::ProxyError;
use http_body_util::BodyExt;
use hyper::{Request, Response};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;

/// Round-tripper backed by the hyper-util legacy client.
///
/// Plain HTTP only; the HTTP proxy always rewrites the scheme to `http`.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpConnector, ProxyBody>,
}

impl HyperTransport {
    /// Create a transport with the given connect timeout.
    pub fn new(connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client }
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl RoundTripper for HyperTransport {
    fn round_trip(
        &self,
        req: Request<ProxyBody>,
    ) -> BoxFuture<'_, Result<Response<ProxyBody>, ProxyError>> {
        Box::pin(async move {
            let addr = req
                .uri()
                .authority()
                .map(|a| a.to_string())
                .unwrap_or_else(|| "upstream".to_string());
            let response =
                self.client
                    .request(req)
                    .await
                    .map_err(|e| ProxyError::UpstreamConnect {
                        addr,
                        message: e.to_string(),
                    })?;
            Ok(response.map(|body| body.boxed()))
        })
    }
}
