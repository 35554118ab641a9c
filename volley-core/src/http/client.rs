use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use super::{Error, Result};
use crate::config::RequestSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Response body length in bytes.
    pub bytes_received: u64,
}

/// Shared, pooled HTTP/1 client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        // OS-level connect timeouts can be tens of seconds; an unreachable target should
        // surface as a network error promptly.
        Self::new(Some(Duration::from_secs(3)))
    }
}

impl HttpClient {
    #[must_use]
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(connect_timeout);
        http_connector.set_nodelay(true);

        let https_connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let inner = Client::builder(TokioExecutor::new()).build(https_connector);

        Self { inner }
    }

    /// Performs one request/response exchange. `timeout` bounds the whole exchange,
    /// body included.
    pub async fn request(&self, spec: &RequestSpec, timeout: Duration) -> Result<HttpResponse> {
        let req = build_request(spec)?;

        match tokio::time::timeout(timeout, self.exchange(req)).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    async fn exchange(&self, req: Request<Full<Bytes>>) -> Result<HttpResponse> {
        let res: hyper::Response<Incoming> = self.inner.request(req).await?;
        let (parts, body) = res.into_parts();
        let body = body.collect().await?.to_bytes();

        Ok(HttpResponse {
            status: parts.status.as_u16(),
            bytes_received: body.len() as u64,
        })
    }
}

fn build_request(spec: &RequestSpec) -> Result<Request<Full<Bytes>>> {
    let parsed = url::Url::parse(&spec.url).map_err(|_| Error::InvalidUrl(spec.url.clone()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(Error::UnsupportedScheme(spec.url.clone()));
    }

    let uri: hyper::Uri = spec
        .url
        .parse()
        .map_err(|_| Error::InvalidUrl(spec.url.clone()))?;

    let mut builder = Request::builder().method(spec.method.clone()).uri(uri);

    if !has_header(&spec.headers, "host")
        && let Some(host) = parsed.host_str()
    {
        let host = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        builder = builder.header(http::header::HOST, host);
    }

    for (k, v) in &spec.headers {
        let name = http::header::HeaderName::from_bytes(k.as_bytes())?;
        let value = http::header::HeaderValue::from_str(v)?;
        builder = builder.header(name, value);
    }

    Ok(builder.body(Full::new(spec.body.clone()))?)
}

fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
}
