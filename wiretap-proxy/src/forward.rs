//! Plain-HTTP forwarding: absolute-form and origin-form requests relayed to
//! their upstream, hop-by-hop headers stripped, exchange captured.

use crate::capture::{self, CaptureSink};
use crate::{full_body, BoxBody};
use bytes::Bytes;
use http::{Request, Response, StatusCode, Uri};
use hyper::body::Incoming;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiretap_core::model::ResponsePart;

/// Forwards plain (non-tunneled) HTTP requests to their upstream origin.
pub struct ForwardProxy {
    client: reqwest::Client,
    sink: Arc<dyn CaptureSink>,
    max_body_bytes: usize,
}

impl ForwardProxy {
    pub fn new(sink: Arc<dyn CaptureSink>, connect_timeout: Duration, max_body_bytes: usize) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            sink,
            max_body_bytes,
        })
    }

    /// The capture sink this proxy emits completed exchanges to, shared with
    /// the tunnel/MITM paths so a single CONNECT still yields one record.
    pub fn sink(&self) -> Arc<dyn CaptureSink> {
        self.sink.clone()
    }

    /// Resolve the absolute URL a request targets, synthesizing it from the
    /// `Host` header when the request arrived in origin-form (as every
    /// intercepted HTTPS request inside a CONNECT tunnel does).
    fn resolve_uri(req: &Request<Incoming>, scheme: &str) -> Option<Uri> {
        if req.uri().scheme().is_some() {
            return Some(req.uri().clone());
        }
        let host = req
            .headers()
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())?;
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("{scheme}://{host}{path_and_query}").parse().ok()
    }

    pub async fn handle(&self, req: Request<Incoming>, scheme: &str) -> Response<BoxBody> {
        let started = Instant::now();
        let method = req.method().to_string();

        let Some(uri) = Self::resolve_uri(&req, scheme) else {
            return bad_request("could not resolve request target");
        };
        let host = uri.authority().map(|a| a.to_string()).unwrap_or_default();
        let path = uri.path().to_string();
        let url = uri.to_string();

        let (mut parts, body) = req.into_parts();
        parts.uri = uri.clone();
        capture::strip_hop_by_hop(&mut parts.headers);

        let body_bytes = match capture::collect_body(body).await {
            Ok(bytes) => bytes,
            Err(e) => return bad_gateway(&format!("failed to read request body: {e}")),
        };

        let request_part = capture::request_part(&parts.headers, &parts.uri, &body_bytes, self.max_body_bytes);

        let upstream_req = match self.build_upstream_request(&parts, body_bytes.clone()) {
            Ok(req) => req,
            Err(e) => return bad_gateway(&format!("invalid upstream request: {e}")),
        };

        match self.client.execute(upstream_req).await {
            Ok(upstream_res) => {
                self.relay_response(upstream_res, &method, &url, &host, &path, started, request_part)
                    .await
            }
            Err(e) => {
                tracing::warn!(%url, error = %e, "upstream request failed");
                capture::emit_exchange(
                    self.sink.as_ref(),
                    &method,
                    &url,
                    &host,
                    &path,
                    Some(502),
                    started,
                    request_part,
                    None,
                );
                bad_gateway(&format!("upstream error: {e}"))
            }
        }
    }

    fn build_upstream_request(
        &self,
        parts: &http::request::Parts,
        body: Bytes,
    ) -> Result<reqwest::Request, anyhow::Error> {
        let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())?;
        let mut builder = self.client.request(method, parts.uri.to_string());
        for (name, value) in parts.headers.iter() {
            builder = builder.header(name, value);
        }
        Ok(builder.body(body).build()?)
    }

    #[allow(clippy::too_many_arguments)]
    async fn relay_response(
        &self,
        upstream_res: reqwest::Response,
        method: &str,
        url: &str,
        host: &str,
        path: &str,
        started: Instant,
        request_part: wiretap_core::model::RequestPart,
    ) -> Response<BoxBody> {
        let status = upstream_res.status();
        let mut response_headers = http::HeaderMap::new();
        for (name, value) in upstream_res.headers().iter() {
            response_headers.append(name, value.clone());
        }

        let body_bytes = match upstream_res.bytes().await {
            Ok(b) => b,
            Err(e) => return bad_gateway(&format!("failed to read upstream body: {e}")),
        };

        // Strip before both capturing and relaying, so neither the
        // LogRecord nor the client-facing response carries hop-by-hop
        // headers that named only the upstream/proxy leg of this hop.
        capture::strip_hop_by_hop(&mut response_headers);
        let response_part: ResponsePart =
            capture::response_part(&response_headers, &body_bytes, self.max_body_bytes);

        capture::emit_exchange(
            self.sink.as_ref(),
            method,
            url,
            host,
            path,
            Some(status.as_u16()),
            started,
            request_part,
            Some(response_part),
        );

        let mut builder = Response::builder().status(status);
        for (name, value) in response_headers.iter() {
            builder = builder.header(name, value);
        }
        builder.body(full_body(body_bytes)).unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::BAD_GATEWAY)
                .body(full_body(Bytes::new()))
                .unwrap()
        })
    }
}

fn bad_gateway(message: &str) -> Response<BoxBody> {
    tracing::debug!(message, "returning 502 to client");
    let body = serde_json::json!({ "error": message }).to_string();
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(full_body(body))
        .unwrap()
}

fn bad_request(message: &str) -> Response<BoxBody> {
    tracing::debug!(message, "returning 400 to client");
    let body = serde_json::json!({ "error": message }).to_string();
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(full_body(body))
        .unwrap()
}
