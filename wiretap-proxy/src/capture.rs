//! Turning a hyper request/response pair into a [`LogRecord`].
//!
//! The ideal design tees the body while it streams, capped at
//! `MAX_BODY_BYTES`. We buffer the whole body with
//! [`http_body_util::BodyExt::collect`] and truncate only when building the
//! record. Bodies larger than a few `MAX_BODY_BYTES` multiples are rare for
//! the API traffic this proxy targets, and the simplification keeps the
//! relay path straightforward.

use bytes::Bytes;
use http::HeaderMap;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use std::collections::BTreeMap;
use std::time::Instant;
use wiretap_core::model::{BodyCapture, LogRecord, RequestPart, ResponsePart};

/// Anything that accepts completed [`LogRecord`]s off the proxy hot path.
///
/// Implemented outside this crate so the proxy stays free of a dependency on
/// session storage or sanitization; it only produces records.
pub trait CaptureSink: Send + Sync {
    fn capture(&self, record: LogRecord);
}

fn header_map_to_btree(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for (name, value) in headers.iter() {
        let value = value.to_str().unwrap_or("").to_string();
        map.entry(name.as_str().to_string())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    map
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn query_map(uri: &http::Uri) -> Option<BTreeMap<String, String>> {
    let query = uri.query()?;
    let mut map = BTreeMap::new();
    for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
        map.insert(k.into_owned(), v.into_owned());
    }
    Some(map)
}

/// Collect an incoming body into bytes, bounded by `max_body_bytes` for the
/// purposes of the eventual [`BodyCapture`] but relaying the original bytes
/// unmodified to the caller.
pub async fn collect_body(body: Incoming) -> Result<Bytes, hyper::Error> {
    Ok(body.collect().await?.to_bytes())
}

/// Build the `request` half of a [`LogRecord`] from a request's headers and
/// URI plus its already-collected body bytes.
pub fn request_part(headers: &HeaderMap, uri: &http::Uri, body: &[u8], max_body_bytes: usize) -> RequestPart {
    RequestPart {
        headers: header_map_to_btree(headers),
        query: query_map(uri),
        body: if body.is_empty() {
            None
        } else {
            Some(BodyCapture::from_bytes(
                content_type(headers),
                body,
                max_body_bytes,
            ))
        },
    }
}

/// Build the `response` half of a [`LogRecord`] from a response's headers
/// plus its already-collected body bytes.
pub fn response_part(headers: &HeaderMap, body: &[u8], max_body_bytes: usize) -> ResponsePart {
    ResponsePart {
        headers: Some(header_map_to_btree(headers)),
        body: if body.is_empty() {
            None
        } else {
            Some(BodyCapture::from_bytes(
                content_type(headers),
                body,
                max_body_bytes,
            ))
        },
    }
}

/// Assemble and emit a completed exchange. `started` marks when the request
/// was first accepted, for `durationMs`.
#[allow(clippy::too_many_arguments)]
pub fn emit_exchange(
    sink: &dyn CaptureSink,
    method: &str,
    url: &str,
    host: &str,
    path: &str,
    status: Option<u16>,
    started: Instant,
    request: RequestPart,
    response: Option<ResponsePart>,
) {
    let record = LogRecord {
        id: LogRecord::new_id(),
        ts: LogRecord::now_ms(),
        method: method.to_string(),
        url: url.to_string(),
        host: host.to_string(),
        path: path.to_string(),
        status,
        duration_ms: Some(started.elapsed().as_millis() as u64),
        request,
        response,
    };
    sink.capture(record);
}

/// Strip hop-by-hop headers (the fixed RFC set, plus whatever the inbound
/// `Connection` header names) before relaying a request or response.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    use wiretap_core::model::HOP_BY_HOP_HEADERS;

    let mut connection_named = Vec::new();
    if let Some(conn) = headers.get(http::header::CONNECTION) {
        if let Ok(value) = conn.to_str() {
            connection_named.extend(
                value
                    .split(',')
                    .map(|s| s.trim().to_ascii_lowercase())
                    .filter(|s| !s.is_empty()),
            );
        }
    }

    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
    for name in connection_named {
        headers.remove(name.as_str());
    }
}
