use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cap on how much of a request/response body is kept in a `LogRecord`.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Cap applied to a report's embedded `sample` body.
pub const SAMPLE_BODY_BYTES: usize = 2 * 1024;

/// Hop-by-hop header names a forward proxy must never relay (RFC 7230 §6.1),
/// independent of whatever the inbound `Connection` header itself lists.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

/// The HTTP methods a `LogRecord.method` is allowed to carry.
pub const SUPPORTED_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS", "CONNECT",
];

pub fn is_supported_method(method: &str) -> bool {
    SUPPORTED_METHODS
        .iter()
        .any(|m| m.eq_ignore_ascii_case(method))
}

/// A captured request or response body, truncated to [`MAX_BODY_BYTES`] and
/// decoded as UTF-8 with lossy replacement of invalid sequences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BodyCapture {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl BodyCapture {
    /// Build a capture from raw bytes, truncating to `limit` bytes before
    /// lossy UTF-8 decoding.
    pub fn from_bytes(mime: Option<String>, bytes: &[u8], limit: usize) -> Self {
        if bytes.is_empty() {
            return Self { mime, text: None };
        }
        let cut = limit.min(bytes.len());
        let text = String::from_utf8_lossy(&bytes[..cut]).into_owned();
        Self {
            mime,
            text: Some(text),
        }
    }

    /// Clip an already-captured body down to `limit` bytes (used when
    /// building a report sample, which clips to [`SAMPLE_BODY_BYTES`]).
    pub fn clipped(&self, limit: usize) -> Self {
        match &self.text {
            Some(t) if t.len() > limit => {
                let mut cut = limit;
                while cut > 0 && !t.is_char_boundary(cut) {
                    cut -= 1;
                }
                Self {
                    mime: self.mime.clone(),
                    text: Some(format!("{}\n…(truncated)", &t[..cut])),
                }
            }
            _ => self.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestPart {
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<BodyCapture>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsePart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<BodyCapture>,
}

/// One captured exchange — the canonical unit flowing from the proxy through
/// sanitization, the ring buffer, and into session storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: String,
    pub ts: i64,
    pub method: String,
    pub url: String,
    pub host: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(rename = "durationMs", skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub request: RequestPart,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponsePart>,
}

impl LogRecord {
    /// A fresh, collision-resistant log id (a UUID v4 carries well over the
    /// 96 bits of entropy required).
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MimeCounts {
    pub req: BTreeMap<String, u64>,
    pub res: BTreeMap<String, u64>,
}

/// Per-endpoint aggregate, keyed by `"METHOD host normalizedPath"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSummary {
    pub key: String,
    pub method: String,
    pub host: String,
    pub path: String,
    pub count: u64,
    pub statuses: BTreeMap<String, u64>,
    pub mime: MimeCounts,
    #[serde(rename = "queryKeys")]
    pub query_keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<LogRecord>,
}

/// Session lifecycle record persisted as `meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub name: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "endedAt", skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    #[serde(rename = "logCount")]
    pub log_count: u64,
    pub dir: String,
    #[serde(rename = "logsPath")]
    pub logs_path: String,
}

/// A session's logs, normalized and aggregated into endpoint summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteReport {
    #[serde(rename = "routeKey")]
    pub route_key: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "totalLogs")]
    pub total_logs: u64,
    pub endpoints: Vec<EndpointSummary>,
}

/// Multiple `RouteReport`s merged by route key, across sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteCatalog {
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "routeReports")]
    pub route_reports: Vec<RouteReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_capture_truncates_to_limit() {
        let bytes = vec![b'a'; 100];
        let cap = BodyCapture::from_bytes(Some("text/plain".into()), &bytes, 10);
        assert_eq!(cap.text.unwrap().len(), 10);
    }

    #[test]
    fn body_capture_empty_bytes_has_no_text() {
        let cap = BodyCapture::from_bytes(None, &[], 10);
        assert!(cap.text.is_none());
    }

    #[test]
    fn clipped_adds_truncation_suffix() {
        let cap = BodyCapture {
            mime: None,
            text: Some("x".repeat(3000)),
        };
        let clipped = cap.clipped(SAMPLE_BODY_BYTES);
        assert!(clipped.text.unwrap().ends_with("\n…(truncated)"));
    }

    #[test]
    fn clipped_leaves_short_body_untouched() {
        let cap = BodyCapture {
            mime: None,
            text: Some("short".to_string()),
        };
        let clipped = cap.clipped(SAMPLE_BODY_BYTES);
        assert_eq!(clipped.text.unwrap(), "short");
    }

    #[test]
    fn supported_methods_are_case_insensitive() {
        assert!(is_supported_method("get"));
        assert!(is_supported_method("CONNECT"));
        assert!(!is_supported_method("TRACE"));
    }

    #[test]
    fn log_record_ids_are_unique() {
        assert_ne!(LogRecord::new_id(), LogRecord::new_id());
    }
}
