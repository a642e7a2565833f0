//! Download-format renderers for session and catalog exports: plain JSON,
//! HAR 1.2, and a human-readable Markdown summary.

use std::collections::BTreeMap;
use wiretap_core::model::{LogRecord, RouteCatalog, RouteReport, SessionMeta};

fn headers_to_har(headers: &BTreeMap<String, String>) -> Vec<serde_json::Value> {
    headers
        .iter()
        .map(|(name, value)| serde_json::json!({ "name": name, "value": value }))
        .collect()
}

fn log_to_har_entry(log: &LogRecord) -> serde_json::Value {
    let started = chrono::DateTime::from_timestamp_millis(log.ts)
        .unwrap_or_default()
        .to_rfc3339();
    let wait = log.duration_ms.unwrap_or(0) as f64;

    let query_string: Vec<serde_json::Value> = log
        .request
        .query
        .as_ref()
        .map(|q| {
            q.iter()
                .map(|(k, v)| serde_json::json!({ "name": k, "value": v }))
                .collect()
        })
        .unwrap_or_default();

    let mut request = serde_json::json!({
        "method": log.method,
        "url": log.url,
        "httpVersion": "HTTP/1.1",
        "headers": headers_to_har(&log.request.headers),
        "queryString": query_string,
        "headersSize": -1,
        "bodySize": -1,
    });
    if let Some(text) = log.request.body.as_ref().and_then(|b| b.text.as_deref()) {
        if !text.is_empty() {
            let mime = log
                .request
                .body
                .as_ref()
                .and_then(|b| b.mime.clone())
                .unwrap_or_default();
            request["postData"] = serde_json::json!({ "mimeType": mime, "text": text });
        }
    }

    let response_headers = log
        .response
        .as_ref()
        .and_then(|r| r.headers.clone())
        .unwrap_or_default();
    let content_text = log
        .response
        .as_ref()
        .and_then(|r| r.body.as_ref())
        .and_then(|b| b.text.clone())
        .unwrap_or_default();
    let content_mime = log
        .response
        .as_ref()
        .and_then(|r| r.body.as_ref())
        .and_then(|b| b.mime.clone())
        .unwrap_or_default();

    serde_json::json!({
        "startedDateTime": started,
        "time": wait,
        "request": request,
        "response": {
            "status": log.status.unwrap_or(0),
            "statusText": "",
            "httpVersion": "HTTP/1.1",
            "headers": headers_to_har(&response_headers),
            "content": {
                "size": content_text.len(),
                "mimeType": content_mime,
                "text": content_text,
            },
            "headersSize": -1,
            "bodySize": -1,
        },
        "cache": {},
        "timings": { "send": 0, "wait": wait, "receive": 0 },
    })
}

/// Render a session's logs as a HAR 1.2 log.
pub fn session_har(logs: &[LogRecord]) -> serde_json::Value {
    serde_json::json!({
        "log": {
            "version": "1.2",
            "creator": { "name": "wiretap", "version": env!("CARGO_PKG_VERSION") },
            "entries": logs.iter().map(log_to_har_entry).collect::<Vec<_>>(),
        }
    })
}

fn endpoint_table(out: &mut String, endpoints: &[wiretap_core::model::EndpointSummary]) {
    out.push_str("| Endpoint | Count | Statuses |\n|---|---|---|\n");
    for ep in endpoints {
        let statuses: Vec<String> = ep.statuses.iter().map(|(k, v)| format!("{k}:{v}")).collect();
        out.push_str(&format!("| {} | {} | {} |\n", ep.key, ep.count, statuses.join(", ")));
    }
}

/// Render a session's metadata and report as Markdown.
pub fn session_markdown(meta: &SessionMeta, report: &RouteReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Session: {}\n\n", meta.name));
    out.push_str(&format!("- id: `{}`\n", meta.id));
    out.push_str(&format!("- created: {}\n", meta.created_at));
    if let Some(ended) = meta.ended_at {
        out.push_str(&format!("- ended: {ended}\n"));
    }
    out.push_str(&format!("- total logs: {}\n\n", report.total_logs));
    endpoint_table(&mut out, &report.endpoints);
    out
}

/// Render a merged route catalog as Markdown, one section per route key.
pub fn catalog_markdown(catalog: &RouteCatalog) -> String {
    let mut out = String::new();
    out.push_str("# Route Catalog\n\n");
    for report in &catalog.route_reports {
        out.push_str(&format!("## {}\n\n", report.route_key));
        out.push_str(&format!("- total logs: {}\n\n", report.total_logs));
        endpoint_table(&mut out, &report.endpoints);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiretap_core::model::RequestPart;

    fn log() -> LogRecord {
        LogRecord {
            id: "1".to_string(),
            ts: 1_700_000_000_000,
            method: "GET".to_string(),
            url: "http://example.com/orders".to_string(),
            host: "example.com".to_string(),
            path: "/orders".to_string(),
            status: Some(200),
            duration_ms: Some(42),
            request: RequestPart::default(),
            response: None,
        }
    }

    #[test]
    fn har_entry_uses_duration_as_wait_and_zero_send_receive() {
        let har = session_har(&[log()]);
        let entry = &har["log"]["entries"][0];
        assert_eq!(entry["timings"]["wait"], 42.0);
        assert_eq!(entry["timings"]["send"], 0);
        assert_eq!(entry["timings"]["receive"], 0);
        assert_eq!(entry["request"]["headersSize"], -1);
    }

    #[test]
    fn har_entry_omits_post_data_without_a_request_body() {
        let har = session_har(&[log()]);
        assert!(har["log"]["entries"][0]["request"].get("postData").is_none());
    }

    #[test]
    fn catalog_markdown_has_one_section_per_route() {
        let catalog = RouteCatalog {
            created_at: 0,
            route_reports: vec![RouteReport {
                route_key: "orders".to_string(),
                session_id: "s1 (1 sessions)".to_string(),
                created_at: 0,
                total_logs: 1,
                endpoints: vec![],
            }],
        };
        let md = catalog_markdown(&catalog);
        assert!(md.contains("## orders"));
    }
}
