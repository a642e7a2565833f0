//! Aggregates a session's log stream into a [`RouteReport`]: one
//! [`EndpointSummary`] per normalized `METHOD host path` key.

use std::collections::BTreeMap;
use url::Url;
use wiretap_core::model::{EndpointSummary, LogRecord, MimeCounts, RouteReport, SAMPLE_BODY_BYTES};
use wiretap_core::normalize;

pub struct ReportInput<'a> {
    pub route_key: String,
    pub session_id: String,
    pub logs: &'a [LogRecord],
}

/// Lowercase mime, dropping any `;`-separated parameters (e.g. `charset`).
fn first_segment(mime: &str) -> String {
    mime.to_ascii_lowercase()
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

fn take_first_n(map: &BTreeMap<String, String>, n: usize) -> BTreeMap<String, String> {
    map.iter().take(n).map(|(k, v)| (k.clone(), v.clone())).collect()
}

/// Clip a log record down to report-sample size: at most 30 headers per
/// side (already lexicographically ordered, since headers are a `BTreeMap`),
/// bodies clipped to [`SAMPLE_BODY_BYTES`].
fn clip_sample(log: &LogRecord) -> LogRecord {
    let mut sample = log.clone();
    sample.request.headers = take_first_n(&sample.request.headers, 30);
    sample.request.body = sample
        .request
        .body
        .as_ref()
        .map(|b| b.clipped(SAMPLE_BODY_BYTES));

    if let Some(resp) = sample.response.as_mut() {
        resp.headers = resp.headers.as_ref().map(|h| take_first_n(h, 30));
        resp.body = resp.body.as_ref().map(|b| b.clipped(SAMPLE_BODY_BYTES));
    }
    sample
}

pub fn build(input: ReportInput) -> RouteReport {
    let mut endpoints: BTreeMap<String, EndpointSummary> = BTreeMap::new();

    for log in input.logs {
        let Ok(url) = Url::parse(&log.url) else {
            continue;
        };
        let host = match url.port() {
            Some(port) => format!("{}:{port}", url.host_str().unwrap_or("")),
            None => url.host_str().unwrap_or("").to_string(),
        };
        let path = normalize::normalize(url.path());
        let method = if log.method.is_empty() {
            "GET".to_string()
        } else {
            log.method.to_uppercase()
        };
        let key = format!("{method} {host} {path}");

        let entry = endpoints.entry(key.clone()).or_insert_with(|| EndpointSummary {
            key: key.clone(),
            method: method.clone(),
            host: host.clone(),
            path: path.clone(),
            count: 0,
            statuses: BTreeMap::new(),
            mime: MimeCounts::default(),
            query_keys: Vec::new(),
            sample: Some(clip_sample(log)),
        });

        entry.count += 1;
        let status_key = log.status.map(|s| s.to_string()).unwrap_or_else(|| "0".to_string());
        *entry.statuses.entry(status_key).or_insert(0) += 1;

        let req_mime = log
            .request
            .body
            .as_ref()
            .and_then(|b| b.mime.as_deref())
            .unwrap_or("");
        *entry.mime.req.entry(first_segment(req_mime)).or_insert(0) += 1;

        let res_mime = log
            .response
            .as_ref()
            .and_then(|r| r.body.as_ref())
            .and_then(|b| b.mime.as_deref())
            .unwrap_or("");
        *entry.mime.res.entry(first_segment(res_mime)).or_insert(0) += 1;

        for qk in normalize::query_keys(&log.url) {
            if !entry.query_keys.contains(&qk) {
                entry.query_keys.push(qk);
            }
        }
        entry.query_keys.sort();
    }

    let mut endpoints: Vec<EndpointSummary> = endpoints.into_values().collect();
    endpoints.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));

    RouteReport {
        route_key: input.route_key,
        session_id: input.session_id,
        created_at: chrono::Utc::now().timestamp_millis(),
        total_logs: input.logs.len() as u64,
        endpoints,
    }
}
