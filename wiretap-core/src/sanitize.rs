//! Redacts sensitive headers, query parameters, and JSON/form body fields
//! from a [`LogRecord`] without mutating the input.

use crate::model::{BodyCapture, LogRecord, RequestPart, ResponsePart};
use std::collections::BTreeMap;

pub const REDACTED: &str = "***redacted***";

const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
    "x-csrf-token",
    "x-xsrf-token",
    "x-amz-security-token",
];

/// Suffixes a query key is checked against. A key is sensitive if its
/// lowercase form contains any of these (the `includes` rule, which already
/// subsumes the stricter `ends_with("_<s>")` variant some implementations use
/// — see DESIGN.md for the rationale).
const SENSITIVE_QUERY_NEEDLES: &[&str] = &[
    "token",
    "access_token",
    "refresh_token",
    "id_token",
    "api_key",
    "apikey",
    "key",
    "code",
    "password",
    "passwd",
    "secret",
    "signature",
    "sig",
];

const SENSITIVE_JSON_NEEDLES: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "refresh",
    "access",
    "authorization",
    "cookie",
    "apikey",
    "api_key",
    "session",
    "csrf",
    "xsrf",
];

fn is_sensitive_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SENSITIVE_HEADERS.contains(&lower.as_str())
}

fn is_sensitive_query_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_QUERY_NEEDLES.iter().any(|n| lower.contains(n))
}

fn is_sensitive_json_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_JSON_NEEDLES.iter().any(|n| lower.contains(n))
}

fn sanitize_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| {
            if is_sensitive_header(k) {
                (k.clone(), REDACTED.to_string())
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}

fn sanitize_query(query: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    query
        .iter()
        .map(|(k, v)| {
            if is_sensitive_query_key(k) {
                (k.clone(), REDACTED.to_string())
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}

fn sanitize_json_value(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map.iter_mut() {
                if is_sensitive_json_key(k) {
                    *v = serde_json::Value::String(REDACTED.to_string());
                } else {
                    sanitize_json_value(v);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                sanitize_json_value(item);
            }
        }
        _ => {}
    }
}

fn mime_is_form(mime: &str) -> bool {
    mime.to_ascii_lowercase()
        .contains("application/x-www-form-urlencoded")
}

fn mime_is_json(mime: &str) -> bool {
    mime.to_ascii_lowercase().contains("application/json")
}

fn sanitize_body(body: &BodyCapture) -> BodyCapture {
    let Some(text) = &body.text else {
        return body.clone();
    };
    let mime = body.mime.clone().unwrap_or_default();
    let trimmed = text.trim_start();
    let looks_like_json = trimmed.starts_with('{') || trimmed.starts_with('[');

    if mime_is_form(&mime) {
        let redacted: String = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(url::form_urlencoded::parse(text.as_bytes()).map(|(k, v)| {
                if is_sensitive_query_key(&k) {
                    (k.into_owned(), REDACTED.to_string())
                } else {
                    (k.into_owned(), v.into_owned())
                }
            }))
            .finish();
        return BodyCapture {
            mime: body.mime.clone(),
            text: Some(redacted),
        };
    }

    if mime_is_json(&mime) || looks_like_json {
        if let Ok(mut parsed) = serde_json::from_str::<serde_json::Value>(text) {
            sanitize_json_value(&mut parsed);
            if let Ok(reserialized) = serde_json::to_string_pretty(&parsed) {
                return BodyCapture {
                    mime: body.mime.clone(),
                    text: Some(reserialized),
                };
            }
        }
        return body.clone();
    }

    body.clone()
}

/// Produce a redacted copy of `record`. The input is never mutated.
pub fn sanitize(record: &LogRecord) -> LogRecord {
    let mut out = record.clone();

    out.request = RequestPart {
        headers: sanitize_headers(&record.request.headers),
        query: record.request.query.as_ref().map(sanitize_query),
        body: record.request.body.as_ref().map(sanitize_body),
    };

    out.response = record.response.as_ref().map(|resp| ResponsePart {
        headers: resp.headers.as_ref().map(sanitize_headers),
        body: resp.body.as_ref().map(sanitize_body),
    });

    out
}
