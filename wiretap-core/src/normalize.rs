//! Collapses volatile path segments (ids, UUIDs, hashes) to stable
//! placeholders so the same logical endpoint aggregates across requests.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[1-5][0-9a-fA-F]{3}-[89abAB][0-9a-fA-F]{3}-[0-9a-fA-F]{12}$",
    )
    .unwrap()
});

static HASH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{16,}$").unwrap());

static ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]+$").unwrap());

/// Normalize a path by replacing each non-empty segment that looks like a
/// UUID, a long hex hash, or a decimal id with a fixed placeholder. Checks
/// run in that order: UUID, then hash, then id.
pub fn normalize(path: &str) -> String {
    let trimmed = if path.len() > 1 && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    };

    let segments: Vec<&str> = trimmed.split('/').collect();
    let normalized: Vec<String> = segments
        .into_iter()
        .map(|seg| {
            if seg.is_empty() {
                seg.to_string()
            } else if UUID_RE.is_match(seg) {
                ":uuid".to_string()
            } else if HASH_RE.is_match(seg) {
                ":hash".to_string()
            } else if ID_RE.is_match(seg) {
                ":id".to_string()
            } else {
                seg.to_string()
            }
        })
        .collect();

    normalized.join("/")
}

/// Extract the sorted, deduplicated set of query parameter keys from a URL.
pub fn query_keys(url: &str) -> Vec<String> {
    let Ok(parsed) = Url::parse(url) else {
        return Vec::new();
    };
    let mut keys: Vec<String> = parsed
        .query_pairs()
        .map(|(k, _)| k.into_owned())
        .collect();
    keys.sort();
    keys.dedup();
    keys
}
