//! Merges multiple sessions' [`RouteReport`]s, grouped by route key, into a
//! single [`RouteCatalog`].
//!
//! The collaborators (session listing, report cache read/write, log read)
//! are expressed as a trait rather than a concrete `SessionStore` dependency
//! so this crate never depends on `wiretap-store` (which itself depends on
//! this crate to build a session's cached report).

use crate::builder::{self, ReportInput};
use std::collections::BTreeMap;
use wiretap_core::error::CoreError;
use wiretap_core::model::{EndpointSummary, LogRecord, MimeCounts, RouteCatalog, RouteReport, SessionMeta};

pub trait SessionCollaborator {
    fn list_sessions(&self) -> Vec<SessionMeta>;
    fn read_report(&self, session_id: &str) -> Option<RouteReport>;
    fn write_report(&self, session_id: &str, report: &RouteReport) -> Result<(), CoreError>;
    fn read_logs(&self, session_id: &str, limit: usize) -> Result<Vec<LogRecord>, CoreError>;
}

fn route_key_of(session: &SessionMeta) -> String {
    if session.name.trim().is_empty() {
        "/".to_string()
    } else {
        session.name.clone()
    }
}

/// Build (or reuse cached) reports for every session, merge them by route
/// key, and return the resulting catalog with `routeReports` sorted by
/// route key ascending.
pub fn build_catalog(collaborator: &dyn SessionCollaborator) -> RouteCatalog {
    let sessions = collaborator.list_sessions();
    let mut groups: BTreeMap<String, Vec<RouteReport>> = BTreeMap::new();

    for session in &sessions {
        let route_key = route_key_of(session);
        let report = match collaborator.read_report(&session.id) {
            Some(r) => r,
            None => {
                let logs = collaborator
                    .read_logs(&session.id, usize::MAX)
                    .unwrap_or_default();
                let built = builder::build(ReportInput {
                    route_key: route_key.clone(),
                    session_id: session.id.clone(),
                    logs: &logs,
                });
                if let Err(e) = collaborator.write_report(&session.id, &built) {
                    tracing::warn!(session = %session.id, error = %e, "failed to cache report");
                }
                built
            }
        };
        groups.entry(route_key).or_default().push(report);
    }

    let mut route_reports: Vec<RouteReport> = groups
        .into_iter()
        .map(|(route_key, reports)| merge_reports(route_key, reports))
        .collect();
    route_reports.sort_by(|a, b| a.route_key.cmp(&b.route_key));

    RouteCatalog {
        created_at: chrono::Utc::now().timestamp_millis(),
        route_reports,
    }
}

fn merge_reports(route_key: String, reports: Vec<RouteReport>) -> RouteReport {
    let session_count = reports.len();
    let mut merged: BTreeMap<String, EndpointSummary> = BTreeMap::new();
    let mut total_logs = 0u64;

    for report in reports {
        total_logs += report.total_logs;
        for ep in report.endpoints {
            let entry = merged.entry(ep.key.clone()).or_insert_with(|| EndpointSummary {
                key: ep.key.clone(),
                method: ep.method.clone(),
                host: ep.host.clone(),
                path: ep.path.clone(),
                count: 0,
                statuses: BTreeMap::new(),
                mime: MimeCounts::default(),
                query_keys: Vec::new(),
                // First encountered sample wins; later reports never replace it.
                sample: ep.sample.clone(),
            });

            entry.count += ep.count;
            for (k, v) in ep.statuses {
                *entry.statuses.entry(k).or_insert(0) += v;
            }
            for (k, v) in ep.mime.req {
                *entry.mime.req.entry(k).or_insert(0) += v;
            }
            for (k, v) in ep.mime.res {
                *entry.mime.res.entry(k).or_insert(0) += v;
            }
            for qk in ep.query_keys {
                if !entry.query_keys.contains(&qk) {
                    entry.query_keys.push(qk);
                }
            }
            entry.query_keys.sort();
        }
    }

    let mut endpoints: Vec<EndpointSummary> = merged.into_values().collect();
    endpoints.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));

    RouteReport {
        session_id: format!("{route_key} ({session_count} sessions)"),
        route_key,
        created_at: chrono::Utc::now().timestamp_millis(),
        total_logs,
        endpoints,
    }
}
