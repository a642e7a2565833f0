//! On-disk per-session directories: `meta.json`, an append-only
//! `logs.ndjson`, and a lazily cached `report.json`.

use arc_swap::ArcSwapOption;
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use wiretap_core::error::CoreError;
use wiretap_core::model::{LogRecord, RouteReport, SessionMeta};

struct CurrentState {
    meta: SessionMeta,
    file: File,
}

struct SessionHandle {
    state: Mutex<CurrentState>,
}

pub struct SessionStore {
    root_dir: PathBuf,
    current: ArcSwapOption<SessionHandle>,
}

impl SessionStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            current: ArcSwapOption::from(None),
        }
    }

    pub fn init(&self) -> Result<(), CoreError> {
        fs::create_dir_all(&self.root_dir)?;
        Ok(())
    }

    fn session_dir(&self, id: &str) -> PathBuf {
        self.root_dir.join(id)
    }

    /// Newest-first list of every session's metadata. Unreadable or
    /// malformed `meta.json` files are skipped.
    pub fn list(&self) -> Vec<SessionMeta> {
        let mut metas = Vec::new();
        let Ok(entries) = fs::read_dir(&self.root_dir) else {
            return metas;
        };
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let meta_path = entry.path().join("meta.json");
            if let Some(meta) = read_json::<SessionMeta>(&meta_path) {
                metas.push(meta);
            }
        }
        metas.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        metas
    }

    pub fn read(&self, id: &str) -> Option<SessionMeta> {
        read_json(&self.session_dir(id).join("meta.json"))
    }

    /// The metadata of the currently active session, if any.
    pub fn current(&self) -> Option<SessionMeta> {
        self.current
            .load_full()
            .map(|handle| handle.state.lock().unwrap().meta.clone())
    }

    /// Start a new session, stopping any currently active one first.
    pub fn start(&self, name: Option<String>) -> Result<SessionMeta, CoreError> {
        if self.current.load().is_some() {
            self.stop();
        }

        let id = uuid::Uuid::new_v4().to_string();
        let dir = self.session_dir(&id);
        fs::create_dir_all(&dir)?;

        let logs_path = dir.join("logs.ndjson");
        let meta = SessionMeta {
            id: id.clone(),
            name: name.unwrap_or_else(|| format!("Session {}", chrono::Utc::now().to_rfc3339())),
            created_at: LogRecord::now_ms(),
            ended_at: None,
            log_count: 0,
            dir: dir.display().to_string(),
            logs_path: logs_path.display().to_string(),
        };

        write_json_atomic(&dir.join("meta.json"), &meta)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&logs_path)?;

        self.current.store(Some(Arc::new(SessionHandle {
            state: Mutex::new(CurrentState {
                meta: meta.clone(),
                file,
            }),
        })));

        Ok(meta)
    }

    /// Append `record` to the active session's log file. A no-op if no
    /// session is active; the pipeline is expected to ignore this case.
    pub fn append(&self, record: &LogRecord) -> Result<(), CoreError> {
        let Some(handle) = self.current.load_full() else {
            return Ok(());
        };
        let mut state = handle.state.lock().unwrap();

        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        state.file.write_all(line.as_bytes())?;
        state.file.flush()?;

        state.meta.log_count += 1;
        let meta_path = self.session_dir(&state.meta.id).join("meta.json");
        write_json_atomic(&meta_path, &state.meta)?;

        Ok(())
    }

    /// Stop the active session, flushing its final metadata. Returns `None`
    /// if no session was active.
    pub fn stop(&self) -> Option<SessionMeta> {
        let handle = self.current.swap(None)?;
        let mut state = handle.state.lock().unwrap();
        state.meta.ended_at = Some(LogRecord::now_ms());
        let meta_path = self.session_dir(&state.meta.id).join("meta.json");
        let _ = write_json_atomic(&meta_path, &state.meta);
        Some(state.meta.clone())
    }

    /// Read the last `limit` log records from a session's `logs.ndjson`, in
    /// file order. Malformed lines are skipped.
    pub fn read_logs(&self, id: &str, limit: usize) -> Result<Vec<LogRecord>, CoreError> {
        let path = self.session_dir(id).join("logs.ndjson");
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for line in reader.lines() {
            let Ok(line) = line else { continue };
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(record) = serde_json::from_str::<LogRecord>(&line) {
                records.push(record);
            }
        }

        if records.len() > limit {
            let skip = records.len() - limit;
            records.drain(..skip);
        }
        Ok(records)
    }

    pub fn read_report(&self, id: &str) -> Option<RouteReport> {
        read_json(&self.session_dir(id).join("report.json"))
    }

    pub fn write_report(&self, id: &str, report: &RouteReport) -> Result<(), CoreError> {
        write_json_atomic(&self.session_dir(id).join("report.json"), report)
    }

    /// The session's cached report, building (and caching) it from its logs
    /// if `report.json` is missing. `route_key` is only used on first build.
    pub fn report_for(&self, id: &str, route_key: &str) -> Result<Option<RouteReport>, CoreError> {
        if let Some(cached) = self.read_report(id) {
            return Ok(Some(cached));
        }
        let Some(meta) = self.read(id) else {
            return Ok(None);
        };
        let logs = self.read_logs(id, usize::MAX)?;
        let report = wiretap_report::build_report(wiretap_report::ReportInput {
            route_key: route_key.to_string(),
            session_id: meta.id,
            logs: &logs,
        });
        self.write_report(id, &report)?;
        Ok(Some(report))
    }
}

impl wiretap_report::SessionCollaborator for SessionStore {
    fn list_sessions(&self) -> Vec<SessionMeta> {
        self.list()
    }

    fn read_report(&self, session_id: &str) -> Option<RouteReport> {
        SessionStore::read_report(self, session_id)
    }

    fn write_report(&self, session_id: &str, report: &RouteReport) -> Result<(), CoreError> {
        SessionStore::write_report(self, session_id, report)
    }

    fn read_logs(&self, session_id: &str, limit: usize) -> Result<Vec<LogRecord>, CoreError> {
        SessionStore::read_logs(self, session_id, limit)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let data = fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}

/// Write `value` to `path` atomically: serialize to a `.tmp` sibling, then
/// rename over the final path, so a crash mid-write never corrupts it.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiretap_core::model::RequestPart;

    fn record(id: &str) -> LogRecord {
        LogRecord {
            id: id.to_string(),
            ts: 0,
            method: "GET".to_string(),
            url: "http://example.com/".to_string(),
            host: "example.com".to_string(),
            path: "/".to_string(),
            status: Some(200),
            duration_ms: Some(1),
            request: RequestPart::default(),
            response: None,
        }
    }

    #[test]
    fn start_creates_directory_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.init().unwrap();
        let meta = store.start(Some("my session".to_string())).unwrap();

        assert!(Path::new(&meta.dir).join("meta.json").exists());
        assert_eq!(meta.log_count, 0);
        assert_eq!(meta.name, "my session");
    }

    #[test]
    fn starting_twice_stops_the_previous_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.init().unwrap();
        let first = store.start(None).unwrap();
        let _second = store.start(None).unwrap();

        let reloaded = store.read(&first.id).unwrap();
        assert!(reloaded.ended_at.is_some());
    }

    #[test]
    fn append_increments_log_count_and_persists_meta() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.init().unwrap();
        let meta = store.start(None).unwrap();

        store.append(&record("1")).unwrap();
        store.append(&record("2")).unwrap();

        let reloaded = store.read(&meta.id).unwrap();
        assert_eq!(reloaded.log_count, 2);

        let logs = store.read_logs(&meta.id, 10).unwrap();
        assert_eq!(logs.len(), 2);
    }

    #[test]
    fn append_without_active_session_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.init().unwrap();
        store.append(&record("1")).unwrap();
    }

    #[test]
    fn read_logs_respects_limit_and_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.init().unwrap();
        let meta = store.start(None).unwrap();
        for i in 0..5 {
            store.append(&record(&i.to_string())).unwrap();
        }

        let logs = store.read_logs(&meta.id, 2).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].id, "3");
        assert_eq!(logs[1].id, "4");
    }

    #[test]
    fn list_returns_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.init().unwrap();
        let first = store.start(None).unwrap();
        store.stop();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = store.start(None).unwrap();
        store.stop();

        let all = store.list();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[1].id, first.id);
    }

    #[test]
    fn stop_without_active_session_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.init().unwrap();
        assert!(store.stop().is_none());
    }

    #[test]
    fn report_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.init().unwrap();
        let meta = store.start(None).unwrap();

        let report = RouteReport {
            route_key: "orders".to_string(),
            session_id: meta.id.clone(),
            created_at: 1000,
            total_logs: 0,
            endpoints: vec![],
        };
        store.write_report(&meta.id, &report).unwrap();

        let reloaded = store.read_report(&meta.id).unwrap();
        assert_eq!(reloaded.route_key, "orders");
    }
}
