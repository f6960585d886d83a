//! Local Codex session log scanner
//!
//! Codex writes one append-only JSONL file per session under
//! `~/.codex/sessions`. Every turn appends an `event_msg` whose payload has
//! `type: "token_count"` and, on recent producer versions, a `rate_limits`
//! object describing the primary (short) and secondary (weekly) windows.
//!
//! The scanner looks at the most recently modified files first and reads each
//! one from the last line backwards, returning the first usable record.
//!
//! ```text
//! {"timestamp":"...","type":"event_msg","payload":{"type":"token_count",
//!   "info":{...},"rate_limits":{"primary":{"used_percent":12.0,
//!   "window_minutes":300,"resets_at":1760000000},"secondary":{...}}}}
//! ```
//!
//! Older producers nested the object as `payload.info.rate_limits`; both
//! shapes are accepted.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use walkdir::{DirEntry, WalkDir};

use super::provider::{AcquireRequest, Acquisition, QuotaError, SnapshotSource};
use super::types::{PollMode, SessionWindow, UsageSnapshot};

// ============================================================================
// Constants
// ============================================================================

/// Extension of session record files
const SESSION_FILE_EXTENSION: &str = "jsonl";

/// Payload type tag of usage records
const TOKEN_COUNT_TYPE: &str = "token_count";

/// Substrings every candidate line must contain before it is parsed
const TYPE_MARKER: &str = "\"token_count\"";
const RATE_LIMIT_MARKER: &str = "\"rate_limits\"";

/// How far back the engine looks for a session file
pub const DEFAULT_SESSION_MAX_AGE: Duration = Duration::from_secs(12 * 60 * 60);

/// Environment variable overriding the sessions root
pub const SESSIONS_DIR_ENV: &str = "RATEWATCH_SESSIONS_DIR";

// ============================================================================
// Scanner
// ============================================================================

/// Default sessions root: `RATEWATCH_SESSIONS_DIR` or `~/.codex/sessions`
pub fn default_sessions_dir() -> PathBuf {
    if let Ok(path) = std::env::var(SESSIONS_DIR_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(shellexpand::tilde(&path).to_string());
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".codex")
        .join("sessions")
}

/// A session file and its modification time
#[derive(Debug, Clone)]
struct SessionFile {
    path: PathBuf,
    modified: DateTime<Utc>,
}

/// Find the most recent rate-limit record under `root`
///
/// Returns `Ok(None)` when no file yields a record. When `max_age` is given,
/// iteration stops at the first file older than the cutoff; files are assumed
/// to be roughly chronological, so nothing older is read.
///
/// # Errors
///
/// `QuotaError::Scan` when `root` is missing or not a directory,
/// `QuotaError::Io` when a candidate file cannot be read.
pub fn scan(root: &Path, max_age: Option<Duration>) -> Result<Option<UsageSnapshot>, QuotaError> {
    let files = session_files(root)?;
    let cutoff = cutoff_for(max_age);

    log::debug!(
        "[quota:session] Found {} session files under {:?}",
        files.len(),
        root
    );

    for file in files {
        if let Some(cutoff) = cutoff {
            if file.modified < cutoff {
                log::debug!(
                    "[quota:session] Stopping at {:?}: older than {}",
                    file.path,
                    cutoff.to_rfc3339()
                );
                break;
            }
        }

        let content = fs::read_to_string(&file.path).map_err(|e| {
            log::warn!("[quota:session] Failed to read {:?}: {}", file.path, e);
            QuotaError::Io(format!("{}: {}", file.path.display(), e))
        })?;

        if let Some(snapshot) = latest_rate_limit(&content) {
            log::info!("[quota:session] Rate limits found in {:?}", file.path);
            return Ok(Some(snapshot));
        }
    }

    Ok(None)
}

/// Whether any session file under `root` was modified within `max_age`
pub fn has_recent_session(root: &Path, max_age: Duration) -> Result<bool, QuotaError> {
    let cutoff = cutoff_for(Some(max_age));
    let files = session_files(root)?;
    Ok(files
        .first()
        .map(|f| cutoff.map_or(true, |c| f.modified >= c))
        .unwrap_or(false))
}

fn cutoff_for(max_age: Option<Duration>) -> Option<DateTime<Utc>> {
    max_age
        .and_then(|age| chrono::Duration::from_std(age).ok())
        .and_then(|age| Utc::now().checked_sub_signed(age))
}

/// All session files under `root`, newest first
fn session_files(root: &Path) -> Result<Vec<SessionFile>, QuotaError> {
    if !root.is_dir() {
        return Err(QuotaError::Scan(root.display().to_string()));
    }

    let mut files: Vec<SessionFile> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .map_or(false, |ext| ext == SESSION_FILE_EXTENSION)
        })
        .map(|e| {
            let modified = e
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            SessionFile {
                path: e.into_path(),
                modified,
            }
        })
        .collect();

    files.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(files)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

// ============================================================================
// Record Parsing
// ============================================================================

/// Latest usable record in a file's content, scanning from the end
fn latest_rate_limit(content: &str) -> Option<UsageSnapshot> {
    content
        .lines()
        .rev()
        .filter(|line| line.contains(TYPE_MARKER) && line.contains(RATE_LIMIT_MARKER))
        .find_map(parse_record)
}

/// Parse one JSONL line into a snapshot; malformed or foreign lines give `None`
fn parse_record(line: &str) -> Option<UsageSnapshot> {
    let root: Value = serde_json::from_str(line).ok()?;
    let payload = root.get("payload")?;

    if payload.get("type").and_then(|t| t.as_str()) != Some(TOKEN_COUNT_TYPE) {
        return None;
    }

    let rate_limits = payload
        .get("rate_limits")
        .filter(|v| v.is_object())
        .or_else(|| {
            payload
                .get("info")
                .and_then(|info| info.get("rate_limits"))
                .filter(|v| v.is_object())
        })?;

    Some(UsageSnapshot::local(
        rate_limits.get("primary").and_then(parse_window),
        rate_limits.get("secondary").and_then(parse_window),
    ))
}

fn parse_window(value: &Value) -> Option<SessionWindow> {
    if !value.is_object() {
        return None;
    }
    Some(SessionWindow {
        used_percent: value.get("used_percent").and_then(|v| v.as_f64()),
        window_minutes: value.get("window_minutes").and_then(whole_minutes),
        resets_at: value.get("resets_at").and_then(epoch_to_datetime),
    })
}

/// Non-negative whole number, written either as an integer or as `300.0`
fn whole_minutes(value: &Value) -> Option<u64> {
    if let Some(minutes) = value.as_u64() {
        return Some(minutes);
    }
    let minutes = value.as_f64()?;
    (minutes.is_finite() && minutes >= 0.0 && minutes.fract() == 0.0 && minutes <= u64::MAX as f64)
        .then(|| minutes as u64)
}

/// Unix seconds, integer or fractional, to a UTC timestamp
fn epoch_to_datetime(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(secs) = value.as_i64() {
        return Utc.timestamp_opt(secs, 0).single();
    }
    let secs = value.as_f64()?;
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1_000_000_000.0).round() as u32;
    Utc.timestamp_opt(whole as i64, nanos.min(999_999_999)).single()
}

// ============================================================================
// SnapshotSource Implementation
// ============================================================================

/// Snapshot source backed by the local session logs
pub struct SessionLogSource {
    root: PathBuf,
    max_age: Option<Duration>,
}

impl SessionLogSource {
    /// Source reading the default sessions root with the default recency window
    pub fn new() -> Self {
        Self::with_root(default_sessions_dir())
    }

    /// Source reading a custom root
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            root,
            max_age: Some(DEFAULT_SESSION_MAX_AGE),
        }
    }

    /// Override the recency window (`None` scans every file)
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    /// The sessions root this source reads
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for SessionLogSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotSource for SessionLogSource {
    fn source_id(&self) -> &'static str {
        "codex_sessions"
    }

    fn display_name(&self) -> &'static str {
        "Codex sessions"
    }

    fn mode(&self) -> PollMode {
        PollMode::LocalSession
    }

    async fn acquire(&self, _request: &AcquireRequest) -> Acquisition {
        let root = self.root.clone();
        let max_age = self.max_age;

        match tokio::task::spawn_blocking(move || scan(&root, max_age)).await {
            Ok(result) => Acquisition::from(result),
            Err(e) => {
                log::error!("[quota:session] Scan task failed: {}", e);
                Acquisition::Failed(QuotaError::Io(format!("scan task failed: {}", e)))
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn record(primary_percent: f64, secondary_percent: f64) -> String {
        format!(
            r#"{{"timestamp":"2025-10-01T10:00:00Z","type":"event_msg","payload":{{"type":"token_count","info":null,"rate_limits":{{"primary":{{"used_percent":{},"window_minutes":300,"resets_at":1760000000}},"secondary":{{"used_percent":{},"window_minutes":10080,"resets_at":1760500000.5}}}}}}}}"#,
            primary_percent, secondary_percent
        )
    }

    fn write_file(path: &Path, lines: &[String]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut file = File::create(path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
    }

    fn set_age(path: &Path, age: Duration) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn test_missing_root_is_scan_error() {
        let dir = TempDir::new().unwrap();
        let result = scan(&dir.path().join("nope"), None);
        assert!(matches!(result, Err(QuotaError::Scan(_))));
    }

    #[test]
    fn test_root_that_is_a_file_is_scan_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.jsonl");
        write_file(&path, &[record(1.0, 2.0)]);
        assert!(matches!(scan(&path, None), Err(QuotaError::Scan(_))));
    }

    #[test]
    fn test_empty_root_is_not_found() {
        let dir = TempDir::new().unwrap();
        assert_eq!(scan(dir.path(), None).unwrap(), None);
    }

    #[test]
    fn test_latest_line_wins_within_a_file() {
        let dir = TempDir::new().unwrap();
        write_file(
            &dir.path().join("2025/10/01/rollout-a.jsonl"),
            &[record(10.0, 20.0), record(30.0, 40.0)],
        );

        let snapshot = scan(dir.path(), None).unwrap().unwrap();
        assert_eq!(snapshot.origin, PollMode::LocalSession);
        let primary = snapshot.primary.unwrap();
        assert_eq!(primary.used_percent, Some(30.0));
        assert_eq!(primary.window_minutes, Some(300));
        assert_eq!(
            primary.resets_at,
            Utc.timestamp_opt(1_760_000_000, 0).single()
        );
        let secondary = snapshot.secondary.unwrap();
        assert_eq!(secondary.used_percent, Some(40.0));
        assert_eq!(secondary.window_minutes, Some(10080));
        assert_eq!(
            secondary.resets_at,
            Utc.timestamp_opt(1_760_500_000, 500_000_000).single()
        );
    }

    #[test]
    fn test_kth_newest_file_with_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let newest = dir.path().join("a/newest.jsonl");
        let middle = dir.path().join("b/middle.jsonl");
        let oldest = dir.path().join("c/oldest.jsonl");

        write_file(
            &newest,
            &[
                r#"{"type":"event_msg","payload":{"type":"agent_message"}}"#.to_string(),
                r#"{"payload":{"type":"token_count","rate_limits": BROKEN"#.to_string(),
            ],
        );
        write_file(
            &middle,
            &[
                record(55.0, 5.0),
                record(66.0, 6.0),
                "not json at all \"token_count\" \"rate_limits\"".to_string(),
                r#"{"payload":{"type":"token_count","info":{"total":1}}}"#.to_string(),
            ],
        );
        write_file(&oldest, &[record(99.0, 9.0)]);

        set_age(&newest, Duration::from_secs(10));
        set_age(&middle, Duration::from_secs(60));
        set_age(&oldest, Duration::from_secs(120));

        let snapshot = scan(dir.path(), None).unwrap().unwrap();
        assert_eq!(snapshot.primary.unwrap().used_percent, Some(66.0));
    }

    #[test]
    fn test_nested_info_rate_limits_shape() {
        let dir = TempDir::new().unwrap();
        write_file(
            &dir.path().join("s.jsonl"),
            &[r#"{"payload":{"type":"token_count","info":{"rate_limits":{"primary":{"used_percent":12,"window_minutes":300,"resets_at":1760000000}}}}}"#.to_string()],
        );

        let snapshot = scan(dir.path(), None).unwrap().unwrap();
        assert_eq!(snapshot.primary.unwrap().used_percent, Some(12.0));
        assert!(snapshot.secondary.is_none());
    }

    #[test]
    fn test_fractional_window_minutes() {
        let whole = serde_json::json!(300.0);
        assert_eq!(whole_minutes(&whole), Some(300));
        assert_eq!(whole_minutes(&serde_json::json!(10080)), Some(10080));
        assert_eq!(whole_minutes(&serde_json::json!(300.5)), None);
        assert_eq!(whole_minutes(&serde_json::json!(-5.0)), None);
        assert_eq!(whole_minutes(&serde_json::json!("300")), None);

        let dir = TempDir::new().unwrap();
        write_file(
            &dir.path().join("s.jsonl"),
            &[r#"{"payload":{"type":"token_count","rate_limits":{"primary":{"used_percent":20.0,"window_minutes":300.0}}}}"#.to_string()],
        );
        let snapshot = scan(dir.path(), None).unwrap().unwrap();
        assert_eq!(snapshot.primary.unwrap().window_minutes, Some(300));
    }

    #[test]
    fn test_huge_max_age_means_no_cutoff() {
        let dir = TempDir::new().unwrap();
        write_file(
            &dir.path().join("s.jsonl"),
            &[r#"{"payload":{"type":"token_count","rate_limits":{"primary":{"used_percent":20.0}}}}"#.to_string()],
        );
        let snapshot = scan(dir.path(), Some(Duration::from_secs(u64::MAX))).unwrap();
        assert!(snapshot.is_some());
    }

    #[test]
    fn test_other_payload_types_are_ignored() {
        let dir = TempDir::new().unwrap();
        write_file(
            &dir.path().join("s.jsonl"),
            &[r#"{"payload":{"type":"turn_context","kind":"token_count","rate_limits":{"primary":{"used_percent":1}}}}"#.to_string()],
        );
        assert_eq!(scan(dir.path(), None).unwrap(), None);
    }

    #[test]
    fn test_hidden_and_foreign_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        write_file(&dir.path().join(".hidden.jsonl"), &[record(1.0, 1.0)]);
        write_file(&dir.path().join(".cache/inner.jsonl"), &[record(2.0, 2.0)]);
        write_file(&dir.path().join("notes.txt"), &[record(3.0, 3.0)]);
        assert_eq!(scan(dir.path(), None).unwrap(), None);

        write_file(&dir.path().join("visible.jsonl"), &[record(4.0, 4.0)]);
        let snapshot = scan(dir.path(), None).unwrap().unwrap();
        assert_eq!(snapshot.primary.unwrap().used_percent, Some(4.0));
    }

    #[test]
    fn test_max_age_short_circuits_without_reading() {
        let dir = TempDir::new().unwrap();
        let stale = dir.path().join("stale.jsonl");
        // Invalid UTF-8: reading this file would fail with an I/O error.
        fs::write(&stale, [0xff, 0xfe, 0xfd]).unwrap();
        set_age(&stale, Duration::from_secs(48 * 60 * 60));

        let result = scan(dir.path(), Some(Duration::from_secs(12 * 60 * 60)));
        assert_eq!(result.unwrap(), None);

        // Without the cutoff the same file is read and fails.
        assert!(matches!(scan(dir.path(), None), Err(QuotaError::Io(_))));
    }

    #[test]
    fn test_max_age_keeps_recent_files() {
        let dir = TempDir::new().unwrap();
        let fresh = dir.path().join("fresh.jsonl");
        write_file(&fresh, &[record(21.0, 2.0)]);
        set_age(&fresh, Duration::from_secs(60));

        let snapshot = scan(dir.path(), Some(Duration::from_secs(3600)))
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.primary.unwrap().used_percent, Some(21.0));
    }

    #[test]
    fn test_has_recent_session() {
        let dir = TempDir::new().unwrap();
        assert!(!has_recent_session(dir.path(), Duration::from_secs(3600)).unwrap());

        let path = dir.path().join("s.jsonl");
        write_file(&path, &[String::from("{}")]);
        set_age(&path, Duration::from_secs(7200));
        assert!(!has_recent_session(dir.path(), Duration::from_secs(3600)).unwrap());
        assert!(has_recent_session(dir.path(), Duration::from_secs(3 * 3600)).unwrap());
    }

    #[test]
    fn test_epoch_to_datetime_variants() {
        assert_eq!(
            epoch_to_datetime(&serde_json::json!(0)),
            Utc.timestamp_opt(0, 0).single()
        );
        assert_eq!(
            epoch_to_datetime(&serde_json::json!(1.25)),
            Utc.timestamp_opt(1, 250_000_000).single()
        );
        assert_eq!(epoch_to_datetime(&serde_json::json!("1760000000")), None);
    }

    #[tokio::test]
    async fn test_source_acquire_maps_results() {
        let dir = TempDir::new().unwrap();
        let source = SessionLogSource::with_root(dir.path().to_path_buf());
        let request = AcquireRequest::default();

        assert_eq!(source.acquire(&request).await, Acquisition::NotFound);

        write_file(&dir.path().join("s.jsonl"), &[record(70.0, 7.0)]);
        match source.acquire(&request).await {
            Acquisition::Snapshot(snapshot) => {
                assert_eq!(snapshot.usage_percent(), Some(70.0))
            }
            other => panic!("unexpected acquisition: {:?}", other),
        }

        let missing = SessionLogSource::with_root(dir.path().join("missing"));
        assert!(matches!(
            missing.acquire(&request).await,
            Acquisition::Failed(QuotaError::Scan(_))
        ));
        assert_eq!(source.mode(), PollMode::LocalSession);
    }
}
