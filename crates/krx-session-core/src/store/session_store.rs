use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::lock::{with_file_lock, LockMode};
use super::record::SessionRecord;
use crate::config::{SessionConfig, LOCK_WAIT_MILLIS};
use crate::session::CookieJar;

/// Distinguishes temporary files of concurrent writers in one process
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// File-backed session storage shared by every process on the machine.
///
/// All failures are absorbed: a broken or unreadable file simply means
/// there is no usable session.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
    lock_wait: Duration,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock_wait: Duration::from_millis(LOCK_WAIT_MILLIS),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            path: config.session_file.clone(),
            lock_wait: config.lock_wait,
        }
    }

    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "session.json".to_string())
    }

    /// Sibling lock file: `<name>.lock`
    pub fn lock_path(&self) -> PathBuf {
        self.path.with_file_name(format!("{}.lock", self.file_name()))
    }

    /// Sibling temporary file for one write: `<name>.<pid>.<seq>.tmp`
    fn tmp_path(&self) -> PathBuf {
        let seq = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.path.with_file_name(format!(
            "{}.{}.{}.tmp",
            self.file_name(),
            std::process::id(),
            seq
        ))
    }

    /// Persist the cookies of a live session. Never fails; returns whether the write landed.
    pub fn save(&self, jar: &CookieJar, mbr_no: Option<&str>, ttl_minutes: i64) -> bool {
        let record = SessionRecord::new(jar.snapshot(), mbr_no.map(str::to_string), ttl_minutes);
        self.save_record(&record)
    }

    /// Write a record under an exclusive lock, or unlocked if the lock is unavailable.
    pub fn save_record(&self, record: &SessionRecord) -> bool {
        let contents = match serde_json::to_string_pretty(record) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to serialize session record");
                return false;
            }
        };

        let written = match with_file_lock(&self.lock_path(), LockMode::Exclusive, self.lock_wait, || {
            self.write_file(&contents)
        }) {
            Ok(result) => result,
            Err(e) => {
                debug!(error = %e, "Session lock unavailable, writing without it");
                self.write_file(&contents)
            }
        };

        match written {
            Ok(()) => {
                debug!(path = %self.path.display(), cookies = record.cookies.len(), "Session saved");
                true
            }
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "Failed to save session");
                false
            }
        }
    }

    /// Load a usable session record.
    ///
    /// `None` when the file is missing, unreadable, malformed, or expired.
    /// A successful load bumps `last_used` on disk, best effort.
    pub fn load(&self) -> Option<SessionRecord> {
        if !self.path.exists() {
            return None;
        }

        let contents = match with_file_lock(&self.lock_path(), LockMode::Shared, self.lock_wait, || {
            std::fs::read_to_string(&self.path)
        }) {
            Ok(result) => result,
            Err(e) => {
                debug!(error = %e, "Session lock unavailable, reading without it");
                std::fs::read_to_string(&self.path)
            }
        };

        let contents = match contents {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "Failed to read session file");
                return None;
            }
        };

        let mut record = match SessionRecord::parse(&contents) {
            Some(r) => r,
            None => {
                warn!(path = %self.path.display(), "Ignoring unusable session file");
                return None;
            }
        };

        if record.is_expired() {
            debug!(expires_at = %record.expires_at, "Stored session expired");
            return None;
        }

        record.touch();
        self.bump_last_used(&record);
        Some(record)
    }

    /// `load` on tokio's blocking pool.
    ///
    /// `load` and `save` may sleep while another process holds the lock, so
    /// async callers go through these wrappers instead of calling them inline.
    pub async fn load_async(&self) -> Option<SessionRecord> {
        let store = self.clone();
        match tokio::task::spawn_blocking(move || store.load()).await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Session load task failed");
                None
            }
        }
    }

    /// `save` on tokio's blocking pool. The jar is snapshotted before returning control.
    pub async fn save_async(&self, jar: &CookieJar, mbr_no: Option<&str>, ttl_minutes: i64) -> bool {
        let record = SessionRecord::new(jar.snapshot(), mbr_no.map(str::to_string), ttl_minutes);
        let store = self.clone();
        match tokio::task::spawn_blocking(move || store.save_record(&record)).await {
            Ok(saved) => saved,
            Err(e) => {
                warn!(error = %e, "Session save task failed");
                false
            }
        }
    }

    /// Delete the session file. Idempotent; errors are ignored.
    pub fn clear(&self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                debug!(error = %e, "Failed to remove session file");
            } else {
                debug!(path = %self.path.display(), "Session file cleared");
            }
        }
    }

    /// Rewrite the record with a new `last_used`. Skipped if the lock is unavailable.
    fn bump_last_used(&self, record: &SessionRecord) {
        let contents = match serde_json::to_string_pretty(record) {
            Ok(c) => c,
            Err(_) => return,
        };
        let result = with_file_lock(&self.lock_path(), LockMode::Exclusive, self.lock_wait, || {
            self.write_file(&contents)
        });
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) | Err(e) => debug!(error = %e, "Failed to update session last_used"),
        }
    }

    /// Write through a temporary sibling and rename, so readers never see a partial file.
    fn write_file(&self, contents: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let tmp = self.tmp_path();
        std::fs::write(&tmp, contents)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;

        // Cookies are credentials: keep them private on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600));
        }

        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e).with_context(|| format!("Failed to replace {}", self.path.display()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StoredCookie;
    use chrono::{Duration as ChronoDuration, Utc};

    fn store_in(dir: &tempfile::TempDir) -> SessionStore {
        SessionStore::new(dir.path().join("session.json")).with_lock_wait(Duration::from_millis(200))
    }

    fn jar_with_cookie() -> CookieJar {
        let jar = CookieJar::new();
        jar.insert(
            "_test_cookie",
            StoredCookie::new("1").with_domain("data.krx.co.kr"),
        );
        jar
    }

    #[test]
    fn test_save_writes_session_and_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert!(store.save(&jar_with_cookie(), Some("1"), 1));
        assert!(dir.path().join("session.json").exists());
        assert!(dir.path().join("session.json.lock").exists());
    }

    #[test]
    fn test_save_then_load_returns_same_cookies() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let jar = jar_with_cookie();

        store.save(&jar, Some("M123"), 30);
        let record = store.load().expect("session within ttl");
        assert_eq!(record.cookies, jar.snapshot());
        assert_eq!(record.mbr_no.as_deref(), Some("M123"));
        assert_eq!(record.ttl_minutes, 30);
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store_in(&dir).load().is_none());
    }

    #[test]
    fn test_load_expired_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut record = SessionRecord::new(jar_with_cookie().snapshot(), None, 30);
        record.created_at = Utc::now() - ChronoDuration::minutes(31);
        record.expires_at = Utc::now() - ChronoDuration::minutes(1);
        assert!(store.save_record(&record));

        assert!(store.load().is_none());
    }

    #[test]
    fn test_load_corrupt_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "{ not json").unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_load_bumps_last_used_without_extending_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut record = SessionRecord::new(jar_with_cookie().snapshot(), Some("1".into()), 30);
        record.last_used = record.created_at - ChronoDuration::minutes(5);
        store.save_record(&record);

        let loaded = store.load().expect("fresh session");
        assert!(loaded.last_used > record.last_used);
        assert_eq!(loaded.expires_at, record.expires_at);

        let on_disk = SessionRecord::parse(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(on_disk.last_used, loaded.last_used);
        assert_eq!(on_disk.expires_at, record.expires_at);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&jar_with_cookie(), None, 30);

        store.clear();
        assert!(!store.path().exists());
        store.clear();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("a").join("b").join("session.json"));
        assert!(store.save(&jar_with_cookie(), None, 30));
        assert!(store.load().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_save_falls_back_when_lock_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).with_lock_wait(Duration::from_millis(50));

        let saved = with_file_lock(&store.lock_path(), LockMode::Shared, Duration::from_millis(50), || {
            store.save(&jar_with_cookie(), Some("9"), 30)
        })
        .unwrap();
        assert!(saved);
        assert_eq!(store.load().and_then(|r| r.mbr_no).as_deref(), Some("9"));
    }

    #[cfg(unix)]
    #[test]
    fn test_load_falls_back_when_lock_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).with_lock_wait(Duration::from_millis(50));
        let jar = jar_with_cookie();
        assert!(store.save(&jar, Some("7"), 30));

        // Neither the shared read lock nor the last_used bump can be taken
        let loaded = with_file_lock(&store.lock_path(), LockMode::Exclusive, Duration::from_millis(50), || {
            store.load()
        })
        .unwrap();

        let record = loaded.expect("unlocked read still returns the session");
        assert_eq!(record.cookies, jar.snapshot());
        assert_eq!(record.mbr_no.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_async_wrappers_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let jar = jar_with_cookie();

        assert!(store.save_async(&jar, Some("M9"), 30).await);
        let record = store.load_async().await.expect("session within ttl");
        assert_eq!(record.cookies, jar.snapshot());
        assert_eq!(record.mbr_no.as_deref(), Some("M9"));
    }

    #[test]
    fn test_tmp_file_named_after_session_file() {
        let store = SessionStore::new(PathBuf::from("/x/s.dat"));
        let tmp = store.tmp_path();
        let name = tmp.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(tmp.parent(), Some(Path::new("/x")));
        assert!(name.starts_with(&format!("s.dat.{}.", std::process::id())));
        assert!(name.ends_with(".tmp"));
        assert_ne!(store.tmp_path(), tmp);
    }

    #[test]
    fn test_custom_file_name_leaves_no_stray_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("s.dat"));
        assert!(store.save(&jar_with_cookie(), None, 30));
        assert!(store.load().is_some());

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["s.dat".to_string(), "s.dat.lock".to_string()]);
    }

    #[test]
    fn test_lock_path_is_sibling() {
        let store = SessionStore::new(PathBuf::from("/tmp/x/custom.json"));
        assert_eq!(store.lock_path(), PathBuf::from("/tmp/x/custom.json.lock"));
    }
}
