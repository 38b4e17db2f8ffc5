//! Session configuration.
//!
//! Every environment-provided setting is read once into a `SessionConfig`.
//! Paths default to `~/.config/krx-session/` (the platform config dir):
//!
//! - `session.json` holds the shared session record
//! - `krx_credentials.json` holds an optional id/password pair

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name used for config directory paths
pub const APP_NAME: &str = "krx-session";

/// Session file name in the config directory
const SESSION_FILE: &str = "session.json";

/// Credentials file name in the config directory
const CREDENTIALS_FILE: &str = "krx_credentials.json";

/// Portal serving both the login endpoints and the data endpoints
pub const DEFAULT_BASE_URL: &str = "https://data.krx.co.kr";

/// HTTP request timeout in seconds
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Validity window of a freshly created session.
/// The portal drops idle sessions after roughly half an hour.
pub const SESSION_TTL_MINUTES: i64 = 30;

/// How long to wait for the session lock before falling back to unlocked I/O
pub const LOCK_WAIT_MILLIS: u64 = 5_000;

pub const ENV_ID: [&str; 2] = ["KRX_MBR_ID", "KRX_ID"];
pub const ENV_SECRET: [&str; 2] = ["KRX_PASSWORD", "KRX_PW"];
pub const ENV_SESSION_FILE: &str = "KRX_SESSION_FILE";
pub const ENV_SESSION_DIR: &str = "KRX_SESSION_DIR";
pub const ENV_CREDENTIALS_FILE: &str = "KRX_CREDENTIALS_FILE";
pub const ENV_BASE_URL: &str = "KRX_BASE_URL";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Member id from the environment, if any
    pub env_id: Option<String>,
    /// Password from the environment, if any
    pub env_secret: Option<String>,
    pub session_file: PathBuf,
    pub credentials_file: Option<PathBuf>,
    pub base_url: String,
    pub request_timeout: Duration,
    pub session_ttl_minutes: i64,
    pub lock_wait: Duration,
}

impl SessionConfig {
    /// Build a configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let first = |keys: &[&str]| keys.iter().find_map(|k| get(*k));

        let session_file = if let Some(file) = get(ENV_SESSION_FILE) {
            expand_home(&file)
        } else if let Some(dir) = get(ENV_SESSION_DIR) {
            expand_home(&dir).join(SESSION_FILE)
        } else {
            default_dir().join(SESSION_FILE)
        };

        let credentials_file = get(ENV_CREDENTIALS_FILE)
            .map(|p| expand_home(&p))
            .or_else(|| Some(default_dir().join(CREDENTIALS_FILE)));

        let base_url = get(ENV_BASE_URL)
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Self {
            env_id: first(&ENV_ID[..]),
            env_secret: first(&ENV_SECRET[..]),
            session_file,
            credentials_file,
            base_url,
            ..Self::with_session_file(PathBuf::new())
        }
    }

    /// A configuration with no environment credentials, pointing at the given session file.
    /// Useful for tests and embedding.
    pub fn with_session_file(session_file: PathBuf) -> Self {
        Self {
            env_id: None,
            env_secret: None,
            session_file,
            credentials_file: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            session_ttl_minutes: SESSION_TTL_MINUTES,
            lock_wait: Duration::from_millis(LOCK_WAIT_MILLIS),
        }
    }
}

fn default_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Expand a leading `~` to the user's home directory
fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    Path::new(path).to_path_buf()
}
