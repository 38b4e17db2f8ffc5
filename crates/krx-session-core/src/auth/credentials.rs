use std::fmt;
use std::path::Path;

use anyhow::Result;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::SessionConfig;
use crate::error::SessionError;

/// Accepted keys for the member id in a credentials file
const FILE_ID_KEYS: &[&str] = &["mbrId", "mbr_id", "id"];

/// Accepted keys for the password in a credentials file
const FILE_SECRET_KEYS: &[&str] = &["pw", "password"];

/// A member id / password pair, resolved fresh for every login attempt
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub id: String,
    pub secret: String,
}

impl Credential {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

pub struct CredentialResolver<'a> {
    config: &'a SessionConfig,
}

impl<'a> CredentialResolver<'a> {
    pub fn new(config: &'a SessionConfig) -> Self {
        Self { config }
    }

    /// Resolve credentials: explicit arguments, then environment, then the credentials file.
    ///
    /// Each field is taken from the highest-precedence source that provides it,
    /// so a complete explicit pair always shadows the environment and the file.
    /// Returns `Ok(None)` when no complete pair is available; a malformed
    /// credentials file is a configuration error.
    pub fn resolve(
        &self,
        explicit_id: Option<&str>,
        explicit_secret: Option<&str>,
    ) -> Result<Option<Credential>> {
        let mut id = non_empty(explicit_id);
        let mut secret = non_empty(explicit_secret);
        if let (Some(id), Some(secret)) = (&id, &secret) {
            return Ok(Some(Credential::new(id, secret)));
        }

        id = id.or_else(|| non_empty(self.config.env_id.as_deref()));
        secret = secret.or_else(|| non_empty(self.config.env_secret.as_deref()));
        if let (Some(id), Some(secret)) = (&id, &secret) {
            debug!("Credentials resolved from environment");
            return Ok(Some(Credential::new(id, secret)));
        }

        if let Some(ref path) = self.config.credentials_file {
            if let Some(data) = load_credentials_file(path)? {
                id = id.or_else(|| first_string(&data, FILE_ID_KEYS));
                secret = secret.or_else(|| first_string(&data, FILE_SECRET_KEYS));
            }
        }

        match (id, secret) {
            (Some(id), Some(secret)) => {
                debug!("Credentials resolved from credentials file");
                Ok(Some(Credential::new(id, secret)))
            }
            _ => Ok(None),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

fn first_string(data: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| data.get(*k).and_then(Value::as_str))
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Read the credentials file. A missing file is `None`; unreadable or
/// non-object content is an error rather than a silent fall-through.
fn load_credentials_file(path: &Path) -> Result<Option<Map<String, Value>>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(path).map_err(|e| {
        SessionError::Configuration(format!(
            "Failed to read KRX credentials file: {} ({})",
            path.display(),
            e
        ))
    })?;

    let value: Value = serde_json::from_str(&contents).map_err(|e| {
        SessionError::Configuration(format!(
            "Failed to read KRX credentials file: {} ({})",
            path.display(),
            e
        ))
    })?;

    match value {
        Value::Object(map) => Ok(Some(map)),
        _ => Err(SessionError::Configuration(format!(
            "Invalid KRX credentials file format: {}",
            path.display()
        ))
        .into()),
    }
}
