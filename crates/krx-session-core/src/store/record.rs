use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SESSION_TTL_MINUTES;
use crate::session::StoredCookie;

/// The durable session artifact shared between processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub cookies: BTreeMap<String, StoredCookie>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    /// Member number returned by the portal on login
    pub mbr_no: Option<String>,
    pub ttl_minutes: i64,
}

impl SessionRecord {
    pub fn new(
        cookies: BTreeMap<String, StoredCookie>,
        mbr_no: Option<String>,
        ttl_minutes: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            cookies,
            created_at: now,
            expires_at: now + Duration::minutes(ttl_minutes),
            last_used: now,
            mbr_no,
            ttl_minutes,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes().max(0)
    }

    /// Mark the record as used now. Never extends `expires_at`.
    pub fn touch(&mut self) {
        self.last_used = Utc::now();
    }

    /// Parse a session file leniently.
    ///
    /// Returns `None` when the content is not a JSON object or `expires_at`
    /// is missing or unparseable. Expiry itself is checked by the caller.
    pub fn parse(contents: &str) -> Option<Self> {
        let raw: RawRecord = serde_json::from_str(contents).ok()?;

        let expires_at = parse_timestamp(raw.expires_at.as_deref()?)?;
        let created_at = raw
            .created_at
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(expires_at);
        let last_used = raw
            .last_used
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(created_at);

        Some(Self {
            cookies: raw.cookies,
            created_at,
            expires_at,
            last_used,
            mbr_no: raw.mbr_no.and_then(value_to_string),
            ttl_minutes: raw.ttl_minutes.unwrap_or(SESSION_TTL_MINUTES),
        })
    }
}

/// On-disk shape with every field optional, so older or hand-edited files
/// degrade to "no usable session" instead of an error.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    cookies: BTreeMap<String, StoredCookie>,
    created_at: Option<String>,
    expires_at: Option<String>,
    last_used: Option<String>,
    mbr_no: Option<Value>,
    ttl_minutes: Option<i64>,
}

/// RFC 3339, or a naive ISO-8601 timestamp interpreted as local time
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
