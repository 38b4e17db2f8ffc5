//! Login handshake against the portal.
//!
//! Two requests: a GET of the login landing page (sets anti-automation
//! cookies, best effort) and a form POST of the credentials. The POST
//! response is classified into success or a descriptive failure.

use std::time::Duration;

use anyhow::Result;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::credentials::Credential;
use super::protocol::{LoginProtocol, BROWSER_USER_AGENT};
use crate::api::{OutboundRequest, RawResponse};
use crate::config::{SessionConfig, DEFAULT_BASE_URL, REQUEST_TIMEOUT_SECS};
use crate::error::SessionError;
use crate::session::SessionHandle;

/// Site selector passed to the landing page
pub const DEFAULT_SITE: &str = "mdc";

#[derive(Debug, Clone)]
pub struct LoginOptions {
    /// Force the login through when the account is already logged in elsewhere
    pub allow_duplicate_login: bool,
    /// Install the new session as the process-wide current session
    pub set_current: bool,
    pub site: String,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self {
            allow_duplicate_login: false,
            set_current: true,
            site: DEFAULT_SITE.to_string(),
        }
    }
}

/// Successful login payload
#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub mbr_no: String,
    pub payload: Map<String, Value>,
}

/// Classification of a single login POST
enum Verdict {
    Accepted(Map<String, Value>),
    Rejected { code: String, error: SessionError },
}

#[derive(Debug, Clone)]
pub struct AuthClient {
    base_url: String,
    protocol: LoginProtocol,
    timeout: Duration,
}

impl Default for AuthClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl AuthClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            protocol: LoginProtocol::default(),
            timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            timeout: config.request_timeout,
            ..Self::new(config.base_url.clone())
        }
    }

    pub fn with_protocol(mut self, protocol: LoginProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn protocol(&self) -> &LoginProtocol {
        &self.protocol
    }

    pub fn landing_url(&self, site: &str) -> String {
        format!("{}{}?site={}", self.base_url, self.protocol.landing_path, site)
    }

    pub fn login_url(&self) -> String {
        format!("{}{}", self.base_url, self.protocol.login_path)
    }

    fn browser_headers(&self) -> Vec<(String, String)> {
        vec![
            ("User-Agent".to_string(), BROWSER_USER_AGENT.to_string()),
            (
                "Referer".to_string(),
                format!("{}{}", self.base_url, self.protocol.referer_path),
            ),
            ("Origin".to_string(), self.base_url.clone()),
        ]
    }

    /// Run the login handshake on `session`, whose jar collects the session cookies.
    pub async fn login(
        &self,
        session: &SessionHandle,
        credential: &Credential,
        options: &LoginOptions,
    ) -> Result<LoginResponse> {
        let landing = OutboundRequest::get(self.landing_url(&options.site))
            .headers(self.browser_headers())
            .timeout(self.timeout);
        if let Err(e) = session.execute(landing).await {
            debug!(error = %e, "Login landing page failed, continuing");
        }

        let mut form = self.protocol.login_form(credential);
        let response = self.submit(session, &form).await?;

        let payload = match self.classify(&response)? {
            Verdict::Accepted(payload) => payload,
            Verdict::Rejected { code, error }
                if options.allow_duplicate_login && self.protocol.is_duplicate_login(&code) =>
            {
                info!(error = %error, "Account already logged in elsewhere, retrying with override");
                let (field, value) = self.protocol.override_field.clone();
                form.push((field, value));
                let retry = self.submit(session, &form).await?;
                match self.classify(&retry)? {
                    Verdict::Accepted(payload) => payload,
                    Verdict::Rejected { error, .. } => return Err(error.into()),
                }
            }
            Verdict::Rejected { error, .. } => return Err(error.into()),
        };

        let mbr_no = self.protocol.owner_id(&payload).ok_or_else(|| {
            SessionError::AuthenticationFailed(format!(
                "login did not return expected success fields (MBR_NO). Payload snippet: {}",
                SessionError::snippet(&Value::Object(payload.clone()).to_string())
            ))
        })?;

        info!(mbr_no = %mbr_no, "Login successful");
        Ok(LoginResponse { mbr_no, payload })
    }

    async fn submit(
        &self,
        session: &SessionHandle,
        form: &[(String, String)],
    ) -> Result<RawResponse> {
        let request = OutboundRequest::post(self.login_url())
            .headers(self.browser_headers())
            .form(form.iter().cloned())
            .timeout(self.timeout);
        session.execute(request).await
    }

    /// Status, then JSON body, then error code.
    /// `Err` for transport-level problems; `Rejected` for a code the portal returned.
    fn classify(&self, response: &RawResponse) -> Result<Verdict> {
        if response.status != 200 {
            warn!(status = response.status, "Login request rejected");
            return Err(SessionError::from_status(response.status, response.text()).into());
        }

        let payload = parse_payload(response)?;

        match self.protocol.error_code(&payload) {
            None => Ok(Verdict::Accepted(payload)),
            Some(code) => {
                let detail = match self.protocol.error_message(&payload) {
                    Some(message) => message,
                    None => format!(
                        "Payload snippet: {}",
                        SessionError::snippet(&Value::Object(payload.clone()).to_string())
                    ),
                };
                let error =
                    SessionError::AuthenticationFailed(format!("errorCode={}. {}", code, detail));
                Ok(Verdict::Rejected { code, error })
            }
        }
    }
}

/// Parse the login response body into a JSON object.
///
/// Accepts a bare object, a JSON string containing an object, or an object
/// embedded in surrounding text.
fn parse_payload(response: &RawResponse) -> Result<Map<String, Value>> {
    let text = response.text().trim();

    let mut value = serde_json::from_str::<Value>(text).ok().or_else(|| {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        if end <= start {
            return None;
        }
        serde_json::from_str::<Value>(&text[start..=end]).ok()
    });

    if let Some(Value::String(inner)) = &value {
        value = serde_json::from_str::<Value>(inner.trim()).ok();
    }

    match value {
        Some(Value::Object(map)) => Ok(map),
        _ => {
            let content_type = response.content_type().unwrap_or_default().to_lowercase();
            Err(SessionError::AuthenticationFailed(format!(
                "login response is not JSON (content-type={}). Response snippet: {}",
                content_type,
                SessionError::snippet(response.text())
            ))
            .into())
        }
    }
}
