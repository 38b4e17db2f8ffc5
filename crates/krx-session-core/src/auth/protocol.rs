//! Login protocol vocabulary.
//!
//! The portal has no published contract; field names below were observed in
//! live responses and vary in spelling. Each lookup walks its key list in
//! order and takes the first non-empty value.

use serde_json::{Map, Value};

use super::credentials::Credential;

/// Browser-like user agent; the login endpoint rejects obvious scripts
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct LoginProtocol {
    pub error_code_keys: Vec<String>,
    pub error_message_keys: Vec<String>,
    pub owner_id_keys: Vec<String>,
    /// Codes that appear in the error-code field but mean success
    pub success_codes: Vec<String>,
    /// "Already logged in elsewhere"
    pub duplicate_login_code: String,
    /// Extra form field that forces a login over an existing session
    pub override_field: (String, String),
    pub id_field: String,
    pub secret_field: String,
    /// Fields the endpoint requires to be present, always sent empty
    pub placeholder_fields: Vec<String>,
    pub landing_path: String,
    pub login_path: String,
    pub referer_path: String,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for LoginProtocol {
    fn default() -> Self {
        Self {
            error_code_keys: strings(&["errorCode", "ERROR_CODE", "error_code", "_error_code"]),
            error_message_keys: strings(&["_error_message", "error_message", "ERROR_MESSAGE"]),
            owner_id_keys: strings(&["MBR_NO", "mbrNo"]),
            success_codes: strings(&["CD001"]),
            duplicate_login_code: "CD011".to_string(),
            override_field: ("skipDup".to_string(), "Y".to_string()),
            id_field: "mbrId".to_string(),
            secret_field: "pw".to_string(),
            placeholder_fields: strings(&["mbrNm", "telNo", "di", "certType"]),
            landing_path: "/contents/MDC/COMS/client/view/login.jsp".to_string(),
            login_path: "/contents/MDC/COMS/client/MDCCOMS001D1.cmd".to_string(),
            referer_path: "/contents/MDC/COMS/client/MDCCOMS001.cmd".to_string(),
        }
    }
}

impl LoginProtocol {
    /// Form body of the login POST
    pub fn login_form(&self, credential: &Credential) -> Vec<(String, String)> {
        let mut form = vec![
            (self.id_field.clone(), credential.id.clone()),
            (self.secret_field.clone(), credential.secret.clone()),
        ];
        form.extend(
            self.placeholder_fields
                .iter()
                .map(|f| (f.clone(), String::new())),
        );
        form
    }

    /// Error code reported by the portal, with success codes filtered out
    pub fn error_code(&self, data: &Map<String, Value>) -> Option<String> {
        first_value(data, &self.error_code_keys)
            .filter(|code| !self.success_codes.iter().any(|s| s == code))
    }

    pub fn error_message(&self, data: &Map<String, Value>) -> Option<String> {
        first_value(data, &self.error_message_keys)
    }

    pub fn owner_id(&self, data: &Map<String, Value>) -> Option<String> {
        first_value(data, &self.owner_id_keys)
    }

    pub fn is_duplicate_login(&self, code: &str) -> bool {
        code == self.duplicate_login_code
    }
}

/// First non-empty value among `keys`; numbers are rendered as strings
pub fn first_value(data: &Map<String, Value>, keys: &[String]) -> Option<String> {
    keys.iter().find_map(|key| match data.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
