//! Process-wide session state.
//!
//! One `SessionManager` is meant to be shared (behind an `Arc`) by every call
//! site in a process. The current session and the auto-login policy sit
//! behind short-lived locks that are never held across I/O.

use std::sync::{Arc, RwLock};

use anyhow::Result;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::SessionHandle;
use crate::api::{ClientFactory, HttpClient, ReqwestFactory};
use crate::auth::{AuthClient, Credential, CredentialResolver, LoginOptions};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::store::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoLoginPolicy {
    pub enabled: bool,
    pub allow_duplicate_login: bool,
}

impl Default for AutoLoginPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_duplicate_login: false,
        }
    }
}

/// Result of an explicit login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub session: SessionHandle,
    pub mbr_no: String,
    pub payload: Map<String, Value>,
}

pub struct SessionManager {
    config: SessionConfig,
    store: SessionStore,
    auth: AuthClient,
    factory: Arc<dyn ClientFactory>,
    current: RwLock<Option<SessionHandle>>,
    policy: RwLock<AutoLoginPolicy>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_factory(config, Arc::new(ReqwestFactory::new()))
    }

    pub fn with_factory(config: SessionConfig, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            store: SessionStore::from_config(&config),
            auth: AuthClient::from_config(&config),
            config,
            factory,
            current: RwLock::new(None),
            policy: RwLock::new(AutoLoginPolicy::default()),
        }
    }

    /// Replace the auth client, e.g. to extend the protocol's key aliases
    pub fn with_auth_client(mut self, auth: AuthClient) -> Self {
        self.auth = auth;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    // ===== Current session =====

    pub fn current(&self) -> Option<SessionHandle> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_current(&self, session: Option<SessionHandle>) {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = session;
    }

    pub fn clear_current(&self) {
        self.set_current(None);
    }

    pub fn has_current(&self) -> bool {
        self.current().is_some()
    }

    /// Unauthenticated client for calls made without a session
    pub fn bare_client(&self) -> Result<Arc<dyn HttpClient>> {
        self.factory.bare_client()
    }

    // ===== Auto-login policy =====

    pub fn policy(&self) -> AutoLoginPolicy {
        match self.policy.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Takes effect on the next dispatch
    pub fn set_auto_login(&self, enabled: bool, allow_duplicate_login: bool) {
        let mut guard = match self.policy.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = AutoLoginPolicy {
            enabled,
            allow_duplicate_login,
        };
        debug!(enabled, allow_duplicate_login, "Auto-login policy updated");
    }

    pub fn is_auto_login_enabled(&self) -> bool {
        self.policy().enabled
    }

    // ===== Login / logout =====

    pub fn resolve_credentials(
        &self,
        explicit_id: Option<&str>,
        explicit_secret: Option<&str>,
    ) -> Result<Option<Credential>> {
        CredentialResolver::new(&self.config).resolve(explicit_id, explicit_secret)
    }

    /// Explicit login. Fails when no credentials resolve or the portal refuses.
    ///
    /// On success the session is written to the session file and, unless
    /// `options.set_current` is false, becomes the current session.
    pub async fn login(
        &self,
        explicit_id: Option<&str>,
        explicit_secret: Option<&str>,
        options: &LoginOptions,
    ) -> Result<LoginOutcome> {
        let credential = self
            .resolve_credentials(explicit_id, explicit_secret)?
            .ok_or(SessionError::CredentialsMissing)?;
        self.login_with(&credential, options).await
    }

    /// Log in on a fresh session
    pub async fn login_with(
        &self,
        credential: &Credential,
        options: &LoginOptions,
    ) -> Result<LoginOutcome> {
        let session = SessionHandle::create(self.factory.as_ref())?;
        self.login_on(&session, credential, options).await
    }

    /// Log in on a session the caller already holds, keeping its cookies
    pub async fn login_on(
        &self,
        session: &SessionHandle,
        credential: &Credential,
        options: &LoginOptions,
    ) -> Result<LoginOutcome> {
        let response = self.auth.login(session, credential, options).await?;

        if options.set_current {
            self.set_current(Some(session.clone()));
        }
        self.store
            .save_async(
                session.jar(),
                Some(&response.mbr_no),
                self.config.session_ttl_minutes,
            )
            .await;

        Ok(LoginOutcome {
            session: session.clone(),
            mbr_no: response.mbr_no,
            payload: response.payload,
        })
    }

    /// Forget the session everywhere: session file and memory
    pub fn logout(&self) {
        self.store.clear();
        self.clear_current();
        info!("Session cleared");
    }

    // ===== Used by the dispatcher =====

    /// Install the stored session if there is no current one.
    /// Returns whether a current session exists afterwards.
    pub async fn hydrate_from_store(&self) -> bool {
        if self.has_current() {
            return true;
        }
        let record = match self.store.load_async().await {
            Some(record) => record,
            None => return false,
        };
        match SessionHandle::from_record(self.factory.as_ref(), &record) {
            Ok(session) => {
                debug!(
                    mbr_no = ?record.mbr_no,
                    minutes_left = record.minutes_until_expiry(),
                    "Session hydrated from file"
                );
                self.set_current(Some(session));
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to rebuild stored session");
                false
            }
        }
    }

    /// Log in with ambient credentials if the policy allows and no session exists.
    /// Never fails: problems are logged and the session stays absent.
    pub async fn ensure_session_if_policy_allows(&self) {
        let policy = self.policy();
        if !policy.enabled || self.has_current() {
            return;
        }

        let credential = match self.resolve_credentials(None, None) {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                debug!("Auto-login skipped: no credentials configured");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Auto-login skipped: credentials unavailable");
                return;
            }
        };

        let options = LoginOptions {
            allow_duplicate_login: policy.allow_duplicate_login,
            set_current: true,
            ..LoginOptions::default()
        };
        if let Err(e) = self.login_with(&credential, &options).await {
            warn!(error = %e, "Auto-login failed, continuing without a session");
        }
    }
}
