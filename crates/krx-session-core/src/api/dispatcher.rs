//! Session-aware GET/POST.
//!
//! Every call hydrates a session (from memory, the session file, or an
//! auto-login), sends the request, and if the portal answers with the
//! `LOGOUT` sentinel drops the session and tries exactly once more.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use super::transport::{OutboundRequest, RawResponse};
use crate::session::SessionManager;

/// First attempt plus one retry after an invalidated session
const MAX_ATTEMPTS: usize = 2;

#[derive(Clone)]
pub struct Dispatcher {
    manager: Arc<SessionManager>,
}

impl Dispatcher {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// GET `url` with optional headers and query parameters
    pub async fn get<I, K, V>(
        &self,
        url: &str,
        headers: Option<Vec<(String, String)>>,
        params: I,
        timeout: Option<Duration>,
    ) -> Result<RawResponse>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut request = OutboundRequest::get(url)
            .headers(headers.unwrap_or_default())
            .query(params);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        self.dispatch(request).await
    }

    /// POST `url` with optional headers and a form body
    pub async fn post<I, K, V>(
        &self,
        url: &str,
        headers: Option<Vec<(String, String)>>,
        data: I,
        timeout: Option<Duration>,
    ) -> Result<RawResponse>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut request = OutboundRequest::post(url)
            .headers(headers.unwrap_or_default())
            .form(data);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        self.dispatch(request).await
    }

    /// Send a request through the current session, recovering once from invalidation.
    ///
    /// The final response is returned whatever its status; only transport
    /// failures are errors.
    pub async fn dispatch(&self, request: OutboundRequest) -> Result<RawResponse> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            self.manager.hydrate_from_store().await;
            self.manager.ensure_session_if_policy_allows().await;

            let response = match self.manager.current() {
                Some(session) => session.execute(request.clone()).await?,
                None => {
                    debug!(url = %request.url, "No session, sending unauthenticated request");
                    self.manager.bare_client()?.execute(request.clone()).await?
                }
            };

            if !response.is_logout_sentinel() {
                return Ok(response);
            }

            if attempt >= MAX_ATTEMPTS {
                warn!(url = %request.url, "Session still rejected after re-login, giving up");
                return Ok(response);
            }

            warn!(url = %request.url, "Portal invalidated the session, retrying with a fresh one");
            self.manager.store().clear();
            self.manager.clear_current();
        }
    }
}
