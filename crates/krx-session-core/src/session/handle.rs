use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use super::CookieJar;
use crate::api::{ClientFactory, HttpClient, OutboundRequest, RawResponse};
use crate::store::SessionRecord;

/// A live client bound to a cookie jar.
/// Clone is cheap - both halves are reference counted.
#[derive(Clone)]
pub struct SessionHandle {
    jar: Arc<CookieJar>,
    client: Arc<dyn HttpClient>,
}

impl SessionHandle {
    pub fn new(jar: Arc<CookieJar>, client: Arc<dyn HttpClient>) -> Self {
        Self { jar, client }
    }

    /// Fresh, empty session from a factory
    pub fn create(factory: &dyn ClientFactory) -> Result<Self> {
        let jar = Arc::new(CookieJar::new());
        let client = factory.session_client(jar.clone())?;
        Ok(Self::new(jar, client))
    }

    /// Rebuild a session from a persisted record
    pub fn from_record(factory: &dyn ClientFactory, record: &SessionRecord) -> Result<Self> {
        let jar = Arc::new(CookieJar::from_cookies(record.cookies.clone()));
        let client = factory.session_client(jar.clone())?;
        Ok(Self::new(jar, client))
    }

    pub fn jar(&self) -> &CookieJar {
        &self.jar
    }

    pub async fn execute(&self, request: OutboundRequest) -> Result<RawResponse> {
        self.client.execute(request).await
    }

    /// True when both handles share the same cookie jar
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.jar, &other.jar)
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("cookies", &self.jar.names())
            .finish()
    }
}
