//! Shared, self-healing login sessions for the KRX data portal.
//!
//! A `SessionManager` owns the process-wide session. Sessions are obtained by
//! logging in with resolved credentials, persisted to a locked JSON file so
//! other processes can reuse them, and dropped when the portal answers with
//! `LOGOUT`. Callers send requests through a `Dispatcher` and never deal with
//! any of this directly:
//!
//! ```no_run
//! use std::sync::Arc;
//! use krx_session_core::{Dispatcher, SessionConfig, SessionManager};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let manager = Arc::new(SessionManager::new(SessionConfig::from_env()));
//! let dispatcher = Dispatcher::new(manager);
//! let response = dispatcher
//!     .post(
//!         "https://data.krx.co.kr/comm/bldAttendant/getJsonData.cmd",
//!         None,
//!         [("bld", "dbms/MDC/STAT/standard/MDCSTAT01501")],
//!         None,
//!     )
//!     .await?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{ClientFactory, Dispatcher, HttpClient, OutboundRequest, RawResponse, ReqwestFactory};
pub use auth::{AuthClient, Credential, CredentialResolver, LoginOptions, LoginProtocol};
pub use config::SessionConfig;
pub use error::SessionError;
pub use session::manager::LoginOutcome;
pub use session::{AutoLoginPolicy, CookieJar, SessionHandle, SessionManager, StoredCookie};
pub use store::{SessionRecord, SessionStore};
