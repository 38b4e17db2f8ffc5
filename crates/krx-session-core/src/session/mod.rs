//! Live session state.
//!
//! This module provides:
//! - `CookieJar`: the cookie set the portal recognizes, shared with `reqwest`
//! - `SessionHandle`: a client bound to a jar
//! - `SessionManager`: the process-wide current session and auto-login policy

pub mod cookies;
pub mod handle;
pub mod manager;

pub use cookies::{CookieJar, StoredCookie};
pub use handle::SessionHandle;
pub use manager::{AutoLoginPolicy, SessionManager};
