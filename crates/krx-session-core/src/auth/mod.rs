//! Authentication against the KRX data portal.
//!
//! This module provides:
//! - `CredentialResolver`: id/password from arguments, environment, or a credentials file
//! - `AuthClient`: the two-step login handshake and response classification
//! - `LoginProtocol`: the observed field names and codes of the login endpoint

pub mod client;
pub mod credentials;
pub mod protocol;

pub use client::{AuthClient, LoginOptions, LoginResponse};
pub use credentials::{Credential, CredentialResolver};
pub use protocol::LoginProtocol;
