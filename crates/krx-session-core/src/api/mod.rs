//! HTTP plumbing for the KRX portal.
//!
//! This module provides the injectable transport (`HttpClient`,
//! `ClientFactory`, with a `reqwest` implementation) and the `Dispatcher`
//! that wraps outbound GET/POST calls in session handling.

pub mod dispatcher;
pub mod transport;

pub use dispatcher::Dispatcher;
pub use transport::{
    ClientFactory, HttpClient, OutboundRequest, RawResponse, ReqwestClient, ReqwestFactory,
    LOGOUT_SENTINEL,
};
