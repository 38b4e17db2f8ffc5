//! Scripted HTTP fakes for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::api::{ClientFactory, HttpClient, OutboundRequest, RawResponse};
use crate::session::CookieJar;

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Response(RawResponse),
    Fail(String),
}

impl Reply {
    pub fn ok(body: &str) -> Self {
        Reply::Response(RawResponse::new(200, body))
    }

    pub fn status(status: u16, body: &str) -> Self {
        Reply::Response(RawResponse::new(status, body))
    }

    pub fn fail(message: &str) -> Self {
        Reply::Fail(message.to_string())
    }
}

/// Which kind of client served a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Served {
    Session,
    Bare,
}

#[derive(Default)]
struct Shared {
    replies: Mutex<VecDeque<Reply>>,
    log: Mutex<Vec<(Served, OutboundRequest)>>,
}

/// Factory whose clients answer from one shared reply queue and record every request
#[derive(Clone, Default)]
pub(crate) struct FakeFactory {
    shared: Arc<Shared>,
}

impl FakeFactory {
    pub fn with_replies(replies: Vec<Reply>) -> Self {
        let factory = Self::default();
        factory.push(replies);
        factory
    }

    pub fn push(&self, replies: Vec<Reply>) {
        self.shared.replies.lock().unwrap().extend(replies);
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.shared
            .log
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn served(&self) -> Vec<Served> {
        self.shared.log.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }
}

struct FakeClient {
    shared: Arc<Shared>,
    kind: Served,
}

#[async_trait]
impl HttpClient for FakeClient {
    async fn execute(&self, request: OutboundRequest) -> Result<RawResponse> {
        self.shared.log.lock().unwrap().push((self.kind, request));
        match self.shared.replies.lock().unwrap().pop_front() {
            Some(Reply::Response(response)) => Ok(response),
            Some(Reply::Fail(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted reply left")),
        }
    }
}

impl ClientFactory for FakeFactory {
    fn session_client(&self, _jar: Arc<CookieJar>) -> Result<Arc<dyn HttpClient>> {
        Ok(Arc::new(FakeClient {
            shared: self.shared.clone(),
            kind: Served::Session,
        }))
    }

    fn bare_client(&self) -> Result<Arc<dyn HttpClient>> {
        Ok(Arc::new(FakeClient {
            shared: self.shared.clone(),
            kind: Served::Bare,
        }))
    }
}
