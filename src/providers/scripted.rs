use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;
use serde_json::Value;

use crate::providers::Backend;
use crate::request::ProbePayload;
use crate::types::{FragmentStream, ResponseFragment};
use crate::ProbeError;

/// What the scripted backend answers to one dispatch.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Fragments(Vec<ResponseFragment>),
    Unavailable(String),
    Unauthorized(String),
    Rejected { status: u16, message: String },
}

impl ScriptedReply {
    pub fn complete(body: Value) -> Self {
        ScriptedReply::Fragments(vec![ResponseFragment::Complete(body)])
    }

    pub fn deltas<I>(events: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        ScriptedReply::Fragments(events.into_iter().map(ResponseFragment::Delta).collect())
    }
}

/// Replays queued replies in order without any I/O, recording every wire body it receives.
pub struct ScriptedBackend {
    name: String,
    replies: Mutex<VecDeque<ScriptedReply>>,
    received: Mutex<Vec<Value>>,
}

impl ScriptedBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replies: Mutex::new(VecDeque::new()),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn with_reply(self, reply: ScriptedReply) -> Self {
        self.push(reply);
        self
    }

    pub fn push(&self, reply: ScriptedReply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    /// Wire bodies of every dispatched payload, oldest first.
    pub fn received(&self) -> Vec<Value> {
        self.received
            .lock()
            .map(|received| received.clone())
            .unwrap_or_default()
    }

    fn next_reply(&self) -> Option<ScriptedReply> {
        self.replies.lock().ok().and_then(|mut replies| replies.pop_front())
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn dispatch(&self, payload: &ProbePayload) -> Result<FragmentStream, ProbeError> {
        if let Ok(mut received) = self.received.lock() {
            received.push(payload.to_wire());
        }

        match self.next_reply() {
            Some(ScriptedReply::Fragments(fragments)) => {
                Ok(Box::pin(stream::iter(fragments.into_iter().map(Ok))))
            }
            Some(ScriptedReply::Unavailable(message)) => {
                Err(ProbeError::unavailable(self.name.clone(), message))
            }
            Some(ScriptedReply::Unauthorized(message)) => Err(ProbeError::Authentication {
                backend: self.name.clone(),
                message,
            }),
            Some(ScriptedReply::Rejected { status, message }) => Err(ProbeError::InvalidRequest {
                backend: self.name.clone(),
                status,
                message,
            }),
            None => Err(ProbeError::unavailable(
                self.name.clone(),
                "no more scripted replies",
            )),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
