//! Scripted collaborators for unit tests

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::animator::{AnimationSink, Directive};
use crate::graph::{HttpRequest, HttpResponse, HttpTransport};
use crate::store::{DocumentStore, MemoryStore};

/// Transport that replays queued responses and records every request.
/// Clones share the same script.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    replies: Rc<RefCell<VecDeque<Result<HttpResponse, String>>>>,
    requests: Rc<RefCell<Vec<HttpRequest>>>,
}

impl ScriptedTransport {
    pub fn reply(&self, status: u16, body: impl Into<Vec<u8>>) {
        self.replies
            .borrow_mut()
            .push_back(Ok(HttpResponse::new(status, body)));
    }

    pub fn fail(&self, reason: &str) {
        self.replies.borrow_mut().push_back(Err(reason.to_string()));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl HttpTransport for ScriptedTransport {
    fn execute(&mut self, request: &HttpRequest) -> anyhow::Result<HttpResponse> {
        self.requests.borrow_mut().push(request.clone());
        match self.replies.borrow_mut().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(reason)) => Err(anyhow::anyhow!(reason)),
            None => Err(anyhow::anyhow!("no scripted reply")),
        }
    }
}

/// Sink remembering every directive it was shown
#[derive(Clone, Default)]
pub struct RecordingSink {
    shown: Rc<RefCell<Vec<Directive>>>,
}

impl RecordingSink {
    pub fn shown(&self) -> Vec<Directive> {
        self.shown.borrow().clone()
    }

    pub fn last(&self) -> Option<Directive> {
        self.shown.borrow().last().copied()
    }
}

impl AnimationSink for RecordingSink {
    fn show(&mut self, directive: Directive) {
        self.shown.borrow_mut().push(directive);
    }
}

/// In-memory store whose removals of one key fail
#[derive(Clone, Default)]
pub struct StuckStore {
    pub inner: MemoryStore,
    stuck: Rc<RefCell<Option<String>>>,
}

impl StuckStore {
    pub fn stick(&self, key: &str) {
        *self.stuck.borrow_mut() = Some(key.to_string());
    }
}

impl DocumentStore for StuckStore {
    fn load(&mut self, key: &str) -> anyhow::Result<Option<String>> {
        self.inner.load(key)
    }

    fn save(&mut self, key: &str, document: &str) -> anyhow::Result<()> {
        self.inner.save(key, document)
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        if self.stuck.borrow().as_deref() == Some(key) {
            anyhow::bail!("flash busy");
        }
        self.inner.remove(key)
    }
}
