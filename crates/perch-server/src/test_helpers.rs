//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use perch_core::Payload;
use perch_poster::{PostError, PostReceipt, Poster};
use perch_store::Database;
use serde_json::Value;

use crate::registry::HandlerContext;

/// Poster that records every post and answers `stub-<n>`, or always fails.
pub struct StubPoster {
    posted: Mutex<Vec<String>>,
    counter: AtomicUsize,
    failure: Option<PostError>,
}

impl StubPoster {
    pub fn new() -> Self {
        Self {
            posted: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
            failure: None,
        }
    }

    pub fn failing(error: PostError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new()
        }
    }

    pub fn posted(&self) -> Vec<String> {
        self.posted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Poster for StubPoster {
    async fn post(&self, text: &str) -> Result<PostReceipt, PostError> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        self.posted.lock().unwrap().push(text.to_owned());
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PostReceipt {
            id: format!("stub-{n}"),
            text: text.to_owned(),
        })
    }
}

pub fn make_context() -> HandlerContext {
    make_context_with(Arc::new(StubPoster::new()))
}

pub fn make_context_with(poster: Arc<dyn Poster>) -> HandlerContext {
    HandlerContext::new(Database::in_memory().unwrap(), poster)
}

/// Unwrap a JSON object literal into a payload.
pub fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => panic!("payload must be an object, got {other}"),
    }
}
