use async_trait::async_trait;
use perch_core::{HandlerError, Outcome, Payload};
use perch_store::NameRepo;
use serde_json::Value;
use tracing::debug;

use super::blocking;
use crate::registry::{CommandHandler, HandlerContext};

/// `checkNames`: which of the requested names are still free.
///
/// Takes `names: [string]`. Older clients send `name0`, `name1`, ... instead;
/// those are read in index order until the first gap.
pub struct CheckNamesHandler;

#[async_trait]
impl CommandHandler for CheckNamesHandler {
    async fn handle(&self, payload: Payload, ctx: &HandlerContext) -> Result<Outcome, HandlerError> {
        let candidates = candidates(&payload)?;
        debug!(count = candidates.len(), "checking names");

        let available = if candidates.is_empty() {
            Vec::new()
        } else {
            let repo = NameRepo::new(ctx.db.clone());
            blocking(move || repo.available(&candidates)).await?
        };

        let mut outcome = Outcome::new();
        let _ = outcome.insert(
            "Names".into(),
            Value::Array(available.into_iter().map(Value::String).collect()),
        );
        Ok(outcome)
    }
}

fn candidates(payload: &Payload) -> Result<Vec<String>, HandlerError> {
    match payload.get("names") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                _ => Err(HandlerError::invalid("names", "entries must be strings")),
            })
            .collect(),
        Some(Value::Null) | None => legacy_candidates(payload),
        Some(_) => Err(HandlerError::invalid("names", "expected an array of strings")),
    }
}

fn legacy_candidates(payload: &Payload) -> Result<Vec<String>, HandlerError> {
    let mut names = Vec::new();
    for i in 0.. {
        let key = format!("name{i}");
        match payload.get(&key) {
            Some(Value::String(s)) => names.push(s.clone()),
            Some(_) => return Err(HandlerError::invalid(&key, "expected a string")),
            None => break,
        }
    }
    if names.is_empty() {
        return Err(HandlerError::MissingParam("names".into()));
    }
    Ok(names)
}
