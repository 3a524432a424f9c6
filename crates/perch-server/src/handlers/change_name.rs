use async_trait::async_trait;
use perch_core::{HandlerError, Outcome, Payload};
use perch_store::NameRepo;
use serde_json::Value;
use tracing::info;

use super::{blocking, require_str};
use crate::registry::{CommandHandler, HandlerContext};

/// Longest accepted name, in characters.
pub const MAX_NAME_CHARS: usize = 64;

/// `changeName`: move `oldName` to `newName` when `hash` matches.
///
/// The reply is always `{"Result": ...}` with one of `ok`, `hash not valid`,
/// `duplicate` or `unknown name`; only malformed input is an error.
pub struct ChangeNameHandler;

#[async_trait]
impl CommandHandler for ChangeNameHandler {
    async fn handle(&self, payload: Payload, ctx: &HandlerContext) -> Result<Outcome, HandlerError> {
        let old = require_str(&payload, "oldName")?.to_owned();
        let new = require_str(&payload, "newName")?.to_owned();
        let hash = require_str(&payload, "hash")?.to_owned();
        validate_name(&new)?;

        let repo = NameRepo::new(ctx.db.clone());
        let (old_name, new_name) = (old.clone(), new.clone());
        let result = blocking(move || repo.change_name(&old, &new, &hash)).await?;
        info!(old = %old_name, new = %new_name, result = %result, "change name");

        let mut outcome = Outcome::new();
        let _ = outcome.insert("Result".into(), Value::from(result.as_str()));
        Ok(outcome)
    }
}

fn validate_name(name: &str) -> Result<(), HandlerError> {
    if name.trim().is_empty() {
        return Err(HandlerError::invalid("newName", "must not be empty"));
    }
    let chars = name.chars().count();
    if chars > MAX_NAME_CHARS {
        return Err(HandlerError::invalid(
            "newName",
            format!("{chars} characters exceeds the limit of {MAX_NAME_CHARS}"),
        ));
    }
    Ok(())
}
