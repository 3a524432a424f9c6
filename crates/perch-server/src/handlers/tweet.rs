use async_trait::async_trait;
use perch_core::{HandlerError, Outcome, Payload};
use perch_poster::{validate_post, PostError};
use perch_store::PostRepo;
use serde_json::Value;
use tracing::{info, warn};

use super::{blocking, require_str};
use crate::registry::{CommandHandler, HandlerContext};

/// `tweet`: publish `tweet` through the posting service and log it locally.
pub struct TweetHandler;

#[async_trait]
impl CommandHandler for TweetHandler {
    async fn handle(&self, payload: Payload, ctx: &HandlerContext) -> Result<Outcome, HandlerError> {
        let text = validate_post(require_str(&payload, "tweet")?).map_err(|e| match e {
            PostError::Empty | PostError::TooLong { .. } => HandlerError::invalid("tweet", e.to_string()),
            other => HandlerError::Posting(other.to_string()),
        })?;

        let receipt = ctx.poster.post(text).await.map_err(|e| {
            warn!(kind = e.kind(), error = %e, "post failed");
            HandlerError::Posting(e.to_string())
        })?;
        info!(remote_id = %receipt.id, "posted");

        // Already published; a failed local record must not turn into an error reply.
        let repo = PostRepo::new(ctx.db.clone());
        let (remote_id, body) = (receipt.id.clone(), receipt.text.clone());
        if let Err(e) = blocking(move || repo.record(&remote_id, &body)).await {
            warn!(remote_id = %receipt.id, error = %e, "failed to record post");
        }

        let mut outcome = Outcome::new();
        let _ = outcome.insert("Result".into(), Value::from("ok"));
        let _ = outcome.insert("TweetId".into(), Value::String(receipt.id));
        Ok(outcome)
    }
}
