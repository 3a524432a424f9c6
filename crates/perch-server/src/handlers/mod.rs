//! Built-in command handlers.

mod change_name;
mod check_names;
mod tweet;

pub use change_name::ChangeNameHandler;
pub use check_names::CheckNamesHandler;
pub use tweet::TweetHandler;

use perch_core::{Command, HandlerError, Payload};
use perch_store::StoreError;
use serde_json::Value;

use crate::registry::HandlerRegistry;

/// Register `checkNames`, `changeName` and `tweet`.
pub fn register_all(registry: &mut HandlerRegistry) {
    registry.register(Command::CheckNames, CheckNamesHandler);
    registry.register(Command::ChangeName, ChangeNameHandler);
    registry.register(Command::Tweet, TweetHandler);
}

/// Required string parameter.
pub(crate) fn require_str<'a>(payload: &'a Payload, name: &str) -> Result<&'a str, HandlerError> {
    match payload.get(name) {
        None | Some(Value::Null) => Err(HandlerError::MissingParam(name.to_owned())),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(HandlerError::invalid(name, "expected a string")),
    }
}

/// Run a store call on the blocking pool.
pub(crate) async fn blocking<F, T>(f: F) -> Result<T, HandlerError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(|e| HandlerError::Store(e.to_string())),
        Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
        Err(join) => Err(HandlerError::Internal(format!("store task cancelled: {join}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::payload;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn require_str_present() {
        let p = payload(json!({"hash": "h0"}));
        assert_eq!(require_str(&p, "hash").unwrap(), "h0");
    }

    #[test]
    fn require_str_missing_or_null() {
        assert_matches!(
            require_str(&payload(json!({})), "hash"),
            Err(HandlerError::MissingParam(name)) if name == "hash"
        );
        assert_matches!(
            require_str(&payload(json!({"hash": null})), "hash"),
            Err(HandlerError::MissingParam(_))
        );
    }

    #[test]
    fn require_str_wrong_type() {
        assert_matches!(
            require_str(&payload(json!({"hash": 5})), "hash"),
            Err(HandlerError::InvalidParam { name, .. }) if name == "hash"
        );
    }

    #[tokio::test]
    async fn blocking_maps_store_errors() {
        let result: Result<(), _> =
            blocking(|| Err(StoreError::Database("disk full".into()))).await;
        assert_matches!(result, Err(HandlerError::Store(msg)) if msg.contains("disk full"));
    }
}
