//! Wire protocol: one JSON object per frame in both directions.
//!
//! Inbound frames carry `id` (non-zero integer) and `command` next to the
//! command-specific fields. Outbound replies are the handler's result mapping
//! with an `Id` field echoing the inbound `id`.

use std::fmt;

use serde_json::{Map, Value};

use crate::ids::CorrelationId;

/// Inbound correlation id field.
pub const ID_FIELD: &str = "id";
/// Inbound command field.
pub const COMMAND_FIELD: &str = "command";
/// Correlation id field injected into every reply.
pub const REPLY_ID_FIELD: &str = "Id";
/// Field carrying a handler failure message.
pub const ERROR_FIELD: &str = "error";

/// Command-specific fields of an inbound message (`id` and `command` removed).
pub type Payload = Map<String, Value>;

/// Result fields produced by a handler.
pub type Outcome = Map<String, Value>;

/// Closed set of request kinds understood by the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    CheckNames,
    ChangeName,
    Tweet,
}

impl Command {
    pub const ALL: [Command; 3] = [Command::CheckNames, Command::ChangeName, Command::Tweet];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CheckNames => "checkNames",
            Self::ChangeName => "changeName",
            Self::Tweet => "tweet",
        }
    }

    /// Exact, case-sensitive match on the wire name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a frame could not be turned into an [`Envelope`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotObject,
}

/// A decoded inbound message before validation.
///
/// `id` is `None` when the field is absent, zero, negative or not an integer;
/// the caller decides what that means for the connection.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub id: Option<CorrelationId>,
    pub command: Option<String>,
    pub payload: Payload,
}

impl Envelope {
    pub fn decode(frame: &str) -> Result<Self, FrameError> {
        let Value::Object(mut payload) = serde_json::from_str::<Value>(frame)? else {
            return Err(FrameError::NotObject);
        };
        let id = payload
            .remove(ID_FIELD)
            .as_ref()
            .and_then(parse_correlation_id);
        let command = match payload.remove(COMMAND_FIELD) {
            Some(Value::String(name)) => Some(name),
            _ => None,
        };
        Ok(Self {
            id,
            command,
            payload,
        })
    }
}

/// Integers and decimal strings are both accepted; older clients send the id
/// as a string.
fn parse_correlation_id(value: &Value) -> Option<CorrelationId> {
    match value {
        Value::Number(n) => n.as_u64().and_then(CorrelationId::new),
        Value::String(s) => s.trim().parse::<u64>().ok().and_then(CorrelationId::new),
        _ => None,
    }
}

/// Build the outcome a handler returns on failure.
pub fn error_outcome(message: impl Into<String>) -> Outcome {
    let mut outcome = Outcome::new();
    let _ = outcome.insert(ERROR_FIELD.to_owned(), Value::String(message.into()));
    outcome
}

/// An outbound reply bound to the request that triggered it.
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    pub id: CorrelationId,
    pub outcome: Outcome,
}

impl Reply {
    pub fn new(id: CorrelationId, outcome: Outcome) -> Self {
        Self { id, outcome }
    }

    pub fn error(id: CorrelationId, message: impl Into<String>) -> Self {
        Self::new(id, error_outcome(message))
    }

    pub fn is_error(&self) -> bool {
        self.outcome.contains_key(ERROR_FIELD)
    }

    /// Serialize to a text frame. `Id` always reflects the correlation id,
    /// even if the outcome carried its own.
    pub fn encode(self) -> String {
        let mut fields = self.outcome;
        let _ = fields.insert(REPLY_ID_FIELD.to_owned(), Value::from(self.id.get()));
        Value::Object(fields).to_string()
    }
}
