//! # perch-core
//!
//! Types shared by every perch crate:
//!
//! - [`ids`]: connection and correlation identifiers
//! - [`protocol`]: inbound envelope decoding, command kinds, reply encoding
//! - [`errors`]: the handler error taxonomy and its `{"error": ...}` rendering

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod protocol;

pub use errors::HandlerError;
pub use ids::{ConnectionId, CorrelationId};
pub use protocol::{Command, Envelope, FrameError, Outcome, Payload, Reply};
