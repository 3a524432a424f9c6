//! # perch-server
//!
//! Request/reply dispatch over WebSocket.
//!
//! - [`server`]: axum listener, `/health`, `/metrics`, startup and shutdown
//! - [`translator`]: one per connection; frames in, replies out, one request
//!   in flight at a time
//! - [`broker`]: shared intake queue feeding a bounded pool of workers
//! - [`registry`]: command kind to handler mapping
//! - [`handlers`]: `checkNames`, `changeName`, `tweet`
//! - [`connection`]: per-connection teardown signal and the live registry

#![deny(unsafe_code)]

pub mod broker;
pub mod config;
pub mod connection;
pub mod handlers;
pub mod metrics;
pub mod registry;
pub mod request;
pub mod server;
pub mod translator;
pub mod ws;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use broker::{Broker, BrokerHandle, SubmitError};
pub use config::{BrokerConfig, ServerConfig};
pub use connection::{ConnectionRegistry, Teardown, TeardownReason};
pub use registry::{CommandHandler, HandlerContext, HandlerRegistry};
pub use server::{build_router, start, AppState, ServerError, ServerHandle};
