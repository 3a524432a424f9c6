//! # perch-store
//!
//! `SQLite` persistence behind an `r2d2` connection pool. The pool size is the
//! only admission control on store access: every worker borrows a pooled
//! connection for the duration of one repository call.

#![deny(unsafe_code)]

pub mod database;
pub mod error;
pub mod names;
pub mod posts;
pub mod schema;

pub use database::{ConnectionConfig, Database};
pub use error::StoreError;
pub use names::{NameRepo, RenameOutcome};
pub use posts::{PostRepo, PostRow};
