//! Command registry: maps each request kind to its handler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use perch_core::{Command, HandlerError, Outcome, Payload};
use perch_poster::Poster;
use perch_store::Database;

use crate::handlers;

/// What every handler may touch: the pooled store and the posting service.
#[derive(Clone)]
pub struct HandlerContext {
    pub db: Database,
    pub poster: Arc<dyn Poster>,
}

impl HandlerContext {
    pub fn new(db: Database, poster: Arc<dyn Poster>) -> Self {
        Self { db, poster }
    }
}

/// Trait implemented by every command handler.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Run the command against `ctx`. Failures are returned, never thrown;
    /// the worker renders them as `{"error": ...}`.
    async fn handle(&self, payload: Payload, ctx: &HandlerContext) -> Result<Outcome, HandlerError>;
}

/// A command name that matched a registered handler.
#[derive(Clone)]
pub struct Resolved {
    pub command: Command,
    pub handler: Arc<dyn CommandHandler>,
}

/// Registry mapping command kinds to handlers.
pub struct HandlerRegistry {
    handlers: HashMap<Command, Arc<dyn CommandHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with the built-in `checkNames`, `changeName` and `tweet`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        handlers::register_all(&mut registry);
        registry
    }

    /// Register (or replace) the handler for a command.
    pub fn register(&mut self, command: Command, handler: impl CommandHandler + 'static) {
        let _ = self.handlers.insert(command, Arc::new(handler));
    }

    /// Look up a wire command name.
    ///
    /// Unknown names and known names without a handler both resolve to `None`.
    pub fn resolve(&self, name: &str) -> Option<Resolved> {
        let command = Command::parse(name)?;
        let handler = self.handlers.get(&command)?;
        Some(Resolved {
            command,
            handler: Arc::clone(handler),
        })
    }

    /// Registered commands, in declaration order.
    pub fn commands(&self) -> Vec<Command> {
        Command::ALL
            .into_iter()
            .filter(|c| self.handlers.contains_key(c))
            .collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
