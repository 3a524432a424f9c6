//! # perch-poster
//!
//! The external posting service as seen by the `tweet` command:
//!
//! - [`Poster`]: the async seam handlers call through
//! - [`HttpPoster`]: bearer-authenticated JSON client for a v2-style
//!   `POST /2/tweets` endpoint
//! - [`DisabledPoster`]: stands in when no credentials are configured

#![deny(unsafe_code)]

mod credentials;
mod error;
mod http;

pub use credentials::Credentials;
pub use error::PostError;
pub use http::HttpPoster;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Longest post the service accepts, in characters.
pub const MAX_POST_CHARS: usize = 280;

/// Confirmation returned by the service for a published post.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostReceipt {
    pub id: String,
    pub text: String,
}

/// Publishes short text posts to an external social network.
#[async_trait]
pub trait Poster: Send + Sync {
    async fn post(&self, text: &str) -> Result<PostReceipt, PostError>;
}

/// Poster used when the service is not configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledPoster;

#[async_trait]
impl Poster for DisabledPoster {
    async fn post(&self, _text: &str) -> Result<PostReceipt, PostError> {
        Err(PostError::Disabled)
    }
}

/// Trim and check a post body before it leaves the process.
pub fn validate_post(text: &str) -> Result<&str, PostError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(PostError::Empty);
    }
    let chars = trimmed.chars().count();
    if chars > MAX_POST_CHARS {
        return Err(PostError::TooLong {
            chars,
            max: MAX_POST_CHARS,
        });
    }
    Ok(trimmed)
}
