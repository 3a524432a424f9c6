use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::credentials::Credentials;
use crate::error::PostError;
use crate::{validate_post, PostReceipt, Poster};

/// Header carrying the epoch second at which a rate limit window resets.
const RATE_LIMIT_RESET_HEADER: &str = "x-rate-limit-reset";

#[derive(Deserialize)]
struct CreatePostResponse {
    data: PostReceipt,
}

/// Posting service client over HTTPS.
pub struct HttpPoster {
    client: Client,
    endpoint: String,
    credentials: Credentials,
}

impl HttpPoster {
    pub fn new(endpoint: impl Into<String>, credentials: Credentials, timeout: Duration) -> Result<Self, PostError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PostError::Network(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            credentials,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Poster for HttpPoster {
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn post(&self, text: &str) -> Result<PostReceipt, PostError> {
        let text = validate_post(text)?;

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.credentials.token())
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(|e| PostError::Network(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let reset = resp
                .headers()
                .get(RATE_LIMIT_RESET_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            warn!(?reset, "posting service rate limited");
            return Err(PostError::RateLimited { reset });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "posting service rejected post");
            return Err(PostError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let created: CreatePostResponse = resp
            .json()
            .await
            .map_err(|e| PostError::Decode(e.to_string()))?;
        debug!(id = %created.data.id, "post published");
        Ok(created.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn poster_for(server: &MockServer) -> HttpPoster {
        HttpPoster::new(
            format!("{}/2/tweets", server.uri()),
            Credentials::new("tok"),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn publishes_trimmed_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/tweets"))
            .and(header("authorization", "Bearer tok"))
            .and(body_json(json!({"text": "hello world"})))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"data": {"id": "1850", "text": "hello world"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let receipt = poster_for(&server).await.post("  hello world ").await.unwrap();
        assert_eq!(receipt.id, "1850");
        assert_eq!(receipt.text, "hello world");
    }

    #[tokio::test]
    async fn rate_limit_reads_reset_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429).insert_header("x-rate-limit-reset", "1700000000"),
            )
            .mount(&server)
            .await;

        let result = poster_for(&server).await.post("hi").await;
        assert_matches!(result, Err(PostError::RateLimited { reset: Some(1_700_000_000) }));
    }

    #[tokio::test]
    async fn error_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("duplicate content"))
            .mount(&server)
            .await;

        let result = poster_for(&server).await.post("hi").await;
        assert_matches!(
            result,
            Err(PostError::Rejected { status: 403, body }) if body == "duplicate content"
        );
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unexpected": true})))
            .mount(&server)
            .await;

        let result = poster_for(&server).await.post("hi").await;
        assert_matches!(result, Err(PostError::Decode(_)));
    }

    #[tokio::test]
    async fn invalid_text_never_reaches_the_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let result = poster_for(&server).await.post("   ").await;
        assert_matches!(result, Err(PostError::Empty));
    }

    #[tokio::test]
    async fn unreachable_service_is_network_error() {
        let poster = HttpPoster::new(
            "http://127.0.0.1:1/2/tweets",
            Credentials::new("tok"),
            Duration::from_secs(2),
        )
        .unwrap();
        assert_matches!(poster.post("hi").await, Err(PostError::Network(_)));
    }
}
