use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::domain::RestFetcher;
use crate::error::FetchError;

const USER_AGENT: &str = concat!("marketfeed/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Error, Debug)]
pub enum RestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Convert infrastructure RestError to domain FetchError
impl From<RestError> for FetchError {
    fn from(err: RestError) -> Self {
        match err {
            RestError::Http(e) => FetchError::Network(e.to_string()),
            RestError::Status { status, .. } if status == StatusCode::TOO_MANY_REQUESTS.as_u16() => {
                FetchError::RateLimited
            }
            RestError::Status { status, body } => FetchError::Api {
                status,
                message: body,
            },
            RestError::Parse(msg) => FetchError::Parse(msg),
        }
    }
}

/// Public REST client for one exchange
/// Infrastructure component - handles HTTP communication
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, RestError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(RestClient {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `base_url + path` and decode the body as JSON
    pub async fn get_json(&self, path: &str) -> Result<Value, RestError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(url = %url, "REST request");
        let resp = self.client.get(&url).send().await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(RestError::Status {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| RestError::Parse(e.to_string()))
    }
}

/// Implement RestFetcher trait for RestClient (Dependency Inversion)
#[async_trait]
impl RestFetcher for RestClient {
    async fn get(&self, path: &str) -> Result<Value, FetchError> {
        self.get_json(path).await.map_err(FetchError::from)
    }
}
