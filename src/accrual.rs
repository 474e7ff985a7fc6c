//! Client for the external accrual oracle.
//!
//! `GET {base}/api/orders/{number}` answers with the oracle's verdict for an
//! order. Transport outcomes are folded into [`AccrualError`] so callers only
//! deal with not-found, throttling, transient and unexpected failures.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::Amount;

const BODY_PREVIEW_CHARS: usize = 200;
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Oracle verdict for one order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccrualResponse {
    pub order: String,
    /// One of `REGISTERED`, `PROCESSING`, `INVALID`, `PROCESSED`.
    pub status: String,
    #[serde(default)]
    pub accrual: Option<Amount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccrualError {
    #[error("order is not registered in the accrual system")]
    NotFound,

    #[error("accrual system is rate limiting (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("accrual system unavailable: {0}")]
    Transient(String),

    #[error("unexpected accrual response: HTTP {status} - {body}")]
    Unexpected { status: u16, body: String },

    #[error("malformed accrual response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait AccrualService: Send + Sync {
    async fn order_info(&self, number: &str) -> Result<AccrualResponse, AccrualError>;
}

#[derive(Debug, Clone)]
pub struct AccrualClientConfig {
    /// Oracle address, with or without scheme (`http://` is assumed).
    pub base_url: String,
    /// Overall budget for one request.
    pub timeout: Duration,
}

impl AccrualClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub struct HttpAccrualClient {
    client: Client,
    base_url: String,
}

impl HttpAccrualClient {
    pub fn new(config: AccrualClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;

        let base = config.base_url.trim_end_matches('/');
        let base_url = if base.contains("://") {
            base.to_string()
        } else {
            format!("http://{base}")
        };

        Ok(Self { client, base_url })
    }

    fn order_url(&self, number: &str) -> String {
        format!("{}/api/orders/{number}", self.base_url)
    }
}

fn preview(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(BODY_PREVIEW_CHARS)
        .collect()
}

/// Read the body, refusing anything over [`MAX_BODY_BYTES`].
async fn read_capped(mut response: Response) -> Result<Vec<u8>, AccrualError> {
    let too_large = || AccrualError::Malformed(format!("body exceeds {MAX_BODY_BYTES} bytes"));
    if response
        .content_length()
        .is_some_and(|len| len > MAX_BODY_BYTES as u64)
    {
        return Err(too_large());
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| AccrualError::Transient(e.to_string()))?
    {
        if body.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

#[async_trait]
impl AccrualService for HttpAccrualClient {
    async fn order_info(&self, number: &str) -> Result<AccrualResponse, AccrualError> {
        let response = self
            .client
            .get(self.order_url(number))
            .send()
            .await
            .map_err(|e| AccrualError::Transient(e.to_string()))?;

        let status = response.status();
        debug!(order = number, status = %status, "accrual response");

        match status {
            StatusCode::NO_CONTENT => Err(AccrualError::NotFound),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                warn!(order = number, ?retry_after, "accrual system rate limited");
                Err(AccrualError::RateLimited { retry_after })
            }
            s if s.is_success() => {
                let body = read_capped(response).await?;
                serde_json::from_slice(&body).map_err(|e| AccrualError::Malformed(e.to_string()))
            }
            s if s.is_server_error() => {
                let body = read_capped(response).await.unwrap_or_default();
                Err(AccrualError::Transient(format!("HTTP {s} - {}", preview(&body))))
            }
            s => {
                let body = read_capped(response).await.unwrap_or_default();
                Err(AccrualError::Unexpected {
                    status: s.as_u16(),
                    body: preview(&body),
                })
            }
        }
    }
}
