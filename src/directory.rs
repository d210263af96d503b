//! REST client for the simulator's institution directory (`GET /vasps`).
//!
//! The listing is fetched once at startup and treated as read-only input.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::retry::{retry_async, RetryPolicy};
use crate::stream::client::StreamEndpoint;

const ERROR_BODY_SNIPPET_LEN: usize = 220;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DirectoryDefaults;

impl DirectoryDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
    pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const MAX_ATTEMPTS: usize = 3;
    pub const BACKOFF: Duration = Duration::from_millis(200);
    pub const MAX_BACKOFF: Duration = Duration::from_secs(1);
    pub const JITTER: Duration = Duration::from_millis(50);
}

#[derive(Clone, Debug)]
pub struct DirectoryClientOptions {
    pub connect_timeout: Duration,
    pub attempt_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for DirectoryClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DirectoryDefaults::CONNECT_TIMEOUT,
            attempt_timeout: DirectoryDefaults::ATTEMPT_TIMEOUT,
            retry_policy: RetryPolicy {
                max_attempts: DirectoryDefaults::MAX_ATTEMPTS,
                initial_backoff: DirectoryDefaults::BACKOFF,
                max_backoff: DirectoryDefaults::MAX_BACKOFF,
                jitter: DirectoryDefaults::JITTER,
            },
        }
    }
}

/// Directory Service registration of an institution.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrisaDsEntry {
    pub trisa_ds_id: String,
    pub display_name: String,
    pub trisa_protocol_host: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserWallet {
    pub user_wallet_id: String,
    pub wallet_address: String,
}

/// Selectable institution as listed by the directory.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaspDetails {
    pub vasp_id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub trisa_ds_entry: Option<TrisaDsEntry>,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub user_wallets: Vec<UserWallet>,
}

impl VaspDetails {
    pub fn is_registered(&self) -> bool {
        self.trisa_ds_entry.is_some()
    }

    pub fn wallet(&self, user_wallet_id: &str) -> Option<&UserWallet> {
        self.user_wallets
            .iter()
            .find(|wallet| wallet.user_wallet_id == user_wallet_id)
    }
}

#[derive(Debug, Deserialize)]
struct VaspsResponse {
    data: Vec<VaspDetails>,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    #[error("http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl DirectoryError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_timeout() || err.is_connect(),
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Parse(_) => false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DirectoryClient {
    http: Client,
    endpoint: StreamEndpoint,
    attempt_timeout: Duration,
    retry_policy: RetryPolicy,
}

impl DirectoryClient {
    pub fn new(endpoint: StreamEndpoint) -> Result<Self, DirectoryError> {
        Self::with_options(endpoint, DirectoryClientOptions::default())
    }

    pub fn with_options(
        endpoint: StreamEndpoint,
        options: DirectoryClientOptions,
    ) -> Result<Self, DirectoryError> {
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(DirectoryError::Transport)?;

        Ok(Self {
            http,
            endpoint,
            attempt_timeout: options.attempt_timeout,
            retry_policy: options.retry_policy,
        })
    }

    /// Fetches the selectable institutions.
    pub async fn list_vasps(&self) -> Result<Vec<VaspDetails>, DirectoryError> {
        let url = self.vasps_url();
        let vasps = retry_async(
            &self.retry_policy,
            |_| self.fetch_attempt(&url),
            DirectoryError::is_retryable,
        )
        .await?;
        info!(event = "directory_listed", count = vasps.len());
        Ok(vasps)
    }

    fn vasps_url(&self) -> String {
        format!("{}/vasps", self.endpoint.base_url())
    }

    async fn fetch_attempt(&self, url: &str) -> Result<Vec<VaspDetails>, DirectoryError> {
        let response = self
            .http
            .get(url)
            .timeout(self.attempt_timeout)
            .send()
            .await
            .map_err(DirectoryError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(DirectoryError::Transport)?;

        if !status.is_success() {
            return Err(DirectoryError::HttpStatus {
                status,
                body: summarize_error_body(&body),
            });
        }

        parse_vasps_response(&body)
    }
}

fn parse_vasps_response(body: &str) -> Result<Vec<VaspDetails>, DirectoryError> {
    serde_json::from_str::<VaspsResponse>(body)
        .map(|response| response.data)
        .map_err(|err| DirectoryError::Parse(err.to_string()))
}

fn summarize_error_body(body: &str) -> String {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.error.or(parsed.message) {
            return message;
        }
    }

    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}
