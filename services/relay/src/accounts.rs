// HTTP client for the external credential service. The relay only ever
// acts as a client here; the service itself is a separate deployment.
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub type Result<T> = std::result::Result<T, AccountError>;

#[derive(thiserror::Error, Debug)]
pub enum AccountError {
    #[error("user not found")]
    UserNotFound,
    #[error("invalid password")]
    InvalidPassword,
    #[error("unexpected account service status {0}")]
    Status(StatusCode),
    #[error("account service request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Account data returned by a credential lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountProfile {
    pub user: String,
    pub email: String,
    pub country: String,
}

/// Account data returned by a successful login.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginProfile {
    pub avatar: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Client for the credential service behind the relay's two account actions.
///
/// Every request carries a bounded timeout so a hung backend leaves one
/// response pending instead of a task pinned forever.
#[derive(Debug, Clone)]
pub struct AccountClient {
    base_url: String,
    client: reqwest::Client,
}

impl AccountClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, client })
    }

    /// Look up the stored profile for a username.
    pub async fn lookup(&self, username: &str) -> Result<AccountProfile> {
        let url = format!("{}/v1/accounts/{username}", self.base_url);
        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            StatusCode::NOT_FOUND => Err(AccountError::UserNotFound),
            status => Err(AccountError::Status(status)),
        }
    }

    /// Verify a username/password pair. Failure reasons are distinguished so
    /// the dispatcher can answer with the matching response frame.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<LoginProfile> {
        let url = format!("{}/v1/login", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&LoginRequest { username, password })
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            StatusCode::NOT_FOUND => Err(AccountError::UserNotFound),
            StatusCode::UNAUTHORIZED => Err(AccountError::InvalidPassword),
            status => Err(AccountError::Status(status)),
        }
    }
}
