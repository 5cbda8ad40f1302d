// Action dispatch for the two recognized JSON actions. Everything else in
// a frame falls through to the channel broadcast untouched.
use bytes::Bytes;
use hub_broker::ConnectionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::accounts::{AccountClient, AccountError};

/// Client-posted actions the relay answers directly.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action")]
pub enum ActionRequest {
    #[serde(rename = "get_credentials")]
    GetCredentials { username: String },
    #[serde(rename = "login")]
    Login { username: String, password: String },
}

/// Direct responses written back to the posting connection only.
// The action strings, mixed casing included, are the wire contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action")]
pub enum ActionResponse {
    #[serde(rename = "get_credentials_success")]
    GetCredentialsSuccess {
        username: String,
        email: String,
        country: String,
    },
    #[serde(rename = "Login_success")]
    LoginSuccess { avatar: String, email: String },
    #[serde(rename = "Login_fails_on_user")]
    LoginFailsOnUser,
    #[serde(rename = "Login_fails_on_pass")]
    LoginFailsOnPass,
}

/// Inspect a parsed payload and start the credential exchange when it names
/// a recognized action. Unrecognized actions, missing fields, and
/// non-object payloads are ignored here; the broadcast has already been
/// decided independently.
///
/// The exchange runs in a spawned task: credential calls are the only
/// suspension points in the relay and must not block the read loop.
pub fn dispatch(
    conn: ConnectionId,
    outbound: mpsc::Sender<Bytes>,
    accounts: Option<Arc<AccountClient>>,
    payload: &Value,
) {
    let Ok(request) = ActionRequest::deserialize(payload) else {
        return;
    };
    let Some(accounts) = accounts else {
        metrics::counter!("hub_account_failures_total", "action" => "unconfigured").increment(1);
        tracing::warn!(conn = %conn, "credential action received but no accounts service configured");
        return;
    };
    tokio::spawn(async move {
        match request {
            ActionRequest::GetCredentials { username } => {
                get_credentials(conn, outbound, accounts, username).await;
            }
            ActionRequest::Login { username, password } => {
                login(conn, outbound, accounts, username, password).await;
            }
        }
    });
}

async fn get_credentials(
    conn: ConnectionId,
    outbound: mpsc::Sender<Bytes>,
    accounts: Arc<AccountClient>,
    username: String,
) {
    match accounts.lookup(&username).await {
        Ok(profile) => {
            let response = ActionResponse::GetCredentialsSuccess {
                username: profile.user,
                email: profile.email,
                country: profile.country,
            };
            send_response(conn, &outbound, &response).await;
        }
        Err(err) => {
            // Lookup failures are logged only; the client gets no reply.
            metrics::counter!("hub_account_failures_total", "action" => "get_credentials")
                .increment(1);
            tracing::warn!(conn = %conn, user = %username, error = %err, "credential lookup failed");
        }
    }
}

async fn login(
    conn: ConnectionId,
    outbound: mpsc::Sender<Bytes>,
    accounts: Arc<AccountClient>,
    username: String,
    password: String,
) {
    let response = match accounts.authenticate(&username, &password).await {
        Ok(profile) => ActionResponse::LoginSuccess {
            avatar: profile.avatar,
            email: profile.email,
        },
        Err(AccountError::UserNotFound) => ActionResponse::LoginFailsOnUser,
        Err(AccountError::InvalidPassword) => ActionResponse::LoginFailsOnPass,
        Err(err) => {
            metrics::counter!("hub_account_failures_total", "action" => "login").increment(1);
            tracing::warn!(conn = %conn, user = %username, error = %err, "login request failed");
            return;
        }
    };
    send_response(conn, &outbound, &response).await;
}

async fn send_response(
    conn: ConnectionId,
    outbound: &mpsc::Sender<Bytes>,
    response: &ActionResponse,
) {
    let payload = match serde_json::to_string(response) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::error!(conn = %conn, error = %err, "encode action response failed");
            return;
        }
    };
    // The send fails only when the connection already closed; the deferred
    // response is dropped then.
    if outbound
        .send(Bytes::from(hub_wire::wrap_json(&payload)))
        .await
        .is_err()
    {
        tracing::debug!(conn = %conn, "connection closed before response delivery");
    }
}
