//! Matrix client construction: session restore or password login.

use crate::config::Config;
use anyhow::{Context as _, anyhow};
use matrix_sdk::authentication::{SessionTokens, matrix::MatrixSession};
use matrix_sdk::{Client, SessionMeta};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Access token and device identity persisted between runs.
#[derive(Debug, Serialize, Deserialize)]
struct SavedSession {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    user_id: String,
    device_id: String,
}

/// Build the client with a sqlite store, then restore the saved session or
/// log in with the configured password and save one.
pub async fn connect(config: &Config) -> anyhow::Result<Client> {
    let store_path = config.matrix_store_path();
    fs::create_dir_all(&store_path)
        .with_context(|| format!("creating store directory at {}", store_path.display()))?;

    let client = Client::builder()
        .homeserver_url(&config.matrix.homeserver)
        .handle_refresh_tokens()
        .sqlite_store(&store_path, None)
        .build()
        .await
        .context("building matrix client")?;

    let session_path = config.session_path();
    if let Some(session) = load_session(&session_path)? {
        tracing::info!(user = %session.user_id, "restoring session");
        let matrix_session = MatrixSession {
            meta: SessionMeta {
                user_id: session.user_id.parse().context("invalid stored user_id")?,
                device_id: session.device_id.into(),
            },
            tokens: SessionTokens {
                access_token: session.access_token,
                refresh_token: session.refresh_token,
            },
        };
        client
            .restore_session(matrix_session)
            .await
            .context("restoring session")?;
    } else {
        let password = config
            .matrix
            .password
            .as_deref()
            .ok_or_else(|| anyhow!("no stored session and MATRIX_PASSWORD is not set"))?;

        tracing::info!(user = %config.matrix.user, "logging in");
        let response = client
            .matrix_auth()
            .login_username(&config.matrix.user, password)
            .initial_device_display_name(&config.matrix.device_name)
            .request_refresh_token()
            .send()
            .await
            .context("login failed")?;

        let session = SavedSession {
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone(),
            user_id: response.user_id.to_string(),
            device_id: response.device_id.to_string(),
        };
        save_session(&session_path, &session)?;
        tracing::info!(user = %session.user_id, device = %session.device_id, "logged in");
    }

    Ok(client)
}

fn load_session(path: &Path) -> anyhow::Result<Option<SavedSession>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading session file at {}", path.display()))?;
    let session = serde_json::from_str(&data).context("parsing session JSON")?;
    Ok(Some(session))
}

fn save_session(path: &Path, session: &SavedSession) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(session)?;
    fs::write(path, data).with_context(|| format!("writing session file at {}", path.display()))?;
    Ok(())
}
