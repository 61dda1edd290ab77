//! Configuration loading and validation.

use crate::error::{ConfigError, Result};
use anyhow::Context as _;
use std::path::PathBuf;

/// Threadbot configuration, resolved from environment variables (with
/// `.env` support) and CLI arguments.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory holding the Matrix store, session file, and thread db.
    pub data_dir: PathBuf,

    /// OpenAI settings.
    pub openai: OpenAiConfig,

    /// Matrix homeserver settings.
    pub matrix: MatrixConfig,
}

/// OpenAI provider configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub token: String,

    /// Optional base URL override for proxied deployments.
    pub base_url: Option<String>,
}

/// Matrix connection configuration.
#[derive(Debug, Clone)]
pub struct MatrixConfig {
    pub homeserver: String,

    /// Login user (localpart or full user id).
    pub user: String,

    /// Password for first login. Optional once a session is saved.
    pub password: Option<String>,

    /// Device display name shown in the user's session list.
    pub device_name: String,
}

impl Config {
    /// Load configuration from the environment.
    pub fn load(data_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = data_dir
            .or_else(|| dirs::data_dir().map(|d| d.join("threadbot")))
            .unwrap_or_else(|| PathBuf::from("./data"));

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

        let openai = OpenAiConfig {
            token: require_env("OPENAI_TOKEN")?,
            base_url: optional_env("OPENAI_BASE_URL"),
        };

        let matrix = MatrixConfig {
            homeserver: require_env("MATRIX_HOMESERVER")?,
            user: require_env("MATRIX_USER")?,
            password: optional_env("MATRIX_PASSWORD"),
            device_name: optional_env("MATRIX_DEVICE_NAME")
                .unwrap_or_else(|| "threadbot".to_owned()),
        };

        Ok(Self {
            data_dir,
            openai,
            matrix,
        })
    }

    /// Path of the Matrix client's sqlite store.
    pub fn matrix_store_path(&self) -> PathBuf {
        self.data_dir.join("matrix-store")
    }

    /// Path of the saved session file.
    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    /// Path of the thread store.
    pub fn threads_path(&self) -> PathBuf {
        self.data_dir.join("threads.redb")
    }
}

fn require_env(key: &str) -> Result<String> {
    optional_env(key).ok_or_else(|| ConfigError::MissingKey(key.to_owned()).into())
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}
