//! Threadbot CLI entry point.

use anyhow::Context as _;
use clap::Parser;
use matrix_sdk::config::SyncSettings;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "threadbot")]
#[command(about = "A Matrix bot that relays conversation threads to OpenAI")]
struct Cli {
    /// Data directory for the Matrix store, session, and thread db
    #[arg(long, env = "THREADBOT_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so env-backed config can pick it up.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("starting threadbot");

    let config = threadbot::config::Config::load(cli.data_dir)
        .with_context(|| "failed to load configuration from environment")?;
    tracing::info!(data_dir = %config.data_dir.display(), "configuration loaded");

    let store = Arc::new(
        threadbot::store::ThreadStore::open(&config.threads_path())
            .with_context(|| "failed to open thread store")?,
    );

    let llm = Arc::new(threadbot::llm::OpenAiClient::new(
        config.openai.token.clone(),
        config.openai.base_url.clone(),
    ));

    let client = threadbot::matrix::connect(&config)
        .await
        .with_context(|| "failed to connect to matrix")?;
    let bot_user = client
        .user_id()
        .ok_or_else(|| anyhow::anyhow!("client has no user id after login"))?
        .to_string();

    let engine = Arc::new(threadbot::engine::Engine::new(llm, store, bot_user));

    // Sync once before attaching the handler so the backlog accumulated
    // while the bot was down is not replayed as fresh commands.
    let response = client
        .sync_once(SyncSettings::default())
        .await
        .with_context(|| "initial sync failed")?;
    threadbot::matrix::handler::register(&client, engine);

    tracing::info!("threadbot started");

    let settings = SyncSettings::default().token(response.next_batch);
    tokio::select! {
        result = client.sync(settings) => {
            result.with_context(|| "sync terminated")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    tracing::info!("threadbot stopped");
    Ok(())
}
