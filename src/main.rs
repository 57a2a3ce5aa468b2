use std::sync::Arc;
use tracing::info;

use tideline::{api, bot, bus, config, entity, identity, registry, store, stream};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        // It's not fatal if .env doesn't exist, but good to know
        info!("No .env file found or failed to load: {}", e);
    }

    // Initialize logging with default filter if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Tideline daemon starting...");

    let config = config::Config::from_env()?;

    info!("Initializing store at {}", config.db_path.display());
    let store = store::Store::new(&config.db_path).await?;
    store.init().await?;
    // The reserved bot identity must always resolve in the directory.
    store.save_user(&entity::User::bot()).await?;

    let bus = Arc::new(bus::EventBus::new());
    let identity = Arc::new(identity::Identity::new());
    let registry = Arc::new(registry::Registry::new(store.clone(), bus.clone()));
    let message_stream = stream::MessageStream::new(store.clone(), bus.clone());

    let bot = match &config.bot_webhook_url {
        Some(url) => {
            info!("Bot reply service configured at {}", url);
            let reply = bot::reply::ReplyClient::new(url.clone(), config.bot_reply_timeout)?;
            Some(Arc::new(bot::BotSessionManager::new(
                registry.clone(),
                message_stream.clone(),
                reply,
            )))
        }
        None => {
            info!("No BOT_WEBHOOK_URL found, bot conversations disabled.");
            None
        }
    };

    let api_server = api::server::ApiServer::new(api::server::ApiState {
        store,
        identity,
        registry,
        stream: message_stream,
        bot,
        directory: tokio::sync::RwLock::new(None),
    });
    let app = api_server.router();

    info!("Starting API server on port {}", config.port);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                info!("Server stopped with error: {}", e);
            }
        }
    }

    Ok(())
}
