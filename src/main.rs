//! tokenfeed - on-chain activity feed for a single ERC-20 token
//!
//! Backfills Transfer/Approval history for one token contract, keeps
//! the feed current from a live log subscription, and serves it over a
//! small HTTP/WS API.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tokenfeed_backend::{
    api::{self, AppState},
    chain::{rpc::EthRpcClient, Ledger},
    feed::FeedSession,
    models::Config,
};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// HTTP port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Token contract address (overrides TOKEN_ADDRESS)
    #[arg(long)]
    token: Option<String>,

    /// First block of the historical scan (overrides FROM_BLOCK)
    #[arg(long)]
    from_block: Option<u64>,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tokenfeed_backend=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(token) = cli.token {
        config.token_address = token.to_lowercase();
    }
    if let Some(from_block) = cli.from_block {
        config.from_block = from_block;
    }

    info!(
        token = %config.token_address,
        from_block = config.from_block,
        "🚀 tokenfeed starting"
    );

    let ledger: Arc<dyn Ledger> =
        Arc::new(EthRpcClient::new(&config.rpc_http_url, &config.token_address)?);
    let session = FeedSession::new(ledger.clone(), config.clone());

    // A failed backfill is served as an explicit error state on
    // /api/feed rather than a silently empty feed.
    if let Err(e) = session.start().await {
        error!(error = %e, "feed session did not start, serving error state");
    }

    let state = AppState {
        session: session.clone(),
        ledger,
        config: config.clone(),
    };

    let app = api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;

    info!("🌐 Listening on http://0.0.0.0:{}", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(session))
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal(session: Arc<FeedSession>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    session.shutdown().await;
}
