use clap::Parser;
use poolnet_core::{AccountId, EngineConfig, DEFAULT_UNSTAKE_LOCK_SECS};
use poolnet_service::{build_router, ServiceConfig, ServiceState};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "poolnetd", version, about = "Regional liquidity pool REST service")]
struct Cli {
    /// REST socket address to bind, e.g. 127.0.0.1:8092
    #[arg(long, default_value = "127.0.0.1:8092", env = "POOLNET_LISTEN")]
    listen: SocketAddr,
    /// File used to persist engine state between restarts.
    #[arg(long, default_value = "poolnet/data/engine.json", env = "POOLNET_STATE_FILE")]
    state_file: PathBuf,
    /// Keep engine state in memory only.
    #[arg(long, default_value_t = false)]
    in_memory: bool,
    /// Identity allowed to run admin commands.
    #[arg(long, default_value = "admin", env = "POOLNET_ADMIN")]
    administrator: String,
    /// Seconds a user's stake stays locked after a fallback payment.
    #[arg(long, default_value_t = DEFAULT_UNSTAKE_LOCK_SECS, env = "POOLNET_UNSTAKE_LOCK_SECS")]
    unstake_lock_secs: u64,
    /// Region to create a pool for at startup when missing. Repeatable.
    #[arg(long = "region")]
    regions: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "poolnet_service=info,poolnet_core=info,info".to_string()
        }))
        .init();

    let cli = Cli::parse();
    let engine = EngineConfig {
        administrator: AccountId::new(cli.administrator),
        unstake_lock_secs: cli.unstake_lock_secs,
        ..EngineConfig::default()
    };
    engine.validate()?;

    let config = ServiceConfig {
        state_path: (!cli.in_memory).then_some(cli.state_file),
        engine,
        regions: cli.regions,
    };
    let state = ServiceState::bootstrap(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("poolnet-service REST listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
