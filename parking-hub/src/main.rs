use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use parking_hub::{
    cli::{Cli, Command},
    hub::Hub,
    server::Server,
    store::MemoryStore,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            let store = Arc::new(MemoryStore::with_vacant_spots(args.spots));
            let hub = Hub::start(args.hub_config(), store).await?;
            let listener = TcpListener::bind(args.listen).await?;
            let server = Server::new(listener, hub);
            let addr = server.local_addr()?;
            info!("hub listening on {}", addr);
            if let Err(err) = server.run_until_ctrl_c().await {
                warn!("hub exited with error: {err:?}");
                return Err(err);
            }
        }
    }

    Ok(())
}
