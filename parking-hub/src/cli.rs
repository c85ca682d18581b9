use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::config::HubConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the hub, accepting device WebSocket connections and REST calls.
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address to bind. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Number of vacant spots the in-memory store starts with.
    #[arg(long, default_value_t = 10)]
    pub spots: u32,

    /// Seconds an opened barrier stays open before closing on its own.
    #[arg(long, default_value_t = 30)]
    pub auto_close_secs: u64,

    /// Frames a connection may have queued before it is dropped as stuck.
    #[arg(long, default_value_t = 64)]
    pub outbound_buffer: usize,
}

impl ServeArgs {
    pub fn hub_config(&self) -> HubConfig {
        HubConfig::default()
            .with_auto_close_after(Duration::from_secs(self.auto_close_secs))
            .with_outbound_buffer(self.outbound_buffer)
    }
}
