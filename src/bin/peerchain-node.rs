#![forbid(unsafe_code)]
//! PeerChain ledger node

use clap::Parser;
use peerchain::config::{Config, NodeArgs};
use peerchain::node;

#[tokio::main]
async fn main() {
    node::init_tracing();

    let args = NodeArgs::parse();
    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = node::run(config).await {
        tracing::error!(error = %e, "node stopped");
        std::process::exit(1);
    }
}
