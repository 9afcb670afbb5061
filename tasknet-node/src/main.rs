//! TaskNet node binary.
//!
//! This is the main entry point for the TaskNet node, which runs an
//! authenticated P2P node over TCP.

use tracing_subscriber::EnvFilter;

use tasknet_node::cli::Cli;
use tasknet_node::config::NodeConfig;
use tasknet_node::node::Node;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Set up logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    tracing::info!("TaskNet Node v{}", env!("CARGO_PKG_VERSION"));

    // Build configuration
    let config = NodeConfig::from_cli(&cli);

    // Create and run node
    let node = Node::new(config);
    node.run().await?;

    Ok(())
}
