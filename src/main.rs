use anyhow::Context;
use clap::Parser;
use log::info;

use std::io;

use lsdchain::cli::{Args, Menu};
use lsdchain::network::Node;

fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let args = Args::parse();
    let node = Node::new(args.into_config()).context("failed to create node")?;
    node.start().context("failed to start node")?;

    for peer in node.connect_bootstrap_peers() {
        println!("Connected to bootstrap peer: {}", peer);
    }
    info!("Chain height {} with {} known peers", node.chain_len(), node.peers().len());

    let stdin = io::stdin();
    let result = Menu::new(&node, stdin.lock(), io::stdout()).run();

    node.stop();
    result.context("terminal I/O failed")
}
