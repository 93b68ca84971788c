// src/bin/storage_node.rs

//! Entry point for `pennkv-node`. Accepts `-p <port> -s <range_start> -e
//! <range_end>`, plus an optional `--config <path>` carrying
//! everything the CLI surface does not (role, peers, persistence
//! directory, coordinator address) — the CLI flags override the
//! corresponding fields of whatever config is loaded, mirroring the
//! `--port`-overrides-`Config::from_file` pattern used in `main.rs`.

use std::env;

use anyhow::Result;
use pennkv::config::{KeyRange, NodeConfig, NodeRole};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn usage() -> ! {
    eprintln!("Usage: pennkv-node -p <port> -s <range_start> -e <range_end> [--config <path>]");
    std::process::exit(1);
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1)).map(|s| s.as_str())
}

fn load_config(args: &[String]) -> Result<NodeConfig> {
    let mut config = match flag_value(args, "--config") {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ranges: vec![],
            role: NodeRole::Primary { secondary_addrs: vec![] },
            persistence_dir: None,
            coordinator_addr: None,
            prepare_timeout_ms: 2_000,
            coordinator_ping_interval_ms: 2_000,
            log_level: "info".to_string(),
        },
    };

    if let Some(port_str) = flag_value(args, "-p") {
        config.port = port_str.parse().map_err(|_| anyhow::anyhow!("invalid port {port_str:?}"))?;
    }

    let start = flag_value(args, "-s");
    let end = flag_value(args, "-e");
    if let (Some(start), Some(end)) = (start, end) {
        config.ranges = vec![KeyRange { start: start.to_string(), end: end.to_string() }];
    }

    config.validate()?;
    if config.port == 0 {
        anyhow::bail!("a port is required (-p or a --config file)");
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            usage();
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .compact()
        .init();

    if let Err(e) = pennkv::server::node_server::run(config).await {
        error!("storage node runtime error: {e}");
        std::process::exit(1);
    }

    Ok(())
}
