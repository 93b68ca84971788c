// src/bin/coordinator.rs

//! Entry point for `pennkv-coordinator`. Accepts `-s <num_groups> -b
//! <backups_per_group>`; an optional `--config <path>`
//! supplies the addressing/liveness knobs the CLI surface omits.

use std::env;

use anyhow::Result;
use pennkv::config::CoordinatorConfig;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn usage() -> ! {
    eprintln!("Usage: pennkv-coordinator -s <num_groups> -b <backups_per_group> [--config <path>]");
    std::process::exit(1);
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1)).map(|s| s.as_str())
}

fn load_config(args: &[String]) -> Result<CoordinatorConfig> {
    let mut config = match flag_value(args, "--config") {
        Some(path) => CoordinatorConfig::from_file(path)?,
        None => CoordinatorConfig {
            client_host: "127.0.0.1".to_string(),
            client_port: 4000,
            node_host: "127.0.0.1".to_string(),
            heartbeat_port: 4999,
            num_groups: 0,
            backups_per_group: 0,
            node_base_port: 5000,
            admin_addr: None,
            liveness_timeout_ms: 5_000,
            log_level: "info".to_string(),
        },
    };

    if let Some(s) = flag_value(args, "-s") {
        config.num_groups = s.parse().map_err(|_| anyhow::anyhow!("invalid group count {s:?}"))?;
    }
    if let Some(b) = flag_value(args, "-b") {
        config.backups_per_group = b.parse().map_err(|_| anyhow::anyhow!("invalid backup count {b:?}"))?;
    }

    config.validate()?;
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

    if let Err(e) = pennkv::server::coordinator_server::run(config).await {
        error!("coordinator runtime error: {e}");
        std::process::exit(1);
    }

    Ok(())
}
