// src/bin/load_balancer.rs

//! Entry point for `pennkv-lb`. Accepts a positional `<num_front_ends>`;
//! an optional `--config <path>` supplies the rest (ports,
//! admin address, timeouts).

use std::env;

use anyhow::Result;
use pennkv::config::LoadBalancerConfig;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn usage() -> ! {
    eprintln!("Usage: pennkv-lb <num_front_ends> [--config <path>]");
    std::process::exit(1);
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1)).map(|s| s.as_str())
}

fn load_config(args: &[String]) -> Result<LoadBalancerConfig> {
    let mut config = match flag_value(args, "--config") {
        Some(path) => LoadBalancerConfig::from_file(path)?,
        None => LoadBalancerConfig {
            host: "127.0.0.1".to_string(),
            client_port: 5000,
            heartbeat_port: 4000,
            num_front_ends: 0,
            front_end_base_port: 6000,
            liveness_timeout_ms: 5_000,
            health_check_interval_ms: 500,
            admin_addr: None,
            log_level: "info".to_string(),
        },
    };

    // The positional front-end count, if given, is the first argument that
    // isn't the program name, `--config`, or `--config`'s value.
    let config_value = flag_value(args, "--config");
    let positional = args
        .iter()
        .skip(1)
        .find(|a| a.as_str() != "--config" && Some(a.as_str()) != config_value);
    if let Some(n) = positional {
        config.num_front_ends = n.parse().map_err(|_| anyhow::anyhow!("invalid front-end count {n:?}"))?;
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

    if let Err(e) = pennkv::server::lb_server::run(config).await {
        error!("load balancer runtime error: {e}");
        std::process::exit(1);
    }

    Ok(())
}
