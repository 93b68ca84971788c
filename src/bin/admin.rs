// src/bin/admin.rs

//! Entry point for `pennkv-admin`. There are no admin-specific CLI
//! flags beyond an optional `--config <path>`; absent one, it binds the
//! default host/port from `AdminConfig::default()`.

use std::env;

use anyhow::Result;
use pennkv::config::AdminConfig;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1)).map(|s| s.as_str())
}

fn load_config(args: &[String]) -> Result<AdminConfig> {
    match flag_value(args, "--config") {
        Some(path) => AdminConfig::from_file(path),
        None => Ok(AdminConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load admin configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .compact()
        .init();

    if let Err(e) = pennkv::server::admin_server::run(config).await {
        error!("admin console runtime error: {e}");
        std::process::exit(1);
    }

    Ok(())
}
