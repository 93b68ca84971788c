// src/server/admin_server.rs

//! The admin console: accepts the coordinator's and load balancer's
//! topology pushes, then serves an operator command loop over stdin that
//! issues `KILL`/`WAKE`/`GETA`/`GETR`/`GETV` against any storage node by
//! address. Grounded on `original_source/admin_console/
//! src/admin_main.cc`'s command-line operator loop and topology maps.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::AdminConfig;
use crate::core::admin::client;
use crate::core::admin::state::{AdminState, CoordinatorTopology, LoadBalancerTopology};

/// Accepts topology pushes forever: the coordinator and load balancer each
/// connect once at startup and send a single `C:`/`L:`-prefixed payload
/// before closing, but re-accepting keeps the console usable across a
/// coordinator/LB restart too.
async fn accept_topology_pushes(listener: TcpListener, state: Arc<AdminState>) {
    loop {
        let (mut socket, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "failed to accept topology push connection");
                continue;
            }
        };
        let state = state.clone();
        tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Err(e) = socket.read_to_end(&mut buf).await {
                warn!(%addr, error = %e, "failed to read topology push");
                return;
            }
            let payload = String::from_utf8_lossy(&buf);
            if payload.starts_with("C:") {
                match CoordinatorTopology::decode(&payload) {
                    Ok(topo) => {
                        info!(%addr, groups = topo.groups.len(), "received coordinator topology");
                        state.set_coordinator_topology(topo);
                    }
                    Err(e) => warn!(%addr, error = %e, "malformed coordinator topology push"),
                }
            } else if payload.starts_with("L:") {
                match LoadBalancerTopology::decode(&payload) {
                    Ok(topo) => {
                        info!(%addr, front_ends = topo.front_ends.len(), "received load balancer topology");
                        state.set_lb_topology(topo);
                    }
                    Err(e) => warn!(%addr, error = %e, "malformed load balancer topology push"),
                }
            } else {
                warn!(%addr, "topology push had neither C: nor L: prefix");
            }
        });
    }
}

/// Handles one operator command line. Recognized verbs: `TOPOLOGY`, `KILL
/// <addr>`, `WAKE <addr>`, `GETA <addr>`, `GETR <addr> <row>`, `GETV <addr>
/// <row> <col>`.
async fn run_operator_command(state: &AdminState, line: &str) -> String {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["TOPOLOGY"] => {
            let coordinator = state.coordinator_topology();
            let lb = state.lb_topology();
            format!(
                "coordinator: {}\nload balancer: {}",
                coordinator.map(|t| format!("{} groups", t.groups.len())).unwrap_or_else(|| "not yet received".into()),
                lb.map(|t| format!("{} front-ends", t.front_ends.len())).unwrap_or_else(|| "not yet received".into()),
            )
        }
        ["KILL", addr] => match client::kill(addr).await {
            Ok(()) => "OK".to_string(),
            Err(e) => format!("ERROR {e}"),
        },
        ["WAKE", addr] => match client::wake(addr).await {
            Ok(()) => "OK".to_string(),
            Err(e) => format!("ERROR {e}"),
        },
        ["GETA", addr] => match client::get_all_rows(addr).await {
            Ok(rows) => rows.join(", "),
            Err(e) => format!("ERROR {e}"),
        },
        ["GETR", addr, row] => match client::get_row(addr, row).await {
            Ok(cols) => cols.join(", "),
            Err(e) => format!("ERROR {e}"),
        },
        ["GETV", addr, row, col] => match client::get_value(addr, row, col).await {
            Ok(val) => String::from_utf8_lossy(&val).to_string(),
            Err(e) => format!("ERROR {e}"),
        },
        [] => String::new(),
        _ => format!("unrecognized command: {line:?}"),
    }
}

pub async fn run(config: AdminConfig) -> Result<()> {
    let state = Arc::new(AdminState::new());

    let listener = TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("binding admin console to {}", config.bind_addr()))?;
    info!(addr = %config.bind_addr(), "admin console listening for topology pushes");

    tokio::spawn(accept_topology_pushes(listener, state.clone()));

    info!("admin console ready; reading operator commands from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading operator command")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let output = run_operator_command(&state, line).await;
        if !output.is_empty() {
            println!("{output}");
        }
    }

    Ok(())
}
