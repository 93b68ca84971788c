// src/server/coordinator_server.rs

//! The coordinator's two listeners — client directory lookups and
//! storage-node heartbeats — plus the startup push of its topology to the
//! admin console. Grounded on `original_source/
//! coordinator/src/coordinator.cc` for the partitioning/addressing and
//! `original_source/loadbalancer/src/loadbalancer.cc::receive_heartbeat`
//! for the single-read-then-close heartbeat accept shape this coordinator
//! reuses for its own `PING` listener.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::CoordinatorConfig;
use crate::core::admin::state::{CoordinatorTopology, GroupMembership};
use crate::core::coordinator::{Directory, LivenessTable};

/// Builds the topology snapshot pushed to the admin console at startup,
/// from the same `Directory` the client-facing listener consults.
fn topology_snapshot(directory: &Directory) -> CoordinatorTopology {
    let mut letter_to_group = std::collections::HashMap::new();
    let groups = directory
        .groups()
        .iter()
        .enumerate()
        .map(|(id, g)| {
            let mut members = vec![("primary".to_string(), g.primary.clone())];
            for (i, addr) in g.secondaries.iter().enumerate() {
                members.push((format!("secondary{}", i + 1), addr.clone()));
            }
            GroupMembership { group_id: id.to_string(), members }
        })
        .collect::<Vec<_>>();

    for letter in 'a'..='z' {
        if let Ok(group) = directory.lookup(letter.to_string().as_bytes()) {
            let group_id = directory
                .groups()
                .iter()
                .position(|g| g.primary == group.primary)
                .unwrap_or(0)
                .to_string();
            letter_to_group.insert(letter, group_id);
        }
    }

    CoordinatorTopology { groups, letter_to_group }
}

async fn push_topology_to_admin(admin_addr: &str, directory: &Directory) {
    let topo = topology_snapshot(directory);
    match TcpStream::connect(admin_addr).await {
        Ok(mut stream) => {
            if let Err(e) = stream.write_all(topo.encode().as_bytes()).await {
                warn!(%admin_addr, error = %e, "failed to push topology to admin console");
            } else {
                info!(%admin_addr, "pushed topology to admin console");
            }
        }
        Err(e) => warn!(%admin_addr, error = %e, "could not reach admin console at startup"),
    }
}

/// Serves the client-facing directory lookup port: one request per
/// connection.
async fn serve_clients(listener: TcpListener, directory: Arc<Directory>, liveness: Arc<LivenessTable>) {
    loop {
        let (mut socket, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "failed to accept client connection");
                continue;
            }
        };
        let directory = directory.clone();
        let liveness = liveness.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            let n = match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            let key = &buf[..n];
            let key = key.strip_suffix(b"\r\n").unwrap_or(key);

            let response = match directory.lookup(key) {
                Ok(group) => {
                    if liveness.is_alive(&group.primary) {
                        format!("{}\r\n", group.primary)
                    } else if let Some(live) = group.secondaries.iter().find(|s| liveness.is_alive(s)) {
                        format!("{live}\r\n")
                    } else {
                        "GROUP_UNAVAILABLE\r\n".to_string()
                    }
                }
                Err(e) => format!("{}\r\n", e.reason()),
            };
            if let Err(e) = socket.write_all(response.as_bytes()).await {
                debug!(%addr, error = %e, "failed to write directory response");
            }
        });
    }
}

/// Serves the storage-node heartbeat port: `PING <port>\r\n` from any node
/// in any group, recorded against `peer_ip:port`.
async fn serve_heartbeats(listener: TcpListener, liveness: Arc<LivenessTable>) {
    loop {
        let (mut socket, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "failed to accept heartbeat connection");
                continue;
            }
        };
        let liveness = liveness.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let n = match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            let msg = String::from_utf8_lossy(&buf[..n]);
            let msg = msg.trim_end();
            if let Some(port) = msg.strip_prefix("PING ") {
                let addr = format!("{}:{}", peer_addr.ip(), port.trim());
                liveness.record_heartbeat(&addr);
                debug!(%addr, "heartbeat recorded");
            }
        });
    }
}

pub async fn run(config: CoordinatorConfig) -> Result<()> {
    let directory = Arc::new(Directory::new(
        config.num_groups,
        config.backups_per_group,
        &config.node_host,
        config.node_base_port,
    ));
    let liveness = Arc::new(LivenessTable::new(config.liveness_timeout()));
    for group in directory.groups() {
        for addr in group.all() {
            liveness.seed(addr);
        }
    }

    if let Some(admin_addr) = &config.admin_addr {
        push_topology_to_admin(admin_addr, &directory).await;
    }

    let client_listener = TcpListener::bind(config.client_bind_addr())
        .await
        .with_context(|| format!("binding coordinator client port {}", config.client_bind_addr()))?;
    info!(addr = %config.client_bind_addr(), "coordinator listening for client lookups");

    let heartbeat_listener = TcpListener::bind(config.heartbeat_bind_addr())
        .await
        .with_context(|| format!("binding coordinator heartbeat port {}", config.heartbeat_bind_addr()))?;
    info!(addr = %config.heartbeat_bind_addr(), "coordinator listening for node heartbeats");

    tokio::spawn(serve_heartbeats(heartbeat_listener, liveness.clone()));
    serve_clients(client_listener, directory, liveness).await;

    Ok(())
}
