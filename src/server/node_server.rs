// src/server/node_server.rs

//! `pennkv-node`'s accept loop, coordinator heartbeat task, and graceful
//! shutdown, built on the same `server::connection_loop::run` shape
//! (`tokio::select!` over shutdown / background-task-completion /
//! `listener.accept()`, with a `JoinSet` of per-connection tasks) and
//! `original_source/coordinator/src/coordinator.cc`'s `PING <port>\r\n`
//! heartbeat for the node-to-coordinator leg.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::NodeConfig;
use crate::connection::ConnectionHandler;
use crate::core::node::context::NodeContext;
use crate::core::storage::persistence;
use crate::core::storage::TabletSet;
use crate::config::NodeRole;

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => info!("SIGINT received, shutting down"),
            _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl-C received, shutting down");
    }
}

/// Sends `PING <port>\r\n` to `coordinator_addr` every `interval`, on a
/// fresh connection each time, matching `original_source/loadbalancer/src/
/// loadbalancer.cc::receive_heartbeat`'s one-read-then-close peer side.
async fn heartbeat_task(coordinator_addr: String, self_port: u16, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let msg = format!("PING {self_port}\r\n");
        match TcpStream::connect(&coordinator_addr).await {
            Ok(mut stream) => {
                if let Err(e) = stream.write_all(msg.as_bytes()).await {
                    warn!(%coordinator_addr, error = %e, "failed to send heartbeat");
                }
            }
            Err(e) => {
                warn!(%coordinator_addr, error = %e, "could not reach coordinator for heartbeat");
            }
        }
    }
}

pub async fn run(config: NodeConfig) -> Result<()> {
    let ranges: Vec<(String, String)> =
        config.ranges.iter().map(|r| (r.start.clone(), r.end.clone())).collect();

    let tablets = if let Some(dir) = &config.persistence_dir {
        persistence::load_all(&ranges, dir).await.context("loading persisted tablets")?
    } else {
        TabletSet::new(ranges)
    };

    let ctx = Arc::new(match &config.role {
        NodeRole::Primary { secondary_addrs } => NodeContext::new_primary(
            tablets,
            config.bind_addr(),
            secondary_addrs.clone(),
            config.persistence_dir.clone(),
            config.prepare_timeout(),
        ),
        NodeRole::Secondary { primary_addr } => NodeContext::new_secondary(
            tablets,
            config.bind_addr(),
            primary_addr.clone(),
            config.persistence_dir.clone(),
            config.prepare_timeout(),
        ),
    });

    let listener = TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("binding storage node to {}", config.bind_addr()))?;
    info!(addr = %config.bind_addr(), role = ?config.role, "storage node listening");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut background_tasks = JoinSet::new();

    if let Some(coordinator_addr) = config.coordinator_addr.clone() {
        let interval = config.coordinator_ping_interval();
        let port = config.port;
        background_tasks.spawn(async move {
            heartbeat_task(coordinator_addr, port, interval).await;
        });
    }

    let mut client_tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = await_shutdown_signal() => {
                break;
            }

            Some(res) = background_tasks.join_next(), if !background_tasks.is_empty() => {
                if let Err(e) = res {
                    error!(error = %e, "background task panicked");
                }
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, addr)) => {
                        info!(%addr, "accepted connection");
                        let ctx = ctx.clone();
                        let shutdown_rx = shutdown_tx.subscribe();
                        client_tasks.spawn(async move {
                            let mut handler = ConnectionHandler::new(socket, addr, ctx, shutdown_rx);
                            handler.run().await;
                        });
                    }
                    Err(e) => error!(error = %e, "failed to accept connection"),
                }
            }

            Some(res) = client_tasks.join_next(), if !client_tasks.is_empty() => {
                if let Err(e) = res {
                    if e.is_panic() {
                        error!(error = %e, "connection handler panicked");
                    }
                }
            }
        }
    }

    info!("shutting down storage node");
    let _ = shutdown_tx.send(());
    client_tasks.shutdown().await;
    background_tasks.shutdown().await;

    if let Some(dir) = &config.persistence_dir {
        info!(dir = %dir.display(), "persisting tablets before exit");
        persistence::save_all(&ctx.tablets, dir).await.context("saving tablets on shutdown")?;
    }

    Ok(())
}
