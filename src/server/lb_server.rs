// src/server/lb_server.rs

//! The load balancer's two listeners — client dispatch and front-end
//! heartbeats — plus its half-second health-check tick and startup push of
//! its front-end list to the admin console.
//! Grounded on `original_source/loadbalancer/src/loadbalancer.cc`'s
//! `receive_heartbeat` (single read, parse, close), `health_check` (500ms
//! tick), `select_server` (uniform random over the live set), and
//! `lb_to_admin` (topology push on a fresh connection at startup).

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::LoadBalancerConfig;
use crate::core::admin::state::LoadBalancerTopology;
use crate::core::load_balancer::FrontEndPool;

async fn push_topology_to_admin(admin_addr: &str, pool_front_ends: Vec<(String, String)>) {
    let topo = LoadBalancerTopology { front_ends: pool_front_ends };
    match TcpStream::connect(admin_addr).await {
        Ok(mut stream) => {
            if let Err(e) = stream.write_all(topo.encode().as_bytes()).await {
                warn!(%admin_addr, error = %e, "failed to push topology to admin console");
            } else {
                info!(%admin_addr, "pushed front-end list to admin console");
            }
        }
        Err(e) => warn!(%admin_addr, error = %e, "could not reach admin console at startup"),
    }
}

/// Serves the client dispatch port: every connection gets one redirect
/// reply, `<fe_addr>\r\n` or `SERVICE_UNAVAILABLE\r\n` if none are alive.
async fn serve_clients(listener: TcpListener, pool: Arc<FrontEndPool>) {
    loop {
        let (mut socket, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "failed to accept client connection");
                continue;
            }
        };
        let pool = pool.clone();
        tokio::spawn(async move {
            let response = match pool.select() {
                Ok(fe_addr) => format!("{fe_addr}\r\n"),
                Err(e) => format!("{}\r\n", e.reason()),
            };
            if let Err(e) = socket.write_all(response.as_bytes()).await {
                debug!(%addr, error = %e, "failed to write redirect response");
            }
        });
    }
}

/// Serves the front-end heartbeat port: `PING <port>\r\n`.
async fn serve_heartbeats(listener: TcpListener, pool: Arc<FrontEndPool>) {
    loop {
        let (mut socket, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "failed to accept heartbeat connection");
                continue;
            }
        };
        let pool = pool.clone();
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
                pool.record_heartbeat(&addr);
                debug!(%addr, "front-end heartbeat recorded");
            }
        });
    }
}

/// Periodic liveness sweep. The pool itself recomputes its live set lazily
/// on every `select`/`is_alive`; this tick exists only to log transitions,
/// matching the `core::warden::worker` tick-loop shape.
async fn health_check_tick(pool: Arc<FrontEndPool>, front_ends: Vec<String>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let live: Vec<&String> = front_ends.iter().filter(|fe| pool.is_alive(fe)).collect();
        debug!(live_count = live.len(), total = front_ends.len(), "front-end health check");
    }
}

pub async fn run(config: LoadBalancerConfig) -> Result<()> {
    let pool = Arc::new(FrontEndPool::new(
        &config.host,
        config.front_end_base_port,
        config.num_front_ends,
        config.liveness_timeout(),
    ));
    let front_ends: Vec<String> = (0..config.num_front_ends)
        .map(|i| format!("{}:{}", config.host, config.front_end_base_port as u32 + i as u32))
        .collect();

    if let Some(admin_addr) = &config.admin_addr {
        let named: Vec<(String, String)> =
            front_ends.iter().enumerate().map(|(i, addr)| (format!("FE{}", i + 1), addr.clone())).collect();
        push_topology_to_admin(admin_addr, named).await;
    }

    let client_listener = TcpListener::bind(config.client_bind_addr())
        .await
        .with_context(|| format!("binding load balancer client port {}", config.client_bind_addr()))?;
    info!(addr = %config.client_bind_addr(), "load balancer listening for clients");

    let heartbeat_listener = TcpListener::bind(config.heartbeat_bind_addr())
        .await
        .with_context(|| format!("binding load balancer heartbeat port {}", config.heartbeat_bind_addr()))?;
    info!(addr = %config.heartbeat_bind_addr(), "load balancer listening for front-end heartbeats");

    tokio::spawn(serve_heartbeats(heartbeat_listener, pool.clone()));
    tokio::spawn(health_check_tick(pool.clone(), front_ends, config.health_check_interval()));
    serve_clients(client_listener, pool).await;

    Ok(())
}
