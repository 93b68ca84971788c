// src/core/load_balancer/pool.rs

//! The load balancer's front-end pool: heartbeat tracking plus uniform
//! random dispatch. Grounded on
//! `original_source/loadbalancer/src/loadbalancer.cc`'s `health_check`
//! (500ms tick, 5s staleness window) and `select_server` (uniform random
//! choice over the live set), and on this codebase's existing use of
//! `rand::seq::IteratorRandom` for uniform sampling (`core/storage/db/
//! core.rs`'s random-key selection for LRU eviction).

use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::seq::IteratorRandom;

use crate::core::errors::KvError;

pub struct FrontEndPool {
    last_heartbeat: DashMap<String, Instant>,
    timeout: Duration,
}

impl FrontEndPool {
    /// Seeds the pool with `num_front_ends` addresses
    /// (`host:base_port..host:base_port+n`), all initially dead until
    /// their first heartbeat — mirroring the C++ source's
    /// `initialize_servers` marking every configured port dead at boot.
    pub fn new(host: &str, base_port: u16, num_front_ends: usize, timeout: Duration) -> Self {
        let last_heartbeat = DashMap::new();
        for i in 0..num_front_ends {
            let addr = format!("{host}:{}", base_port as u32 + i as u32);
            last_heartbeat.insert(addr, Instant::now() - timeout * 2);
        }
        FrontEndPool { last_heartbeat, timeout }
    }

    /// Records a heartbeat from `addr`, reviving it immediately even if it
    /// had been marked dead — any subsequent PING revives it.
    pub fn record_heartbeat(&self, addr: &str) {
        self.last_heartbeat.insert(addr.to_string(), Instant::now());
    }

    pub fn is_alive(&self, addr: &str) -> bool {
        self.last_heartbeat.get(addr).map(|t| t.elapsed() < self.timeout).unwrap_or(false)
    }

    fn live_addrs(&self) -> Vec<String> {
        self.last_heartbeat
            .iter()
            .filter(|e| e.value().elapsed() < self.timeout)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Uniform random choice over the live set; `ServiceUnavailable` if
    /// none are alive.
    pub fn select(&self) -> Result<String, KvError> {
        let live = self.live_addrs();
        let mut rng = rand::thread_rng();
        live.into_iter().choose(&mut rng).ok_or(KvError::ServiceUnavailable)
    }
}
