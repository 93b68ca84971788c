// src/core/coordinator/liveness.rs

//! Tracks storage-node liveness from periodic `PING <port>\r\n` heartbeats,
//! following the same `DashMap<Addr, Instant>` + periodic
//! timeout-comparison shape as
//! `core::warden::worker::MasterMonitor::check_master_down`, generalized
//! from tracking one master to tracking every node the directory knows
//! about.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// `node_addr -> last_heartbeat`. A node with no recorded heartbeat yet is
/// treated as dead rather than alive-by-default, since every address in
/// the directory is seeded here at startup (see `LivenessTable::seed`)
/// before any node has had a chance to ping in.
pub struct LivenessTable {
    last_heartbeat: DashMap<String, Instant>,
    timeout: Duration,
}

impl LivenessTable {
    pub fn new(timeout: Duration) -> Self {
        LivenessTable { last_heartbeat: DashMap::new(), timeout }
    }

    /// Registers `addr` as known but not yet heard from, so `is_alive`
    /// reports it dead (rather than panicking on an unknown key) until its
    /// first `PING`.
    pub fn seed(&self, addr: &str) {
        self.last_heartbeat.entry(addr.to_string()).or_insert_with(|| Instant::now() - self.timeout * 2);
    }

    /// Records a heartbeat from `addr`, marking it alive immediately.
    pub fn record_heartbeat(&self, addr: &str) {
        self.last_heartbeat.insert(addr.to_string(), Instant::now());
    }

    pub fn is_alive(&self, addr: &str) -> bool {
        self.last_heartbeat
            .get(addr)
            .map(|last| last.elapsed() < self.timeout)
            .unwrap_or(false)
    }

    pub fn live_addrs(&self) -> Vec<String> {
        self.last_heartbeat
            .iter()
            .filter(|entry| entry.value().elapsed() < self.timeout)
            .map(|entry| entry.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_node_is_dead_until_its_first_heartbeat() {
        let table = LivenessTable::new(Duration::from_secs(5));
        table.seed("127.0.0.1:5000");
        assert!(!table.is_alive("127.0.0.1:5000"));
        table.record_heartbeat("127.0.0.1:5000");
        assert!(table.is_alive("127.0.0.1:5000"));
    }

    #[test]
    fn unknown_address_is_not_alive() {
        let table = LivenessTable::new(Duration::from_secs(5));
        assert!(!table.is_alive("127.0.0.1:9999"));
    }

    #[test]
    fn stale_heartbeat_beyond_timeout_is_dead() {
        let table = LivenessTable::new(Duration::from_millis(20));
        table.record_heartbeat("127.0.0.1:5000");
        assert!(table.is_alive("127.0.0.1:5000"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(!table.is_alive("127.0.0.1:5000"));
    }
}
