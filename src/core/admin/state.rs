// src/core/admin/state.rs

//! The two topology snapshots the admin console receives once at startup:
//! one push from the coordinator describing every replica group's
//! membership and the letter→group assignment, one push from the load
//! balancer listing its tracked front-ends. Grounded on
//! `original_source/admin_console/src/admin_main.cc`'s topology maps
//! (`lb_servers`, `kvs_servers`, `kvs_servergroup`) — this implementation
//! keeps the same two top-level snapshots but as typed Rust structs rather
//! than that source's loosely-typed string maps.
//!
//! Wire format: a `C:`/`L:`-prefixed, comma-separated text payload
//! terminated by `\r\n`, written directly to a fresh connection and the
//! socket then closed — no length-delimited framing, since each side sends
//! exactly one payload per connection.

use std::collections::HashMap;
use parking_lot::RwLock;

use crate::core::errors::KvError;

/// One replica group's membership, as pushed by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMembership {
    pub group_id: String,
    /// `(name, addr)` pairs, primary first.
    pub members: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorTopology {
    pub groups: Vec<GroupMembership>,
    /// `letter -> group_id`, as announced by the coordinator.
    pub letter_to_group: HashMap<char, String>,
}

impl CoordinatorTopology {
    /// Encodes as `C:<group_id>:<name> <addr>, <name> <addr>, …\n…\r\n`,
    /// one line per group, followed by a final line mapping every letter
    /// to its group id.
    pub fn encode(&self) -> String {
        let mut out = String::from("C:");
        for (i, g) in self.groups.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&g.group_id);
            out.push(':');
            let members: Vec<String> =
                g.members.iter().map(|(name, addr)| format!("{name} {addr}")).collect();
            out.push_str(&members.join(", "));
        }
        out.push('\n');
        let mut letters: Vec<(&char, &String)> = self.letter_to_group.iter().collect();
        letters.sort_by_key(|(c, _)| **c);
        let letter_entries: Vec<String> =
            letters.into_iter().map(|(c, g)| format!("{c}:{g}")).collect();
        out.push_str(&letter_entries.join(","));
        out.push_str("\r\n");
        out
    }

    pub fn decode(payload: &str) -> Result<Self, KvError> {
        let body = payload
            .strip_prefix("C:")
            .ok_or_else(|| KvError::MalformedRequest("coordinator topology missing C: prefix".into()))?;
        let body = body.trim_end_matches("\r\n");
        let mut lines: Vec<&str> = body.split('\n').collect();
        let letters_line = lines.pop().unwrap_or("");

        let mut groups = Vec::with_capacity(lines.len());
        for line in lines {
            let (group_id, rest) = line
                .split_once(':')
                .ok_or_else(|| KvError::MalformedRequest("group line missing ':'".into()))?;
            let members = rest
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|entry| {
                    let entry = entry.trim();
                    let (name, addr) = entry
                        .split_once(' ')
                        .ok_or_else(|| KvError::MalformedRequest("member entry missing address".into()))?;
                    Ok((name.to_string(), addr.to_string()))
                })
                .collect::<Result<Vec<_>, KvError>>()?;
            groups.push(GroupMembership { group_id: group_id.to_string(), members });
        }

        let mut letter_to_group = HashMap::new();
        for entry in letters_line.split(',').filter(|s| !s.trim().is_empty()) {
            let (letter, group_id) = entry
                .trim()
                .split_once(':')
                .ok_or_else(|| KvError::MalformedRequest("letter mapping missing ':'".into()))?;
            let letter = letter
                .chars()
                .next()
                .ok_or_else(|| KvError::MalformedRequest("empty letter in mapping".into()))?;
            letter_to_group.insert(letter, group_id.to_string());
        }

        Ok(CoordinatorTopology { groups, letter_to_group })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadBalancerTopology {
    /// `(name, addr)` pairs for every tracked front-end.
    pub front_ends: Vec<(String, String)>,
}

impl LoadBalancerTopology {
    pub fn encode(&self) -> String {
        let entries: Vec<String> =
            self.front_ends.iter().map(|(name, addr)| format!("{name} {addr}")).collect();
        format!("L:{}\r\n", entries.join(", "))
    }

    pub fn decode(payload: &str) -> Result<Self, KvError> {
        let body = payload
            .strip_prefix("L:")
            .ok_or_else(|| KvError::MalformedRequest("load balancer topology missing L: prefix".into()))?;
        let body = body.trim_end_matches("\r\n");
        let front_ends = body
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|entry| {
                let entry = entry.trim();
                let (name, addr) = entry
                    .split_once(' ')
                    .ok_or_else(|| KvError::MalformedRequest("front-end entry missing address".into()))?;
                Ok((name.to_string(), addr.to_string()))
            })
            .collect::<Result<Vec<_>, KvError>>()?;
        Ok(LoadBalancerTopology { front_ends })
    }
}

/// The admin console's process-local state: the two topology snapshots,
/// received once at startup and read thereafter by the operator interface.
#[derive(Default)]
pub struct AdminState {
    coordinator_topology: RwLock<Option<CoordinatorTopology>>,
    lb_topology: RwLock<Option<LoadBalancerTopology>>,
}

impl AdminState {
    pub fn new() -> Self {
        AdminState::default()
    }

    pub fn set_coordinator_topology(&self, topo: CoordinatorTopology) {
        *self.coordinator_topology.write() = Some(topo);
    }

    pub fn set_lb_topology(&self, topo: LoadBalancerTopology) {
        *self.lb_topology.write() = Some(topo);
    }

    pub fn coordinator_topology(&self) -> Option<CoordinatorTopology> {
        self.coordinator_topology.read().clone()
    }

    pub fn lb_topology(&self) -> Option<LoadBalancerTopology> {
        self.lb_topology.read().clone()
    }
}
