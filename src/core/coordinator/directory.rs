// src/core/coordinator/directory.rs

//! The coordinator's static letter→group assignment and per-group address
//! table. Grounded on `original_source/coordinator/src/
//! coordinator.cc`'s partitioning loop (`i < (26.0 / num_groups) * (g+1)`,
//! walked letter by letter, advancing the group once the boundary is
//! crossed) and its deterministic `"127.0.0.1:5" + group + replica + "0"`
//! address scheme, generalized here to `node_base_port + group*100 +
//! replica*10` so it is not limited to single-digit group/replica counts.

use crate::core::errors::KvError;

/// `group_id`'s addresses: one primary, `backups_per_group` secondaries.
/// Replica index 0 is always the primary; indices `1..=backups_per_group`
/// are the secondaries in the deterministic order the coordinator assigned
/// them.
#[derive(Debug, Clone)]
pub struct GroupAddrs {
    pub primary: String,
    pub secondaries: Vec<String>,
}

impl GroupAddrs {
    /// Every replica in the group, primary first.
    pub fn all(&self) -> impl Iterator<Item = &String> {
        std::iter::once(&self.primary).chain(self.secondaries.iter())
    }
}

/// `letter -> group_id`, `group_id -> GroupAddrs`, built once at startup
/// from `(num_groups, backups_per_group)`. Immutable after construction —
/// only liveness (tracked separately in `liveness::LivenessTable`) changes
/// at runtime.
pub struct Directory {
    num_groups: usize,
    letter_to_group: [usize; 26],
    groups: Vec<GroupAddrs>,
}

impl Directory {
    pub fn new(num_groups: usize, backups_per_group: usize, host: &str, node_base_port: u16) -> Self {
        assert!(num_groups > 0, "a coordinator needs at least one replica group");

        let mut letter_to_group = [0usize; 26];
        for (i, slot) in letter_to_group.iter_mut().enumerate() {
            *slot = (i * num_groups) / 26;
        }

        let groups = (0..num_groups)
            .map(|group_id| {
                let primary = replica_addr(host, node_base_port, group_id, 0);
                let secondaries =
                    (1..=backups_per_group).map(|r| replica_addr(host, node_base_port, group_id, r)).collect();
                GroupAddrs { primary, secondaries }
            })
            .collect();

        Directory { num_groups, letter_to_group, groups }
    }

    /// Every group's addresses, in group-id order — used to hand the
    /// complete topology to a storage node at startup and to the admin
    /// console's startup handshake.
    pub fn groups(&self) -> &[GroupAddrs] {
        &self.groups
    }

    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    /// Maps the first byte of a key to the group responsible for it.
    /// `NO_ASSIGNMENT` if it falls outside `a..z`.
    fn group_for_key(&self, key: &[u8]) -> Result<usize, KvError> {
        let first = *key.first().ok_or(KvError::NoAssignment)?;
        if !first.is_ascii_lowercase() {
            return Err(KvError::NoAssignment);
        }
        Ok(self.letter_to_group[(first - b'a') as usize])
    }

    /// The directory lookup operation itself: resolves `key` to its
    /// group's address table (not yet filtering by liveness — the caller
    /// combines this with a `LivenessTable` to pick a *live* replica).
    pub fn lookup(&self, key: &[u8]) -> Result<&GroupAddrs, KvError> {
        let group_id = self.group_for_key(key)?;
        Ok(&self.groups[group_id])
    }
}

fn replica_addr(host: &str, base_port: u16, group_id: usize, replica_idx: usize) -> String {
    let port = base_port as u32 + (group_id as u32 * 100) + (replica_idx as u32 * 10);
    format!("{host}:{port}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_groups_partition_the_alphabet_into_three_contiguous_ranges() {
        // G=3, B=2, a-i -> group 0, j-r -> group 1, s-z -> group 2.
        let dir = Directory::new(3, 2, "127.0.0.1", 5000);
        assert_eq!(dir.group_for_key(b"apple").unwrap(), 0);
        assert_eq!(dir.group_for_key(b"imp").unwrap(), 0);
        assert_eq!(dir.group_for_key(b"jelly").unwrap(), 1);
        assert_eq!(dir.group_for_key(b"rye").unwrap(), 1);
        assert_eq!(dir.group_for_key(b"soup").unwrap(), 2);
        assert_eq!(dir.group_for_key(b"zebra").unwrap(), 2);
    }

    #[test]
    fn lookup_apple_returns_group_zeros_primary() {
        let dir = Directory::new(3, 2, "127.0.0.1", 5000);
        let addrs = dir.lookup(b"apple").unwrap();
        assert_eq!(addrs.primary, "127.0.0.1:5000");
        assert_eq!(addrs.secondaries, vec!["127.0.0.1:5010", "127.0.0.1:5020"]);
    }

    #[test]
    fn every_letter_is_assigned_to_exactly_one_group() {
        let dir = Directory::new(5, 1, "127.0.0.1", 5000);
        for letter in b'a'..=b'z' {
            assert!(dir.group_for_key(&[letter]).unwrap() < dir.num_groups());
        }
    }

    #[test]
    fn non_alphabetic_first_byte_is_no_assignment() {
        let dir = Directory::new(3, 2, "127.0.0.1", 5000);
        assert_eq!(dir.lookup(b"123").unwrap_err(), KvError::NoAssignment);
        assert_eq!(dir.lookup(b"").unwrap_err(), KvError::NoAssignment);
    }

    #[test]
    fn group_addrs_all_yields_primary_then_secondaries() {
        let addrs = GroupAddrs { primary: "p".into(), secondaries: vec!["s1".into(), "s2".into()] };
        let all: Vec<&String> = addrs.all().collect();
        assert_eq!(all, vec!["p", "s1", "s2"]);
    }
}
