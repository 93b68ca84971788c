// src/core/storage/tablet_set.rs

//! A storage node may own more than one contiguous key range (e.g. a
//! single node configured with both `aa..az` and `ba..bz`).
//! `TabletSet` is the ordered collection of `Tablet`s a node routes
//! requests across.

use crate::core::errors::KvError;

use super::tablet::Tablet;

pub struct TabletSet {
    /// Sorted ascending by `range_start`, so `lookup` can scan from the
    /// end backwards.
    tablets: Vec<Tablet>,
}

impl TabletSet {
    pub fn new(ranges: Vec<(String, String)>) -> Self {
        let mut tablets: Vec<Tablet> =
            ranges.into_iter().map(|(start, end)| Tablet::new(start, end)).collect();
        tablets.sort_by(|a, b| a.range_start.cmp(&b.range_start));
        TabletSet { tablets }
    }

    /// Scans tablets from highest `range_start` downward and returns the
    /// first whose `range_start <= row <= range_end`. Failing that
    /// (a row outside every range this node owns — the coordinator should
    /// never route such a request here) reports an internal error rather
    /// than a named client failure, since no wire reason is defined for
    /// this condition.
    pub fn lookup(&self, row: &str) -> Result<&Tablet, KvError> {
        self.tablets
            .iter()
            .rev()
            .find(|t| t.range_start.as_str() <= row && row <= t.range_end.as_str())
            .ok_or_else(|| KvError::Internal(format!("no tablet owns key range for {row:?}")))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tablet> {
        self.tablets.iter()
    }

    /// All row keys across every tablet this node owns, in key order —
    /// `GETA` merges across tablets rather than answering from just one.
    pub async fn get_all_rows(&self) -> Vec<String> {
        let mut rows = Vec::new();
        for tablet in &self.tablets {
            rows.extend(tablet.get_all_rows().await);
        }
        rows.sort();
        rows
    }

    /// Builds a set directly from already-constructed tablets (used when
    /// loading each one from its persisted file), keeping the same
    /// descending-scan ordering invariant as `new`.
    pub(crate) fn from_tablets(mut tablets: Vec<Tablet>) -> Self {
        tablets.sort_by(|a, b| a.range_start.cmp(&b.range_start));
        TabletSet { tablets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn two_tablets() -> TabletSet {
        TabletSet::new(vec![("aa".into(), "az".into()), ("ba".into(), "bz".into())])
    }

    #[tokio::test]
    async fn lookup_routes_to_the_matching_range() {
        let set = two_tablets();
        let t = set.lookup("apricot").unwrap();
        assert_eq!(t.range_start, "aa");
        let t = set.lookup("banana").unwrap();
        assert_eq!(t.range_start, "ba");
    }

    #[tokio::test]
    async fn get_all_rows_merges_across_tablets_in_key_order() {
        let set = two_tablets();
        set.lookup("apricot").unwrap().put_value("apricot", "c", Bytes::from_static(b"1")).await.unwrap();
        set.lookup("banana").unwrap().put_value("banana", "c", Bytes::from_static(b"1")).await.unwrap();
        assert_eq!(set.get_all_rows().await, vec!["apricot".to_string(), "banana".to_string()]);
    }

    #[tokio::test]
    async fn lookup_outside_every_range_is_an_error() {
        let set = two_tablets();
        assert!(set.lookup("zebra").is_err());
    }
}
