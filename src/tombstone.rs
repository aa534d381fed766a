// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    binlog::{read_blob, DeleteLog},
    plan::InputSegment,
    storage::ObjectStore,
    value::{PrimaryKey, Timestamp},
};
use rustc_hash::FxHashMap;

/// Frozen index of all delete events of the input segments
///
/// Built single-owner before mapping begins, then only read - safe for
/// lock-free concurrent lookup.
pub struct TombstoneIndex {
    deletes: FxHashMap<PrimaryKey, Timestamp>,

    /// Time-to-live delta (0 = disabled)
    ttl: Timestamp,

    /// Wall-clock hybrid timestamp captured at task start
    current_ts: Timestamp,
}

impl TombstoneIndex {
    /// Downloads all delete logs and folds them into a
    /// primary key -> highest delete timestamp map.
    ///
    /// # Errors
    ///
    /// Fails if a delete log cannot be downloaded or decoded.
    pub fn build(
        store: &dyn ObjectStore,
        segments: &[InputSegment],
        ttl: Timestamp,
        current_ts: Timestamp,
    ) -> crate::Result<Self> {
        let paths = segments
            .iter()
            .flat_map(|segment| segment.delete_logs.iter().cloned())
            .collect::<Vec<_>>();

        let mut deletes: FxHashMap<PrimaryKey, Timestamp> = FxHashMap::default();

        if !paths.is_empty() {
            for blob in store.download(&paths)? {
                let log: DeleteLog = read_blob(&blob)?;

                for (pk, ts) in log.entries {
                    let highest = deletes.entry(pk).or_insert(ts);

                    if *highest < ts {
                        *highest = ts;
                    }
                }
            }
        }

        log::debug!(
            "Merged {} delete logs into {} tombstones",
            paths.len(),
            deletes.len(),
        );

        Ok(Self {
            deletes,
            ttl,
            current_ts,
        })
    }

    /// Returns `true` if the row is shadowed by a delete event.
    ///
    /// Equal timestamps survive: an upsert's delete event carries the
    /// same timestamp as its insert.
    #[must_use]
    pub fn is_deleted(&self, pk: &PrimaryKey, ts: Timestamp) -> bool {
        self.deletes.get(pk).is_some_and(|del_ts| ts < *del_ts)
    }

    /// Returns `true` if the row's TTL has lapsed.
    #[must_use]
    pub fn is_expired(&self, ts: Timestamp) -> bool {
        self.ttl > 0 && ts.saturating_add(self.ttl) < self.current_ts
    }

    /// Returns the number of tombstoned primary keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deletes.len()
    }

    /// Returns `true` if no tombstones exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        binlog::write_blob, storage::MemoryObjectStore, CompressionType,
    };
    use test_log::test;

    fn index_of(entries: Vec<(PrimaryKey, Timestamp)>, ttl: Timestamp, now: Timestamp) -> TombstoneIndex {
        let store = MemoryObjectStore::new();

        let blob = write_blob(&DeleteLog { entries }, CompressionType::None)
            .expect("encode should work");
        store.upload("d/0", blob).expect("upload should work");

        let segment = InputSegment {
            segment_id: 1,
            insert_logs: rustc_hash::FxHashMap::default(),
            delete_logs: vec!["d/0".into()],
        };

        TombstoneIndex::build(&store, &[segment], ttl, now).expect("build should work")
    }

    #[test]
    fn tombstone_keeps_highest_timestamp() {
        let index = index_of(
            vec![
                (PrimaryKey::Int64(1), 10),
                (PrimaryKey::Int64(1), 30),
                (PrimaryKey::Int64(1), 20),
            ],
            0,
            100,
        );

        assert_eq!(1, index.len());
        assert!(index.is_deleted(&PrimaryKey::Int64(1), 29));
        assert!(!index.is_deleted(&PrimaryKey::Int64(1), 30));
    }

    #[test]
    fn tombstone_upsert_survives() {
        let index = index_of(vec![(PrimaryKey::Int64(1), 10)], 0, 100);

        // Same timestamp = upsert, the row survives
        assert!(!index.is_deleted(&PrimaryKey::Int64(1), 10));
        assert!(index.is_deleted(&PrimaryKey::Int64(1), 9));
        assert!(!index.is_deleted(&PrimaryKey::Int64(2), 9));
    }

    #[test]
    fn expiry_disabled_without_ttl() {
        let index = index_of(vec![], 0, 1_000);
        assert!(!index.is_expired(1));
    }

    #[test]
    fn expiry_with_ttl() {
        let index = index_of(vec![], 100, 1_000);

        assert!(index.is_expired(899));
        assert!(!index.is_expired(900));
        assert!(!index.is_expired(950));
    }
}
