// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Hybrid timestamp helpers.

use crate::value::Timestamp;

/// Number of low bits reserved for the logical clock inside
/// a hybrid timestamp.
pub const LOGICAL_BITS: u32 = 18;

/// Gets the unix timestamp as a duration
#[allow(clippy::expect_used)]
pub fn unix_timestamp() -> std::time::Duration {
    let now = std::time::SystemTime::now();

    // NOTE: Unix timestamp is always after UNIX epoch
    now.duration_since(std::time::SystemTime::UNIX_EPOCH)
        .expect("time went backwards")
}

/// Captures the current wall clock as a hybrid timestamp.
///
/// The physical millisecond component occupies the high bits,
/// the low [`LOGICAL_BITS`] bits are the logical clock (zero here,
/// since this process never issues timestamps of its own).
#[must_use]
pub fn hybrid_timestamp() -> Timestamp {
    let millis = unix_timestamp().as_millis() as u64;
    millis << LOGICAL_BITS
}

/// Builds a hybrid timestamp from a physical millisecond clock.
///
/// Useful for deriving TTL deltas in the same unit space as
/// [`hybrid_timestamp`].
#[must_use]
pub fn hybrid_from_millis(millis: u64) -> Timestamp {
    millis << LOGICAL_BITS
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn hybrid_timestamp_monotonic_enough() {
        let a = hybrid_timestamp();
        let b = hybrid_timestamp();
        assert!(b >= a);
    }

    #[test]
    fn hybrid_from_millis_roundtrip() {
        let ts = hybrid_from_millis(1_000);
        assert_eq!(1_000, ts >> LOGICAL_BITS);
    }
}
