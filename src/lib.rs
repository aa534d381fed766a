// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A K.I.S.S. clustering compaction engine for sealed column-oriented segments.
//!
//! ##### About
//!
//! This crate implements the core of a clustering compaction task inside a
//! distributed vector database's storage tier: it ingests a set of sealed
//! column-oriented row-group files ("segments") belonging to one partition,
//! and produces a new set of segments in which rows are physically
//! reorganized by proximity of a nominated clustering key.
//!
//! Rows are streamed through a set of in-memory cluster buffers (one per
//! output bucket) and spilled to object storage by a cooperative flush
//! scheduler that keeps total residency below a configured memory budget.
//! Two bucket-assignment strategies exist:
//!
//! - *scalar*: a one-pass histogram over the clustering key column,
//!   greedily split into key ranges respecting the per-segment row limits
//! - *vector*: centroids and per-row centroid assignments pre-computed by
//!   an external analyzer
//!
//! Delete logs ("tombstones") and TTL expiry are applied during the pass,
//! and a partition statistics snapshot is published for the query planner.
//!
//! Blob I/O and ID issuance are injected through the [`ObjectStore`] and
//! [`IdAllocator`] traits; inputs must be sealed (no live writers).
//!
//! # Example usage
//!
//! ```
//! use clustering_compaction::{
//!     ClusteringCompactionTask, CollectionSchema, CompactionPlan, CompactionType,
//!     Config, DataType, FieldSchema, MemoryObjectStore, SequenceIdAllocator,
//! };
//! use std::sync::Arc;
//!
//! let schema = CollectionSchema::new(vec![
//!     FieldSchema::new(100, "id", DataType::Int64).primary_key(),
//!     FieldSchema::new(101, "age", DataType::Int32).clustering_key(),
//! ]);
//!
//! let plan = CompactionPlan {
//!     plan_id: 1,
//!     collection_id: 1,
//!     partition_id: 1,
//!     channel: "ch-0".into(),
//!     timeout_secs: 60,
//!     schema,
//!     ttl: 0,
//!     max_segment_rows: 10_000,
//!     prefer_segment_rows: 5_000,
//!     compaction_type: CompactionType::Clustering,
//!     segments: vec![], // sealed input segment descriptors
//!     analyze_root: None,
//!     analyzed_segments: Default::default(),
//! };
//!
//! let task = ClusteringCompactionTask::new(
//!     plan,
//!     Config::default(),
//!     Arc::new(MemoryObjectStore::new()),
//!     Arc::new(SequenceIdAllocator::new(1_000)),
//! );
//!
//! let result = task.run()?;
//! assert!(result.segments.is_empty()); // no inputs, no outputs
//! #
//! # Ok::<(), clustering_compaction::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

#[doc(hidden)]
pub mod binlog;

mod buffer;
mod checksum;

#[doc(hidden)]
pub mod coding;

mod compression;
mod config;
mod error;
mod flush;
mod mapping;
mod plan;
mod planner;
mod pool;

#[doc(hidden)]
pub mod reader;

mod scheduler;
mod schema;
mod stats;
mod storage;
mod task;

#[doc(hidden)]
pub mod time;

mod tombstone;
mod value;
mod writer;

pub use {
    checksum::Checksum,
    compression::CompressionType,
    config::Config,
    error::{Error, Result},
    plan::{
        BinlogDescriptor, CompactionPlan, CompactionResult, CompactionSegment, CompactionState,
        CompactionType, FieldBinlog, InputSegment,
    },
    schema::{
        CollectionSchema, DataType, FieldSchema, ROW_ID_FIELD_ID, START_OF_USER_FIELD_ID,
        TIMESTAMP_FIELD_ID,
    },
    stats::{partition_stats_path, FieldStats, PartitionStatsSnapshot, SegmentStats, StatsBounds},
    storage::{IdAllocator, MemoryObjectStore, ObjectStore, SequenceIdAllocator},
    task::{Cancellation, ClusteringCompactionTask, TaskCounters},
    tombstone::TombstoneIndex,
    value::{
        BucketId, FieldId, FieldValue, PlanId, PrimaryKey, Row, ScalarValue, SegmentId, Timestamp,
    },
};
