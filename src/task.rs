// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    binlog::write_blob,
    buffer::ClusterBuffer,
    flush, mapping,
    plan::{CompactionPlan, CompactionResult, CompactionState},
    planner,
    scheduler::{self, FlushSignal},
    stats::{partition_stats_path, PartitionStatsSnapshot, SegmentStats},
    storage::{IdAllocator, ObjectStore},
    time,
    tombstone::TombstoneIndex,
    value::{BucketId, FieldId, SegmentId},
    Config,
};
use std::sync::{
    atomic::{
        AtomicBool, AtomicU64,
        Ordering::{AcqRel, Acquire, Relaxed, Release},
    },
    Arc, Mutex,
};
use std::time::{Duration, Instant};

/// Cooperative cancellation of a running task
///
/// Cloned into every worker; the task's deadline rides along so that
/// both conditions surface through one check.
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// Asks the task to stop at its next check point.
    ///
    /// Workers return promptly; in-flight uploads run to completion.
    pub fn cancel(&self) {
        self.cancelled.store(true, Release);
    }

    /// Returns `true` if the task was asked to stop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Acquire)
    }

    /// Attaches the task deadline, keeping the shared flag.
    pub(crate) fn with_deadline(&self, deadline: Option<Instant>) -> Self {
        Self {
            cancelled: self.cancelled.clone(),
            deadline,
        }
    }

    /// Surfaces cancellation and the lapsed deadline as an error.
    pub(crate) fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            return Err(crate::Error::Cancelled("stop signal"));
        }

        if self.deadline.is_some_and(|deadline| Instant::now() > deadline) {
            return Err(crate::Error::Cancelled("deadline exceeded"));
        }

        Ok(())
    }
}

/// Progress counters of a running (or finished) compaction task
#[derive(Debug, Default)]
pub struct TaskCounters {
    pub(crate) written_rows: AtomicU64,
    pub(crate) deleted_rows: AtomicU64,
    pub(crate) expired_rows: AtomicU64,
    pub(crate) flush_count: AtomicU64,
    pub(crate) peak_buffer_size: AtomicU64,
}

impl TaskCounters {
    /// Rows that survived the filters and were re-bucketed.
    #[must_use]
    pub fn written_rows(&self) -> u64 {
        self.written_rows.load(Relaxed)
    }

    /// Rows dropped because a tombstone shadowed them.
    #[must_use]
    pub fn deleted_rows(&self) -> u64 {
        self.deleted_rows.load(Relaxed)
    }

    /// Rows dropped because their TTL lapsed.
    #[must_use]
    pub fn expired_rows(&self) -> u64 {
        self.expired_rows.load(Relaxed)
    }

    /// Number of binlog flushes performed.
    #[must_use]
    pub fn flush_count(&self) -> u64 {
        self.flush_count.load(Relaxed)
    }

    /// Highest observed total buffer memory in bytes.
    #[must_use]
    pub fn peak_buffer_size(&self) -> u64 {
        self.peak_buffer_size.load(Relaxed)
    }
}

/// Run-scoped state shared between the driver, the mapping workers
/// and the flush scheduler
pub(crate) struct TaskContext<'t> {
    pub(crate) plan: &'t CompactionPlan,
    pub(crate) config: &'t Config,
    pub(crate) store: &'t dyn ObjectStore,
    pub(crate) allocator: &'t dyn IdAllocator,
    pub(crate) buffers: Vec<ClusterBuffer>,
    pub(crate) counters: &'t TaskCounters,
    pub(crate) cancel: Cancellation,

    /// `true` while one drain-the-largest-buffers signal is in flight
    pub(crate) has_signal: AtomicBool,

    /// Mutual exclusion between the final drain and spills
    pub(crate) flush_mutex: Mutex<()>,

    pub(crate) signal_tx: crossbeam_channel::Sender<FlushSignal>,
}

impl TaskContext<'_> {
    /// Surfaces cancellation and the deadline as an error.
    pub(crate) fn check_cancelled(&self) -> crate::Result<()> {
        self.cancel.check()
    }

    pub(crate) fn buffer(&self, bucket: BucketId) -> crate::Result<&ClusterBuffer> {
        self.buffers
            .get(bucket)
            .ok_or_else(|| crate::Error::Internal(format!("bucket {bucket} does not exist")))
    }

    /// Total memory held by all cluster buffers, in-flight flush
    /// snapshots included.
    pub(crate) fn used_memory(&self) -> u64 {
        self.buffers.iter().map(ClusterBuffer::memory_size).sum()
    }

    /// Hands a retired writer to the flush scheduler.
    pub(crate) fn submit_writer(
        &self,
        bucket: BucketId,
        writer: crate::writer::SegmentWriter,
        pack: bool,
    ) -> crate::Result<()> {
        self.send_signal(FlushSignal::Buffer {
            bucket,
            writer,
            pack,
        })
    }

    /// Memory watermark trigger: asks the scheduler to drain the
    /// largest buffers, at most one such signal in flight.
    pub(crate) fn check_memory_trigger(&self) -> crate::Result<()> {
        let used = self.used_memory();
        self.counters.peak_buffer_size.fetch_max(used, AcqRel);

        if used > self.config.high_threshold() && !self.has_signal.swap(true, AcqRel) {
            self.send_signal(FlushSignal::Spill)?;
        }

        Ok(())
    }

    /// Cooperative backpressure: parks the worker until total buffer
    /// memory dropped below the block threshold.
    pub(crate) fn backpressure(&self) -> crate::Result<()> {
        while self.used_memory() > self.config.block_threshold() {
            self.check_cancelled()?;

            log::trace!("Buffer memory above block threshold, backing off");
            std::thread::sleep(self.config.backpressure_interval);
        }

        Ok(())
    }

    fn send_signal(&self, signal: FlushSignal) -> crate::Result<()> {
        self.signal_tx
            .send(signal)
            .map_err(|_| crate::Error::Cancelled("flush scheduler is gone"))
    }

    pub(crate) fn binlog_path(
        &self,
        segment_id: SegmentId,
        field_id: FieldId,
        log_id: u64,
    ) -> String {
        format!(
            "{}/insert_log/{}/{}/{segment_id}/{field_id}/{log_id}",
            self.config.binlog_root, self.plan.collection_id, self.plan.partition_id,
        )
    }

    pub(crate) fn statslog_path(
        &self,
        segment_id: SegmentId,
        field_id: FieldId,
        log_id: u64,
    ) -> String {
        format!(
            "{}/stats_log/{}/{}/{segment_id}/{field_id}/{log_id}",
            self.config.binlog_root, self.plan.collection_id, self.plan.partition_id,
        )
    }
}

/// A single clustering compaction task execution
///
/// Reads the plan's sealed input segments, reorganizes their surviving
/// rows into clustering key buckets, writes bucket-local output
/// segments and publishes a partition stats snapshot.
pub struct ClusteringCompactionTask {
    plan: CompactionPlan,
    config: Config,
    store: Arc<dyn ObjectStore>,
    allocator: Arc<dyn IdAllocator>,
    cancel: Cancellation,
    counters: TaskCounters,
}

impl ClusteringCompactionTask {
    /// Creates a task from its plan and injected collaborators.
    #[must_use]
    pub fn new(
        plan: CompactionPlan,
        config: Config,
        store: Arc<dyn ObjectStore>,
        allocator: Arc<dyn IdAllocator>,
    ) -> Self {
        Self {
            plan,
            config,
            store,
            allocator,
            cancel: Cancellation::default(),
            counters: TaskCounters::default(),
        }
    }

    /// Returns a handle that cancels the task when triggered.
    #[must_use]
    pub fn cancellation(&self) -> Cancellation {
        self.cancel.clone()
    }

    /// Returns the task's progress counters.
    #[must_use]
    pub fn counters(&self) -> &TaskCounters {
        &self.counters
    }

    /// Runs the compaction to completion.
    ///
    /// # Errors
    ///
    /// The first error of any worker aborts the task; partial uploads
    /// are not rolled back (the storage GC reclaims them).
    pub fn run(&self) -> crate::Result<CompactionResult> {
        let start = Instant::now();

        self.plan.validate()?;

        if self.cancel.is_cancelled() {
            return Err(crate::Error::Cancelled("stop signal"));
        }

        let current_ts = time::hybrid_timestamp();
        let deadline = (self.plan.timeout_secs > 0)
            .then(|| start + Duration::from_secs(self.plan.timeout_secs));

        log::info!(
            "Starting clustering compaction plan {} ({} input segments)",
            self.plan.plan_id,
            self.plan.segments.len(),
        );

        let tombstones = TombstoneIndex::build(
            &*self.store,
            &self.plan.segments,
            self.plan.ttl,
            current_ts,
        )?;

        let (classifier, buffers) = if self.plan.is_vector_mode()? {
            planner::vector::plan(&*self.store, &*self.allocator, &self.plan)?
        } else {
            planner::scalar::plan(
                &*self.store,
                &*self.allocator,
                &self.config,
                &self.plan,
                &tombstones,
            )?
        };

        let (signal_tx, signal_rx) = crossbeam_channel::bounded(self.config.signal_capacity);
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        let ctx = TaskContext {
            plan: &self.plan,
            config: &self.config,
            store: &*self.store,
            allocator: &*self.allocator,
            buffers,
            counters: &self.counters,
            cancel: self.cancel.with_deadline(deadline),
            has_signal: AtomicBool::new(false),
            flush_mutex: Mutex::new(()),
            signal_tx,
        };

        std::thread::scope(|scope| -> crate::Result<()> {
            let ctx_ref = &ctx;

            // The scheduler owns the receiving ends: once it exits,
            // senders unblock with an error instead of hanging
            let scheduler = scope.spawn(move || {
                let result = scheduler::run(ctx_ref, signal_rx, done_tx);

                if result.is_err() {
                    ctx_ref.cancel.cancel();
                }

                result
            });

            let mapping_result = mapping::run(&ctx, &classifier, &tombstones);

            match &mapping_result {
                Ok(()) => {
                    let _ = ctx.signal_tx.send(FlushSignal::Done);
                    let _ = done_rx.recv();
                }
                Err(_) => ctx.cancel.cancel(),
            }

            let scheduler_result = scheduler
                .join()
                .map_err(|_| crate::Error::Internal("flush scheduler panicked".into()))?;

            match (mapping_result, scheduler_result) {
                (Ok(()), scheduler_result) => scheduler_result,
                (Err(e), Ok(())) => Err(e),

                // Cancellation is a symptom of the other side's
                // failure, surface the causal error
                (Err(mapping_err), Err(scheduler_err)) => {
                    if matches!(mapping_err, crate::Error::Cancelled(_))
                        && !matches!(scheduler_err, crate::Error::Cancelled(_))
                    {
                        log::error!("Mapping aborted after flush failure: {mapping_err:?}");
                        Err(scheduler_err)
                    } else {
                        if !matches!(scheduler_err, crate::Error::Cancelled(_)) {
                            log::error!("Flush scheduler failed as well: {scheduler_err:?}");
                        }
                        Err(mapping_err)
                    }
                }
            }
        })?;

        flush::flush_all(&ctx)?;

        let (segments, snapshot) = self.collect_outputs(&ctx)?;

        let output_rows = segments.iter().map(|s| s.row_count).sum::<u64>();
        if output_rows != self.counters.written_rows() {
            return Err(crate::Error::Internal(format!(
                "row conservation violated: wrote {} rows, sealed {output_rows}",
                self.counters.written_rows(),
            )));
        }

        self.publish_partition_stats(&snapshot)?;

        log::info!(
            "Plan {} completed in {:?}: {} segments, remained={}, deleted={}, expired={}, flushes={}",
            self.plan.plan_id,
            start.elapsed(),
            segments.len(),
            self.counters.written_rows(),
            self.counters.deleted_rows(),
            self.counters.expired_rows(),
            self.counters.flush_count(),
        );

        Ok(CompactionResult {
            state: CompactionState::Completed,
            plan_id: self.plan.plan_id,
            segments,
            compaction_type: self.plan.compaction_type,
            channel: self.plan.channel.clone(),
        })
    }

    fn collect_outputs(
        &self,
        ctx: &TaskContext<'_>,
    ) -> crate::Result<(Vec<crate::CompactionSegment>, PartitionStatsSnapshot)> {
        let mut segments = Vec::new();

        let mut snapshot = PartitionStatsSnapshot {
            version: self.plan.plan_id,
            ..Default::default()
        };

        for buffer in &ctx.buffers {
            let mut artifacts = buffer.lock_flushed();

            let uploaded = std::mem::take(&mut artifacts.uploaded);

            for segment in uploaded {
                let stats = artifacts
                    .uploaded_stats
                    .remove(&segment.segment_id)
                    .ok_or_else(|| {
                        crate::Error::Internal(format!(
                            "segment {} has no recorded stats",
                            segment.segment_id,
                        ))
                    })?;

                snapshot.segment_stats.insert(
                    segment.segment_id,
                    SegmentStats {
                        field_stats: vec![stats],
                        row_count: segment.row_count,
                    },
                );

                segments.push(segment);
            }
        }

        Ok((segments, snapshot))
    }

    fn publish_partition_stats(&self, snapshot: &PartitionStatsSnapshot) -> crate::Result<()> {
        // Vector plans publish next to the analyze result (a root
        // without a parent publishes at the top level); scalar plans
        // have no analyze root and use the configured prefix
        let root = match self.plan.analyze_root.as_deref() {
            Some(analyze_root) => analyze_root
                .rsplit_once('/')
                .map_or("", |(parent, _)| parent)
                .to_string(),
            None => self.config.stats_root.clone(),
        };

        let path = partition_stats_path(
            &root,
            self.plan.collection_id,
            self.plan.partition_id,
            &self.plan.channel,
            snapshot.version,
        );

        let blob = write_blob(snapshot, self.config.compression)?;
        self.store.upload(&path, blob)?;

        log::debug!("Published partition stats snapshot at {path}");

        Ok(())
    }
}
