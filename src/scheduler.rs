// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{flush, task::TaskContext, value::BucketId, writer::SegmentWriter};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::{sync::atomic::Ordering::Release, time::Duration};

/// A flush request sent from the mapping workers to the scheduler
pub(crate) enum FlushSignal {
    /// Drain this snapshot of a specific buffer; with `pack`, seal its
    /// open output segment afterwards
    Buffer {
        bucket: BucketId,
        writer: SegmentWriter,
        pack: bool,
    },

    /// Drain the largest buffers until memory drops below the
    /// low watermark
    Spill,

    /// Mapping is finished, stop accepting new signals
    Done,
}

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The single flush consumer: receives signals, dispatches drains and
/// acknowledges task completion.
///
/// Owns the receiving ends so that producers unblock with an error
/// once the scheduler exits.
pub(crate) fn run(
    ctx: &TaskContext<'_>,
    signal_rx: Receiver<FlushSignal>,
    done_tx: Sender<()>,
) -> crate::Result<()> {
    log::debug!("Flush scheduler started");

    loop {
        // On cancellation, exit without flushing
        ctx.check_cancelled()?;

        match signal_rx.recv_timeout(POLL_INTERVAL) {
            Ok(FlushSignal::Buffer {
                bucket,
                writer,
                pack,
            }) => {
                flush::flush_binlog(ctx, ctx.buffer(bucket)?, writer, pack)?;
            }

            Ok(FlushSignal::Spill) => {
                let result = flush::flush_largest_buffers(ctx);
                ctx.has_signal.store(false, Release);
                result?;
            }

            Ok(FlushSignal::Done) => {
                log::debug!("Mapping finished, flush scheduler shutting down");
                let _ = done_tx.send(());
                return Ok(());
            }

            Err(RecvTimeoutError::Timeout) => {}

            Err(RecvTimeoutError::Disconnected) => {
                return Ok(());
            }
        }
    }
}
