// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::sync::atomic::{AtomicBool, Ordering::Relaxed};

/// Runs `job` over all items with bounded parallelism.
///
/// The first error aborts the pool (remaining queued items are
/// skipped); subsequent errors are logged only.
pub(crate) fn for_each_parallel<T, F>(
    items: Vec<T>,
    parallelism: usize,
    job: F,
) -> crate::Result<()>
where
    T: Send,
    F: Fn(T) -> crate::Result<()> + Sync,
{
    if items.is_empty() {
        return Ok(());
    }

    let parallelism = parallelism.clamp(1, items.len());

    let (tx, rx) = crossbeam_channel::unbounded::<T>();
    for item in items {
        let _ = tx.send(item);
    }
    drop(tx);

    let failed = AtomicBool::new(false);
    let mut first_err = None;

    std::thread::scope(|scope| {
        let handles = (0..parallelism)
            .map(|_| {
                let rx = rx.clone();
                let job = &job;
                let failed = &failed;

                scope.spawn(move || -> crate::Result<()> {
                    while let Ok(item) = rx.recv() {
                        if failed.load(Relaxed) {
                            continue;
                        }

                        if let Err(e) = job(item) {
                            failed.store(true, Relaxed);
                            return Err(e);
                        }
                    }

                    Ok(())
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    } else {
                        log::error!("Worker failed after task was already aborted: {e:?}");
                    }
                }
                Err(_) => {
                    if first_err.is_none() {
                        first_err = Some(crate::Error::Internal("worker panicked".into()));
                    }
                }
            }
        }
    });

    first_err.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use test_log::test;

    #[test]
    fn pool_runs_all_jobs() -> crate::Result<()> {
        let sum = AtomicU64::new(0);

        for_each_parallel((1..=100u64).collect(), 4, |n| {
            sum.fetch_add(n, Relaxed);
            Ok(())
        })?;

        assert_eq!(5_050, sum.load(Relaxed));

        Ok(())
    }

    #[test]
    fn pool_surfaces_first_error() {
        let result = for_each_parallel(vec![1, 2, 3], 1, |n| {
            if n == 2 {
                Err(crate::Error::Internal("boom".into()))
            } else {
                Ok(())
            }
        });

        assert!(matches!(result, Err(crate::Error::Internal(_))));
    }

    #[test]
    fn pool_handles_empty_input() -> crate::Result<()> {
        for_each_parallel(Vec::<u64>::new(), 4, |_| Ok(()))
    }
}
