//! Bounded worker pool for export operations.
//!
//! Each run owns its admission gate: a semaphore sized to the concurrency
//! ceiling. A permit is taken before an item is dispatched and released when
//! the item finishes, whatever the result. Outcomes are funneled through a
//! channel sized to the item count so no worker ever waits on the collector.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::descriptor::Descriptor;
use crate::error::ExportError;

/// Performs the filesystem side effect for one item.
#[async_trait]
pub trait ItemExporter<T>: Send + Sync {
    async fn export(&self, item: &T) -> Result<(), ExportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    Success,
    Failed(String),
}

/// Outcome of one dispatched item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub label: String,
    pub outcome: BackupOutcome,
}

/// Everything a pool run produced.
#[derive(Debug, Clone, Default)]
pub struct PoolRun {
    /// Exactly one entry per dispatched item, in completion order.
    pub outcomes: Vec<ItemOutcome>,
    /// Items left undispatched because the run was cancelled.
    pub not_dispatched: usize,
}

impl PoolRun {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.outcome == BackupOutcome::Success)
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            BackupOutcome::Failed(reason) => Some((o.label.as_str(), reason.as_str())),
            BackupOutcome::Success => None,
        })
    }
}

pub struct WorkerPool {
    gate: Arc<Semaphore>,
    limit: usize,
}

impl WorkerPool {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            gate: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Export every item, at most `limit` at a time.
    ///
    /// `cancel` is checked between dispatches; work already started is left
    /// to finish.
    pub async fn run<T: Descriptor>(
        &self,
        items: Vec<T>,
        exporter: Arc<dyn ItemExporter<T>>,
        cancel: &AtomicBool,
    ) -> PoolRun {
        let total = items.len();
        if total == 0 {
            return PoolRun::default();
        }

        debug!("Dispatching {} items with concurrency {}", total, self.limit);

        let (tx, mut rx) = mpsc::channel::<ItemOutcome>(total);
        let mut dispatched = 0usize;

        for item in items {
            if cancel.load(Ordering::SeqCst) {
                break;
            }

            let Ok(permit) = self.gate.clone().acquire_owned().await else {
                break;
            };

            // Cancellation may have arrived while we were waiting for a slot.
            if cancel.load(Ordering::SeqCst) {
                drop(permit);
                break;
            }

            dispatched += 1;
            let tx = tx.clone();
            let exporter = exporter.clone();

            tokio::spawn(async move {
                let label = item.label();

                let outcome = match AssertUnwindSafe(exporter.export(&item)).catch_unwind().await {
                    Ok(Ok(())) => BackupOutcome::Success,
                    Ok(Err(e)) => {
                        warn!("Backup of {} failed: {}", label, e);
                        BackupOutcome::Failed(e.to_string())
                    }
                    Err(_) => {
                        error!("Worker for {} panicked", label);
                        BackupOutcome::Failed("worker panicked".to_string())
                    }
                };

                drop(permit);
                // Capacity equals the item count, so this never waits.
                let _ = tx.send(ItemOutcome { label, outcome }).await;
            });
        }
        drop(tx);

        let not_dispatched = total - dispatched;
        if not_dispatched > 0 {
            info!("Cancelled: {} of {} items were not dispatched", not_dispatched, total);
        }

        let mut outcomes = Vec::with_capacity(dispatched);
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }

        PoolRun {
            outcomes,
            not_dispatched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::RepositoryDescriptor;
    use quickcheck_macros::quickcheck;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn repos(count: usize) -> Vec<RepositoryDescriptor> {
        (0..count)
            .map(|i| {
                let name = format!("repo-{}", i);
                RepositoryDescriptor::new("alice", &name, &format!("https://github.com/alice/{}.git", name))
            })
            .collect()
    }

    /// Tracks how many exports overlap.
    #[derive(Default)]
    struct CountingExporter {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ItemExporter<RepositoryDescriptor> for CountingExporter {
        async fn export(&self, _item: &RepositoryDescriptor) -> Result<(), ExportError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Fails or panics depending on the repository name.
    struct FlakyExporter;

    #[async_trait]
    impl ItemExporter<RepositoryDescriptor> for FlakyExporter {
        async fn export(&self, item: &RepositoryDescriptor) -> Result<(), ExportError> {
            match item.name.as_deref() {
                Some("repo-1") => Err(ExportError::InvalidDescriptor("broken".to_string())),
                Some("repo-3") => panic!("exporter bug"),
                _ => Ok(()),
            }
        }
    }

    /// Raises the cancellation flag from inside the first export.
    struct CancellingExporter {
        cancel: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ItemExporter<RepositoryDescriptor> for CancellingExporter {
        async fn export(&self, _item: &RepositoryDescriptor) -> Result<(), ExportError> {
            self.cancel.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_never_exceeds_limit() {
        let exporter = Arc::new(CountingExporter::default());
        let pool = WorkerPool::new(3);

        let run = pool
            .run(repos(20), exporter.clone(), &AtomicBool::new(false))
            .await;

        assert_eq!(run.outcomes.len(), 20);
        assert_eq!(run.succeeded(), 20);
        assert_eq!(run.not_dispatched, 0);
        assert_eq!(exporter.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failures_and_panics_keep_one_outcome_per_item() {
        let pool = WorkerPool::new(2);

        let run = pool
            .run(repos(5), Arc::new(FlakyExporter), &AtomicBool::new(false))
            .await;

        assert_eq!(run.outcomes.len(), 5);
        assert_eq!(run.succeeded(), 3);

        let mut failed: Vec<_> = run.failures().map(|(label, _)| label.to_string()).collect();
        failed.sort();
        assert_eq!(failed, vec!["alice/repo-1", "alice/repo-3"]);
    }

    #[tokio::test]
    async fn test_cancellation_stops_dispatch_between_items() {
        let cancel = Arc::new(AtomicBool::new(false));
        let exporter = Arc::new(CancellingExporter {
            cancel: cancel.clone(),
        });
        let pool = WorkerPool::new(1);

        let run = pool.run(repos(4), exporter, &cancel).await;

        assert_eq!(run.outcomes.len(), 1);
        assert_eq!(run.not_dispatched, 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_dispatches_nothing() {
        let pool = WorkerPool::new(4);
        let run = pool
            .run(repos(3), Arc::new(FlakyExporter), &AtomicBool::new(true))
            .await;

        assert!(run.outcomes.is_empty());
        assert_eq!(run.not_dispatched, 3);
    }

    #[tokio::test]
    async fn test_empty_input_and_zero_limit() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.limit(), 1);

        let run = pool
            .run(Vec::new(), Arc::new(FlakyExporter), &AtomicBool::new(false))
            .await;
        assert!(run.outcomes.is_empty());
        assert_eq!(run.not_dispatched, 0);
    }

    #[quickcheck]
    fn prop_outcome_count_matches_and_ceiling_holds(count: u8, limit: u8) -> bool {
        let count = (count % 40) as usize;
        let limit = (limit % 8) as usize + 1;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        runtime.block_on(async {
            let exporter = Arc::new(CountingExporter::default());
            let run = WorkerPool::new(limit)
                .run(repos(count), exporter.clone(), &AtomicBool::new(false))
                .await;

            run.outcomes.len() == count && exporter.peak.load(Ordering::SeqCst) <= limit
        })
    }
}
