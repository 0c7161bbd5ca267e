use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::bounded;
use serde::Serialize;

use crate::domain::QueryKey;
use crate::error::EnrichError;
use crate::progress::{Progress, ProgressTracker};

/// Cooperative stop signal: workers stop taking keys once it is set, keys
/// already in flight finish normally.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Outcome of one key, delivered to the caller's thread.
#[derive(Debug)]
pub struct KeyResult<T> {
    pub key: QueryKey,
    pub outcome: T,
    pub progress: Progress,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub total: usize,
    pub processed: usize,
    /// Keys never started because the run was cancelled.
    pub skipped: usize,
}

/// Fixed-size pool of OS threads draining a queue of keys.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self, EnrichError> {
        if workers == 0 {
            return Err(EnrichError::InvalidConfig(
                "worker count must be at least 1".to_string(),
            ));
        }
        Ok(Self { workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `process` once per key on the pool and hands each outcome to
    /// `handle` on the calling thread. Returns after every worker has
    /// finished and the result channel is drained. Results arrive in
    /// completion order, not input order; progress is counted on receipt so
    /// successive results never report a lower count.
    pub fn run<T, F, H>(
        &self,
        keys: &[QueryKey],
        cancel: &CancellationToken,
        process: F,
        mut handle: H,
    ) -> DispatchSummary
    where
        T: Send,
        F: Fn(&QueryKey) -> T + Sync,
        H: FnMut(KeyResult<T>),
    {
        let tracker = ProgressTracker::new(keys.len());
        let capacity = keys.len().max(1);
        let (job_tx, job_rx) = bounded::<&QueryKey>(capacity);
        let (result_tx, result_rx) = bounded::<(&QueryKey, T)>(capacity);

        for key in keys {
            // Capacity covers every key and the receiver is alive.
            let _ = job_tx.send(key);
        }
        drop(job_tx);

        let mut processed = 0usize;
        thread::scope(|scope| {
            for _ in 0..self.workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let process = &process;
                scope.spawn(move || {
                    while let Ok(key) = job_rx.recv() {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let outcome = process(key);
                        if result_tx.send((key, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            for (key, outcome) in result_rx.iter() {
                processed += 1;
                handle(KeyResult {
                    key: key.clone(),
                    outcome,
                    progress: tracker.increment(),
                });
            }
        });

        DispatchSummary {
            total: keys.len(),
            processed,
            skipped: keys.len() - processed,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use assert_matches::assert_matches;

    use super::*;

    fn keys(n: usize) -> Vec<QueryKey> {
        (0..n).map(|i| format!("GENE{i}").parse().unwrap()).collect()
    }

    #[test]
    fn rejects_zero_workers() {
        assert_matches!(WorkerPool::new(0), Err(EnrichError::InvalidConfig(_)));
    }

    #[test]
    fn every_key_processed_exactly_once() {
        for workers in [1, 2, 5, 12] {
            let keys = keys(12);
            let calls = AtomicUsize::new(0);
            let seen = Mutex::new(HashMap::<String, usize>::new());
            let mut last = None;
            let summary = WorkerPool::new(workers).unwrap().run(
                &keys,
                &CancellationToken::new(),
                |key| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    *seen.lock().unwrap().entry(key.to_string()).or_default() += 1;
                    key.as_str().len()
                },
                |result| last = Some(result.progress),
            );
            assert_eq!(calls.load(Ordering::SeqCst), 12);
            let seen = seen.into_inner().unwrap();
            assert_eq!(seen.len(), 12);
            assert!(seen.values().all(|count| *count == 1));
            assert_eq!(summary.processed, 12);
            assert_eq!(summary.skipped, 0);
            assert_eq!(last.map(|p| p.completed), Some(12));
        }
    }

    #[test]
    fn progress_only_moves_forward() {
        let keys = keys(40);
        let mut completed = Vec::new();
        WorkerPool::new(8).unwrap().run(
            &keys,
            &CancellationToken::new(),
            |key| {
                let delay = key.as_str().len() as u64 % 3;
                std::thread::sleep(std::time::Duration::from_millis(delay));
            },
            |result| completed.push(result.progress.completed),
        );
        assert_eq!(completed, (1..=40).collect::<Vec<_>>());
    }

    #[test]
    fn duplicate_keys_are_processed_independently() {
        let keys: Vec<QueryKey> = ["IL6", "IL6"].iter().map(|k| k.parse().unwrap()).collect();
        let mut outcomes = Vec::new();
        WorkerPool::new(2).unwrap().run(
            &keys,
            &CancellationToken::new(),
            |key| key.to_string(),
            |result| outcomes.push(result.outcome),
        );
        assert_eq!(outcomes, vec!["IL6", "IL6"]);
    }

    #[test]
    fn empty_key_list_returns_immediately() {
        let summary = WorkerPool::new(3).unwrap().run(
            &[],
            &CancellationToken::new(),
            |_| (),
            |_| panic!("no results expected"),
        );
        assert_eq!(summary, DispatchSummary::default());
    }

    #[test]
    fn cancellation_stops_new_keys() {
        let keys = keys(10);
        let cancel = CancellationToken::new();
        let summary = WorkerPool::new(1).unwrap().run(
            &keys,
            &cancel,
            |key| {
                if key.as_str() == "GENE0" {
                    cancel.cancel();
                }
            },
            |_| {},
        );
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.skipped, 9);
    }
}
