use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::blob::BlobStore;
use crate::domain::ObjectKey;
use crate::error::{ErrorKind, HarvestError};
use crate::guard::{CancelToken, ConcurrencyGuard};
use crate::store::TargetDir;
use crate::task::{RetrievalOutcome, RetrievalTask};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
    pub failed: bool,
}

/// Receives one event per finished retrieval, from worker threads.
pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedRetrieval {
    pub key: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub bytes: u64,
    pub elapsed_secs: f64,
    pub failures: Vec<FailedRetrieval>,
}

impl BatchResult {
    pub fn from_outcomes(outcomes: Vec<RetrievalOutcome>, elapsed: Duration) -> Self {
        let total = outcomes.len();
        let mut bytes = 0u64;
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome.error {
                None => bytes += outcome.bytes,
                Some(err) => failures.push(FailedRetrieval {
                    key: outcome.key.to_string(),
                    kind: err.kind(),
                    message: err.to_string(),
                }),
            }
        }
        Self {
            total,
            succeeded: total - failures.len(),
            failed: failures.len(),
            bytes,
            elapsed_secs: elapsed.as_secs_f64(),
            failures,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Fans a key list out to worker threads, at most `guard.capacity()` at a time.
pub struct BatchCoordinator<B: BlobStore> {
    store: B,
    target: TargetDir,
    cancel: CancelToken,
}

impl<B: BlobStore> BatchCoordinator<B> {
    pub fn new(store: B, target: TargetDir) -> Self {
        Self::with_cancel(store, target, CancelToken::new())
    }

    pub fn with_cancel(store: B, target: TargetDir, cancel: CancelToken) -> Self {
        Self {
            store,
            target,
            cancel,
        }
    }

    /// Handle that stops admission and in-flight transfers of this coordinator.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn target(&self) -> &TargetDir {
        &self.target
    }

    /// Returns once every key has a terminal outcome and every token is back.
    pub fn run(
        &self,
        keys: &[ObjectKey],
        guard: &ConcurrencyGuard,
        sink: &dyn ProgressSink,
    ) -> Result<BatchResult, HarvestError> {
        let started = Instant::now();
        if keys.is_empty() {
            return Ok(BatchResult::from_outcomes(Vec::new(), started.elapsed()));
        }
        self.target.ensure()?;
        tracing::info!(
            total = keys.len(),
            concurrency = guard.capacity(),
            target = %self.target.root(),
            "starting batch"
        );

        let (tx, rx) = mpsc::channel::<RetrievalOutcome>();
        thread::scope(|scope| {
            for (index, key) in keys.iter().enumerate() {
                let Some(token) = guard.acquire(&self.cancel) else {
                    let outcome = RetrievalOutcome::failed(
                        key.clone(),
                        self.target.file_path(key.file_name()),
                        HarvestError::Cancelled,
                    );
                    report(sink, &outcome, started);
                    let _ = tx.send(outcome);
                    continue;
                };

                let task = RetrievalTask::new(key.clone(), token);
                let worker_tx = tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("retrieve-{index}"))
                    .spawn_scoped(scope, move || {
                        let outcome = task.run(&self.store, &self.target, &self.cancel);
                        report(sink, &outcome, started);
                        let _ = worker_tx.send(outcome);
                    });
                // On failure the closure, and with it the token, has already been dropped.
                if let Err(err) = spawned {
                    let outcome = RetrievalOutcome::failed(
                        key.clone(),
                        self.target.file_path(key.file_name()),
                        HarvestError::Spawn(err.to_string()),
                    );
                    report(sink, &outcome, started);
                    let _ = tx.send(outcome);
                }
            }
        });
        drop(tx);

        let outcomes = rx.into_iter().collect::<Vec<_>>();
        let result = BatchResult::from_outcomes(outcomes, started.elapsed());
        tracing::info!(
            total = result.total,
            succeeded = result.succeeded,
            failed = result.failed,
            elapsed_secs = result.elapsed_secs,
            "batch finished"
        );
        Ok(result)
    }
}

/// Single entry point: dispatch `keys` into `target` with at most
/// `concurrency` retrievals in flight.
pub fn run_batch<B: BlobStore>(
    keys: &[ObjectKey],
    target: TargetDir,
    concurrency: usize,
    store: B,
    sink: &dyn ProgressSink,
) -> Result<BatchResult, HarvestError> {
    let guard = ConcurrencyGuard::new(concurrency)?;
    BatchCoordinator::new(store, target).run(keys, &guard, sink)
}

fn report(sink: &dyn ProgressSink, outcome: &RetrievalOutcome, started: Instant) {
    let (message, failed) = match &outcome.error {
        None => (
            format!("downloaded {} {} bytes", outcome.local_path, outcome.bytes),
            false,
        ),
        Some(err) => {
            tracing::warn!(key = %outcome.key, "retrieval failed: {err}");
            (format!("unable to download {}: {err}", outcome.key), true)
        }
    };
    sink.event(ProgressEvent {
        message,
        elapsed: Some(started.elapsed()),
        failed,
    });
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    struct NullSink;

    impl ProgressSink for NullSink {
        fn event(&self, _event: ProgressEvent) {}
    }

    struct EchoStore;

    impl BlobStore for EchoStore {
        fn fetch(
            &self,
            key: &ObjectKey,
            sink: &mut dyn Write,
            _cancel: &CancelToken,
        ) -> Result<u64, HarvestError> {
            sink.write_all(key.as_str().as_bytes())
                .map_err(|err| HarvestError::BlobTransfer(err.to_string()))?;
            Ok(key.as_str().len() as u64)
        }
    }

    #[test]
    fn empty_batch_returns_immediately() {
        let target = TargetDir::new("never-created");
        let result = run_batch(&[], target, 4, EchoStore, &NullSink).unwrap();
        assert_eq!((result.total, result.succeeded, result.failed), (0, 0, 0));
        assert!(!std::path::Path::new("never-created").exists());
    }

    #[test]
    fn counts_bytes_of_successes() {
        let temp = tempfile::tempdir().unwrap();
        let target = TargetDir::from_path_buf(temp.path().to_path_buf()).unwrap();
        let keys = vec![ObjectKey::new("a/one.wav"), ObjectKey::new("b/two.wav")];
        let result = run_batch(&keys, target, 1, EchoStore, &NullSink).unwrap();
        assert_eq!(result.succeeded, 2);
        assert_eq!(result.bytes, ("a/one.wav".len() + "b/two.wav".len()) as u64);
        assert!(result.is_complete());
    }
}
