//! Scoped worker pools and channel helpers shared by the pipeline and the
//! chunk storages.

use crate::{Result, TesseraError};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Receiver end of a bounded channel that several workers drain concurrently.
pub struct SharedReceiver<T> {
    inner: Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for SharedReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> SharedReceiver<T> {
    pub fn new(receiver: mpsc::Receiver<T>) -> Self {
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(receiver)),
        }
    }

    /// `None` once the channel is closed and drained, or the token is cancelled.
    pub async fn recv(&self, cancel: &CancellationToken) -> Option<T> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            item = async { self.inner.lock().await.recv().await } => item,
        }
    }
}

/// Sends `item`, giving up when the token is cancelled or the receiver is gone.
/// Returns `false` when the caller should stop producing.
pub async fn send_or_cancel<T>(
    sender: &mpsc::Sender<T>,
    item: T,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = sender.send(item) => sent.is_ok(),
    }
}

/// Runs `operation` unless the token is cancelled first.
pub async fn cancellable<F, T>(cancel: &CancellationToken, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TesseraError::Cancelled),
        result = operation => result,
    }
}

/// Feeds `items` into a fresh bounded channel from a worker of `group`.
pub fn spawn_feeder<T, I>(group: &mut WorkerGroup, items: I, capacity: usize) -> SharedReceiver<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = T> + Send + 'static,
    I::IntoIter: Send,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let cancel = group.token();
    group.spawn(async move {
        for item in items {
            if !send_or_cancel(&tx, item, &cancel).await {
                break;
            }
        }
        Ok(())
    });
    SharedReceiver::new(rx)
}

/// A scoped set of workers sharing one cancellation token.
///
/// The first worker error is kept and cancels the token; later errors are
/// dropped. Workers that observe cancellation are expected to return `Ok(())`.
/// Dropping the group cancels the token and aborts whatever is still running,
/// so no worker outlives the call that created it.
pub struct WorkerGroup {
    tasks: JoinSet<()>,
    token: CancellationToken,
    error: Arc<Mutex<Option<TesseraError>>>,
}

impl WorkerGroup {
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            token: parent.child_token(),
            error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn spawn<F>(&mut self, worker: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let token = self.token.clone();
        let error = self.error.clone();
        self.tasks.spawn(async move {
            if let Err(err) = worker.await {
                record_error(&error, err);
                token.cancel();
            }
        });
    }

    /// Records `err` as if a worker had failed with it.
    pub fn fail(&self, err: TesseraError) {
        record_error(&self.error, err);
        self.token.cancel();
    }

    /// Stops all workers without recording an error.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Waits for every worker and returns the first recorded error.
    pub async fn wait(&mut self) -> Result<()> {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(join_err) = joined {
                if join_err.is_panic() {
                    self.fail(TesseraError::internal("TASK", join_err));
                }
            }
        }
        let first = self.error.lock().ok().and_then(|mut slot| slot.take());
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for WorkerGroup {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn record_error(slot: &Mutex<Option<TesseraError>>, err: TesseraError) {
    if let Ok(mut slot) = slot.lock() {
        if slot.is_none() {
            *slot = Some(err);
        } else {
            tracing::debug!("dropping subsequent worker error. error={}", err);
        }
    }
}

/// Logical CPU count, the default worker pool size.
pub fn default_job_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_error_wins() {
        let parent = CancellationToken::new();
        let mut group = WorkerGroup::new(&parent);

        group.spawn(async { Err(TesseraError::ShardsUnavailable) });
        let token = group.token();
        group.spawn(async move {
            token.cancelled().await;
            Err(TesseraError::Timeout)
        });

        let result = group.wait().await;
        assert!(matches!(result, Err(TesseraError::ShardsUnavailable)));
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_workers() {
        let parent = CancellationToken::new();
        let mut group = WorkerGroup::new(&parent);
        let finished = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let token = group.token();
            let finished = finished.clone();
            group.spawn(async move {
                token.cancelled().await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        parent.cancel();
        group.wait().await.unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_drop_aborts_workers() {
        let parent = CancellationToken::new();
        let marker = Arc::new(());
        {
            let mut group = WorkerGroup::new(&parent);
            let marker = marker.clone();
            group.spawn(async move {
                let _marker = marker;
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            });
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[tokio::test]
    async fn test_shared_receiver_drains_in_order() {
        let parent = CancellationToken::new();
        let mut group = WorkerGroup::new(&parent);
        let rx = spawn_feeder(&mut group, 0..10usize, 2);

        let token = group.token();
        let mut received = Vec::new();
        while let Some(item) = rx.recv(&token).await {
            received.push(item);
        }
        group.wait().await.unwrap();
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }
}
