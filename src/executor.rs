//! Ordered single-worker task execution.
//!
//! Provider callbacks must never block on application code, so user-facing
//! work is handed to a [`SerialExecutor`]: an mpsc task channel drained by
//! one worker task. Tasks run strictly in submission order and never
//! concurrently. Shutdown closes the channel, lets queued tasks finish,
//! and then stops the worker.

use std::sync::Mutex;

use futures::future::BoxFuture;
use log::trace;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

type Task = BoxFuture<'static, ()>;

pub(crate) struct SerialExecutor {
    name: String,
    tx: mpsc::UnboundedSender<Task>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SerialExecutor {
    /// Spawn the worker task. `name` only labels log output.
    pub(crate) fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(run_worker(name.clone(), rx, shutdown.clone()));
        Self {
            name,
            tx,
            shutdown,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a task behind everything submitted before it. Returns `false`
    /// once the executor has shut down.
    pub(crate) fn execute<F>(&self, task: F) -> bool
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tx.send(Box::pin(task)).is_ok()
    }

    /// Stop accepting tasks, run everything already queued, and wait for
    /// the worker to exit.
    pub(crate) async fn shutdown(&self) {
        self.shutdown.cancel();
        let worker = self.worker.lock().expect("executor worker poisoned").take();
        if let Some(worker) = worker {
            if worker.await.is_err() {
                log::warn!("executor worker panicked during shutdown: name={}", self.name);
            }
        }
    }

    /// Signal shutdown without waiting for queued tasks. Used by session
    /// dispatchers whose pending work must not delay connection teardown.
    pub(crate) fn shutdown_detached(&self) {
        self.shutdown.cancel();
        if let Some(worker) = self.worker.lock().expect("executor worker poisoned").take() {
            drop(worker);
        }
    }
}

async fn run_worker(
    name: String,
    mut rx: mpsc::UnboundedReceiver<Task>,
    shutdown: CancellationToken,
) {
    let mut draining = false;
    loop {
        tokio::select! {
            biased;

            () = shutdown.cancelled(), if !draining => {
                // Stop accepting new tasks but run everything already queued.
                rx.close();
                draining = true;
            }
            task = rx.recv() => match task {
                Some(task) => task.await,
                None => break,
            },
        }
    }
    trace!("executor drained: name={name}");
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[tokio::test]
    async fn tasks_run_in_submission_order() {
        let executor = SerialExecutor::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for index in 0..100 {
            let seen = Arc::clone(&seen);
            assert!(executor.execute(async move {
                seen.lock().expect("seen poisoned").push(index);
            }));
        }
        executor.shutdown().await;
        let seen = seen.lock().expect("seen poisoned");
        assert_eq!(*seen, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn shutdown_completes_pending_tasks_first() {
        let executor = SerialExecutor::new("test");
        let completed = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let completed = Arc::clone(&completed);
            executor.execute(async move {
                tokio::task::yield_now().await;
                completed.fetch_add(1, Ordering::SeqCst);
            });
        }
        executor.shutdown().await;
        assert_eq!(completed.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn execute_after_shutdown_is_refused() {
        let executor = SerialExecutor::new("test");
        executor.shutdown().await;
        assert!(!executor.execute(async {}));
    }
}
