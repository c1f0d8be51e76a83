use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};

/// Default number of pool workers per process.
pub const DEFAULT_POOL_WORKERS: usize = 10;

const QUEUE_DEPTH: usize = 1024;

/// A unit of work produced by a handler or a do-list item.
pub type Command = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Bounded worker pool draining a shared command queue.
///
/// Handlers and the do-list enqueue commands here instead of running them
/// inline; a fixed set of workers executes them. Enqueueing applies
/// backpressure once the queue is full.
pub struct CommandPool {
    tx: mpsc::Sender<Command>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl CommandPool {
    pub fn new(worker_count: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<Command>(QUEUE_DEPTH);
        let rx = Arc::new(Mutex::new(rx));
        let (shutdown_tx, _) = watch::channel(false);

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let rx = rx.clone();
            let shutdown_rx = shutdown_tx.subscribe();
            workers.push(tokio::spawn(async move {
                Self::worker_loop(worker_id, rx, shutdown_rx).await;
            }));
        }

        tracing::debug!("Command pool started with {} workers", worker_count);

        Arc::new(Self {
            tx,
            shutdown_tx,
            workers: Mutex::new(workers),
        })
    }

    async fn worker_loop(
        worker_id: usize,
        rx: Arc<Mutex<mpsc::Receiver<Command>>>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            let cmd = {
                let mut guard = rx.lock().await;
                tokio::select! {
                    cmd = guard.recv() => cmd,
                    _ = shutdown_rx.changed() => None,
                }
            };

            match cmd {
                Some(cmd) => cmd.await,
                None => {
                    tracing::debug!("Pool worker {} stopping", worker_id);
                    break;
                }
            }
        }
    }

    /// Queues a command for execution. Returns `false` if the pool has shut
    /// down.
    pub async fn enqueue(&self, cmd: Command) -> bool {
        if self.tx.send(cmd).await.is_err() {
            tracing::warn!("Command dropped: pool is shut down");
            return false;
        }
        true
    }

    /// Stops the workers and waits for the one in flight on each to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }
    }
}
