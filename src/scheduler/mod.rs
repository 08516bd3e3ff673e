//! Background task scheduling with graceful shutdown.
//!
//! The engine runs two long-lived workers: a flush worker woken through a
//! capacity-1 signal channel, and a compaction worker driven by a periodic
//! tick. Both are expressed as [`BackgroundTask`] implementations and
//! registered on a [`Scheduler`], which owns their join handles and a
//! broadcast shutdown channel. Task errors are logged and never kill the
//! worker loop.

use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::error::Result;

/// Context provided to background tasks during execution.
pub struct Context {
    pub task_name: &'static str,
    pub run_id: u64,
}

/// A unit of background work executed by the scheduler.
#[async_trait::async_trait]
pub trait BackgroundTask: Send + Sync {
    /// Task name for logging.
    fn name(&self) -> &'static str;

    /// Execute one run of the task.
    async fn execute(&self, ctx: Context) -> Result<()>;
}

/// Owns worker loops and shuts them down together.
pub struct Scheduler {
    tasks: RwLock<Vec<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            tasks: RwLock::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Register a task executed on a fixed period.
    pub fn register_interval<T: BackgroundTask + 'static>(
        &self,
        task: Arc<T>,
        period: Duration,
    ) -> &Self {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut run_id = 0u64;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_id += 1;
                        run(&*task, run_id).await;
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!(task = task.name(), "task shutting down");
                        break;
                    }
                }
            }
        });
        self.tasks.write().unwrap().push(handle);
        self
    }

    /// Register a task executed once per wake signal. The loop exits when
    /// every sender is dropped or on shutdown.
    pub fn register_signal<T: BackgroundTask + 'static>(
        &self,
        task: Arc<T>,
        mut signal: mpsc::Receiver<()>,
    ) -> &Self {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut run_id = 0u64;

            loop {
                tokio::select! {
                    wake = signal.recv() => {
                        match wake {
                            Some(()) => {
                                run_id += 1;
                                run(&*task, run_id).await;
                            }
                            None => break,
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!(task = task.name(), "task shutting down");
                        break;
                    }
                }
            }
        });
        self.tasks.write().unwrap().push(handle);
        self
    }

    /// Signal every worker to stop and wait for them.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown_tx.send(()).ok();

        let handles: Vec<_> = self.tasks.write().unwrap().drain(..).collect();
        for handle in handles {
            handle.await?;
        }
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run<T: BackgroundTask + ?Sized>(task: &T, run_id: u64) {
    let ctx = Context {
        task_name: task.name(),
        run_id,
    };
    if let Err(err) = task.execute(ctx).await {
        tracing::error!(task = task.name(), error = %err, "task execution failed");
    }
}
