//! Background worker bindings.
//!
//! The flush worker drains a capacity-1 wake channel: the write path
//! posts to it with `try_send` when the memtable crosses its threshold,
//! and a signal arriving while one is pending is simply absorbed; the
//! worker sees the current state when it runs. The compaction worker
//! wakes on a periodic tick and attempts one job per tick.

use super::{compaction, flush, Shared};
use crate::error::Result;
use crate::scheduler::{BackgroundTask, Context, Scheduler};

use std::sync::Arc;
use tokio::sync::mpsc;

pub(crate) struct FlushTask {
    shared: Arc<Shared>,
}

#[async_trait::async_trait]
impl BackgroundTask for FlushTask {
    fn name(&self) -> &'static str {
        "memtable-flush"
    }

    async fn execute(&self, _ctx: Context) -> Result<()> {
        flush::flush(&self.shared)
    }
}

pub(crate) struct CompactionTask {
    shared: Arc<Shared>,
}

#[async_trait::async_trait]
impl BackgroundTask for CompactionTask {
    fn name(&self) -> &'static str {
        "compaction"
    }

    async fn execute(&self, _ctx: Context) -> Result<()> {
        compaction::compact(&self.shared)
    }
}

/// Spawns the flush and compaction workers for an engine.
pub(crate) fn start_workers(shared: &Arc<Shared>, flush_rx: mpsc::Receiver<()>) -> Scheduler {
    let scheduler = Scheduler::new();
    scheduler.register_signal(
        Arc::new(FlushTask {
            shared: Arc::clone(shared),
        }),
        flush_rx,
    );
    scheduler.register_interval(
        Arc::new(CompactionTask {
            shared: Arc::clone(shared),
        }),
        shared.config.compaction_interval,
    );
    scheduler
}
