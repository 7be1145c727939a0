// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Lifecycle controller owning the single flush worker.
//!
//! ## State machine
//!
//! ```text
//!            start()              stop()               queue empty,
//! Stopped ───────────► Running ───────────► Draining ──worker joined──► Stopped
//!    ▲                                                                    │
//!    └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! While `Running`, the worker loops over plan + write cycles. Cycles that
//! have nothing to flush sleep for `poll_interval`, and the sleep ends early
//! on cancellation. `stop` cancels the worker, which from then on flushes
//! regardless of `min_batch_count`. Once `stop` has seen the queue empty it
//! signals `drained`; the worker exits at the next empty queue after that,
//! so records enqueued during the drain are still flushed.
//!
//! ```text
//! cancel  ──► worker flushes with shutdown=true, keeps cycling
//! drained ──► worker exits as soon as the queue is empty
//! ```

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use snafu::{ResultExt, ensure};
use tokio::{sync::Mutex as AsyncMutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::SpoolConfig,
    error::{FlushErrorKind, InvalidStateSnafu, NoRuntimeSnafu, Result},
    metrics::CYCLE_FAILURES,
    partition::PartitionResolver,
    planner::BatchPlanner,
    queue::{BacklogMonitor, RecordQueue},
    record::Record,
    store::AppendStore,
    writer::{BatchWriter, WriteOutcome},
};

/// Lifecycle of a [`Spool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum LifecycleState {
    Stopped,
    Running,
    Draining,
}

/// Result of a single plan + write cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing was eligible; the worker sleeps before the next cycle.
    Idle,
    Flushed(WriteOutcome),
}

/// State carried from one cycle to the next: the window boundary and the
/// cached partition target. Only one holder (the worker, or an inline
/// [`Spool::flush_once`]) may drive it at a time.
struct FlushCycle {
    queue:    Arc<RecordQueue>,
    planner:  BatchPlanner,
    resolver: PartitionResolver,
    writer:   BatchWriter,
}

impl FlushCycle {
    async fn run(&mut self, shutdown: bool) -> Result<CycleOutcome> {
        if self
            .planner
            .should_defer(self.queue.len(), Utc::now(), shutdown)
        {
            return Ok(CycleOutcome::Idle);
        }

        let front = self.queue.peek(self.planner.max_batch_count());
        let Some(plan) = self.planner.plan(&front) else {
            return Ok(CycleOutcome::Idle);
        };
        if plan.boundary_reset {
            self.resolver.invalidate();
        }

        let outcome = self
            .writer
            .write(&self.queue, &mut self.resolver, &plan, &front)
            .await?;
        Ok(CycleOutcome::Flushed(outcome))
    }
}

struct Lifecycle {
    state:   LifecycleState,
    cancel:  Option<CancellationToken>,
    drained: Option<CancellationToken>,
    worker:  Option<JoinHandle<()>>,
}

/// Buffers producer records and persists them in batches to time-partitioned
/// append-only storage.
///
/// `enqueue` may be called from any number of threads and never blocks on
/// storage I/O. All writes are issued by one background worker, strictly in
/// enqueue order.
pub struct Spool {
    config:    SpoolConfig,
    queue:     Arc<RecordQueue>,
    backlog:   BacklogMonitor,
    cycle:     Arc<AsyncMutex<FlushCycle>>,
    lifecycle: Mutex<Lifecycle>,
}

impl Spool {
    pub fn new(config: SpoolConfig, store: Arc<dyn AppendStore>) -> Self {
        let queue = Arc::new(RecordQueue::new());
        let cycle = FlushCycle {
            queue:    Arc::clone(&queue),
            planner:  BatchPlanner::new(&config),
            resolver: PartitionResolver::new(store, config.content_meta()),
            writer:   BatchWriter::new(&config),
        };

        Self {
            backlog: BacklogMonitor::new(
                config.backlog_warn_threshold,
                config.backlog_warn_interval,
            ),
            config,
            queue,
            cycle: Arc::new(AsyncMutex::new(cycle)),
            lifecycle: Mutex::new(Lifecycle {
                state:   LifecycleState::Stopped,
                cancel:  None,
                drained: None,
                worker:  None,
            }),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SpoolConfig { &self.config }

    #[must_use]
    pub fn state(&self) -> LifecycleState { self.lifecycle.lock().state }

    /// Number of records waiting to be persisted.
    #[must_use]
    pub fn len(&self) -> usize { self.queue.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.queue.is_empty() }

    /// Buffer `payload`, stamped with the current time, and return the queue
    /// length after the insert.
    pub fn enqueue(&self, payload: impl Into<Bytes>) -> usize {
        self.enqueue_record(Record::now(payload))
    }

    /// Buffer a record that already carries its timestamp, e.g. one replayed
    /// from a source that stamps records itself.
    pub fn enqueue_record(&self, record: Record) -> usize {
        let len = self.queue.push(record);
        self.backlog.observe(len, || self.state());
        len
    }

    /// Spawn the flush worker on the current tokio runtime. Calling `start`
    /// on a running spool is a no-op.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().context(NoRuntimeSnafu)?;

        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            LifecycleState::Running => {
                debug!("Flush worker already running");
                return Ok(());
            }
            LifecycleState::Draining => {
                return InvalidStateSnafu {
                    state: lifecycle.state,
                }
                .fail();
            }
            LifecycleState::Stopped => {}
        }

        let cancel = CancellationToken::new();
        let drained = CancellationToken::new();
        let worker = runtime.spawn(run_worker(
            Arc::clone(&self.cycle),
            cancel.clone(),
            drained.clone(),
            self.config.poll_interval,
        ));

        lifecycle.state = LifecycleState::Running;
        lifecycle.cancel = Some(cancel);
        lifecycle.drained = Some(drained);
        lifecycle.worker = Some(worker);
        info!(
            component = "spool",
            operation = "start",
            pending = self.queue.len(),
            "Flush worker started"
        );
        Ok(())
    }

    /// Cancel the worker, wait until every buffered record is persisted,
    /// then join the worker. Calling `stop` on a spool that is not running
    /// returns immediately.
    ///
    /// Records enqueued while `stop` is waiting are flushed before the
    /// worker exits.
    pub async fn stop(&self) {
        let (cancel, drained, worker) = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != LifecycleState::Running {
                debug!(state = %lifecycle.state, "Flush worker not running, nothing to stop");
                return;
            }
            lifecycle.state = LifecycleState::Draining;
            (
                lifecycle.cancel.take(),
                lifecycle.drained.take(),
                lifecycle.worker.take(),
            )
        };

        info!(
            component = "spool",
            operation = "stop",
            pending = self.queue.len(),
            "Draining record queue"
        );
        if let Some(cancel) = &cancel {
            cancel.cancel();
        }

        while !self.queue.is_empty() {
            tokio::time::sleep(self.config.drain_poll_interval).await;
            debug!(pending = self.queue.len(), "Waiting for queue to drain");
        }
        if let Some(drained) = &drained {
            drained.cancel();
        }

        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            error!(component = "spool", operation = "stop", error = ?e, "Flush worker terminated abnormally");
        }

        self.lifecycle.lock().state = LifecycleState::Stopped;
        info!(component = "spool", operation = "stop", "Flush worker stopped");
    }

    /// Run one plan + write cycle on the calling task.
    ///
    /// Only allowed while the background worker is stopped. `shutdown`
    /// disables the small-batch deferral, as during a drain.
    pub async fn flush_once(&self, shutdown: bool) -> Result<CycleOutcome> {
        let state = self.state();
        ensure!(state == LifecycleState::Stopped, InvalidStateSnafu { state });

        let Ok(mut cycle) = self.cycle.try_lock() else {
            return InvalidStateSnafu {
                state: LifecycleState::Running,
            }
            .fail();
        };
        cycle.run(shutdown).await
    }
}

impl Drop for Spool {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle.get_mut();
        if let Some(cancel) = lifecycle.cancel.take() {
            cancel.cancel();
            if let Some(drained) = lifecycle.drained.take() {
                drained.cancel();
            }
            error!(
                component = "spool",
                pending = self.queue.len(),
                "Spool dropped without stop, the worker keeps draining in the background"
            );
        }
    }
}

async fn run_worker(
    cycle: Arc<AsyncMutex<FlushCycle>>,
    cancel: CancellationToken,
    drained: CancellationToken,
    poll_interval: Duration,
) {
    let mut cycle = cycle.lock_owned().await;
    debug!("Flush worker loop entered");

    loop {
        if drained.is_cancelled() && cycle.queue.is_empty() {
            break;
        }
        let shutdown = cancel.is_cancelled();

        match AssertUnwindSafe(cycle.run(shutdown)).catch_unwind().await {
            Ok(Ok(CycleOutcome::Flushed(_))) => {}
            Ok(Ok(CycleOutcome::Idle)) => {
                // Once cancelled, only the end of the drain cuts the sleep short.
                let wake = if shutdown { &drained } else { &cancel };
                tokio::select! {
                    () = tokio::time::sleep(poll_interval) => {}
                    () = wake.cancelled() => {}
                }
            }
            Ok(Err(e)) if e.kind() == FlushErrorKind::SizeExceeded => {
                CYCLE_FAILURES.inc();
                error!(component = "spool", operation = "flush", error = %e, "Dropped oversized record");
            }
            Ok(Err(e)) => {
                CYCLE_FAILURES.inc();
                warn!(
                    component = "spool",
                    operation = "flush",
                    kind = %e.kind(),
                    error = ?e,
                    "Flush cycle failed, retrying after poll interval"
                );
                tokio::time::sleep(poll_interval).await;
            }
            Err(_) => {
                CYCLE_FAILURES.inc();
                error!(component = "spool", operation = "flush", "Flush cycle panicked, retrying after poll interval");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }

    debug!("Flush worker loop exited");
}
