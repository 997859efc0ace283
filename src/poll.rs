//! Fixed-interval polling sessions.
//!
//! A [`PollSession`] owns at most one live polling loop at a time. Starting
//! a new target always cancels the previous loop before the new one is
//! spawned, and every way a loop can end (terminal status, quiet history,
//! poll error, explicit stop, replacement) runs through the same two
//! mechanisms: the loop breaks after publishing a terminal update, or the
//! task is aborted. There is no path that leaves a timer ticking.
//!
//! Subscribers watch a session through [`PollWatcher`]. The channel keeps
//! only the latest update, so a slow consumer sees the current state rather
//! than a backlog, which is the last-writer-wins behavior of a status
//! display.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::client::{PortalBackend, PortalError};
use crate::protocol::{HistoryPage, SimulationKind, TaskId, TaskState};

/// Fixed delay between status checks unless configured otherwise.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);

/// What a polling session is watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollTarget {
    /// One task by id. `kind` picks the result renderer on success and is
    /// `None` when the id came from outside a tracked submission.
    Task {
        task_id: TaskId,
        kind: Option<SimulationKind>,
    },
    /// One page of the run history, re-fetched whole each interval.
    History { page: Option<u32> },
}

/// One observed step of a polling session.
#[derive(Debug, Clone)]
pub enum PollUpdate {
    /// Session spawned; the first check is one interval away.
    Started { target: PollTarget },
    /// Non-terminal task status; polling continues.
    TaskPending { task_id: TaskId, state: TaskState },
    /// Task reached SUCCESS; `result` is the simulation payload.
    TaskSucceeded {
        task_id: TaskId,
        kind: Option<SimulationKind>,
        result: Value,
    },
    /// Task reached FAILURE; `detail` is the backend-supplied description.
    TaskFailed { task_id: TaskId, detail: String },
    /// Fresh history snapshot; polling continues only while runs are pending.
    History(HistoryPage),
    /// A status check itself failed; the session stops rather than retry
    /// blindly against a broken portal.
    PollError { target: PollTarget, message: String },
}

impl PollUpdate {
    /// True when this update ends its session.
    pub fn is_terminal(&self) -> bool {
        match self {
            PollUpdate::Started { .. } | PollUpdate::TaskPending { .. } => false,
            PollUpdate::TaskSucceeded { .. }
            | PollUpdate::TaskFailed { .. }
            | PollUpdate::PollError { .. } => true,
            PollUpdate::History(page) => !page.has_pending(),
        }
    }
}

/// Subscriber side of one polling session.
#[derive(Debug, Clone)]
pub struct PollWatcher {
    rx: watch::Receiver<PollUpdate>,
}

impl PollWatcher {
    /// Waits for the next update. Returns `None` once the session is gone
    /// (stopped, replaced, or already past its terminal update).
    pub async fn next(&mut self) -> Option<PollUpdate> {
        match self.rx.changed().await {
            Ok(()) => Some(self.rx.borrow_and_update().clone()),
            Err(_) => None,
        }
    }

    /// Latest update without waiting.
    pub fn current(&self) -> PollUpdate {
        self.rx.borrow().clone()
    }
}

struct ActivePoll {
    generation: u64,
    target: PollTarget,
    handle: JoinHandle<()>,
    rx: watch::Receiver<PollUpdate>,
}

impl ActivePoll {
    /// Live means the loop still has checks ahead of it. A finished task or
    /// a published terminal update both count as dead.
    fn is_live(&self) -> bool {
        !self.handle.is_finished() && !self.rx.borrow().is_terminal()
    }
}

/// Owner of at most one polling loop.
///
/// Session generations are strictly ordered: `start` on a new target bumps
/// the generation after aborting the old loop, so an update from a stale
/// loop can never reach a current watcher (its channel died with it).
pub struct PollSession {
    backend: Arc<dyn PortalBackend>,
    interval: Duration,
    generation: u64,
    active: Option<ActivePoll>,
}

impl PollSession {
    pub fn new(backend: Arc<dyn PortalBackend>) -> Self {
        Self::with_interval(backend, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_interval(backend: Arc<dyn PortalBackend>, interval: Duration) -> Self {
        Self {
            backend,
            interval,
            generation: 0,
            active: None,
        }
    }

    /// Starts polling one task. See [`PollSession::start`].
    pub fn start_task(&mut self, task_id: TaskId, kind: Option<SimulationKind>) -> PollWatcher {
        self.start(PollTarget::Task { task_id, kind })
    }

    /// Starts polling a history page. See [`PollSession::start`].
    pub fn start_history(&mut self, page: Option<u32>) -> PollWatcher {
        self.start(PollTarget::History { page })
    }

    /// Starts polling `target`, cancelling any previous loop first.
    ///
    /// Starting the target that is already live is a no-op apart from the
    /// returned watcher, so repeated requests never double the poll rate.
    pub fn start(&mut self, target: PollTarget) -> PollWatcher {
        if let Some(active) = &self.active {
            if active.target == target && active.is_live() {
                debug!(generation = active.generation, "poll target already live");
                return PollWatcher {
                    rx: active.rx.clone(),
                };
            }
        }
        self.stop();
        self.spawn(target)
    }

    /// Cancels the active loop, if any. Idempotent.
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.handle.abort();
            debug!(generation = active.generation, "poll session stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.as_ref().is_some_and(ActivePoll::is_live)
    }

    pub fn target(&self) -> Option<&PollTarget> {
        self.active.as_ref().map(|active| &active.target)
    }

    fn spawn(&mut self, target: PollTarget) -> PollWatcher {
        self.generation += 1;
        let generation = self.generation;
        let (tx, rx) = watch::channel(PollUpdate::Started {
            target: target.clone(),
        });
        let backend = Arc::clone(&self.backend);
        let interval = self.interval;
        let loop_target = target.clone();
        let handle = tokio::spawn(async move {
            poll_loop(backend, loop_target, interval, tx).await;
            debug!(generation, "poll loop finished");
        });
        info!(generation, ?target, "poll session started");
        self.active = Some(ActivePoll {
            generation,
            target,
            handle,
            rx: rx.clone(),
        });
        PollWatcher { rx }
    }
}

impl Drop for PollSession {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop(
    backend: Arc<dyn PortalBackend>,
    target: PollTarget,
    period: Duration,
    tx: watch::Sender<PollUpdate>,
) {
    // First check fires one full interval after start, matching a timer
    // armed at submission time. Delayed ticks do not bunch up afterwards.
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let update = match &target {
            PollTarget::Task { task_id, kind } => check_task(backend.as_ref(), task_id, *kind).await,
            PollTarget::History { page } => check_history(backend.as_ref(), *page).await,
        };
        let done = update.is_terminal();
        tx.send_replace(update);
        if done {
            break;
        }
    }
}

async fn check_task(
    backend: &dyn PortalBackend,
    task_id: &str,
    kind: Option<SimulationKind>,
) -> PollUpdate {
    match backend.task_status(task_id).await {
        Ok(report) => match report.status {
            TaskState::Success => PollUpdate::TaskSucceeded {
                task_id: task_id.to_string(),
                kind,
                result: report.result.unwrap_or(Value::Null),
            },
            TaskState::Failure => PollUpdate::TaskFailed {
                task_id: task_id.to_string(),
                detail: report.failure_detail(),
            },
            state => PollUpdate::TaskPending {
                task_id: task_id.to_string(),
                state,
            },
        },
        Err(err) => poll_error(
            PollTarget::Task {
                task_id: task_id.to_string(),
                kind,
            },
            &err,
        ),
    }
}

async fn check_history(backend: &dyn PortalBackend, page: Option<u32>) -> PollUpdate {
    match backend.history(page).await {
        Ok(snapshot) => PollUpdate::History(snapshot),
        Err(err) => poll_error(PollTarget::History { page }, &err),
    }
}

fn poll_error(target: PollTarget, err: &PortalError) -> PollUpdate {
    PollUpdate::PollError {
        target,
        message: err.to_string(),
    }
}
