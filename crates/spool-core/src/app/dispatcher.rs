//! Dispatcher - dispatch cycles, task execution and the continuous loop.
//!
//! # Flow of one cycle
//! 1. `available = max_concurrent - running`; nothing to do at zero
//! 2. `TaskStore::select_ready(available, now)`
//! 3. Each fetched task claims a slot, is marked `processing` and handed to
//!    the handler on its own tokio task
//! 4. The outcome is written back (`completed`, or `failed` with or without
//!    a `next_retry_at`) and published on the event bus
//!
//! # Continuous mode
//! `start()` spawns one scheduler task that owns the request channel. Every
//! trigger (start, `add`, backlog, wake timer, manual cycle) is a
//! [`CycleRequest`]; the channel holds one request, so triggers that arrive
//! while one is already queued collapse into it and cycles never overlap.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use tokio::sync::{Notify, RwLock as AsyncRwLock, RwLockReadGuard, broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::config::QueueConfig;
use super::events::EventBus;
use super::lock_unpoisoned;
use super::status::QueueStatus;
use super::wake::WakeTimer;
use crate::domain::{Operation, QueueEvent, RetryDecision, RetryPolicy, Task, TaskId, TaskStatus};
use crate::error::QueueError;
use crate::ports::{Clock, StoreError, TaskStore};
use crate::typed::{HandlerError, TaskContext, TaskHandler};

/// Why the scheduler should run a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CycleRequest {
    Start,
    Added,
    /// The previous cycle filled every free slot; more may be ready.
    Backlog,
    Wake,
    /// A manual cycle wrote to the store outside the scheduler.
    Resync,
    Shutdown,
}

/// What a single dispatch cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Free slots when the cycle started.
    pub available: usize,
    /// Ready tasks returned by the store.
    pub fetched: usize,
    /// Tasks that actually ran to an outcome.
    pub launched: usize,
}

impl CycleReport {
    /// Every free slot got a task; the store may hold more ready work.
    pub fn saturated(&self) -> bool {
        self.available > 0 && self.fetched == self.available
    }

    /// No slot was free, so nothing was fetched.
    pub fn backpressured(&self) -> bool {
        self.available == 0
    }
}

/// Claimed execution slot. Dropping it gives the slot back.
struct Slot<'a> {
    dispatcher: &'a Dispatcher,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.dispatcher.release_slot();
    }
}

pub(crate) struct Dispatcher {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    max_concurrent: usize,
    polling_interval: Duration,
    auto_process: bool,
    events: EventBus,
    /// Held shared by `add` from insert to `added` event, exclusively by
    /// ready selection, so a row is never dispatched before it is announced.
    admission: AsyncRwLock<()>,

    running: AtomicUsize,
    cycling: AtomicBool,
    closing: AtomicBool,
    drained: Notify,

    handler: RwLock<Option<Arc<dyn TaskHandler>>>,
    wake: WakeTimer,
    requests: mpsc::Sender<CycleRequest>,
    inbox: Mutex<Option<mpsc::Receiver<CycleRequest>>>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        config: &QueueConfig,
    ) -> Self {
        let (requests, inbox) = mpsc::channel(1);
        Self {
            store,
            clock,
            policy: config.retry_policy(),
            max_concurrent: config.max_concurrent,
            polling_interval: config.polling_interval(),
            auto_process: config.auto_process,
            events: EventBus::new(config.event_capacity),
            admission: AsyncRwLock::new(()),
            running: AtomicUsize::new(0),
            cycling: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            drained: Notify::new(),
            handler: RwLock::new(None),
            wake: WakeTimer::default(),
            requests,
            inbox: Mutex::new(Some(inbox)),
            scheduler: Mutex::new(None),
        }
    }

    pub(crate) fn store(&self) -> &dyn TaskStore {
        self.store.as_ref()
    }

    pub(crate) async fn admit(&self) -> RwLockReadGuard<'_, ()> {
        self.admission.read().await
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn publish(&self, event: QueueEvent) {
        self.events.publish(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> Result<(), QueueError> {
        if self.is_closing() {
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    fn handler(&self) -> Option<Arc<dyn TaskHandler>> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn status(&self) -> QueueStatus {
        QueueStatus {
            current_running: self.running.load(Ordering::SeqCst),
            max_concurrent: self.max_concurrent,
            is_processing: self.cycling.load(Ordering::SeqCst),
            auto_process: self.auto_process,
            has_handler: self.handler().is_some(),
            wake_armed: self.wake.is_armed(),
        }
    }

    /// Log an operational fault and publish it as an `error` event.
    pub(crate) fn report_error(&self, err: &dyn fmt::Display, operation: Operation) {
        error!(%operation, error = %err, "queue operation failed");
        self.events.publish(QueueEvent::Error {
            error: err.to_string(),
            operation,
        });
    }

    // ---- slots ----

    fn try_acquire_slot(&self) -> Option<Slot<'_>> {
        if self.is_closing() {
            return None;
        }
        self.running
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |running| {
                (running < self.max_concurrent).then_some(running + 1)
            })
            .ok()
            .map(|_| Slot { dispatcher: self })
    }

    fn release_slot(&self) {
        if self.running.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    fn available_slots(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.running.load(Ordering::SeqCst))
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.running.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    // ---- cycles ----

    /// Run one dispatch cycle and wait for every task it launched.
    pub(crate) async fn dispatch_cycle(
        self: &Arc<Self>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<CycleReport, StoreError> {
        let available = self.available_slots();
        if available == 0 || self.is_closing() {
            debug!(available, "dispatch cycle skipped, no free slot");
            return Ok(CycleReport {
                available: 0,
                ..CycleReport::default()
            });
        }

        let ready = {
            let _admission = self.admission.write().await;
            self.store.select_ready(available, self.clock.now()).await?
        };
        let fetched = ready.len();
        debug!(available, fetched, "dispatch cycle");

        let mut set = JoinSet::new();
        for task in ready {
            set.spawn(Arc::clone(self).execute(task, Arc::clone(&handler)));
        }

        let mut launched = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(true) => launched += 1,
                Ok(false) => {}
                Err(err) => error!(%err, "task execution aborted"),
            }
        }

        Ok(CycleReport {
            available,
            fetched,
            launched,
        })
    }

    /// Run one task to an outcome. Returns `false` when the task did not run
    /// (no slot, or it could not be marked `processing`).
    async fn execute(self: Arc<Self>, task: Task, handler: Arc<dyn TaskHandler>) -> bool {
        // Held until the outcome is written so `close` cannot release the
        // store underneath a pending write.
        let Some(_slot) = self.try_acquire_slot() else {
            debug!(task_id = %task.id, "no free slot, task stays ready");
            return false;
        };

        let id = task.id;
        let retry_count = task.retry_count;
        if let Err(err) = self
            .store
            .update_status(id, TaskStatus::Processing, retry_count, None, self.clock.now())
            .await
        {
            self.report_error(&err, Operation::UpdateStatus);
            return false;
        }
        debug!(task_id = %id, retry_count, "task processing");

        let (payload, outcome) = match serde_json::from_str::<Value>(&task.payload) {
            Ok(payload) => {
                let ctx = TaskContext {
                    id,
                    retry_count,
                    payload: payload.clone(),
                };
                (payload, invoke(handler, ctx).await)
            }
            Err(err) => (
                Value::String(task.payload),
                Err(HandlerError::invalid_data(err)),
            ),
        };

        match outcome {
            Ok(result) => self.complete(id, retry_count, payload, result).await,
            Err(err) => self.fail(id, retry_count, payload, err).await,
        }
        true
    }

    async fn complete(&self, id: TaskId, retry_count: u32, payload: Value, result: Value) {
        let now = self.clock.now();
        if let Err(err) = self
            .store
            .update_status(id, TaskStatus::Completed, retry_count, None, now)
            .await
        {
            self.report_error(&err, Operation::UpdateStatus);
            return;
        }
        debug!(task_id = %id, "task completed");
        self.events.publish(QueueEvent::Completed {
            id,
            result,
            payload,
        });
    }

    async fn fail(&self, id: TaskId, retry_count: u32, payload: Value, err: HandlerError) {
        let now = self.clock.now();
        let error = err.to_string();

        match self.policy.decide(retry_count) {
            RetryDecision::Retry { retry_count, delay } => {
                let next_retry_at = retry_time(now, delay);
                if let Err(err) = self
                    .store
                    .update_status(id, TaskStatus::Failed, retry_count, Some(next_retry_at), now)
                    .await
                {
                    self.report_error(&err, Operation::UpdateStatus);
                    return;
                }
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                warn!(task_id = %id, retry_count, delay_ms, %error, "task failed, retry scheduled");
                self.events.publish(QueueEvent::Retried {
                    id,
                    payload,
                    retry_count,
                    next_retry_at,
                    delay,
                    error,
                });
            }
            RetryDecision::Exhausted { retry_count } => {
                if let Err(err) = self
                    .store
                    .update_status(id, TaskStatus::Failed, retry_count, None, now)
                    .await
                {
                    self.report_error(&err, Operation::UpdateStatus);
                    return;
                }
                error!(task_id = %id, retry_count, %error, "task failed permanently");
                self.events.publish(QueueEvent::Failed {
                    id,
                    payload,
                    error,
                    retry_count,
                });
            }
        }
    }

    // ---- continuous mode ----

    /// Install `handler` and start the scheduler loop.
    pub(crate) fn start(self: &Arc<Self>, handler: Arc<dyn TaskHandler>) -> Result<(), QueueError> {
        self.ensure_open()?;
        let inbox = lock_unpoisoned(&self.inbox)
            .take()
            .ok_or(QueueError::AlreadyProcessing)?;

        *self
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);

        let join = tokio::spawn(Arc::clone(self).run_scheduler(inbox));
        *lock_unpoisoned(&self.scheduler) = Some(join);

        info!(max_concurrent = self.max_concurrent, "continuous processing started");
        self.request_cycle(CycleRequest::Start);
        Ok(())
    }

    /// Ask the scheduler for a cycle. Never blocks; a request arriving while
    /// one is already queued is absorbed by it.
    pub(crate) fn request_cycle(&self, request: CycleRequest) {
        if self.is_closing() && request != CycleRequest::Shutdown {
            return;
        }
        match self.requests.try_send(request) {
            Ok(()) => debug!(?request, "dispatch cycle requested"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(?request, "dispatch cycle already pending")
            }
            // scheduler already gone
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Whether `add` should trigger a cycle.
    pub(crate) fn wants_auto_cycle(&self) -> bool {
        self.auto_process && self.handler().is_some()
    }

    /// Let the scheduler re-read the store after a manual cycle, which may
    /// have left ready rows or scheduled retries the scheduler has not seen.
    pub(crate) fn resync(&self) {
        if self.handler().is_some() {
            self.request_cycle(CycleRequest::Resync);
        }
    }

    /// Stop the scheduler and the wake timer without waiting for anything.
    /// Running handlers finish on their own; the store is left open.
    pub(crate) fn abandon(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.wake.disarm();
        self.request_cycle(CycleRequest::Shutdown);
        debug!("queue dropped without close, scheduler stopping");
    }

    async fn run_scheduler(self: Arc<Self>, mut inbox: mpsc::Receiver<CycleRequest>) {
        while let Some(request) = inbox.recv().await {
            if self.is_closing() {
                break;
            }
            let Some(handler) = self.handler() else {
                continue;
            };

            self.wake.disarm();
            self.cycling.store(true, Ordering::SeqCst);
            let result = self.dispatch_cycle(handler).await;
            self.cycling.store(false, Ordering::SeqCst);

            match result {
                Ok(report) if report.saturated() => self.request_cycle(CycleRequest::Backlog),
                Ok(report) if report.backpressured() => self.arm_wake(self.polling_interval),
                Ok(report) => {
                    debug!(?request, launched = report.launched, "dispatch cycle drained");
                    self.schedule_wake().await;
                }
                Err(err) => {
                    self.report_error(&err, Operation::Dispatch);
                    self.arm_wake(self.polling_interval);
                }
            }
        }
        debug!("scheduler loop stopped");
    }

    /// Arm the wake timer for the soonest pending retry, or leave the queue
    /// idle when there is none.
    async fn schedule_wake(&self) {
        if self.is_closing() {
            return;
        }
        match self.store.earliest_retry_at().await {
            Ok(None) => {
                self.wake.disarm();
                debug!("queue idle, no wake timer armed");
            }
            Ok(Some(at)) => {
                let until = (at - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
                self.arm_wake(until.max(self.polling_interval));
            }
            Err(err) => {
                self.report_error(&err, Operation::ScheduleWake);
                self.arm_wake(self.polling_interval);
            }
        }
    }

    fn arm_wake(&self, delay: Duration) {
        if self.is_closing() {
            return;
        }
        debug!(?delay, "wake timer armed");
        self.wake.arm(delay, self.requests.clone());
    }

    /// Stop the scheduler, wait for in-flight tasks and close the store.
    pub(crate) async fn shutdown(&self) -> Result<(), StoreError> {
        self.closing.store(true, Ordering::SeqCst);
        self.wake.disarm();
        self.request_cycle(CycleRequest::Shutdown);

        let scheduler = lock_unpoisoned(&self.scheduler).take();
        if let Some(join) = scheduler {
            if let Err(err) = join.await {
                error!(%err, "scheduler loop ended abnormally");
            }
        }

        self.wait_drained().await;
        self.store.close().await?;
        info!("queue closed");
        Ok(())
    }
}

/// Run the handler on its own task so a panic becomes an ordinary failure.
async fn invoke(handler: Arc<dyn TaskHandler>, ctx: TaskContext) -> Result<Value, HandlerError> {
    let id = ctx.id;
    match tokio::spawn(async move { handler.handle(&ctx).await }).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(task_id = %id, %err, "handler panicked");
            Err(HandlerError::new(format!("handler panicked: {err}")))
        }
    }
}

fn retry_time(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
