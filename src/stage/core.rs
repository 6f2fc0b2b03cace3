//! The stream stage: a worker pool over a shared intake channel with
//! concurrent fan-out to subscriber stages.
//!
//! A [`Stage`] receives data or error values through [`Stage::data`] and
//! [`Stage::error`], runs each through its [`Processor`] on one of N worker
//! tasks, and broadcasts the outcome to every subscribed stage. Panics inside
//! the processor are contained at the worker boundary and travel downstream
//! as [`StageError::Panicked`] values; a faulty unit of work never kills a
//! worker or the stage.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::context::ExecContext;
use crate::error::{StageError, StageResult};
use crate::logging::{noop_logger, Logger};
use crate::stage::stats::{Counters, StageStats};

const COMPONENT: &str = "flowstage.stage";

/// A unit of work a stage executes per payload.
///
/// Invoked concurrently from every worker of the owning stage; the stage
/// guarantees nothing about internal synchronization of implementations.
/// The incoming `input` is `Ok` for values submitted via [`Stage::data`] and
/// `Err` for failures arriving via [`Stage::error`]. The returned result
/// decides the fan-out path: `Ok` reaches subscribers as data, `Err` as an
/// error.
///
/// Cancellation is advisory: a processor that wants timeout behavior checks
/// `ctx.is_expired()` and short-circuits. The stage never inspects the
/// context.
#[async_trait]
pub trait Processor<T: Send + 'static>: Send + Sync {
    async fn process(&self, ctx: &ExecContext, input: StageResult<T>) -> StageResult<T>;
}

/// Configuration for building a stage.
#[derive(Clone)]
pub struct StageConfig {
    /// Worker pool size. Values of 0 are clamped to 1.
    pub workers: usize,
    /// Event logger injected into the stage.
    pub logger: Logger,
}

impl Default for StageConfig {
    fn default() -> Self {
        StageConfig {
            workers: num_cpus::get(),
            logger: noop_logger(),
        }
    }
}

impl StageConfig {
    /// A config with the given pool size and the no-op logger.
    pub fn workers(workers: usize) -> Self {
        StageConfig {
            workers,
            ..Default::default()
        }
    }

    /// Replace the logger.
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }
}

/// The value/error/context envelope moving through a stage.
struct Payload<T> {
    ctx: ExecContext,
    item: StageResult<T>,
}

type Intake<T> = Arc<tokio::sync::Mutex<mpsc::Receiver<Payload<T>>>>;

/// One-shot signal observable exactly once [`Stage::shutdown`] completes its
/// drain, and immediately ever after.
#[derive(Clone)]
pub struct CloseNotify {
    rx: watch::Receiver<bool>,
}

impl CloseNotify {
    /// Resolve once the owning stage has fully shut down. Returns
    /// immediately if it already has.
    pub async fn notified(mut self) {
        // Error means the sender dropped, which only happens after close.
        let _ = self.rx.wait_for(|closed| *closed).await;
    }
}

/// A pipeline stage: worker pool, intake channel, and subscriber fan-out.
///
/// Stages are built hot (workers spawn inside the constructor) and composed
/// by [`Stage::subscribe`]. Construction and operation require a running
/// Tokio runtime.
pub struct Stage<T: Send + 'static> {
    id: String,
    workers: usize,
    log: Logger,
    proc: Arc<dyn Processor<T>>,
    counters: Counters,

    // Taking this slot is the one and only close of the intake channel.
    sender: RwLock<Option<mpsc::Sender<Payload<T>>>>,
    subscribers: RwLock<Vec<Arc<Stage<T>>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,

    fanout_count: AtomicU64,
    fanout_idle: Notify,

    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

impl<T> Stage<T>
where
    T: Clone + Send + 'static,
{
    /// Build a stage with default configuration.
    pub fn new<P>(proc: P) -> Arc<Self>
    where
        P: Processor<T> + 'static,
    {
        Self::with_config(StageConfig::default(), proc)
    }

    /// Build a stage with the given pool size and the no-op logger.
    pub fn with_workers<P>(workers: usize, proc: P) -> Arc<Self>
    where
        P: Processor<T> + 'static,
    {
        Self::with_config(StageConfig::workers(workers), proc)
    }

    /// Build a stage and spawn its worker pool immediately.
    pub fn with_config<P>(config: StageConfig, proc: P) -> Arc<Self>
    where
        P: Processor<T> + 'static,
    {
        let workers = config.workers.max(1);
        // Capacity 1 is the in-transit slot: submitters block until a worker
        // frees it, which is the pipeline's only backpressure.
        let (tx, rx) = mpsc::channel(1);
        let (closed_tx, closed_rx) = watch::channel(false);

        let stage = Arc::new(Stage {
            id: Uuid::new_v4().to_string(),
            workers,
            log: config.logger,
            proc: Arc::new(proc),
            counters: Counters::default(),
            sender: RwLock::new(Some(tx)),
            subscribers: RwLock::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            fanout_count: AtomicU64::new(0),
            fanout_idle: Notify::new(),
            closed_tx,
            closed_rx,
        });

        let intake: Intake<T> = Arc::new(tokio::sync::Mutex::new(rx));
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            handles.push(tokio::spawn(Self::worker_loop(
                Arc::clone(&stage),
                Arc::clone(&intake),
            )));
        }
        *stage.handles.lock().unwrap_or_else(|e| e.into_inner()) = handles;

        stage
    }

    /// This stage's unique identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The logger this stage was built with.
    pub fn logger(&self) -> &Logger {
        &self.log
    }

    /// Whether shutdown has begun.
    pub fn is_closed(&self) -> bool {
        self.counters.is_closed()
    }

    /// Snapshot of the stage's counters. Never blocks.
    pub fn stats(&self) -> StageStats {
        // +1 accounts for the shutdown coordinator alongside the pool.
        self.counters.snapshot(self.workers as u64 + 1)
    }

    /// Register `sub` to receive this stage's outputs and return it, so
    /// pipelines can be built by chaining.
    ///
    /// Safe under concurrent registration and concurrent broadcast. A stage
    /// subscribing directly to itself is refused and logged; transitive
    /// cycles are not detected and produce undefined delivery behavior.
    pub fn subscribe(&self, sub: Arc<Stage<T>>) -> Arc<Stage<T>> {
        if std::ptr::eq(self as *const Stage<T>, Arc::as_ptr(&sub)) {
            self.log.error(
                COMPONENT,
                "subscribe",
                &StageError::Custom("self-subscription refused".into()),
                "stage attempted to subscribe to itself",
                &[("stage_id", self.id.clone())],
            );
            return sub;
        }
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&sub));
        sub
    }

    /// Submit a success value. Dropped silently if the stage is closed.
    /// Blocks while every worker is busy and the in-transit slot is full.
    pub async fn data(&self, ctx: ExecContext, value: T) {
        self.submit(ctx, Ok(value)).await;
    }

    /// Submit a failure. Same closed-drop and backpressure semantics as
    /// [`Stage::data`].
    pub async fn error(&self, ctx: ExecContext, err: StageError) {
        self.submit(ctx, Err(err)).await;
    }

    async fn submit(&self, ctx: ExecContext, item: StageResult<T>) {
        if self.counters.is_closed() {
            return;
        }

        // Clone the sender out so no lock is held across the await.
        let tx = {
            let guard = self.sender.read().unwrap_or_else(|e| e.into_inner());
            match guard.as_ref() {
                Some(tx) => tx.clone(),
                None => return,
            }
        };

        // Guard instead of a plain decrement: a submitter blocked on the
        // handoff can be cancelled, and pending must still come back down.
        self.counters.pending.fetch_add(1, Ordering::AcqRel);
        let _pending = PendingGuard(&self.counters.pending);
        // A send error means the workers already exited; the unit is
        // dropped, matching post-closure submission semantics.
        let _ = tx.send(Payload { ctx, item }).await;
    }

    /// Returns a signal that fires when shutdown completes its drain.
    pub fn close_notify(&self) -> CloseNotify {
        CloseNotify {
            rx: self.closed_rx.clone(),
        }
    }

    /// Idempotent terminal operation.
    ///
    /// The first call marks the stage closed, closes the intake channel,
    /// waits for every worker to drain what is already queued and exit,
    /// waits for outstanding fan-out deliveries to land downstream, then
    /// fires the close notification. Later calls log and return.
    pub async fn shutdown(&self) {
        self.log.log(
            COMPONENT,
            "shutdown",
            "shutdown requested",
            &[("stage_id", self.id.clone())],
        );

        if self.counters.close() {
            self.log.log(
                COMPONENT,
                "shutdown",
                "already shut down",
                &[("stage_id", self.id.clone())],
            );
            return;
        }

        // Close the intake: in-flight submissions still holding sender
        // clones complete their handoff and get drained before the channel
        // reports empty to the workers.
        self.sender
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in handles {
            let _ = handle.await;
        }

        self.wait_fanout_idle().await;

        let _ = self.closed_tx.send(true);
        self.log.log(
            COMPONENT,
            "shutdown",
            "shutdown complete",
            &[("stage_id", self.id.clone())],
        );
    }

    /// Wait until every broadcast task spawned by this stage's workers has
    /// delivered. Workers have exited by the time this runs, so the count
    /// only decreases.
    async fn wait_fanout_idle(&self) {
        loop {
            let notified = self.fanout_idle.notified();
            let mut notified = pin!(notified);
            notified.as_mut().enable();
            if self.fanout_count.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    async fn worker_loop(stage: Arc<Stage<T>>, intake: Intake<T>) {
        stage.counters.workers_up.fetch_add(1, Ordering::AcqRel);

        loop {
            let payload = {
                let mut rx = intake.lock().await;
                rx.recv().await
            };
            let Some(payload) = payload else {
                break;
            };
            Self::run_unit(&stage, payload).await;
        }

        stage.counters.workers_up.fetch_sub(1, Ordering::AcqRel);
        stage.log.log(
            COMPONENT,
            "worker",
            "worker exited",
            &[("stage_id", stage.id.clone())],
        );
    }

    /// Execute one payload: invoke the processor with panics contained at
    /// this single call site, then broadcast the outcome.
    async fn run_unit(stage: &Arc<Stage<T>>, payload: Payload<T>) {
        let Payload { ctx, item } = payload;

        let invocation = AssertUnwindSafe(stage.proc.process(&ctx, item)).catch_unwind();
        let outcome = match invocation.await {
            Ok(result) => result,
            Err(panic) => {
                let err = StageError::Panicked(panic_message(panic));
                stage.log.error(
                    COMPONENT,
                    "worker",
                    &err,
                    "processor panicked; unit converted to error",
                    &[("stage_id", stage.id.clone())],
                );
                Err(err)
            }
        };

        stage.counters.processed.fetch_add(1, Ordering::AcqRel);

        let subs: Vec<Arc<Stage<T>>> = stage
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if subs.is_empty() {
            return;
        }

        // One task per subscriber so fan-out never serializes on subscriber
        // speed. The worker moves on immediately; shutdown joins these.
        match outcome {
            Ok(value) => {
                for sub in subs {
                    let ctx = ctx.clone();
                    let value = value.clone();
                    Self::spawn_broadcast(stage, async move {
                        sub.data(ctx, value).await;
                    });
                }
            }
            Err(err) => {
                for sub in subs {
                    let ctx = ctx.clone();
                    let err = err.clone();
                    Self::spawn_broadcast(stage, async move {
                        sub.error(ctx, err).await;
                    });
                }
            }
        }
    }

    fn spawn_broadcast<F>(stage: &Arc<Stage<T>>, deliver: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        stage.fanout_count.fetch_add(1, Ordering::AcqRel);
        let stage = Arc::clone(stage);
        tokio::spawn(async move {
            deliver.await;
            if stage.fanout_count.fetch_sub(1, Ordering::AcqRel) == 1 {
                stage.fanout_idle.notify_waiters();
            }
        });
    }
}

struct PendingGuard<'a>(&'a AtomicU64);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
