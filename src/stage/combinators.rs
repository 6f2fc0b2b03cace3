//! Constructor helpers for building stages from plain functions, plus
//! blocking-channel bridges for draining a stage from non-pipeline code.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::context::ExecContext;
use crate::error::{StageError, StageResult};
use crate::stage::core::{Processor, Stage, StageConfig};

/// Adapter turning a plain function into a [`Processor`], so stages can be
/// built without defining a named type.
pub struct FnProcessor<F> {
    f: F,
}

/// Wrap `f` as a [`Processor`].
pub fn from_fn<T, F>(f: F) -> FnProcessor<F>
where
    F: Fn(&ExecContext, StageResult<T>) -> StageResult<T>,
{
    FnProcessor { f }
}

#[async_trait]
impl<T, F> Processor<T> for FnProcessor<F>
where
    T: Clone + Send + 'static,
    F: Fn(&ExecContext, StageResult<T>) -> StageResult<T> + Send + Sync,
{
    async fn process(&self, ctx: &ExecContext, input: StageResult<T>) -> StageResult<T> {
        (self.f)(ctx, input)
    }
}

/// Build a stage around `f` and, when `upstream` is given, subscribe the new
/// stage to it in the same step.
pub fn derive<T, F>(upstream: Option<&Arc<Stage<T>>>, config: StageConfig, f: F) -> Arc<Stage<T>>
where
    T: Clone + Send + 'static,
    F: Fn(&ExecContext, StageResult<T>) -> StageResult<T> + Send + Sync + 'static,
{
    let stage = Stage::with_config(config, from_fn(f));
    if let Some(up) = upstream {
        up.subscribe(Arc::clone(&stage));
    }
    stage
}

/// A pass-through tap: returns its input unchanged, values and errors alike.
pub fn identity<T>(config: StageConfig) -> Arc<Stage<T>>
where
    T: Clone + Send + 'static,
{
    derive(None, config, |_ctx, input| input)
}

/// Shared slot for a bridge channel's sender. Emptying it is what closes the
/// outgoing channel once buffered items are consumed.
type SenderSlot<U> = Arc<Mutex<Option<mpsc::Sender<U>>>>;

fn slot_sender<U>(slot: &SenderSlot<U>) -> Option<mpsc::Sender<U>> {
    slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

struct ForwardValues<T> {
    slot: SenderSlot<T>,
}

#[async_trait]
impl<T> Processor<T> for ForwardValues<T>
where
    T: Clone + Send + 'static,
{
    async fn process(&self, _ctx: &ExecContext, input: StageResult<T>) -> StageResult<T> {
        if let Ok(value) = &input {
            if let Some(tx) = slot_sender(&self.slot) {
                let _ = tx.send(value.clone()).await;
            }
        }
        input
    }
}

struct ForwardErrors<T> {
    slot: SenderSlot<StageError>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

#[async_trait]
impl<T> Processor<T> for ForwardErrors<T>
where
    T: Clone + Send + 'static,
{
    async fn process(&self, _ctx: &ExecContext, input: StageResult<T>) -> StageResult<T> {
        if let Err(err) = &input {
            if let Some(tx) = slot_sender(&self.slot) {
                let _ = tx.send(err.clone()).await;
            }
        }
        input
    }
}

/// Subscribe a freshly-built single-worker `stage` to `upstream` and arrange
/// its teardown: when upstream's close notification fires, shut the bridge
/// down and drop the bridge channel's last sender.
fn arm_bridge<T, U>(upstream: &Arc<Stage<T>>, stage: &Arc<Stage<T>>, slot: SenderSlot<U>)
where
    T: Clone + Send + 'static,
    U: Send + 'static,
{
    upstream.subscribe(Arc::clone(stage));

    let up = Arc::clone(upstream);
    let bridged = Arc::clone(stage);
    tokio::spawn(async move {
        up.close_notify().notified().await;
        bridged.shutdown().await;
        slot.lock().unwrap_or_else(|e| e.into_inner()).take();
    });
}

/// Bridge a stage's successful outputs onto a plain channel.
///
/// Returns the receiving half and the single-worker bridge stage now
/// subscribed to `upstream`. The channel closes exactly when `upstream`'s
/// close notification fires and the bridge has drained, so external code can
/// consume the stage with `while let Some(v) = rx.recv().await`.
pub fn receive<T>(upstream: &Arc<Stage<T>>) -> (mpsc::Receiver<T>, Arc<Stage<T>>)
where
    T: Clone + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);
    let slot: SenderSlot<T> = Arc::new(Mutex::new(Some(tx)));

    let config = StageConfig::workers(1).logger(Arc::clone(upstream.logger()));
    let stage = Stage::with_config(
        config,
        ForwardValues {
            slot: Arc::clone(&slot),
        },
    );
    arm_bridge(upstream, &stage, slot);

    (rx, stage)
}

/// Bridge a stage's error outputs onto a plain channel; the counterpart of
/// [`receive`].
pub fn receive_errors<T>(upstream: &Arc<Stage<T>>) -> (mpsc::Receiver<StageError>, Arc<Stage<T>>)
where
    T: Clone + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);
    let slot: SenderSlot<StageError> = Arc::new(Mutex::new(Some(tx)));

    let config = StageConfig::workers(1).logger(Arc::clone(upstream.logger()));
    let stage = Stage::with_config(
        config,
        ForwardErrors {
            slot: Arc::clone(&slot),
            _marker: std::marker::PhantomData,
        },
    );
    arm_bridge(upstream, &stage, slot);

    (rx, stage)
}
