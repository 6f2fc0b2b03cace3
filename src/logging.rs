//! Structured event logging for stages.
//!
//! Stages log through an injected [`EventLog`] capability rather than any
//! global state, so tests can substitute a capturing implementation without
//! cross-test interference. The default is [`NoopLog`]; [`StdLog`] routes
//! events to the `log` facade.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::StageError;

/// Key/value data attached to a log event.
pub type LogData<'a> = &'a [(&'a str, String)];

/// Event logger consumed by stages.
///
/// Implementations must be cheap and non-blocking; a slow logger stalls the
/// worker hot path. No log call may fail the pipeline.
pub trait EventLog: Send + Sync {
    /// Record a standard event for `component`.
    fn log(&self, component: &str, action: &str, message: &str, data: LogData<'_>);

    /// Record an error event for `component`.
    fn error(&self, component: &str, action: &str, err: &StageError, message: &str, data: LogData<'_>);
}

/// Logger that discards every event. The default for stages built without
/// an explicit logger.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLog;

impl EventLog for NoopLog {
    fn log(&self, _component: &str, _action: &str, _message: &str, _data: LogData<'_>) {}

    fn error(
        &self,
        _component: &str,
        _action: &str,
        _err: &StageError,
        _message: &str,
        _data: LogData<'_>,
    ) {
    }
}

/// Logger that forwards events to the `log` crate facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdLog;

fn render(action: &str, message: &str, data: LogData<'_>) -> String {
    let mut out = String::new();
    let _ = write!(out, "{}: {}", action, message);
    for (key, value) in data {
        let _ = write!(out, " {}={}", key, value);
    }
    out
}

impl EventLog for StdLog {
    fn log(&self, component: &str, action: &str, message: &str, data: LogData<'_>) {
        log::info!(target: component, "{}", render(action, message, data));
    }

    fn error(&self, component: &str, action: &str, err: &StageError, message: &str, data: LogData<'_>) {
        log::error!(
            target: component,
            "{} error={}",
            render(action, message, data),
            err
        );
    }
}

/// Shared logger handle as stored by a stage.
pub type Logger = Arc<dyn EventLog>;

/// The default no-op logger, boxed for injection.
pub fn noop_logger() -> Logger {
    Arc::new(NoopLog)
}
