//! Execution context forwarded through pipelines.
//!
//! An [`ExecContext`] is an opaque capability attached to every submission.
//! Stages never interpret it; they hand it to the processor unchanged. A
//! processor that wants timeout behavior checks [`ExecContext::is_expired`]
//! and short-circuits: cancellation is advisory, never enforced by the
//! stage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct CtxInner {
    deadline: Option<Instant>,
    cancelled: AtomicBool,
    values: Vec<(String, String)>,
}

/// Cheap-to-clone cancellation/deadline capability with an immutable
/// key/value bag.
#[derive(Debug, Clone)]
pub struct ExecContext {
    inner: Arc<CtxInner>,
}

impl ExecContext {
    /// A context with no deadline and no values.
    pub fn new() -> Self {
        Self::build(None, Vec::new())
    }

    /// A context that expires once `timeout` has elapsed from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Some(Instant::now() + timeout), Vec::new())
    }

    /// A context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline), Vec::new())
    }

    fn build(deadline: Option<Instant>, values: Vec<(String, String)>) -> Self {
        ExecContext {
            inner: Arc::new(CtxInner {
                deadline,
                cancelled: AtomicBool::new(false),
                values,
            }),
        }
    }

    /// Derive a context carrying an extra key/value pair. The derived
    /// context inherits this context's deadline but not its cancellation.
    pub fn with_value(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut values = self.inner.values.clone();
        values.push((key.into(), value.into()));
        Self::build(self.inner.deadline, values)
    }

    /// Look up a value set via [`ExecContext::with_value`].
    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner
            .values
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Mark the context cancelled. All clones observe the cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    /// True once the context is cancelled or its deadline has passed.
    pub fn is_expired(&self) -> bool {
        if self.inner.cancelled.load(Ordering::Acquire) {
            return true;
        }
        match self.inner.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// Time left until the deadline, if one is set. Expired contexts report
    /// a zero remainder.
    pub fn time_remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_is_not_expired() {
        let ctx = ExecContext::new();
        assert!(!ctx.is_expired());
        assert_eq!(ctx.time_remaining(), None);
    }

    #[test]
    fn cancel_is_visible_through_clones() {
        let ctx = ExecContext::new();
        let clone = ctx.clone();
        ctx.cancel();
        assert!(clone.is_expired());
    }

    #[test]
    fn past_deadline_expires() {
        let ctx = ExecContext::with_timeout(Duration::from_millis(0));
        assert!(ctx.is_expired());
        assert_eq!(ctx.time_remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn values_shadow_and_survive_derivation() {
        let ctx = ExecContext::new().with_value("request", "r-1");
        let derived = ctx.with_value("request", "r-2");
        assert_eq!(ctx.get("request"), Some("r-1"));
        assert_eq!(derived.get("request"), Some("r-2"));
        assert_eq!(derived.get("missing"), None);
    }
}
