//! The stream stage core: worker pools, subscriber fan-out, and the
//! constructor combinators built on top of them.

pub mod combinators;
pub mod core;
pub mod stats;

pub use combinators::{derive, from_fn, identity, receive, receive_errors, FnProcessor};
pub use core::{CloseNotify, Processor, Stage, StageConfig};
pub use stats::StageStats;
