pub mod context;
pub mod error;
pub mod logging;
pub mod stage;

// Re-export the working surface at the crate root
pub use context::ExecContext;
pub use error::{StageError, StageResult};
pub use logging::{noop_logger, EventLog, Logger, NoopLog, StdLog};
pub use stage::{
    derive, from_fn, identity, receive, receive_errors, CloseNotify, FnProcessor, Processor,
    Stage, StageConfig, StageStats,
};
