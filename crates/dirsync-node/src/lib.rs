//! Source state machine, retry schedule, and run-queue scheduler
//! (spec.md §4.4, §9): the layer driving `dirsync-core` from a
//! configured set of remotes.

pub mod error;
pub mod retry;
pub mod scheduler;
pub mod source;

pub use error::{NodeError, NodeResult};
pub use retry::{RetryOutcome, RetrySchedule, RetryStep};
pub use scheduler::{Scheduler, TaskId};
pub use source::{ChangeLogReader, ProviderConnection, Source, TickOutcome};
