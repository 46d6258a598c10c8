//! Consumer-side replication engine core: CSN Vector Algebra lives in
//! `dirsync-primitives`; this crate holds everything spec.md §4 builds
//! on top of it — the Present-Set, Cookie State, Message Decoder,
//! Entry Applier, Non-present Reconciliation, Diff Computation, Glue
//! Builder, and Conflict Resolver — plus the `DirectoryOps` boundary
//! (spec.md §6) those components drive.
//!
//! This crate has no knowledge of scheduling, retry, or the wire
//! protocol; that lives in `dirsync-node`.

pub mod applier;
pub mod conflict;
pub mod cookie_state;
pub mod decoder;
pub mod diff;
pub mod directory;
pub mod error;
pub mod glue;
pub mod nonpresent;
pub mod present_set;
pub mod schema;
pub mod shutdown;

pub use cookie_state::{CookieState, PreCommitOutcome, RefreshGrant, SourceId};
pub use directory::{DirectoryError, DirectoryOps, DirectoryResult};
pub use error::{CoreError, CoreResult};
pub use present_set::PresentSet;
pub use schema::{AttributeSchema, EqualityRule, PermissiveSchema};
pub use shutdown::ShutdownFlag;
