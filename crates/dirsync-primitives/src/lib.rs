//! Shared data model for the directory consumer-side replication
//! engine: change stamps, sync cookies, UUIDs, DNs, and the small enums
//! every other crate in the workspace builds on.
//!
//! This crate has no I/O and no async runtime dependency — it is the
//! "CSN Vector Algebra" leaf of the dependency graph described in
//! spec.md §2.

pub mod csn;
pub mod descriptor;
pub mod dn;
pub mod error;
pub mod uuid;

pub use csn::{AgeCheck, ChangeStamp, CompareResult, CookieVector, ServerId, SyncCookie};
pub use descriptor::{ChangeType, Dialect, ModOp, OperatingMode, SyncState};
pub use dn::{Dn, NormalizedDn};
pub use error::CsnError;
pub use uuid::Uuid16;
