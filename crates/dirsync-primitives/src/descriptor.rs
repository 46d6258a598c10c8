use serde::{Deserialize, Serialize};

/// The sync-state control's `state` field (spec §6).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SyncState {
    Present,
    Add,
    Modify,
    Delete,
}

/// A configured source's operating mode (spec §3).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperatingMode {
    RefreshOnly,
    RefreshAndPersist,
    DirSync,
}

/// A configured source's wire dialect (spec §3).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    Plain,
    AccessLog,
    ChangeLog,
}

/// A single-attribute modification operator, as used both by the
/// access-log dialect's `OP` tokens and by [`crate::ModOp`]
/// reconciliation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ModOp {
    Add,
    Delete,
    Replace,
    Increment,
}

/// The kind of change a delta-dialect record describes (spec §4.5).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ChangeType {
    Add,
    Delete,
    Modify,
    ModRdn,
}
