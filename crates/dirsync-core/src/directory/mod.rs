//! The "directory operations" interface of spec.md §6: the synchronous-
//! style, non-replicated-aware boundary between the replication engine
//! and whatever storage backend actually owns the tree. Per spec.md
//! §1, the storage backend itself is an external collaborator; this
//! module only defines the contract against it.

#[cfg(feature = "testing")]
pub mod mock;

use async_trait::async_trait;
use dirsync_primitives::{ChangeStamp, Dn, NormalizedDn, SyncCookie, Uuid16};
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DirectoryError {
    #[error("already exists: {0}")]
    AlreadyExists(Dn),

    #[error("no such object: {0}")]
    NoSuchObject(Dn),

    #[error("not allowed on non-leaf: {0}")]
    NotAllowedOnNonLeaf(Dn),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// A single attribute value. The engine treats values as opaque bytes;
/// matching rules live on [`AttributeSchema`] in `crate::diff`.
pub type AttrValue = Vec<u8>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Modification {
    pub attribute: Box<str>,
    pub op: dirsync_primitives::ModOp,
    pub values: Vec<AttrValue>,
}

/// A snapshot of a locally stored entry, as returned by `find_by_uuid`
/// / `fetch` (spec §4.6 `dn_callback`).
#[derive(Clone, Debug)]
pub struct PeerEntry {
    pub dn: Dn,
    pub ndn: NormalizedDn,
    pub uuid: Uuid16,
    pub entry_csn: ChangeStamp,
    pub attributes: Vec<(Box<str>, Vec<AttrValue>)>,
    pub has_children: bool,
}

/// Marks an operation as locally originated (non-replicated) so the
/// backend suppresses local change-log emission for it (spec §6).
#[derive(Clone, Copy, Debug, Default)]
pub struct OpFlags {
    pub non_replicated: bool,
    pub ignore_schema: bool,
}

#[derive(Clone, Debug)]
pub struct AddOp {
    pub dn: Dn,
    pub attributes: Vec<(Box<str>, Vec<AttrValue>)>,
    pub op_csn: Option<ChangeStamp>,
    pub flags: OpFlags,
}

#[derive(Clone, Debug)]
pub struct ModifyOp {
    pub dn: Dn,
    pub modifications: Vec<Modification>,
    pub op_csn: Option<ChangeStamp>,
    pub flags: OpFlags,
}

#[derive(Clone, Debug)]
pub struct ModRdnOp {
    pub dn: Dn,
    pub new_rdn: Box<str>,
    pub delete_old_rdn: bool,
    pub new_superior: Option<Dn>,
    pub op_csn: Option<ChangeStamp>,
    pub flags: OpFlags,
}

#[derive(Clone, Debug)]
pub struct DeleteOp {
    pub dn: Dn,
    pub flags: OpFlags,
}

#[derive(Clone, Debug)]
pub struct SearchOp {
    pub base: Dn,
    pub filter: Box<str>,
    pub size_limit: Option<usize>,
}

#[async_trait]
pub trait DirectoryOps: Send + Sync {
    async fn find_by_uuid(&self, base: &Dn, uuid: Uuid16) -> DirectoryResult<Option<PeerEntry>>;
    async fn add(&self, op: AddOp) -> DirectoryResult<()>;
    async fn modify(&self, op: ModifyOp) -> DirectoryResult<()>;
    async fn modrdn(&self, op: ModRdnOp) -> DirectoryResult<()>;
    async fn delete(&self, op: DeleteOp) -> DirectoryResult<()>;
    async fn search(&self, op: SearchOp) -> DirectoryResult<Vec<PeerEntry>>;
    async fn fetch(&self, dn: &Dn) -> DirectoryResult<Option<PeerEntry>>;
    async fn read_context_csn(&self, context_dn: &Dn) -> DirectoryResult<Option<SyncCookie>>;
    async fn write_context_csn(
        &self,
        context_dn: &Dn,
        cookie: &SyncCookie,
        op_csn: ChangeStamp,
    ) -> DirectoryResult<()>;
}
