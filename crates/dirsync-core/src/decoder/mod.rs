//! Message Decoder (spec §4.5). Three wire dialects plus the dir-sync
//! variant are demultiplexed, upstream of this module, into a
//! [`RawProtocolMessage`]; BER decoding itself is an external
//! collaborator per spec.md §1. This module turns a raw message into
//! one variant of [`DecodedMessage`] (spec §9 "tagged-variant message
//! representation"), which the Entry Applier matches on.

pub mod access_log;
pub mod change_log;
pub mod dir_sync;
pub mod plain;

use dirsync_primitives::{Dn, SyncState, Uuid16};

use crate::directory::Modification;

/// A raw attribute/value-list pair, already BER-decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawAttribute {
    pub name: Box<str>,
    pub values: Vec<Vec<u8>>,
}

/// The already-demultiplexed wire element, per spec.md §6's protocol
/// element list. Constructing these from actual LDAP bytes happens
/// outside this crate.
#[derive(Clone, Debug)]
pub enum RawProtocolMessage {
    SearchEntryWithSyncState {
        dn: Box<str>,
        attributes: Vec<RawAttribute>,
        state: SyncState,
        uuid: Uuid16,
        cookie: Option<Box<str>>,
    },
    IntermediateNewCookie {
        cookie: Box<str>,
    },
    IntermediateRefreshPresent {
        refresh_done: bool,
    },
    IntermediateRefreshDelete {
        refresh_done: bool,
    },
    IntermediateSyncIdSet {
        uuids: Vec<Uuid16>,
        refresh_deletes: bool,
        cookie: Option<Box<str>>,
    },
    FinalResult {
        cookie: Option<Box<str>>,
        refresh_deletes: bool,
    },
}

/// A search entry carrying a sync-state control: the common case for
/// the plain full-sync dialect, and the terminal shape every dialect's
/// delta record is translated into before reaching the Entry Applier.
#[derive(Clone, Debug)]
pub struct EntryMessage {
    pub dn: Dn,
    pub uuid: Uuid16,
    pub state: SyncState,
    pub modifications: Vec<Modification>,
    pub cookie: Option<Box<str>>,
}

/// A delta-dialect record (access-log, change-log, dir-sync) that
/// additionally carries rename information, unlike a plain
/// [`EntryMessage`].
#[derive(Clone, Debug)]
pub struct OpMessage {
    pub dn: Dn,
    pub uuid: Option<Uuid16>,
    pub change_type: dirsync_primitives::ChangeType,
    pub modifications: Vec<Modification>,
    pub new_rdn: Option<Box<str>>,
    pub delete_old_rdn: bool,
    pub new_superior: Option<Dn>,
    pub change_stamp: Option<dirsync_primitives::ChangeStamp>,
    /// The delta dialect's own high-water mark (change-log's
    /// `changeNumber`), promoted on success (spec §4.5.3).
    pub watermark: Option<u64>,
    /// Carries the access-log record's `relax` control indication
    /// through to the applier as an `ignore_schema` request.
    pub relaxed: bool,
}

#[derive(Clone, Debug)]
pub struct CookieOnlyMessage {
    pub cookie: Box<str>,
}

#[derive(Clone, Debug)]
pub struct PresentSetMessage {
    pub uuids: Vec<Uuid16>,
    pub refresh_deletes: bool,
    pub cookie: Option<Box<str>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshPhase {
    Present,
    Delete,
}

#[derive(Clone, Debug)]
pub struct RefreshPhaseMessage {
    pub phase: RefreshPhase,
    pub refresh_done: bool,
}

#[derive(Clone, Debug)]
pub struct FinalResultMessage {
    pub cookie: Option<Box<str>>,
    pub refresh_deletes: bool,
}

#[derive(Clone, Debug)]
pub enum DecodedMessage {
    Entry(EntryMessage),
    Op(OpMessage),
    CookieOnly(CookieOnlyMessage),
    PresentSet(PresentSetMessage),
    RefreshPhase(RefreshPhaseMessage),
    FinalResult(FinalResultMessage),
}

impl From<RawProtocolMessage> for DecodedMessage {
    fn from(raw: RawProtocolMessage) -> Self {
        match raw {
            RawProtocolMessage::SearchEntryWithSyncState {
                dn,
                attributes,
                state,
                uuid,
                cookie,
            } => DecodedMessage::Entry(plain::decode_entry(&dn, attributes, state, uuid, cookie)),
            RawProtocolMessage::IntermediateNewCookie { cookie } => {
                DecodedMessage::CookieOnly(CookieOnlyMessage { cookie })
            }
            RawProtocolMessage::IntermediateRefreshPresent { refresh_done } => {
                DecodedMessage::RefreshPhase(RefreshPhaseMessage {
                    phase: RefreshPhase::Present,
                    refresh_done,
                })
            }
            RawProtocolMessage::IntermediateRefreshDelete { refresh_done } => {
                DecodedMessage::RefreshPhase(RefreshPhaseMessage {
                    phase: RefreshPhase::Delete,
                    refresh_done,
                })
            }
            RawProtocolMessage::IntermediateSyncIdSet {
                uuids,
                refresh_deletes,
                cookie,
            } => DecodedMessage::PresentSet(PresentSetMessage {
                uuids,
                refresh_deletes,
                cookie,
            }),
            RawProtocolMessage::FinalResult {
                cookie,
                refresh_deletes,
            } => DecodedMessage::FinalResult(FinalResultMessage {
                cookie,
                refresh_deletes,
            }),
        }
    }
}
