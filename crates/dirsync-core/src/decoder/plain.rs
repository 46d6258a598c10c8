//! Plain full-sync dialect (spec §4.5.1): the search entry's
//! attributes arrive already BER-decoded; decoding here is mostly
//! "drop the context-vector attribute and turn the rest into
//! replace-modifications".

use dirsync_primitives::{Dn, ModOp, SyncState, Uuid16};

use super::{EntryMessage, RawAttribute};
use crate::directory::Modification;

/// The attribute the provider announces its own `contextCSN` as on the
/// context entry. The consumer never replicates this attribute's
/// updates, since it owns a locally computed value (spec §4.5.1).
pub const CONTEXT_CSN_ATTRIBUTE: &str = "contextCSN";

/// Rewrites a DN-syntax value through a configured name rewriter
/// before it reaches the local directory (spec §4.5.1). The rewriter
/// itself is an external collaborator (suffix massaging rules are a
/// deployment concern); the identity rewriter below keeps decoding
/// testable without one configured.
pub trait NameRewriter: Send + Sync {
    fn rewrite(&self, dn: &str) -> Box<str>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityRewriter;

impl NameRewriter for IdentityRewriter {
    fn rewrite(&self, dn: &str) -> Box<str> {
        dn.into()
    }
}

#[must_use]
pub fn decode_entry(
    dn: &str,
    attributes: Vec<RawAttribute>,
    state: SyncState,
    uuid: Uuid16,
    cookie: Option<Box<str>>,
) -> EntryMessage {
    decode_entry_with_rewriter(dn, attributes, state, uuid, cookie, &IdentityRewriter)
}

pub fn decode_entry_with_rewriter(
    dn: &str,
    attributes: Vec<RawAttribute>,
    state: SyncState,
    uuid: Uuid16,
    cookie: Option<Box<str>>,
    rewriter: &dyn NameRewriter,
) -> EntryMessage {
    let modifications = attributes
        .into_iter()
        .filter(|attr| !attr.name.eq_ignore_ascii_case(CONTEXT_CSN_ATTRIBUTE))
        .map(|attr| Modification {
            attribute: attr.name,
            op: ModOp::Replace,
            values: attr.values,
        })
        .collect();

    EntryMessage {
        dn: Dn::new(rewriter.rewrite(dn)),
        uuid,
        state,
        modifications,
        cookie,
    }
}
