//! Entry Applier (spec §4.6): given a decoded entry and its sync
//! state, locates any existing local peer by UUID and applies the
//! add/modify/delete branch, promoting a non-leaf delete into a glue
//! conversion and materializing missing ancestors on a during-refresh
//! add failure.

use dirsync_primitives::{ChangeStamp, CookieVector, Dn, ModOp, ServerId, SyncState, Uuid16};
use tracing::{debug, instrument, warn};

use crate::decoder::EntryMessage;
use crate::diff::{diff_entry, OperationalTouch};
use crate::directory::{
    AddOp, DeleteOp, DirectoryError, DirectoryOps, ModRdnOp, Modification, ModifyOp, OpFlags,
    PeerEntry,
};
use crate::error::{CoreError, CoreResult};
use crate::glue::build_glue_chain;
use crate::present_set::PresentSet;
use crate::schema::AttributeSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The incoming change was at or behind a committed stamp for its
    /// sid; dropped silently (spec §4.6 step 6, §7's "Causal (stale)"
    /// row).
    TooOld,
    /// An add raced a local delete of the parent during persist mode;
    /// the cookie vector should be invalidated and the source
    /// restarted (spec §4.6 step 3).
    Restart,
}

pub struct ApplyContext<'a> {
    pub directory: &'a dyn DirectoryOps,
    pub suffix: &'a Dn,
    pub schema: &'a dyn AttributeSchema,
    pub is_refresh: bool,
    pub modifiers_name: &'a str,
}

/// Finds the local peer for `uuid` under `base`, per spec §4.6 step 2
/// (`dn_callback`).
pub async fn locate_peer(
    directory: &dyn DirectoryOps,
    base: &Dn,
    uuid: Uuid16,
) -> CoreResult<Option<PeerEntry>> {
    directory
        .find_by_uuid(base, uuid)
        .await
        .map_err(CoreError::Directory)
}

#[instrument(skip(ctx, msg, committed), fields(uuid = %msg.uuid))]
pub async fn apply_entry(
    ctx: &ApplyContext<'_>,
    base: &Dn,
    msg: EntryMessage,
    op_sid: ServerId,
    op_stamp: &ChangeStamp,
    committed: &CookieVector,
    mut present: Option<&mut PresentSet>,
) -> CoreResult<ApplyOutcome> {
    if let Some(committed_stamp) = committed.get(op_sid) {
        if committed_stamp >= op_stamp {
            return Ok(ApplyOutcome::TooOld);
        }
    }

    if msg.state == SyncState::Present {
        if let Some(present) = present.as_deref_mut() {
            present.insert(msg.uuid);
        }
        return Ok(ApplyOutcome::Applied);
    }

    if msg.state == SyncState::Delete {
        return delete_branch(ctx, base, msg.uuid, op_stamp.clone()).await;
    }

    let peer = locate_peer(ctx.directory, base, msg.uuid).await?;

    match peer {
        None => add_branch(ctx, msg, op_stamp.clone()).await,
        Some(existing) => modify_branch(ctx, existing, msg, op_stamp.clone()).await,
    }
}

async fn add_branch(
    ctx: &ApplyContext<'_>,
    msg: EntryMessage,
    op_stamp: ChangeStamp,
) -> CoreResult<ApplyOutcome> {
    let attributes = group_attributes(&msg.modifications);
    let result = ctx
        .directory
        .add(AddOp {
            dn: msg.dn.clone(),
            attributes,
            op_csn: Some(op_stamp.clone()),
            flags: OpFlags::default(),
        })
        .await;

    match result {
        Ok(()) => Ok(ApplyOutcome::Applied),
        // Stamp-wins (spec §9's open question on "already exists"
        // ambiguity): don't second-guess by attribute, just treat the
        // add as a no-op success.
        Err(DirectoryError::AlreadyExists(_)) => Ok(ApplyOutcome::Applied),
        Err(DirectoryError::NoSuchObject(_)) if !ctx.is_refresh => {
            warn!("no-such-object on add during persist; cookie vector must be invalidated");
            Ok(ApplyOutcome::Restart)
        }
        Err(DirectoryError::NoSuchObject(_)) => {
            let created = build_glue_chain(ctx.directory, &msg.dn, ctx.suffix).await?;
            debug!(count = created.len(), "materialized glue ancestors, retrying add");
            let attributes = group_attributes(&msg.modifications);
            ctx.directory
                .add(AddOp {
                    dn: msg.dn,
                    attributes,
                    op_csn: Some(op_stamp),
                    flags: OpFlags::default(),
                })
                .await
                .map_err(CoreError::Directory)?;
            Ok(ApplyOutcome::Applied)
        }
        Err(other) => Err(CoreError::Directory(other)),
    }
}

async fn modify_branch(
    ctx: &ApplyContext<'_>,
    peer: PeerEntry,
    msg: EntryMessage,
    op_stamp: ChangeStamp,
) -> CoreResult<ApplyOutcome> {
    let renamed = peer.dn.normalize().as_str() != msg.dn.normalize().as_str();

    if renamed {
        let new_rdn = msg
            .dn
            .as_str()
            .split_once(',')
            .map_or(msg.dn.as_str(), |(rdn, _)| rdn);
        let new_superior = msg.dn.parent();
        ctx.directory
            .modrdn(ModRdnOp {
                dn: peer.dn.clone(),
                new_rdn: new_rdn.into(),
                delete_old_rdn: true,
                new_superior,
                op_csn: Some(op_stamp.clone()),
                flags: OpFlags::default(),
            })
            .await
            .map_err(CoreError::Directory)?;
    }

    let touch = OperationalTouch {
        modifiers_name: ctx.modifiers_name.into(),
        modify_timestamp: op_stamp.as_str().into(),
        entry_csn: op_stamp.clone(),
    };
    let incoming = group_attributes(&msg.modifications);
    let modifications = diff_entry(&peer.attributes, &incoming, ctx.schema, Some(&touch));

    if modifications.is_empty() {
        return Ok(ApplyOutcome::Applied);
    }

    ctx.directory
        .modify(ModifyOp {
            dn: msg.dn,
            modifications,
            op_csn: Some(op_stamp),
            flags: OpFlags::default(),
        })
        .await
        .map_err(CoreError::Directory)?;

    Ok(ApplyOutcome::Applied)
}

async fn delete_branch(
    ctx: &ApplyContext<'_>,
    base: &Dn,
    uuid: Uuid16,
    stamp: ChangeStamp,
) -> CoreResult<ApplyOutcome> {
    let Some(peer) = locate_peer(ctx.directory, base, uuid).await? else {
        return Ok(ApplyOutcome::Applied);
    };
    delete_or_glue(ctx, peer, stamp).await
}

/// Deletes `peer`, promoting to a glue conversion if it has children
/// (spec §4.6 step 5, reused by non-present reconciliation in §4.7).
/// `stamp` is the delete's own change stamp (the incoming message's, or
/// the cookie's delete-stamp component for non-present reconciliation);
/// it becomes the glue entry's `entryCSN` if a conversion happens.
pub async fn delete_or_glue(
    ctx: &ApplyContext<'_>,
    peer: PeerEntry,
    stamp: ChangeStamp,
) -> CoreResult<ApplyOutcome> {
    let result = ctx
        .directory
        .delete(DeleteOp {
            dn: peer.dn.clone(),
            flags: OpFlags::default(),
        })
        .await;

    match result {
        Ok(()) | Err(DirectoryError::NoSuchObject(_)) => Ok(ApplyOutcome::Applied),
        Err(DirectoryError::NotAllowedOnNonLeaf(_)) => {
            turn_into_glue(ctx, peer, stamp).await?;
            Ok(ApplyOutcome::Applied)
        }
        Err(other) => Err(CoreError::Directory(other)),
    }
}

async fn turn_into_glue(ctx: &ApplyContext<'_>, peer: PeerEntry, stamp: ChangeStamp) -> CoreResult<()> {
    let modifications = vec![
        Modification {
            attribute: "objectClass".into(),
            op: ModOp::Replace,
            values: vec![b"top".to_vec(), b"glue".to_vec()],
        },
        Modification {
            attribute: "structuralObjectClass".into(),
            op: ModOp::Replace,
            values: vec![b"glue".to_vec()],
        },
        Modification {
            attribute: "entryCSN".into(),
            op: ModOp::Replace,
            values: vec![stamp.as_str().as_bytes().to_vec()],
        },
    ];
    ctx.directory
        .modify(ModifyOp {
            dn: peer.dn,
            modifications,
            op_csn: Some(stamp),
            flags: OpFlags {
                non_replicated: true,
                ignore_schema: true,
            },
        })
        .await
        .map_err(CoreError::Directory)
}

fn group_attributes(mods: &[Modification]) -> Vec<(Box<str>, Vec<Vec<u8>>)> {
    let mut out: Vec<(Box<str>, Vec<Vec<u8>>)> = Vec::new();
    for m in mods {
        if let Some(existing) = out.iter_mut().find(|(a, _)| *a == m.attribute) {
            existing.1.extend(m.values.iter().cloned());
        } else {
            out.push((m.attribute.clone(), m.values.clone()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::mock::MockDirectory;
    use crate::schema::PermissiveSchema;
    use dirsync_primitives::Uuid16;

    fn sid(n: i32) -> ServerId {
        ServerId::new(n).unwrap()
    }

    fn ctx<'a>(directory: &'a MockDirectory, suffix: &'a Dn, schema: &'a PermissiveSchema) -> ApplyContext<'a> {
        ApplyContext {
            directory,
            suffix,
            schema,
            is_refresh: true,
            modifiers_name: "cn=admin",
        }
    }

    #[tokio::test]
    async fn add_of_new_uuid_creates_the_entry() {
        let directory = MockDirectory::new();
        let suffix = Dn::new("dc=example,dc=com");
        let schema = PermissiveSchema;
        let base = Dn::new("dc=example,dc=com");

        let msg = EntryMessage {
            dn: Dn::new("uid=bob,dc=example,dc=com"),
            uuid: Uuid16::from_bytes([1; 16]),
            state: SyncState::Add,
            modifications: vec![Modification {
                attribute: "mail".into(),
                op: ModOp::Replace,
                values: vec![b"bob@example.com".to_vec()],
            }],
            cookie: None,
        };

        let committed = CookieVector::new();
        let outcome = apply_entry(
            &ctx(&directory, &suffix, &schema),
            &base,
            msg,
            sid(1),
            &ChangeStamp::new("20240101T000000.000002Z#1"),
            &committed,
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome, ApplyOutcome::Applied);
        assert!(directory.get(&Dn::new("uid=bob,dc=example,dc=com")).is_some());
    }

    #[tokio::test]
    async fn stamp_at_or_behind_committed_is_dropped() {
        let directory = MockDirectory::new();
        let suffix = Dn::new("dc=example,dc=com");
        let schema = PermissiveSchema;
        let base = Dn::new("dc=example,dc=com");

        let committed = CookieVector::from_pairs(vec![(
            sid(1),
            ChangeStamp::new("20240101T000000.000010Z#1"),
        )])
        .unwrap();

        let msg = EntryMessage {
            dn: Dn::new("uid=bob,dc=example,dc=com"),
            uuid: Uuid16::from_bytes([2; 16]),
            state: SyncState::Add,
            modifications: Vec::new(),
            cookie: None,
        };

        let outcome = apply_entry(
            &ctx(&directory, &suffix, &schema),
            &base,
            msg,
            sid(1),
            &ChangeStamp::new("20240101T000000.000005Z#1"),
            &committed,
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome, ApplyOutcome::TooOld);
    }

    #[tokio::test]
    async fn deleting_a_parent_turns_it_into_glue() {
        let directory = MockDirectory::new();
        let suffix = Dn::new("dc=example,dc=com");
        let schema = PermissiveSchema;
        let base = Dn::new("dc=example,dc=com");

        let parent_uuid = Uuid16::from_bytes([3; 16]);
        let parent = Dn::new("ou=people,dc=example,dc=com");
        directory.seed(PeerEntry {
            dn: parent.clone(),
            ndn: parent.normalize(),
            uuid: parent_uuid,
            entry_csn: ChangeStamp::new("x"),
            attributes: Vec::new(),
            has_children: true,
        });
        let child = Dn::new("uid=bob,ou=people,dc=example,dc=com");
        directory.seed(PeerEntry {
            dn: child.clone(),
            ndn: child.normalize(),
            uuid: Uuid16::from_bytes([4; 16]),
            entry_csn: ChangeStamp::new("x"),
            attributes: Vec::new(),
            has_children: false,
        });

        let msg = EntryMessage {
            dn: parent.clone(),
            uuid: parent_uuid,
            state: SyncState::Delete,
            modifications: Vec::new(),
            cookie: None,
        };

        let committed = CookieVector::new();
        let outcome = apply_entry(
            &ctx(&directory, &suffix, &schema),
            &base,
            msg,
            sid(1),
            &ChangeStamp::new("20240101T000000.000001Z#1"),
            &committed,
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome, ApplyOutcome::Applied);
        let updated = directory.get(&parent).unwrap();
        assert!(updated
            .attributes
            .iter()
            .any(|(name, _)| &**name == "structuralObjectClass"));
        assert_eq!(updated.entry_csn, ChangeStamp::new("20240101T000000.000001Z#1"));
        assert!(directory.get(&child).is_some());
    }
}
