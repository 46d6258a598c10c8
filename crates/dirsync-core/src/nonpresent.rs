//! Non-present Reconciliation (spec §4.7): after a refresh's present
//! phase, anything the source's filter still matches locally but that
//! never showed up in the present set is gone upstream and should be
//! deleted (promoted to glue if it has children, same as a direct
//! delete).

use dirsync_primitives::ChangeStamp;

use crate::applier::{delete_or_glue, ApplyContext};
use crate::directory::SearchOp;
use crate::error::CoreResult;
use crate::present_set::PresentSet;

/// Runs the reconciliation search, drains everything not seen during
/// the present phase as a delete, and returns how many were removed.
/// `stamp` is the cookie's delete-stamp component, stamped onto any
/// glue conversion a non-present delete triggers.
pub async fn reconcile(
    ctx: &ApplyContext<'_>,
    search: SearchOp,
    present: &mut PresentSet,
    stamp: &ChangeStamp,
) -> CoreResult<usize> {
    let hits = ctx
        .directory
        .search(search)
        .await
        .map_err(crate::error::CoreError::Directory)?;

    let mut stale = Vec::new();
    for hit in hits {
        if present.find(hit.uuid) {
            present.delete(hit.uuid);
        } else {
            stale.push(hit);
        }
    }

    let count = stale.len();
    for peer in stale {
        delete_or_glue(ctx, peer, stamp.clone()).await?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::mock::MockDirectory;
    use crate::directory::PeerEntry;
    use crate::schema::PermissiveSchema;
    use dirsync_primitives::{ChangeStamp, Dn, Uuid16};

    #[tokio::test]
    async fn entries_missing_from_the_present_set_are_deleted() {
        let directory = MockDirectory::new();
        let suffix = Dn::new("dc=example,dc=com");
        let schema = PermissiveSchema;
        let ctx = ApplyContext {
            directory: &directory,
            suffix: &suffix,
            schema: &schema,
            is_refresh: true,
            modifiers_name: "cn=admin",
        };

        let seen = Dn::new("uid=seen,dc=example,dc=com");
        let seen_uuid = Uuid16::from_bytes([1; 16]);
        directory.seed(PeerEntry {
            dn: seen.clone(),
            ndn: seen.normalize(),
            uuid: seen_uuid,
            entry_csn: ChangeStamp::new("x"),
            attributes: Vec::new(),
            has_children: false,
        });

        let gone = Dn::new("uid=gone,dc=example,dc=com");
        let gone_uuid = Uuid16::from_bytes([2; 16]);
        directory.seed(PeerEntry {
            dn: gone.clone(),
            ndn: gone.normalize(),
            uuid: gone_uuid,
            entry_csn: ChangeStamp::new("x"),
            attributes: Vec::new(),
            has_children: false,
        });

        let mut present = PresentSet::new();
        present.insert(seen_uuid);

        let removed = reconcile(
            &ctx,
            crate::directory::SearchOp {
                base: suffix.clone(),
                filter: "(objectClass=*)".into(),
                size_limit: None,
            },
            &mut present,
            &ChangeStamp::new("20240101T000000.000009Z#1"),
        )
        .await
        .unwrap();

        assert_eq!(removed, 1);
        assert!(directory.get(&seen).is_some());
        assert!(directory.get(&gone).is_none());
    }
}
