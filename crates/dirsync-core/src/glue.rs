//! Glue Builder (spec §4.9): materializes missing ancestors of a
//! target DN, up to (not including) the database's suffix, as
//! synthetic `glue` entries so an add or a non-leaf delete can proceed.

use dirsync_primitives::Dn;

use crate::directory::{AddOp, DirectoryError, DirectoryOps, OpFlags};
use crate::error::{CoreError, CoreResult};

fn glue_attributes() -> Vec<(Box<str>, Vec<Vec<u8>>)> {
    vec![
        (
            "objectClass".into(),
            vec![b"top".to_vec(), b"glue".to_vec()],
        ),
        ("structuralObjectClass".into(), vec![b"glue".to_vec()]),
    ]
}

/// Walks the parent chain of `target` up to (exclusive of) `suffix`,
/// creating any ancestor that doesn't yet exist, topmost first. Returns
/// the DNs actually created.
pub async fn build_glue_chain(
    directory: &dyn DirectoryOps,
    target: &Dn,
    suffix: &Dn,
) -> CoreResult<Vec<Dn>> {
    let mut ancestors = Vec::new();
    let mut current = target.parent();
    while let Some(dn) = current {
        if dn.normalize().as_str() == suffix.normalize().as_str() || !dn.is_subordinate_to(suffix)
        {
            break;
        }
        current = dn.parent();
        ancestors.push(dn);
    }
    ancestors.reverse();

    let mut created = Vec::new();
    for dn in ancestors {
        if directory
            .fetch(&dn)
            .await
            .map_err(CoreError::Directory)?
            .is_some()
        {
            continue;
        }
        let result = directory
            .add(AddOp {
                dn: dn.clone(),
                attributes: glue_attributes(),
                op_csn: None,
                flags: OpFlags {
                    non_replicated: true,
                    ignore_schema: true,
                },
            })
            .await;
        match result {
            Ok(()) | Err(DirectoryError::AlreadyExists(_)) => created.push(dn),
            Err(other) => {
                return Err(CoreError::GlueChainBroken(format!("{dn}: {other}")));
            }
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::mock::MockDirectory;

    #[tokio::test]
    async fn creates_every_missing_ancestor_topmost_first() {
        let directory = MockDirectory::new();
        let suffix = Dn::new("dc=example,dc=com");
        let target = Dn::new("uid=bob,ou=people,ou=staff,dc=example,dc=com");

        let created = build_glue_chain(&directory, &target, &suffix).await.unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].as_str(), "ou=staff,dc=example,dc=com");
        assert_eq!(created[1].as_str(), "ou=people,ou=staff,dc=example,dc=com");

        assert!(directory.get(&created[0]).is_some());
        assert!(directory.get(&created[1]).is_some());
    }

    #[tokio::test]
    async fn already_existing_ancestor_is_skipped_without_error() {
        let directory = MockDirectory::new();
        let suffix = Dn::new("dc=example,dc=com");
        let parent = Dn::new("ou=people,dc=example,dc=com");
        directory.seed(crate::directory::PeerEntry {
            dn: parent.clone(),
            ndn: parent.normalize(),
            uuid: dirsync_primitives::Uuid16::from_bytes([9; 16]),
            entry_csn: dirsync_primitives::ChangeStamp::new("x"),
            attributes: Vec::new(),
            has_children: false,
        });
        let target = Dn::new("uid=bob,ou=people,dc=example,dc=com");

        let created = build_glue_chain(&directory, &target, &suffix).await.unwrap();
        assert!(created.is_empty());
    }
}
