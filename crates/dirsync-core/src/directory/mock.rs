//! An in-memory reference [`DirectoryOps`] used by the test suite and
//! by `dirsyncd --dry-run`. Gated behind the `testing` feature the way
//! `calimero-dag`'s in-memory test fixtures are.

use async_trait::async_trait;
use dashmap::DashMap;
use dirsync_primitives::{ChangeStamp, Dn, ModOp, NormalizedDn, SyncCookie, Uuid16};
use parking_lot::Mutex;

use super::{
    AddOp, DeleteOp, DirectoryError, DirectoryOps, DirectoryResult, ModRdnOp, ModifyOp, PeerEntry,
    SearchOp,
};

#[derive(Default)]
pub struct MockDirectory {
    by_ndn: DashMap<String, PeerEntry>,
    context_csn: Mutex<Option<SyncCookie>>,
}

impl MockDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, entry: PeerEntry) {
        let _prev = self.by_ndn.insert(entry.ndn.as_str().to_owned(), entry);
    }

    #[must_use]
    pub fn get(&self, dn: &Dn) -> Option<PeerEntry> {
        self.by_ndn.get(dn.normalize().as_str()).map(|e| e.clone())
    }

    fn children_of(&self, ndn: &NormalizedDn) -> bool {
        let suffix = format!(",{}", ndn.as_str());
        self.by_ndn.iter().any(|e| e.key().ends_with(&suffix))
    }

    fn apply_modification(entry: &mut PeerEntry, modification: &super::Modification) {
        let attrs = &mut entry.attributes;
        let pos = attrs.iter().position(|(name, _)| **name == *modification.attribute);
        match modification.op {
            ModOp::Replace => {
                if modification.values.is_empty() {
                    if let Some(i) = pos {
                        attrs.remove(i);
                    }
                } else if let Some(i) = pos {
                    attrs[i].1 = modification.values.clone();
                } else {
                    attrs.push((modification.attribute.clone(), modification.values.clone()));
                }
            }
            ModOp::Add => {
                if let Some(i) = pos {
                    attrs[i].1.extend(modification.values.iter().cloned());
                } else {
                    attrs.push((modification.attribute.clone(), modification.values.clone()));
                }
            }
            ModOp::Delete => {
                if let Some(i) = pos {
                    if modification.values.is_empty() {
                        attrs.remove(i);
                    } else {
                        attrs[i]
                            .1
                            .retain(|v| !modification.values.contains(v));
                        if attrs[i].1.is_empty() {
                            attrs.remove(i);
                        }
                    }
                }
            }
            ModOp::Increment => {
                // Not meaningful for opaque byte values in the mock; no-op.
            }
        }
    }
}

#[async_trait]
impl DirectoryOps for MockDirectory {
    async fn find_by_uuid(&self, _base: &Dn, uuid: Uuid16) -> DirectoryResult<Option<PeerEntry>> {
        Ok(self.by_ndn.iter().find(|e| e.uuid == uuid).map(|e| e.clone()))
    }

    async fn add(&self, op: AddOp) -> DirectoryResult<()> {
        let ndn = op.dn.normalize();
        if self.by_ndn.contains_key(ndn.as_str()) {
            return Err(DirectoryError::AlreadyExists(op.dn));
        }
        let uuid = op
            .attributes
            .iter()
            .find(|(name, _)| &**name == "entryUUID")
            .and_then(|(_, v)| v.first())
            .and_then(|bytes| Uuid16::from_slice(bytes).ok())
            .unwrap_or_else(|| Uuid16::from_bytes([0; 16]));
        let entry_csn = op
            .op_csn
            .clone()
            .unwrap_or_else(|| ChangeStamp::new(String::new()));
        self.by_ndn.insert(
            ndn.clone().as_str().to_owned(),
            PeerEntry {
                dn: op.dn,
                ndn,
                uuid,
                entry_csn,
                attributes: op.attributes,
                has_children: false,
            },
        );
        Ok(())
    }

    async fn modify(&self, op: ModifyOp) -> DirectoryResult<()> {
        let ndn = op.dn.normalize();
        let mut entry = self
            .by_ndn
            .get_mut(ndn.as_str())
            .ok_or_else(|| DirectoryError::NoSuchObject(op.dn.clone()))?;
        for modification in &op.modifications {
            Self::apply_modification(&mut entry, modification);
        }
        if let Some(csn) = op.op_csn {
            entry.entry_csn = csn;
        }
        Ok(())
    }

    async fn modrdn(&self, op: ModRdnOp) -> DirectoryResult<()> {
        let old_ndn = op.dn.normalize();
        let mut entry = self
            .by_ndn
            .remove(old_ndn.as_str())
            .map(|(_, v)| v)
            .ok_or_else(|| DirectoryError::NoSuchObject(op.dn.clone()))?;

        let parent = op
            .new_superior
            .unwrap_or_else(|| op.dn.parent().unwrap_or_else(|| op.dn.clone()));
        let new_dn = Dn::new(format!("{},{}", op.new_rdn, parent));
        let new_ndn = new_dn.normalize();
        entry.dn = new_dn;
        entry.ndn = new_ndn.clone();
        if let Some(csn) = op.op_csn {
            entry.entry_csn = csn;
        }
        self.by_ndn.insert(new_ndn.as_str().to_owned(), entry);
        Ok(())
    }

    async fn delete(&self, op: DeleteOp) -> DirectoryResult<()> {
        let ndn = op.dn.normalize();
        if self.children_of(&ndn) {
            return Err(DirectoryError::NotAllowedOnNonLeaf(op.dn));
        }
        if self.by_ndn.remove(ndn.as_str()).is_none() {
            return Err(DirectoryError::NoSuchObject(op.dn));
        }
        Ok(())
    }

    async fn search(&self, op: SearchOp) -> DirectoryResult<Vec<PeerEntry>> {
        let base = op.base.normalize();
        let mut hits: Vec<PeerEntry> = self
            .by_ndn
            .iter()
            .filter(|e| e.ndn.as_str() == base.as_str() || e.ndn.as_str().ends_with(&format!(",{}", base.as_str())))
            .map(|e| e.clone())
            .collect();
        if let Some(limit) = op.size_limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    async fn fetch(&self, dn: &Dn) -> DirectoryResult<Option<PeerEntry>> {
        Ok(self.get(dn))
    }

    async fn read_context_csn(&self, _context_dn: &Dn) -> DirectoryResult<Option<SyncCookie>> {
        Ok(self.context_csn.lock().clone())
    }

    async fn write_context_csn(
        &self,
        _context_dn: &Dn,
        cookie: &SyncCookie,
        _op_csn: ChangeStamp,
    ) -> DirectoryResult<()> {
        *self.context_csn.lock() = Some(cookie.clone());
        Ok(())
    }
}
