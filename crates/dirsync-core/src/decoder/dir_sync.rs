//! Dir-sync dialect (spec §4.5.4): entries arrive already as a
//! differential. Per-attribute "incremental add"/"incremental delete"
//! tags become soft-add/soft-delete modifications; the overall change
//! type is inferred from a deletion flag and the presence of
//! `whenCreated` rather than carried explicitly on the wire.

use dirsync_primitives::{ChangeStamp, ChangeType, Dn, ModOp, Uuid16};

use super::OpMessage;
use crate::directory::Modification;

const WHEN_CREATED: &str = "whenCreated";
const CREATE_TIMESTAMP: &str = "createTimestamp";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirSyncAttrOp {
    IncrementalAdd,
    IncrementalDelete,
    Replace,
}

#[derive(Clone, Debug)]
pub struct DirSyncAttribute {
    pub name: Box<str>,
    pub op: DirSyncAttrOp,
    pub values: Vec<Vec<u8>>,
}

pub struct DirSyncRecord<'a> {
    pub dn: &'a str,
    pub uuid: Uuid16,
    pub attributes: Vec<DirSyncAttribute>,
    pub deleted: bool,
    pub change_stamp: &'a str,
}

#[must_use]
pub fn decode(record: DirSyncRecord<'_>) -> OpMessage {
    let when_created = record
        .attributes
        .iter()
        .find(|attr| attr.name.eq_ignore_ascii_case(WHEN_CREATED))
        .map(|attr| attr.values.clone());

    let change_type = if record.deleted {
        ChangeType::Delete
    } else if when_created.is_some() {
        ChangeType::Add
    } else {
        ChangeType::Modify
    };

    let mut modifications: Vec<Modification> = record
        .attributes
        .into_iter()
        .map(|attr| Modification {
            attribute: attr.name,
            op: match attr.op {
                DirSyncAttrOp::IncrementalAdd => ModOp::Add,
                DirSyncAttrOp::IncrementalDelete => ModOp::Delete,
                DirSyncAttrOp::Replace => ModOp::Replace,
            },
            values: attr.values,
        })
        .collect();

    if let Some(values) = when_created.filter(|_| change_type == ChangeType::Add) {
        modifications.push(Modification {
            attribute: CREATE_TIMESTAMP.into(),
            op: ModOp::Replace,
            values,
        });
    }

    OpMessage {
        dn: Dn::new(record.dn),
        uuid: Some(record.uuid),
        change_type,
        modifications,
        new_rdn: None,
        delete_old_rdn: false,
        new_superior: None,
        change_stamp: Some(ChangeStamp::new(record.change_stamp)),
        watermark: None,
        relaxed: false,
    }
}
