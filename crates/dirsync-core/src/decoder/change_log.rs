//! Change-log delta dialect (spec §4.5.3): a record names a DN, a
//! change type, a diff blob in a sequential `attr: value` records
//! format, a backend-specific unique-id string, and a decimal change
//! number that becomes the new local high-water mark on success.

use dirsync_primitives::{ChangeStamp, ChangeType, CsnError, Dn, ModOp, Uuid16};

use super::OpMessage;
use crate::directory::Modification;

pub struct ChangeLogRecord<'a> {
    pub target_dn: &'a str,
    pub change_type: ChangeType,
    pub diff_blob: &'a str,
    pub unique_id: &'a str,
    pub change_number: u64,
    pub change_stamp: &'a str,
}

/// Parses `attr: value` lines (one value per line, repeated lines for
/// multi-valued attributes) and `delete: attr` marker lines into a
/// replace/delete modification list. Unlike the access-log dialect
/// there's no per-line operator token — the diff blob already is the
/// desired end state for each named attribute.
#[must_use]
pub fn parse_diff_blob(blob: &str) -> Vec<Modification> {
    let mut mods: Vec<Modification> = Vec::new();

    for line in blob.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim_start();

        if key.eq_ignore_ascii_case("delete") {
            mods.push(Modification {
                attribute: value.into(),
                op: ModOp::Delete,
                values: Vec::new(),
            });
            continue;
        }

        if let Some(last) = mods.last_mut() {
            if *last.attribute == *key && last.op == ModOp::Replace {
                last.values.push(value.as_bytes().to_vec());
                continue;
            }
        }
        mods.push(Modification {
            attribute: key.into(),
            op: ModOp::Replace,
            values: vec![value.as_bytes().to_vec()],
        });
    }

    mods
}

/// Maps a change-log backend's native unique-id string onto the
/// standard 16-byte `entryUUID` space: strip non-hex characters, then
/// left-pad (or take the low 32 hex digits of a longer id) to a full
/// UUID-shaped hex string. This is the "synthetic separator and
/// normalize" step of spec §4.5.3, made concrete.
pub fn normalize_unique_id(raw: &str) -> Result<Uuid16, CsnError> {
    let hex: String = raw.chars().filter(char::is_ascii_hexdigit).collect();
    let hex = if hex.len() > 32 {
        hex[hex.len() - 32..].to_owned()
    } else {
        format!("{hex:0>32}")
    };
    hex.parse()
}

pub fn decode(record: &ChangeLogRecord<'_>) -> Result<OpMessage, CsnError> {
    let uuid = normalize_unique_id(record.unique_id)?;
    Ok(OpMessage {
        dn: Dn::new(record.target_dn),
        uuid: Some(uuid),
        change_type: record.change_type,
        modifications: parse_diff_blob(record.diff_blob),
        new_rdn: None,
        delete_old_rdn: false,
        new_superior: None,
        change_stamp: Some(ChangeStamp::new(record.change_stamp)),
        watermark: Some(record.change_number),
        relaxed: false,
    })
}
