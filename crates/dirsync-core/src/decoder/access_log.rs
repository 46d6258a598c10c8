//! Access-log delta dialect (spec §4.5.2): each record names a target
//! DN, a change type, and a `changes` text blob in the line-oriented
//! `attr:OP value` format, one line per value, with an empty `attr:`
//! line starting a fresh modification group for that attribute.

use std::collections::HashSet;

use dirsync_primitives::{ChangeType, Dn, ModOp, Uuid16};

use super::OpMessage;
use crate::directory::Modification;
use crate::schema::AttributeSchema;

pub struct AccessLogRecord<'a> {
    pub target_dn: &'a str,
    pub entry_uuid: Uuid16,
    pub change_type: ChangeType,
    pub changes: &'a str,
    pub new_rdn: Option<&'a str>,
    pub delete_old_rdn: bool,
    pub new_superior: Option<&'a str>,
    pub change_stamp: &'a str,
    pub relaxed: bool,
}

/// Parses the `changes` blob into one [`Modification`] per
/// `(attribute, op)` run, filtering dynamic attributes and the
/// source's configured exclude list, and demoting single-valued
/// `add`/`delete` to `replace`/soft-delete (spec §4.5.2).
#[must_use]
pub fn parse_changes_blob(
    blob: &str,
    schema: &dyn AttributeSchema,
    exclude: &HashSet<Box<str>>,
) -> Vec<Modification> {
    let mut groups: Vec<Modification> = Vec::new();

    for line in blob.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let Some((attr, rest)) = line.split_once(':') else {
            continue;
        };

        if rest.is_empty() {
            groups.push(Modification {
                attribute: attr.into(),
                op: ModOp::Replace,
                values: Vec::new(),
            });
            continue;
        }

        let mut chars = rest.chars();
        let Some(op_char) = chars.next() else {
            continue;
        };
        let op = match op_char {
            '+' => ModOp::Add,
            '-' => ModOp::Delete,
            '=' => ModOp::Replace,
            '#' => ModOp::Increment,
            _ => continue,
        };
        let value = chars.as_str().trim_start().as_bytes().to_vec();

        if let Some(last) = groups.last_mut() {
            if *last.attribute == *attr && last.op == op {
                last.values.push(value);
                continue;
            }
        }
        groups.push(Modification {
            attribute: attr.into(),
            op,
            values: vec![value],
        });
    }

    groups
        .into_iter()
        .filter(|m| !schema.is_dynamic(&m.attribute) && !exclude.contains(&m.attribute))
        .map(|mut m| {
            if schema.is_single_valued(&m.attribute) {
                if m.op == ModOp::Add {
                    m.op = ModOp::Replace;
                } else if m.op == ModOp::Delete {
                    // Soft-delete: drop the specific value the log recorded
                    // and delete whatever's actually there now, so a stale
                    // logged value (superseded by a later replace) can't
                    // make the delete a no-op mismatch.
                    m.values.clear();
                }
            }
            m
        })
        .collect()
}

#[must_use]
pub fn decode(
    record: &AccessLogRecord<'_>,
    schema: &dyn AttributeSchema,
    exclude: &HashSet<Box<str>>,
) -> OpMessage {
    let modifications = parse_changes_blob(record.changes, schema, exclude);
    OpMessage {
        dn: Dn::new(record.target_dn),
        uuid: Some(record.entry_uuid),
        change_type: record.change_type,
        modifications,
        new_rdn: record.new_rdn.map(Into::into),
        delete_old_rdn: record.delete_old_rdn,
        new_superior: record.new_superior.map(Dn::new),
        change_stamp: Some(dirsync_primitives::ChangeStamp::new(record.change_stamp)),
        watermark: None,
        relaxed: record.relaxed,
    }
}
