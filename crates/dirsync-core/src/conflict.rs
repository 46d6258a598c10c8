//! Conflict Resolver for the delta modify path (spec §4.10): when an
//! incoming modify's stamp is older than the local peer's, its
//! modification list is reconciled pairwise against every newer log
//! record on the same attribute before being applied.

use dirsync_primitives::ModOp;

use crate::directory::Modification;
use crate::schema::AttributeSchema;

/// A single newer log record's modification list, already decoded.
pub struct NewerRecord {
    pub modifications: Vec<Modification>,
}

/// Reconciles `incoming` against every modification in `newer`, oldest
/// newer-record first, per the resolution table in spec §4.10.
#[must_use]
pub fn reconcile(
    mut incoming: Vec<Modification>,
    newer: &[NewerRecord],
    schema: &dyn AttributeSchema,
) -> Vec<Modification> {
    for record in newer {
        for n in &record.modifications {
            incoming = reconcile_one(incoming, n, schema);
        }
    }
    demote(incoming, schema)
}

fn reconcile_one(
    current: Vec<Modification>,
    newer: &Modification,
    schema: &dyn AttributeSchema,
) -> Vec<Modification> {
    // A replace is treated as delete-all followed by add, then the two
    // rules below apply in sequence.
    if newer.op == ModOp::Replace {
        let delete_all = Modification {
            attribute: newer.attribute.clone(),
            op: ModOp::Delete,
            values: Vec::new(),
        };
        let add = Modification {
            attribute: newer.attribute.clone(),
            op: ModOp::Add,
            values: newer.values.clone(),
        };
        let current = reconcile_one(current, &delete_all, schema);
        return reconcile_one(current, &add, schema);
    }

    current
        .into_iter()
        .filter_map(|mut m| {
            if m.attribute != newer.attribute {
                return Some(m);
            }
            match (newer.op, m.op) {
                // delete-all | add X  -> drop M
                // delete-all | delete X -> drop M
                (ModOp::Delete, _) if newer.values.is_empty() => None,
                // delete X | delete Y -> drop Y from M if it equals X
                (ModOp::Delete, ModOp::Delete) => {
                    m.values.retain(|v| !newer.values.contains(v));
                    (!m.values.is_empty()).then_some(m)
                }
                // add X | add X -> drop M; single-valued drops regardless
                (ModOp::Add, ModOp::Add) => {
                    if schema.is_single_valued(&m.attribute) {
                        None
                    } else {
                        m.values.retain(|v| !newer.values.contains(v));
                        (!m.values.is_empty()).then_some(m)
                    }
                }
                // add X | delete X -> drop X from M
                (ModOp::Add, ModOp::Delete) => {
                    m.values.retain(|v| !newer.values.contains(v));
                    Some(m)
                }
                _ => Some(m),
            }
        })
        .collect()
}

/// Demotes any remaining `add` on a single-valued attribute to
/// `replace` (spec §4.10 step 4). Remaining deletes are already
/// tolerant of a concurrently-vanished value (the directory's delete
/// semantics ignore a missing value), so no further transform is
/// needed for the "soft-delete" half of that step.
fn demote(mods: Vec<Modification>, schema: &dyn AttributeSchema) -> Vec<Modification> {
    mods.into_iter()
        .map(|mut m| {
            if m.op == ModOp::Add && schema.is_single_valued(&m.attribute) {
                m.op = ModOp::Replace;
            }
            m
        })
        .collect()
}
