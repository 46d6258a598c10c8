//! Diff Computation (spec §4.8): turns an old/new attribute-value
//! snapshot pair into a modification list, honoring each attribute's
//! equality rule, sortedness, and single-valuedness.

use std::cmp::Ordering;
use std::collections::HashSet;

use dirsync_primitives::{ChangeStamp, ModOp};

use crate::directory::Modification;
use crate::schema::{AttributeSchema, EqualityRule};

/// The standard operational attributes kept colocated with any other
/// modification on an entry (spec §4.8's final bullet).
pub struct OperationalTouch {
    pub modifiers_name: Box<str>,
    pub modify_timestamp: Box<str>,
    pub entry_csn: ChangeStamp,
}

#[must_use]
pub fn diff_entry(
    old: &[(Box<str>, Vec<Vec<u8>>)],
    new: &[(Box<str>, Vec<Vec<u8>>)],
    schema: &dyn AttributeSchema,
    touch: Option<&OperationalTouch>,
) -> Vec<Modification> {
    let mut mods = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for (attr, new_values) in new {
        seen.insert(attr);
        match old.iter().find(|(a, _)| a == attr) {
            None => mods.push(Modification {
                attribute: attr.clone(),
                op: ModOp::Add,
                values: new_values.clone(),
            }),
            Some((_, old_values)) => {
                mods.extend(diff_attribute(attr, old_values, new_values, schema));
            }
        }
    }

    for (attr, _) in old {
        if !seen.contains(attr.as_ref()) {
            mods.push(Modification {
                attribute: attr.clone(),
                op: ModOp::Delete,
                values: Vec::new(),
            });
        }
    }

    if !mods.is_empty() {
        if let Some(touch) = touch {
            mods.push(Modification {
                attribute: "modifiersName".into(),
                op: ModOp::Replace,
                values: vec![touch.modifiers_name.as_bytes().to_vec()],
            });
            mods.push(Modification {
                attribute: "modifyTimestamp".into(),
                op: ModOp::Replace,
                values: vec![touch.modify_timestamp.as_bytes().to_vec()],
            });
            mods.push(Modification {
                attribute: "entryCSN".into(),
                op: ModOp::Replace,
                values: vec![touch.entry_csn.as_str().as_bytes().to_vec()],
            });
        }
    }

    mods
}

fn diff_attribute(
    attr: &str,
    old: &[Vec<u8>],
    new: &[Vec<u8>],
    schema: &dyn AttributeSchema,
) -> Vec<Modification> {
    if old == new {
        return Vec::new();
    }

    if schema.equality_rule(attr) == EqualityRule::None || attr.eq_ignore_ascii_case("objectClass")
    {
        return vec![Modification {
            attribute: attr.into(),
            op: ModOp::Replace,
            values: new.to_vec(),
        }];
    }

    if schema.is_single_valued(attr) {
        return vec![Modification {
            attribute: attr.into(),
            op: ModOp::Replace,
            values: new.to_vec(),
        }];
    }

    if schema.is_sorted_values(attr) {
        return merge_walk(attr, old, new);
    }

    set_diff(attr, old, new, schema.equality_rule(attr))
}

/// Merge-style walk for attributes whose values arrive already sorted:
/// elements unique to `old` become deletes, unique to `new` become
/// adds.
fn merge_walk(attr: &str, old: &[Vec<u8>], new: &[Vec<u8>]) -> Vec<Modification> {
    let mut deletes = Vec::new();
    let mut adds = Vec::new();
    let mut oi = old.iter().peekable();
    let mut ni = new.iter().peekable();

    loop {
        match (oi.peek(), ni.peek()) {
            (Some(&o), Some(&n)) => match o.cmp(n) {
                Ordering::Less => {
                    deletes.push(o.clone());
                    oi.next();
                }
                Ordering::Greater => {
                    adds.push(n.clone());
                    ni.next();
                }
                Ordering::Equal => {
                    oi.next();
                    ni.next();
                }
            },
            (Some(&o), None) => {
                deletes.push(o.clone());
                oi.next();
            }
            (None, Some(&n)) => {
                adds.push(n.clone());
                ni.next();
            }
            (None, None) => break,
        }
    }

    finish(attr, deletes, adds)
}

fn set_diff(attr: &str, old: &[Vec<u8>], new: &[Vec<u8>], rule: EqualityRule) -> Vec<Modification> {
    let equal = |a: &[u8], b: &[u8]| match rule {
        EqualityRule::CaseIgnore => a.eq_ignore_ascii_case(b),
        EqualityRule::CaseExact | EqualityRule::None => a == b,
    };

    let deletes: Vec<Vec<u8>> = old
        .iter()
        .filter(|ov| !new.iter().any(|nv| equal(ov, nv)))
        .cloned()
        .collect();
    let adds: Vec<Vec<u8>> = new
        .iter()
        .filter(|nv| !old.iter().any(|ov| equal(ov, nv)))
        .cloned()
        .collect();

    finish(attr, deletes, adds)
}

fn finish(attr: &str, deletes: Vec<Vec<u8>>, adds: Vec<Vec<u8>>) -> Vec<Modification> {
    let mut out = Vec::new();
    if !deletes.is_empty() {
        out.push(Modification {
            attribute: attr.into(),
            op: ModOp::Delete,
            values: deletes,
        });
    }
    if !adds.is_empty() {
        out.push(Modification {
            attribute: attr.into(),
            op: ModOp::Add,
            values: adds,
        });
    }
    out
}

/// Applies a modification list to an attribute snapshot, for the
/// round-trip property test (spec §8 property 6).
#[must_use]
pub fn apply_modifications(
    entry: &[(Box<str>, Vec<Vec<u8>>)],
    mods: &[Modification],
) -> Vec<(Box<str>, Vec<Vec<u8>>)> {
    let mut out: Vec<(Box<str>, Vec<Vec<u8>>)> = entry.to_vec();
    for m in mods {
        let pos = out.iter().position(|(a, _)| **a == *m.attribute);
        match m.op {
            ModOp::Replace => {
                if m.values.is_empty() {
                    if let Some(i) = pos {
                        out.remove(i);
                    }
                } else if let Some(i) = pos {
                    out[i].1 = m.values.clone();
                } else {
                    out.push((m.attribute.clone(), m.values.clone()));
                }
            }
            ModOp::Add => {
                if let Some(i) = pos {
                    out[i].1.extend(m.values.iter().cloned());
                } else {
                    out.push((m.attribute.clone(), m.values.clone()));
                }
            }
            ModOp::Delete => {
                if let Some(i) = pos {
                    if m.values.is_empty() {
                        out.remove(i);
                    } else {
                        out[i].1.retain(|v| !m.values.contains(v));
                        if out[i].1.is_empty() {
                            out.remove(i);
                        }
                    }
                }
            }
            ModOp::Increment => {}
        }
    }
    out
}
