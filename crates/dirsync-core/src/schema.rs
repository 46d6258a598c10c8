//! Attribute schema facts the Diff Computation (spec §4.8) and the
//! delta-dialect decoders (spec §4.5) both need: equality matching
//! rule, whether values are naturally sorted, and single-valuedness.
//! A real schema lives in the directory backend; this trait is the
//! narrow slice of it the engine consults.

/// How two values of an attribute are compared for diffing purposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EqualityRule {
    /// No equality matching rule defined — always replace wholesale.
    None,
    CaseExact,
    CaseIgnore,
}

pub trait AttributeSchema: Send + Sync {
    fn equality_rule(&self, attribute: &str) -> EqualityRule;

    /// Declares that this attribute's values arrive already sorted, so
    /// the diff can use a merge-style walk instead of set comparison.
    fn is_sorted_values(&self, attribute: &str) -> bool;

    fn is_single_valued(&self, attribute: &str) -> bool;

    /// Dynamic (e.g. operationally computed) attributes are never
    /// replicated; decoders drop them outright.
    fn is_dynamic(&self, attribute: &str) -> bool;
}

/// A conservative schema that treats every attribute as multi-valued,
/// case-exact, unsorted, and non-dynamic except for a small built-in
/// set of well-known operational attributes. Useful for tests and as
/// a starting point for a real backend's schema adapter.
#[derive(Clone, Copy, Debug, Default)]
pub struct PermissiveSchema;

const SINGLE_VALUED: &[&str] = &[
    "contextCSN",
    "entryCSN",
    "entryUUID",
    "createTimestamp",
    "modifyTimestamp",
    "modifiersName",
    "structuralObjectClass",
];

const DYNAMIC: &[&str] = &["vendorVersion", "currentTime"];

impl AttributeSchema for PermissiveSchema {
    fn equality_rule(&self, attribute: &str) -> EqualityRule {
        if attribute.eq_ignore_ascii_case("objectClass") {
            EqualityRule::None
        } else {
            EqualityRule::CaseIgnore
        }
    }

    fn is_sorted_values(&self, _attribute: &str) -> bool {
        false
    }

    fn is_single_valued(&self, attribute: &str) -> bool {
        SINGLE_VALUED
            .iter()
            .any(|name| name.eq_ignore_ascii_case(attribute))
    }

    fn is_dynamic(&self, attribute: &str) -> bool {
        DYNAMIC.iter().any(|name| name.eq_ignore_ascii_case(attribute))
    }
}
