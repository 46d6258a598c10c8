use std::fmt;

/// A distinguished name, exactly as received or constructed.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Dn(Box<str>);

/// The case/space-folded form of a [`Dn`] used for equality and
/// subtree-membership checks.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct NormalizedDn(Box<str>);

impl Dn {
    #[must_use]
    pub fn new(raw: impl Into<Box<str>>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Cheap normalization: lowercase plus collapsed whitespace around
    /// RDN separators. Real schema-aware normalization is a directory
    /// backend concern; the consumer only needs a stable equality key.
    #[must_use]
    pub fn normalize(&self) -> NormalizedDn {
        let folded: String = self
            .0
            .split(',')
            .map(str::trim)
            .collect::<Vec<_>>()
            .join(",")
            .to_lowercase();
        NormalizedDn(folded.into_boxed_str())
    }

    #[must_use]
    pub fn is_subordinate_to(&self, suffix: &Dn) -> bool {
        let me = self.normalize();
        let parent = suffix.normalize();
        me.0 == parent.0 || me.0.ends_with(&format!(",{}", parent.0))
    }

    /// The DN of the immediate parent, or `None` if this is the root.
    #[must_use]
    pub fn parent(&self) -> Option<Dn> {
        self.0.split_once(',').map(|(_, rest)| Dn::new(rest.trim()))
    }
}

impl NormalizedDn {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dn({:?})", self.0)
    }
}

impl fmt::Display for NormalizedDn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
