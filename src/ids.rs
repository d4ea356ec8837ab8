use std::fmt;

/// A flat's canonical identifier: the input trimmed and uppercased.
///
/// All registry keys, database lookups, and equality comparisons go through
/// this type so "a1", " A1 ", and "A1" are always the same flat everywhere
/// (spec: `normalize("  ab12  ") == "AB12"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlatId(String);

impl FlatId {
    pub fn canonicalize(raw: &str) -> Self {
        Self(raw.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for FlatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<FlatId> for String {
    fn from(id: FlatId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_trims_and_uppercases() {
        assert_eq!(FlatId::canonicalize("  ab12  ").as_str(), "AB12");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let once = FlatId::canonicalize("  ab12  ");
        let twice = FlatId::canonicalize(once.as_str());
        assert_eq!(once, twice);
    }

    #[test]
    fn equal_under_canonicalization_compare_equal() {
        assert_eq!(FlatId::canonicalize("a1"), FlatId::canonicalize(" A1 "));
    }
}
