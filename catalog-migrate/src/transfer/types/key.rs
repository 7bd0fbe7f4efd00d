//! Natural key type

use serde::{Deserialize, Serialize};

/// Business key of a record: one normalized part per natural-key field
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey(Vec<String>);

impl NaturalKey {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        NaturalKey(parts.into_iter().map(Into::into).collect())
    }

    /// Build a key from optional parts; absent if any part (or every part) is missing
    pub fn collect<I>(parts: I) -> Option<Self>
    where
        I: IntoIterator<Item = Option<String>>,
    {
        let parts: Vec<String> = parts.into_iter().collect::<Option<_>>()?;
        if parts.is_empty() {
            return None;
        }
        Some(NaturalKey(parts))
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(" / "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_requires_all_parts() {
        assert_eq!(
            NaturalKey::collect([Some("a".to_string()), Some("b".to_string())]),
            Some(NaturalKey::new(["a", "b"]))
        );
        assert_eq!(NaturalKey::collect([Some("a".to_string()), None]), None);
        assert_eq!(NaturalKey::collect(Vec::<Option<String>>::new()), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(NaturalKey::new(["BUNDLE-1", "20"]).to_string(), "BUNDLE-1 / 20");
    }
}
