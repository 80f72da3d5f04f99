//! Operator-supplied named parameters for encoding commands.

use super::EncodeError;

/// Ordered `(name, value)` string pairs, looked up case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamedParameters {
    pairs: Vec<(String, String)>,
}

impl NamedParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zips parallel name and value lists, as submitted by an operator form.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::ParameterCount`] if the lists differ in length.
    pub fn from_pairs<N: AsRef<str>, V: AsRef<str>>(names: &[N], values: &[V]) -> Result<Self, EncodeError> {
        if names.len() != values.len() {
            return Err(EncodeError::ParameterCount {
                names: names.len(),
                values: values.len(),
            });
        }
        Ok(names
            .iter()
            .zip(values)
            .map(|(n, v)| (n.as_ref().to_string(), v.as_ref().to_string()))
            .collect())
    }

    /// Appends a parameter; builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((name.into(), value.into()));
    }

    /// Value of the first parameter whose name matches case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for NamedParameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_is_case_insensitive() {
        let params = NamedParameters::new().with("Interval", "30");
        assert_eq!(params.get("interval"), Some("30"));
        assert_eq!(params.get("INTERVAL"), Some("30"));
        assert_eq!(params.get("other"), None);
    }

    #[test]
    fn test_from_pairs_rejects_mismatched_lengths() {
        let result = NamedParameters::from_pairs(&["a", "b"], &["1"]);
        assert!(matches!(
            result,
            Err(EncodeError::ParameterCount { names: 2, values: 1 })
        ));
    }

    #[test]
    fn test_from_pairs_keeps_order() {
        let params = NamedParameters::from_pairs(&["b", "a"], &["2", "1"]).unwrap();
        let names: Vec<&str> = params.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
