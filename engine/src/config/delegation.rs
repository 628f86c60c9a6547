//! Delegation matrix: which agent may hand work to which.

use std::collections::{BTreeMap, BTreeSet};

/// Allowed `from -> to` delegations, built once at session start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelegationMatrix {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DelegationMatrix {
    pub fn allow(&mut self, from: &str, to: &str) {
        self.edges
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
    }

    pub fn allows(&self, from: &str, to: &str) -> bool {
        self.edges
            .get(from)
            .map(|children| children.contains(to))
            .unwrap_or(false)
    }

    /// Children of `from` in sorted order, used for the delegate tool enum
    pub fn children(&self, from: &str) -> Vec<String> {
        self.edges
            .get(from)
            .map(|children| children.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_sorted_and_deduplicated() {
        let mut matrix = DelegationMatrix::default();
        matrix.allow("root", "debug");
        matrix.allow("root", "coder");
        matrix.allow("root", "debug");

        assert_eq!(matrix.children("root"), vec!["coder", "debug"]);
        assert!(matrix.children("debug").is_empty());
        assert!(!matrix.allows("debug", "root"));
    }
}
