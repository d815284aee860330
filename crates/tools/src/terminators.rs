//! Reserved terminator tools.
//!
//! A successful invocation of any tool in this table ends the run after
//! its result is emitted. The set is configuration, not special-casing,
//! so deployments can add their own.

use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct Terminators {
    names: HashSet<String>,
}

impl Default for Terminators {
    fn default() -> Self {
        Self::new(["ask", "complete"].into_iter().map(String::from))
    }
}

impl Terminators {
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }

    pub fn is_terminator(&self, tool_name: &str) -> bool {
        self.names.contains(tool_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_set() {
        let t = Terminators::default();
        assert!(t.is_terminator("ask"));
        assert!(t.is_terminator("complete"));
        assert!(!t.is_terminator("calc"));
    }

    #[test]
    fn configured_additions() {
        let t = Terminators::new(
            ["ask", "complete", "handoff"].into_iter().map(String::from),
        );
        assert!(t.is_terminator("handoff"));
    }
}
