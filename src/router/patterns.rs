//! Named regex fragments substituted into route parameter constraints.

use std::collections::HashMap;

/// Registry of named constraint fragments. Seeded with the common set;
/// re-inserting a name replaces the fragment.
#[derive(Clone, Debug)]
pub struct PatternRegistry {
    patterns: HashMap<String, String>,
}

impl Default for PatternRegistry {
    fn default() -> Self {
        let mut patterns = HashMap::new();
        patterns.insert("int".to_string(), r"\d+".to_string());
        patterns.insert("string".to_string(), "[a-zA-Z]+".to_string());
        patterns.insert("slug".to_string(), "[a-zA-Z0-9-]+".to_string());
        patterns.insert(
            "uuid".to_string(),
            "[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}".to_string(),
        );
        patterns.insert("any".to_string(), "[^/]+".to_string());
        PatternRegistry { patterns }
    }
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, pattern: impl Into<String>) {
        self.patterns.insert(name.into(), pattern.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.patterns.contains_key(name)
    }

    /// Resolve a constraint: a registered name yields its fragment, anything
    /// else is taken as a literal regex fragment.
    pub fn resolve<'a>(&'a self, constraint: &'a str) -> &'a str {
        self.patterns.get(constraint).map(String::as_str).unwrap_or(constraint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_set_is_seeded() {
        let reg = PatternRegistry::new();
        for name in ["int", "string", "slug", "uuid", "any"] {
            assert!(reg.contains(name), "missing default pattern {name}");
        }
        assert_eq!(reg.resolve("int"), r"\d+");
    }

    #[test]
    fn unregistered_constraint_passes_through() {
        let reg = PatternRegistry::new();
        assert_eq!(reg.resolve("[0-9]{4}"), "[0-9]{4}");
    }

    #[test]
    fn reinsert_replaces() {
        let mut reg = PatternRegistry::new();
        reg.insert("int", "[0-9]+");
        assert_eq!(reg.resolve("int"), "[0-9]+");
    }
}
