//! Declarative input validation. All rules run and all failures accumulate;
//! callers get the full picture in one pass.

use crate::error::ValidationError;
use crate::sql::exec::Row;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

fn email_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static pattern")
    })
}

#[derive(Clone, Debug)]
pub enum Rule {
    Required,
    MinLength(usize),
    MaxLength(usize),
    Min(f64),
    Max(f64),
    Integer,
    Numeric,
    Email,
    Uuid,
    In(Vec<String>),
    Pattern(regex::Regex),
}

pub struct Validator {
    rules: Vec<(String, Vec<Rule>)>,
}

impl Default for Validator {
    fn default() -> Self {
        Validator::new()
    }
}

impl Validator {
    pub fn new() -> Self {
        Validator { rules: Vec::new() }
    }

    pub fn rule(mut self, field: impl Into<String>, rules: Vec<Rule>) -> Self {
        self.rules.push((field.into(), rules));
        self
    }

    /// Check `data` against every rule. Non-required rules are skipped for
    /// absent or null values, so optional fields only fail when present and
    /// malformed.
    pub fn validate(&self, data: &Row) -> ValidationResult {
        let mut fields: HashMap<String, Vec<String>> = HashMap::new();
        for (field, rules) in &self.rules {
            let value = data.get(field.as_str());
            for rule in rules {
                if let Some(message) = check(field, value, rule) {
                    fields.entry(field.clone()).or_default().push(message);
                }
            }
        }
        ValidationResult { fields }
    }
}

fn is_absent(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn check(field: &str, value: Option<&Value>, rule: &Rule) -> Option<String> {
    if let Rule::Required = rule {
        return is_absent(value).then(|| format!("the {field} field is required"));
    }
    // Remaining rules only constrain present values.
    if is_absent(value) {
        return None;
    }
    let value = value?;
    match rule {
        Rule::Required => None,
        Rule::MinLength(n) => (as_text(value).chars().count() < *n)
            .then(|| format!("the {field} field must be at least {n} characters")),
        Rule::MaxLength(n) => (as_text(value).chars().count() > *n)
            .then(|| format!("the {field} field must be at most {n} characters")),
        Rule::Min(n) => match as_number(value) {
            Some(v) if v >= *n => None,
            _ => Some(format!("the {field} field must be at least {n}")),
        },
        Rule::Max(n) => match as_number(value) {
            Some(v) if v <= *n => None,
            _ => Some(format!("the {field} field must be at most {n}")),
        },
        Rule::Integer => {
            let ok = match value {
                Value::Number(n) => n.is_i64() || n.is_u64(),
                Value::String(s) => s.trim().parse::<i64>().is_ok(),
                _ => false,
            };
            (!ok).then(|| format!("the {field} field must be an integer"))
        }
        Rule::Numeric => as_number(value)
            .is_none()
            .then(|| format!("the {field} field must be numeric")),
        Rule::Email => (!email_re().is_match(&as_text(value)))
            .then(|| format!("the {field} field must be a valid email address")),
        Rule::Uuid => uuid::Uuid::parse_str(&as_text(value))
            .is_err()
            .then(|| format!("the {field} field must be a valid uuid")),
        Rule::In(allowed) => {
            let text = as_text(value);
            (!allowed.iter().any(|a| a == &text))
                .then(|| format!("the {field} field must be one of: {}", allowed.join(", ")))
        }
        Rule::Pattern(re) => (!re.is_match(&as_text(value)))
            .then(|| format!("the {field} field format is invalid")),
    }
}

/// Outcome of a validation pass, failures keyed by field.
#[derive(Clone, Debug, Default)]
pub struct ValidationResult {
    fields: HashMap<String, Vec<String>>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn errors(&self) -> &HashMap<String, Vec<String>> {
        &self.fields
    }

    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.fields.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                fields: self.fields,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn all_failures_accumulate_across_fields_and_rules() {
        let validator = Validator::new()
            .rule("name", vec![Rule::Required, Rule::MinLength(3)])
            .rule("email", vec![Rule::Required, Rule::Email]);
        let result = validator.validate(&data(&[("email", json!("nope"))]));
        assert!(!result.is_ok());
        assert_eq!(result.errors().len(), 2);
        assert_eq!(result.errors()["email"].len(), 1);
        // MinLength skips the absent name, so only Required fires.
        assert_eq!(result.errors()["name"].len(), 1);
    }

    #[test]
    fn optional_fields_skip_rules_when_absent() {
        let validator = Validator::new().rule("nickname", vec![Rule::MinLength(3)]);
        assert!(validator.validate(&data(&[])).is_ok());
        assert!(!validator
            .validate(&data(&[("nickname", json!("ab"))]))
            .is_ok());
    }

    #[test]
    fn empty_string_counts_as_missing_for_required() {
        let validator = Validator::new().rule("name", vec![Rule::Required]);
        assert!(!validator.validate(&data(&[("name", json!(""))])).is_ok());
    }

    #[test]
    fn numeric_rules_accept_string_digits() {
        let validator = Validator::new()
            .rule("age", vec![Rule::Integer, Rule::Min(18.0), Rule::Max(120.0)]);
        assert!(validator.validate(&data(&[("age", json!("42"))])).is_ok());
        assert!(!validator.validate(&data(&[("age", json!("17"))])).is_ok());
        assert!(!validator.validate(&data(&[("age", json!("4.5"))])).is_ok());
    }

    #[test]
    fn membership_and_pattern_rules() {
        let validator = Validator::new()
            .rule(
                "status",
                vec![Rule::In(vec!["ok".to_string(), "repair".to_string()])],
            )
            .rule(
                "tag",
                vec![Rule::Pattern(
                    regex::Regex::new(r"^[a-z]+-\d+$").unwrap(),
                )],
            );
        assert!(validator
            .validate(&data(&[("status", json!("ok")), ("tag", json!("pc-1"))]))
            .is_ok());
        let bad = validator.validate(&data(&[("status", json!("gone")), ("tag", json!("PC1"))]));
        assert_eq!(bad.errors().len(), 2);
    }

    #[test]
    fn uuid_and_email_rules() {
        let validator = Validator::new()
            .rule("owner", vec![Rule::Uuid])
            .rule("contact", vec![Rule::Email]);
        assert!(validator
            .validate(&data(&[
                ("owner", json!("b4e9b1a2-52c4-4f3a-9d3a-8c2f1a6e4b01")),
                ("contact", json!("jc@example.org")),
            ]))
            .is_ok());
        let bad = validator.validate(&data(&[("owner", json!("xyz")), ("contact", json!("at"))]));
        assert_eq!(bad.errors().len(), 2);
    }

    #[test]
    fn into_result_surfaces_a_typed_error() {
        let validator = Validator::new().rule("name", vec![Rule::Required]);
        let err = validator.validate(&data(&[])).into_result().unwrap_err();
        assert!(err.fields.contains_key("name"));
    }
}
