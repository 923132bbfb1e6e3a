//! Per-table schema: mass-assignment policy, casts, mutators/accessors,
//! timestamp behavior. Built once and shared between all records of a table.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub type Mutator = fn(Value) -> Value;
pub type Accessor = fn(&Value) -> Value;

/// Attribute cast applied on assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cast {
    Int,
    Float,
    String,
    Bool,
    /// JSON text is decoded on assignment; already-structured values pass.
    Json,
    Date,
    DateTime,
}

impl Cast {
    pub fn apply(self, value: Value) -> Value {
        if value.is_null() {
            return value;
        }
        match self {
            Cast::Int => cast_int(value),
            Cast::Float => cast_float(value),
            Cast::String => cast_string(value),
            Cast::Bool => cast_bool(value),
            Cast::Json => cast_json(value),
            Cast::Date => cast_datetime(value, "%Y-%m-%d"),
            Cast::DateTime => cast_datetime(value, "%Y-%m-%d %H:%M:%S"),
        }
    }
}

fn cast_int(value: Value) -> Value {
    match &value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(|i| Value::Number(i.into()))
            .unwrap_or(value),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(|i| Value::Number(i.into()))
            .unwrap_or(value),
        Value::Bool(b) => Value::Number(i64::from(*b).into()),
        _ => value,
    }
}

fn cast_float(value: Value) -> Value {
    let parsed = match &value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(value)
}

fn cast_string(value: Value) -> Value {
    match value {
        Value::String(_) => value,
        Value::Number(n) => Value::String(n.to_string()),
        Value::Bool(b) => Value::String(b.to_string()),
        other => Value::String(other.to_string()),
    }
}

fn cast_bool(value: Value) -> Value {
    match &value {
        Value::Bool(_) => value,
        Value::Number(n) => Value::Bool(n.as_f64().unwrap_or(0.0) != 0.0),
        Value::String(s) => Value::Bool(!s.is_empty() && s != "0" && s != "false"),
        _ => Value::Bool(true),
    }
}

fn cast_json(value: Value) -> Value {
    match &value {
        Value::String(s) => serde_json::from_str(s).unwrap_or(value),
        _ => value,
    }
}

fn cast_datetime(value: Value, format: &str) -> Value {
    let Value::String(s) = &value else {
        return value;
    };
    let parsed = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| {
            chrono::DateTime::parse_from_rfc3339(s).map(|d| d.naive_utc())
        })
        .or_else(|_| {
            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
        });
    match parsed {
        Ok(dt) => Value::String(dt.format(format).to_string()),
        Err(_) => value,
    }
}

/// Schema of one table. `fillable`/`guarded` drive mass assignment: when
/// `fillable` is non-empty it is an allow list, otherwise anything outside
/// `guarded` passes. `hidden` attributes are dropped from serialized output.
#[derive(Debug)]
pub struct ModelSchema {
    pub table: String,
    pub primary_key: String,
    pub fillable: Vec<String>,
    pub guarded: Vec<String>,
    pub hidden: Vec<String>,
    pub casts: HashMap<String, Cast>,
    pub mutators: HashMap<String, Mutator>,
    pub accessors: HashMap<String, Accessor>,
    pub timestamps: bool,
}

impl ModelSchema {
    pub fn new(table: impl Into<String>) -> Self {
        ModelSchema {
            table: table.into(),
            primary_key: "id".to_string(),
            fillable: Vec::new(),
            guarded: vec!["id".to_string()],
            hidden: Vec::new(),
            casts: HashMap::new(),
            mutators: HashMap::new(),
            accessors: HashMap::new(),
            timestamps: true,
        }
    }

    pub fn primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = key.into();
        self
    }

    pub fn fillable(mut self, keys: &[&str]) -> Self {
        self.fillable = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn guarded(mut self, keys: &[&str]) -> Self {
        self.guarded = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn hidden(mut self, keys: &[&str]) -> Self {
        self.hidden = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn cast(mut self, key: impl Into<String>, cast: Cast) -> Self {
        self.casts.insert(key.into(), cast);
        self
    }

    /// Transform applied on assignment, before the value is stored. Takes
    /// precedence over a cast on the same attribute.
    pub fn mutator(mut self, key: impl Into<String>, f: Mutator) -> Self {
        self.mutators.insert(key.into(), f);
        self
    }

    /// Transform applied on read.
    pub fn accessor(mut self, key: impl Into<String>, f: Accessor) -> Self {
        self.accessors.insert(key.into(), f);
        self
    }

    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn is_fillable(&self, key: &str) -> bool {
        if !self.fillable.is_empty() {
            return self.fillable.iter().any(|k| k == key);
        }
        !self.guarded.iter().any(|k| k == key)
    }
}
