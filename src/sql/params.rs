//! Parameter binding. Attribute values travel through the crate as JSON, so
//! each parameter is classified into the narrowest Postgres type before it
//! hits the wire. Strings in the formats the cast layer emits (hyphenated
//! UUIDs, `%Y-%m-%d %H:%M:%S` stamps) are promoted to their native types so
//! uuid and timestamp columns compare without server-side coercion.

use chrono::NaiveDateTime;
use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::{Database, Type};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single placeholder value, classified for binding.
#[derive(Clone, Debug, PartialEq)]
pub enum BindValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(uuid::Uuid),
    Timestamp(NaiveDateTime),
    Json(Value),
}

impl BindValue {
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => BindValue::Null,
            Value::Bool(b) => BindValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => BindValue::Int(i),
                None => BindValue::Float(n.as_f64().unwrap_or(0.0)),
            },
            Value::String(s) => Self::classify_text(s),
            Value::Array(_) | Value::Object(_) => BindValue::Json(v.clone()),
        }
    }

    /// Length-gated probes keep the common case (plain text) cheap: only a
    /// 36-char hyphenated candidate is tried as uuid, only a 19-char one as a
    /// timestamp.
    fn classify_text(s: &str) -> Self {
        if s.len() == 36 && s.as_bytes()[8] == b'-' {
            if let Ok(u) = uuid::Uuid::parse_str(s) {
                return BindValue::Uuid(u);
            }
        }
        if s.len() == TIMESTAMP_FORMAT.len() {
            if let Ok(t) = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT) {
                return BindValue::Timestamp(t);
            }
        }
        BindValue::Text(s.to_string())
    }
}

impl<'q> Encode<'q, Postgres> for BindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        match self {
            BindValue::Null => Ok(IsNull::Yes),
            BindValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf),
            BindValue::Int(i) => <i64 as Encode<Postgres>>::encode_by_ref(i, buf),
            BindValue::Float(f) => <f64 as Encode<Postgres>>::encode_by_ref(f, buf),
            BindValue::Text(s) => <String as Encode<Postgres>>::encode_by_ref(s, buf),
            BindValue::Uuid(u) => <uuid::Uuid as Encode<Postgres>>::encode_by_ref(u, buf),
            BindValue::Timestamp(t) => {
                <NaiveDateTime as Encode<Postgres>>::encode_by_ref(t, buf)
            }
            BindValue::Json(v) => <Value as Encode<Postgres>>::encode_by_ref(v, buf),
        }
    }

    /// Per-variant type info, so the prepared statement sees the real
    /// parameter type instead of a blanket one.
    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self {
            BindValue::Null | BindValue::Text(_) => <String as Type<Postgres>>::type_info(),
            BindValue::Bool(_) => <bool as Type<Postgres>>::type_info(),
            BindValue::Int(_) => <i64 as Type<Postgres>>::type_info(),
            BindValue::Float(_) => <f64 as Type<Postgres>>::type_info(),
            BindValue::Uuid(_) => <uuid::Uuid as Type<Postgres>>::type_info(),
            BindValue::Timestamp(_) => <NaiveDateTime as Type<Postgres>>::type_info(),
            BindValue::Json(_) => <Value as Type<Postgres>>::type_info(),
        })
    }
}

impl Type<Postgres> for BindValue {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }
}
