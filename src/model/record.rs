//! Active-record style entity: a JSON attribute map plus the snapshot it was
//! loaded with. Writes only ever touch changed columns.

use crate::error::PersistenceError;
use crate::model::relations::{BelongsTo, HasMany, HasOne};
use crate::model::schema::ModelSchema;
use crate::sql::builder::{QueryBuf, QueryBuilder};
use crate::sql::exec::{Row, SqlExecutor};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn now_stamp() -> String {
    chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// One record of a table. `original` is the last persisted snapshot; an
/// attribute is dirty while its current value differs from that snapshot.
/// Attributes never seen by the snapshot count as changed from `Null`, so a
/// column added to a loaded record is written on the next update.
#[derive(Clone, Debug)]
pub struct Entity {
    schema: Arc<ModelSchema>,
    attributes: Row,
    original: Row,
    dirty: BTreeMap<String, Value>,
}

impl Entity {
    pub fn new(schema: Arc<ModelSchema>) -> Self {
        Entity {
            schema,
            attributes: Row::new(),
            original: Row::new(),
            dirty: BTreeMap::new(),
        }
    }

    /// Build an entity from a database row. The row is taken verbatim, with
    /// no casts or mutators, and counts as clean.
    pub fn hydrated(schema: Arc<ModelSchema>, row: Row) -> Self {
        Entity {
            schema,
            attributes: row.clone(),
            original: row,
            dirty: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    /// Mass-assign attributes, skipping anything the schema does not allow.
    pub fn fill(&mut self, data: &Row) -> &mut Self {
        for (key, value) in data {
            if self.schema.is_fillable(key) {
                self.set(key.clone(), value.clone());
            }
        }
        self
    }

    /// Assign one attribute, applying the schema's mutator or cast. Dirtiness
    /// is decided against the persisted snapshot, so setting an attribute back
    /// to its loaded value clears the pending change.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let key = key.into();
        let mut value = value.into();

        if !self.original.contains_key(&key) {
            self.original.insert(key.clone(), Value::Null);
        }

        if let Some(mutator) = self.schema.mutators.get(key.as_str()) {
            value = mutator(value);
        } else if let Some(cast) = self.schema.casts.get(key.as_str()) {
            value = cast.apply(value);
        }

        if self.original.get(&key) == Some(&value) {
            self.dirty.remove(&key);
        } else {
            self.dirty.insert(key.clone(), value.clone());
        }
        self.attributes.insert(key, value);
        self
    }

    /// Read one attribute, through its accessor when the schema has one.
    pub fn get(&self, key: &str) -> Result<Value, PersistenceError> {
        let value = self
            .attributes
            .get(key)
            .ok_or_else(|| PersistenceError::FieldNotFound(key.to_string()))?;
        Ok(match self.schema.accessors.get(key) {
            Some(accessor) => accessor(value),
            None => value.clone(),
        })
    }

    /// Non-null primary key value, if the record has one.
    pub fn primary_key_value(&self) -> Option<Value> {
        self.attributes
            .get(&self.schema.primary_key)
            .filter(|v| !v.is_null())
            .cloned()
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn dirty_keys(&self) -> Vec<&str> {
        self.dirty.keys().map(String::as_str).collect()
    }

    /// Raw attribute map, hidden attributes included.
    pub fn to_map(&self) -> Row {
        self.attributes.clone()
    }

    /// Serialized view: hidden attributes dropped, accessors applied.
    pub fn to_json(&self) -> Value {
        let mut out = Row::new();
        for (key, value) in &self.attributes {
            if self.schema.hidden.iter().any(|h| h == key) {
                continue;
            }
            let value = match self.schema.accessors.get(key.as_str()) {
                Some(accessor) => accessor(value),
                None => value.clone(),
            };
            out.insert(key.clone(), value);
        }
        Value::Object(out)
    }

    fn sync_original(&mut self) {
        self.original = self.attributes.clone();
        self.dirty.clear();
    }

    /// INSERT of every attribute, returning the generated primary key.
    pub fn insert_query(&self) -> QueryBuf {
        if self.attributes.is_empty() {
            return QueryBuf {
                sql: format!(
                    "INSERT INTO {} DEFAULT VALUES RETURNING {}",
                    self.schema.table, self.schema.primary_key
                ),
                params: Vec::new(),
            };
        }
        let columns: Vec<&str> = self.attributes.keys().map(String::as_str).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|n| format!("${n}")).collect();
        QueryBuf {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
                self.schema.table,
                columns.join(", "),
                placeholders.join(", "),
                self.schema.primary_key
            ),
            params: self.attributes.values().cloned().collect(),
        }
    }

    /// UPDATE of the dirty attributes only. `Ok(None)` when nothing changed.
    pub fn update_query(&self) -> Result<Option<QueryBuf>, PersistenceError> {
        if self.dirty.is_empty() {
            return Ok(None);
        }
        let pk = self
            .primary_key_value()
            .ok_or_else(|| PersistenceError::MissingPrimaryKey {
                table: self.schema.table.clone(),
            })?;
        let mut params: Vec<Value> = Vec::with_capacity(self.dirty.len() + 1);
        let assignments: Vec<String> = self
            .dirty
            .iter()
            .map(|(column, value)| {
                params.push(value.clone());
                format!("{} = ${}", column, params.len())
            })
            .collect();
        params.push(pk);
        Ok(Some(QueryBuf {
            sql: format!(
                "UPDATE {} SET {} WHERE {} = ${}",
                self.schema.table,
                assignments.join(", "),
                self.schema.primary_key,
                params.len()
            ),
            params,
        }))
    }

    pub fn delete_query(&self) -> Result<QueryBuf, PersistenceError> {
        let pk = self
            .primary_key_value()
            .ok_or_else(|| PersistenceError::MissingPrimaryKey {
                table: self.schema.table.clone(),
            })?;
        Ok(QueryBuf {
            sql: format!(
                "DELETE FROM {} WHERE {} = $1",
                self.schema.table, self.schema.primary_key
            ),
            params: vec![pk],
        })
    }

    /// Insert or update depending on whether the record has a primary key.
    /// With timestamps enabled, `updated_at` is stamped on every save and
    /// `created_at` only when the record does not carry one yet.
    pub async fn save(&mut self, db: &dyn SqlExecutor) -> Result<(), PersistenceError> {
        if self.schema.timestamps {
            let now = now_stamp();
            if !self.attributes.contains_key("created_at") {
                self.set("created_at", now.clone());
            }
            self.set("updated_at", now);
        }
        if self.primary_key_value().is_some() {
            self.update(db).await
        } else {
            self.insert(db).await
        }
    }

    pub async fn insert(&mut self, db: &dyn SqlExecutor) -> Result<(), PersistenceError> {
        let q = self.insert_query();
        let returned = db.fetch_optional(&q.sql, &q.params).await?;
        if let Some(row) = returned {
            if let Some(id) = row.get(&self.schema.primary_key) {
                self.attributes
                    .insert(self.schema.primary_key.clone(), id.clone());
            }
        }
        self.sync_original();
        Ok(())
    }

    /// No statement is issued when nothing is dirty.
    pub async fn update(&mut self, db: &dyn SqlExecutor) -> Result<(), PersistenceError> {
        let Some(q) = self.update_query()? else {
            return Ok(());
        };
        db.execute(&q.sql, &q.params).await?;
        self.sync_original();
        Ok(())
    }

    pub async fn delete(&mut self, db: &dyn SqlExecutor) -> Result<(), PersistenceError> {
        let q = self.delete_query()?;
        db.execute(&q.sql, &q.params).await?;
        Ok(())
    }

    /// Query builder scoped to a schema's table.
    pub fn query(schema: Arc<ModelSchema>) -> QueryBuilder {
        QueryBuilder::for_schema(schema)
    }

    pub async fn find(
        db: &dyn SqlExecutor,
        schema: Arc<ModelSchema>,
        id: impl Into<Value>,
    ) -> Result<Option<Entity>, PersistenceError> {
        let pk = schema.primary_key.clone();
        Entity::query(schema).where_eq(pk, id.into()).first(db).await
    }

    pub async fn all(
        db: &dyn SqlExecutor,
        schema: Arc<ModelSchema>,
    ) -> Result<Vec<Entity>, PersistenceError> {
        Entity::query(schema).get(db).await
    }

    /// Non-null value of a local key used to anchor a relation.
    fn relation_key(&self, key: &str) -> Result<Value, PersistenceError> {
        match self.attributes.get(key).filter(|v| !v.is_null()) {
            Some(v) => Ok(v.clone()),
            None if key == self.schema.primary_key => Err(PersistenceError::MissingPrimaryKey {
                table: self.schema.table.clone(),
            }),
            None => Err(PersistenceError::FieldNotFound(key.to_string())),
        }
    }

    /// Children rows of `related` whose `foreign_key` points at this record's
    /// primary key.
    pub fn has_many(
        &self,
        related: Arc<ModelSchema>,
        foreign_key: impl Into<String>,
    ) -> Result<HasMany, PersistenceError> {
        let key = self.schema.primary_key.clone();
        self.has_many_from(related, foreign_key, &key)
    }

    /// Same relation anchored on `local_key` instead of the primary key.
    pub fn has_many_from(
        &self,
        related: Arc<ModelSchema>,
        foreign_key: impl Into<String>,
        local_key: &str,
    ) -> Result<HasMany, PersistenceError> {
        let local = self.relation_key(local_key)?;
        Ok(HasMany::new(related, foreign_key.into(), local))
    }

    pub fn has_one(
        &self,
        related: Arc<ModelSchema>,
        foreign_key: impl Into<String>,
    ) -> Result<HasOne, PersistenceError> {
        let key = self.schema.primary_key.clone();
        self.has_one_from(related, foreign_key, &key)
    }

    pub fn has_one_from(
        &self,
        related: Arc<ModelSchema>,
        foreign_key: impl Into<String>,
        local_key: &str,
    ) -> Result<HasOne, PersistenceError> {
        let local = self.relation_key(local_key)?;
        Ok(HasOne::new(related, foreign_key.into(), local))
    }

    /// Owner row of `related` referenced by this record's `foreign_key`
    /// attribute.
    pub fn belongs_to(
        &self,
        related: Arc<ModelSchema>,
        foreign_key: &str,
    ) -> Result<BelongsTo, PersistenceError> {
        let owner = self.get(foreign_key)?;
        Ok(BelongsTo::new(related, owner))
    }
}
