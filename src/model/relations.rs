//! Relations between tables, resolved lazily: each relation is a thin scope
//! over the related table's query builder, so constraints can be stacked
//! before fetching.

use crate::error::PersistenceError;
use crate::model::record::Entity;
use crate::model::schema::ModelSchema;
use crate::sql::builder::{LazyRows, QueryBuilder};
use crate::sql::exec::SqlExecutor;
use serde_json::Value;
use std::sync::Arc;

/// One-to-many: rows of `related` whose `foreign_key` equals the owner's
/// primary key.
pub struct HasMany {
    related: Arc<ModelSchema>,
    foreign_key: String,
    local_value: Value,
}

impl HasMany {
    pub(crate) fn new(related: Arc<ModelSchema>, foreign_key: String, local_value: Value) -> Self {
        HasMany {
            related,
            foreign_key,
            local_value,
        }
    }

    /// Constrained builder over the related table, for stacking further
    /// clauses.
    pub fn query(&self) -> QueryBuilder {
        QueryBuilder::for_schema(self.related.clone())
            .where_eq(self.foreign_key.clone(), self.local_value.clone())
    }

    pub async fn get(&self, db: &dyn SqlExecutor) -> Result<Vec<Entity>, PersistenceError> {
        self.query().get(db).await
    }

    /// Page through the related rows without loading them all at once.
    pub fn lazy<'a>(&self, db: &'a dyn SqlExecutor, chunk: u64) -> LazyRows<'a> {
        self.query().lazy(db, chunk)
    }

    pub async fn count(&self, db: &dyn SqlExecutor) -> Result<u64, PersistenceError> {
        self.query().count(db).await
    }
}

/// One-to-one: the single row of `related` whose `foreign_key` equals the
/// owner's primary key.
pub struct HasOne {
    related: Arc<ModelSchema>,
    foreign_key: String,
    local_value: Value,
}

impl HasOne {
    pub(crate) fn new(related: Arc<ModelSchema>, foreign_key: String, local_value: Value) -> Self {
        HasOne {
            related,
            foreign_key,
            local_value,
        }
    }

    pub fn query(&self) -> QueryBuilder {
        QueryBuilder::for_schema(self.related.clone())
            .where_eq(self.foreign_key.clone(), self.local_value.clone())
    }

    pub async fn get(&self, db: &dyn SqlExecutor) -> Result<Option<Entity>, PersistenceError> {
        self.query().first(db).await
    }
}

/// Inverse relation: the owning row of `related` referenced by the child's
/// foreign key value.
pub struct BelongsTo {
    related: Arc<ModelSchema>,
    owner_value: Value,
}

impl BelongsTo {
    pub(crate) fn new(related: Arc<ModelSchema>, owner_value: Value) -> Self {
        BelongsTo {
            related,
            owner_value,
        }
    }

    pub fn query(&self) -> QueryBuilder {
        let pk = self.related.primary_key.clone();
        QueryBuilder::for_schema(self.related.clone()).where_eq(pk, self.owner_value.clone())
    }

    pub async fn get(&self, db: &dyn SqlExecutor) -> Result<Option<Entity>, PersistenceError> {
        if self.owner_value.is_null() {
            return Ok(None);
        }
        self.query().first(db).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::exec::testing::StaticRows;
    use crate::sql::exec::Row;
    use serde_json::json;

    fn rooms() -> Arc<ModelSchema> {
        ModelSchema::new("rooms").into_arc()
    }

    fn computers() -> Arc<ModelSchema> {
        ModelSchema::new("computers").into_arc()
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn room_with_id(id: i64) -> Entity {
        Entity::hydrated(rooms(), row(&[("id", json!(id))]))
    }

    #[tokio::test]
    async fn has_many_scopes_on_the_foreign_key() {
        let db = StaticRows::new(vec![
            row(&[("id", json!(1)), ("room_id", json!(2))]),
            row(&[("id", json!(5)), ("room_id", json!(2))]),
        ]);
        let relation = room_with_id(2).has_many(computers(), "room_id").unwrap();
        let children = relation.get(&db).await.unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(
            db.statements(),
            vec!["SELECT * FROM computers WHERE room_id = $1"]
        );
    }

    #[tokio::test]
    async fn has_many_query_accepts_extra_clauses() {
        let db = StaticRows::new(Vec::new());
        let relation = room_with_id(2).has_many(computers(), "room_id").unwrap();
        relation
            .query()
            .where_eq("status", "ok")
            .get(&db)
            .await
            .unwrap();
        assert_eq!(
            db.statements(),
            vec!["SELECT * FROM computers WHERE room_id = $1 AND status = $2"]
        );
    }

    #[tokio::test]
    async fn has_many_lazy_walks_children_in_pages() {
        let all: Vec<Row> = (1..=7)
            .map(|i| row(&[("id", json!(i)), ("room_id", json!(2))]))
            .collect();
        let db = StaticRows::new(all);
        let relation = room_with_id(2).has_many(computers(), "room_id").unwrap();
        let mut cursor = relation.lazy(&db, 3);
        let mut seen = 0;
        while cursor.next().await.unwrap().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 7);
    }

    #[tokio::test]
    async fn has_many_from_anchors_on_an_alternate_local_key() {
        let db = StaticRows::new(Vec::new());
        let owner = Entity::hydrated(
            rooms(),
            row(&[("id", json!(2)), ("code", json!("B-204"))]),
        );
        owner
            .has_many_from(computers(), "room_code", "code")
            .unwrap()
            .get(&db)
            .await
            .unwrap();
        let log = db.log.lock().unwrap();
        assert_eq!(log[0].0, "SELECT * FROM computers WHERE room_code = $1");
        assert_eq!(log[0].1, vec![json!("B-204")]);
    }

    #[test]
    fn has_many_from_missing_local_key_is_an_error() {
        let owner = room_with_id(2);
        assert!(matches!(
            owner.has_many_from(computers(), "room_code", "code"),
            Err(PersistenceError::FieldNotFound(k)) if k == "code"
        ));
    }

    #[test]
    fn has_many_requires_a_saved_owner() {
        let owner = Entity::new(rooms());
        assert!(matches!(
            owner.has_many(computers(), "room_id"),
            Err(PersistenceError::MissingPrimaryKey { .. })
        ));
    }

    #[tokio::test]
    async fn has_one_fetches_a_single_row() {
        let db = StaticRows::new(vec![row(&[("id", json!(9)), ("room_id", json!(2))])]);
        let relation = room_with_id(2).has_one(computers(), "room_id").unwrap();
        let child = relation.get(&db).await.unwrap();
        assert_eq!(child.unwrap().get("id").unwrap(), json!(9));
        assert_eq!(
            db.statements(),
            vec!["SELECT * FROM computers WHERE room_id = $1 LIMIT 1"]
        );
    }

    #[tokio::test]
    async fn belongs_to_resolves_the_owner_by_its_key() {
        let db = StaticRows::new(vec![row(&[("id", json!(2))])]);
        let child = Entity::hydrated(
            computers(),
            row(&[("id", json!(9)), ("room_id", json!(2))]),
        );
        let owner = child.belongs_to(rooms(), "room_id").unwrap().get(&db).await.unwrap();
        assert_eq!(owner.unwrap().get("id").unwrap(), json!(2));
        assert_eq!(
            db.statements(),
            vec!["SELECT * FROM rooms WHERE id = $1 LIMIT 1"]
        );
    }

    #[tokio::test]
    async fn belongs_to_with_null_key_is_none_without_a_query() {
        let db = StaticRows::new(vec![row(&[("id", json!(2))])]);
        let child = Entity::hydrated(
            computers(),
            row(&[("id", json!(9)), ("room_id", Value::Null)]),
        );
        let owner = child.belongs_to(rooms(), "room_id").unwrap().get(&db).await.unwrap();
        assert!(owner.is_none());
        assert!(db.statements().is_empty());
    }
}
