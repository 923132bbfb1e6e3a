//! Fluent SELECT builder. Clauses accumulate in typed lists and compile to a
//! parameterized statement in a single pass, so the emitted placeholders and
//! the parameter list can never drift apart and recompiling never duplicates
//! parameters.

use crate::error::PersistenceError;
use crate::model::record::Entity;
use crate::model::schema::ModelSchema;
use crate::sql::exec::SqlExecutor;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

/// Compiled SQL plus positional parameters, `$1..$n` in push order.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> usize {
        self.params.push(v);
        self.params.len()
    }
}

#[derive(Clone, Copy, Debug)]
enum Boolean {
    And,
    Or,
}

impl Boolean {
    fn as_str(self) -> &'static str {
        match self {
            Boolean::And => "AND",
            Boolean::Or => "OR",
        }
    }
}

#[derive(Clone, Debug)]
enum WhereClause {
    Basic {
        column: String,
        operator: String,
        value: Value,
        boolean: Boolean,
    },
    In {
        column: String,
        values: Vec<Value>,
        boolean: Boolean,
    },
    Between {
        column: String,
        low: Value,
        high: Value,
        boolean: Boolean,
    },
    Null {
        column: String,
        boolean: Boolean,
    },
}

impl WhereClause {
    fn boolean(&self) -> Boolean {
        match self {
            WhereClause::Basic { boolean, .. }
            | WhereClause::In { boolean, .. }
            | WhereClause::Between { boolean, .. }
            | WhereClause::Null { boolean, .. } => *boolean,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    fn as_str(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

#[derive(Clone, Debug)]
struct JoinClause {
    kind: JoinKind,
    table: String,
    first: String,
    operator: String,
    second: String,
}

#[derive(Clone, Debug)]
struct HavingClause {
    column: String,
    operator: String,
    value: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// One page of results from [`QueryBuilder::paginate`].
#[derive(Clone, Debug)]
pub struct Page {
    pub total: u64,
    pub per_page: u64,
    pub current_page: u64,
    /// 0 when there are no rows at all.
    pub last_page: u64,
    pub items: Vec<Entity>,
}

#[derive(Clone)]
pub struct QueryBuilder {
    schema: Arc<ModelSchema>,
    table: String,
    selects: Vec<String>,
    wheres: Vec<WhereClause>,
    joins: Vec<JoinClause>,
    groups: Vec<String>,
    havings: Vec<HavingClause>,
    orders: Vec<(String, Direction)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl QueryBuilder {
    pub fn for_schema(schema: Arc<ModelSchema>) -> Self {
        let table = schema.table.clone();
        QueryBuilder {
            schema,
            table,
            selects: vec!["*".to_string()],
            wheres: Vec::new(),
            joins: Vec::new(),
            groups: Vec::new(),
            havings: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.selects = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Temporary table override.
    pub fn from(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_op(column, "=", value)
    }

    pub fn where_op(
        mut self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.wheres.push(WhereClause::Basic {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
            boolean: Boolean::And,
        });
        self
    }

    pub fn or_where(
        mut self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.wheres.push(WhereClause::Basic {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
            boolean: Boolean::Or,
        });
        self
    }

    pub fn where_in(mut self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.wheres.push(WhereClause::In {
            column: column.into(),
            values,
            boolean: Boolean::And,
        });
        self
    }

    pub fn where_between(
        mut self,
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.wheres.push(WhereClause::Between {
            column: column.into(),
            low: low.into(),
            high: high.into(),
            boolean: Boolean::And,
        });
        self
    }

    pub fn where_null(mut self, column: impl Into<String>) -> Self {
        self.wheres.push(WhereClause::Null {
            column: column.into(),
            boolean: Boolean::And,
        });
        self
    }

    pub fn join(
        mut self,
        table: impl Into<String>,
        first: impl Into<String>,
        operator: impl Into<String>,
        second: impl Into<String>,
    ) -> Self {
        self.joins.push(JoinClause {
            kind: JoinKind::Inner,
            table: table.into(),
            first: first.into(),
            operator: operator.into(),
            second: second.into(),
        });
        self
    }

    pub fn left_join(
        mut self,
        table: impl Into<String>,
        first: impl Into<String>,
        operator: impl Into<String>,
        second: impl Into<String>,
    ) -> Self {
        self.joins.push(JoinClause {
            kind: JoinKind::Left,
            table: table.into(),
            first: first.into(),
            operator: operator.into(),
            second: second.into(),
        });
        self
    }

    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.groups.push(column.into());
        self
    }

    pub fn having(
        mut self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.havings.push(HavingClause {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.orders.push((column.into(), direction));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Compile the SELECT into a fresh buffer. Sections in fixed order:
    /// SELECT, FROM, JOIN, WHERE, GROUP BY, HAVING, ORDER BY, LIMIT/OFFSET.
    pub fn to_query(&self) -> QueryBuf {
        let mut buf = QueryBuf::new();
        let mut parts = Vec::new();
        parts.push(format!("SELECT {}", self.selects.join(", ")));
        parts.push(format!("FROM {}", self.table));

        for join in &self.joins {
            parts.push(format!(
                "{} {} ON {} {} {}",
                join.kind.as_str(),
                join.table,
                join.first,
                join.operator,
                join.second
            ));
        }

        if !self.wheres.is_empty() {
            parts.push(format!("WHERE {}", self.compile_wheres(&mut buf)));
        }

        if !self.groups.is_empty() {
            parts.push(format!("GROUP BY {}", self.groups.join(", ")));
        }

        if !self.havings.is_empty() {
            parts.push(format!("HAVING {}", self.compile_havings(&mut buf)));
        }

        if !self.orders.is_empty() {
            let cols: Vec<String> = self
                .orders
                .iter()
                .map(|(col, dir)| format!("{} {}", col, dir.as_str()))
                .collect();
            parts.push(format!("ORDER BY {}", cols.join(", ")));
        }

        if let Some(limit) = self.limit {
            parts.push(format!("LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            parts.push(format!("OFFSET {offset}"));
        }

        buf.sql = parts.join(" ");
        buf
    }

    fn compile_wheres(&self, buf: &mut QueryBuf) -> String {
        let mut parts: Vec<String> = Vec::new();
        for clause in &self.wheres {
            if !parts.is_empty() {
                parts.push(clause.boolean().as_str().to_string());
            }
            match clause {
                WhereClause::Basic {
                    column,
                    operator,
                    value,
                    ..
                } => {
                    let n = buf.push_param(value.clone());
                    parts.push(format!("{column} {operator} ${n}"));
                }
                WhereClause::In { column, values, .. } => {
                    let placeholders: Vec<String> = values
                        .iter()
                        .map(|v| format!("${}", buf.push_param(v.clone())))
                        .collect();
                    parts.push(format!("{column} IN ({})", placeholders.join(", ")));
                }
                WhereClause::Between {
                    column, low, high, ..
                } => {
                    let lo = buf.push_param(low.clone());
                    let hi = buf.push_param(high.clone());
                    parts.push(format!("{column} BETWEEN ${lo} AND ${hi}"));
                }
                WhereClause::Null { column, .. } => {
                    parts.push(format!("{column} IS NULL"));
                }
            }
        }
        parts.join(" ")
    }

    fn compile_havings(&self, buf: &mut QueryBuf) -> String {
        let mut parts: Vec<String> = Vec::new();
        for having in &self.havings {
            if !parts.is_empty() {
                parts.push("AND".to_string());
            }
            let n = buf.push_param(having.value.clone());
            parts.push(format!("{} {} ${}", having.column, having.operator, n));
        }
        parts.join(" ")
    }

    /// COUNT wraps the full select as a subquery, so GROUP BY/HAVING counts
    /// grouped rows rather than collapsing them.
    pub fn to_count_query(&self) -> QueryBuf {
        let inner = self.to_query();
        QueryBuf {
            sql: format!("SELECT COUNT(*) AS count FROM ({}) AS sub", inner.sql),
            params: inner.params,
        }
    }

    pub async fn get(&self, db: &dyn SqlExecutor) -> Result<Vec<Entity>, PersistenceError> {
        let q = self.to_query();
        let rows = db.fetch_all(&q.sql, &q.params).await?;
        Ok(rows
            .into_iter()
            .map(|row| Entity::hydrated(self.schema.clone(), row))
            .collect())
    }

    pub async fn first(&self, db: &dyn SqlExecutor) -> Result<Option<Entity>, PersistenceError> {
        let q = self.clone().limit(1).to_query();
        let row = db.fetch_optional(&q.sql, &q.params).await?;
        Ok(row.map(|row| Entity::hydrated(self.schema.clone(), row)))
    }

    pub async fn count(&self, db: &dyn SqlExecutor) -> Result<u64, PersistenceError> {
        let q = self.to_count_query();
        let row = db.fetch_optional(&q.sql, &q.params).await?;
        Ok(row
            .and_then(|r| r.get("count").and_then(value_to_u64))
            .unwrap_or(0))
    }

    /// Fetch one page. `last_page` is `ceil(total / per_page)`, 0 when the
    /// result set is empty.
    pub async fn paginate(
        &self,
        db: &dyn SqlExecutor,
        per_page: u64,
        page: u64,
    ) -> Result<Page, PersistenceError> {
        let per_page = per_page.max(1);
        let page = page.max(1);
        let total = self.count(db).await?;
        let items = self
            .clone()
            .limit(per_page)
            .offset((page - 1) * per_page)
            .get(db)
            .await?;
        Ok(Page {
            total,
            per_page,
            current_page: page,
            last_page: total.div_ceil(per_page),
            items,
        })
    }

    /// Invoke `callback(items, page)` per page until an empty page or the
    /// callback returns false.
    pub async fn chunk<F>(
        &self,
        db: &dyn SqlExecutor,
        size: u64,
        mut callback: F,
    ) -> Result<(), PersistenceError>
    where
        F: FnMut(&[Entity], u64) -> bool,
    {
        let mut page = 1;
        loop {
            let result = self.paginate(db, size, page).await?;
            if result.items.is_empty() {
                return Ok(());
            }
            if !callback(&result.items, page) {
                return Ok(());
            }
            page += 1;
        }
    }

    /// Forward-only cursor over the result set in pages of `size`. Each call
    /// returns a fresh cursor starting from the first page.
    pub fn lazy<'a>(&self, db: &'a dyn SqlExecutor, size: u64) -> LazyRows<'a> {
        LazyRows {
            builder: self.clone(),
            db,
            size: size.max(1),
            page: 1,
            buffer: VecDeque::new(),
            done: false,
        }
    }
}

/// Cursor produced by [`QueryBuilder::lazy`]. Not restartable; create a new
/// one to iterate again.
pub struct LazyRows<'a> {
    builder: QueryBuilder,
    db: &'a dyn SqlExecutor,
    size: u64,
    page: u64,
    buffer: VecDeque<Entity>,
    done: bool,
}

impl LazyRows<'_> {
    pub async fn next(&mut self) -> Result<Option<Entity>, PersistenceError> {
        if let Some(entity) = self.buffer.pop_front() {
            return Ok(Some(entity));
        }
        if self.done {
            return Ok(None);
        }
        let result = self.builder.paginate(self.db, self.size, self.page).await?;
        if result.items.is_empty() {
            self.done = true;
            return Ok(None);
        }
        self.page += 1;
        self.buffer.extend(result.items);
        Ok(self.buffer.pop_front())
    }
}

fn value_to_u64(v: &Value) -> Option<u64> {
    v.as_u64()
        .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}
