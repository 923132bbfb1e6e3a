//! JC MVC core: regex-based request router with named routes and middleware
//! chains, paired with an active-record style query layer over PostgreSQL.

pub mod config;
pub mod error;
pub mod http;
pub mod model;
pub mod router;
pub mod sql;

pub use config::{AppConfig, DbConfig};
pub use error::{AppError, PersistenceError, RouteError, ValidationError};
pub use http::{Method, Request, Response};
pub use model::{Cast, Entity, ModelSchema, Rule, ValidationResult, Validator};
pub use router::{
    handler, Dispatcher, Handler, Middleware, Next, PatternRegistry, Resource, Router,
};
pub use sql::{Db, Direction, Page, QueryBuf, QueryBuilder, Row, SqlExecutor};
