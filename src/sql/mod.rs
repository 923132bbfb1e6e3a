pub mod builder;
pub mod exec;
pub mod params;

pub use builder::{Direction, LazyRows, Page, QueryBuf, QueryBuilder};
pub use exec::{Db, Row, SqlExecutor};
pub use params::BindValue;
