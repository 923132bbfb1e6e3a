pub mod record;
pub mod relations;
pub mod schema;
pub mod validate;

pub use record::Entity;
pub use relations::{BelongsTo, HasMany, HasOne};
pub use schema::{Cast, ModelSchema};
pub use validate::{Rule, ValidationResult, Validator};
