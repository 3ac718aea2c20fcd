#![forbid(unsafe_code)]
//! ActiveRecord-style data access in three layers.
//!
//! - [`Dao`]: thin wrapper around a [`Connection`] with fetch helpers,
//!   transactions and cached table descriptions.
//! - [`EntityDao`]: one table row. Reads and writes properties through the
//!   entity's field and [`Format`] maps, and builds `find_all` / `search`
//!   queries.
//! - [`EntityModel`]: business logic on top of an entity DAO, with
//!   permission hooks and transactional create/update/delete.
//!
//! Entities are described with `#[derive(Entity)]`:
//!
//! ```ignore
//! use activerecord::{DaoFactory, Entity};
//!
//! #[derive(Entity, Clone, Debug)]
//! #[entity(table = "users", timestamps)]
//! pub struct User {
//!     pub id: Option<i64>,
//!     pub username: String,
//!     #[column(name = "email")]
//!     pub mail: String,
//!     pub active: bool,
//! }
//!
//! let factory = DaoFactory::new(conn);
//! let mut user = factory.entity::<User>();
//! user.find(1).await?;
//! assert_eq!(user.get("mail")?.to_text(), "foo@bar.com");
//! ```

// The derive expands to `::activerecord::...` paths, which must also resolve here.
extern crate self as activerecord;

pub mod condition;
pub mod dao;
pub mod entity;
pub mod model;
pub mod search;

pub use condition::Condition;
pub use dao::{Dao, DaoFactory, FromFactory};
pub use entity::{EntityDao, EntityDefinition, Id, Record};
pub use model::{EntityModel, ModelDefinition, ModelFactory};
pub use search::{Join, SearchParams, SearchResult};

// Re-export the core types so applications only depend on this crate.
pub use activerecord_core::{
    async_trait, Clock, ColumnInfo, Connection, Dialect, Error, FixedClock, Format, FormatError,
    FromNative, Native, Properties, Result, Row, SqlValue, SystemClock, Values,
};

pub use activerecord_core::transactions;
pub use activerecord_sql_builder as sql_builder;
pub use activerecord_sql_builder::{Expr, Order, QueryBuilder};

pub use activerecord_macros::Entity;

#[cfg(feature = "libsql-backend")]
pub use activerecord_libsql::LibsqlConnection;

#[cfg(test)]
pub(crate) mod testing;
