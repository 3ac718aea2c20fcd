//! The seam between DAOs and a concrete database driver.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::value::{Row, SqlValue};
use crate::Result;

/// Placeholder representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Dollar,   // $1, $2, ...
    Question, // ?
}

/// The small part of SQL dialect handling the DAO layer needs: identifier
/// quoting and bind placeholder style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Sqlite,
    MySql,
    Postgres,
}

impl Dialect {
    pub fn placeholder(self) -> Placeholder {
        match self {
            Dialect::Postgres => Placeholder::Dollar,
            Dialect::Sqlite | Dialect::MySql => Placeholder::Question,
        }
    }

    fn quote_char(self) -> char {
        match self {
            Dialect::MySql => '`',
            Dialect::Sqlite | Dialect::Postgres => '"',
        }
    }

    /// Quotes an identifier. Dotted identifiers are quoted per part
    /// (`u.name` -> `"u"."name"`); a `*` part stays bare.
    pub fn quote_identifier(self, ident: &str) -> String {
        let q = self.quote_char();
        ident
            .split('.')
            .map(|part| {
                if part == "*" {
                    part.to_string()
                } else {
                    let escaped = part.replace(q, &format!("{q}{q}"));
                    format!("{q}{escaped}{q}")
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// A column as reported by [`Connection::describe_table`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub primary_key: bool,
}

impl ColumnInfo {
    /// A column must be supplied when it is NOT NULL, has no default and is not the primary key.
    pub fn is_required(&self) -> bool {
        !self.nullable && self.default.is_none() && !self.primary_key
    }
}

/// Backend-implemented database connection.
///
/// Transactions nest: a `begin_transaction` inside an active transaction opens
/// a savepoint, and the matching `commit` / `roll_back` releases or rolls back
/// to it. Calling `commit` or `roll_back` without an active transaction is an
/// error.
#[async_trait]
pub trait Connection: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Runs a query and returns every row.
    async fn fetch_all(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<Row>>;

    /// Runs a statement and returns the number of affected rows.
    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64>;

    /// Id generated by the last insert. Backends with sequences use `sequence`.
    async fn last_insert_id(&self, sequence: Option<&str>) -> Result<SqlValue>;

    async fn begin_transaction(&self) -> Result<()>;

    async fn commit(&self) -> Result<()>;

    async fn roll_back(&self) -> Result<()>;

    fn transaction_nesting_level(&self) -> usize;

    fn is_transaction_active(&self) -> bool {
        self.transaction_nesting_level() > 0
    }

    async fn list_tables(&self) -> Result<Vec<String>>;

    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    async fn fetch_one(&self, sql: &str, params: Vec<SqlValue>) -> Result<Option<Row>> {
        Ok(self.fetch_all(sql, params).await?.into_iter().next())
    }
}
