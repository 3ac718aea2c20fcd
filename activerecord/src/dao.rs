//! Base DAO and the factory that wires DAOs to a connection.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use activerecord_core::transactions::{
    ConnectionTransactionManager, TransactionDefinition, TransactionManager, TransactionTemplate,
};
use activerecord_core::{
    Clock, ColumnInfo, Connection, Result, Row, SqlValue, SystemClock, Values,
};
use activerecord_sql_builder::QueryBuilder;
use chrono::{DateTime, FixedOffset};
use tracing::debug;

use crate::entity::{EntityDao, EntityDefinition};

/// DAO types that can be built from a [`DaoFactory`].
pub trait FromFactory: Sized {
    fn from_factory(factory: &DaoFactory) -> Self;
}

/// Builds DAOs sharing one connection and clock.
#[derive(Clone)]
pub struct DaoFactory {
    db: Arc<dyn Connection>,
    clock: Arc<dyn Clock>,
}

impl DaoFactory {
    pub fn new(db: Arc<dyn Connection>) -> Self {
        Self {
            db,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock used for created/updated timestamps.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn db(&self) -> &Arc<dyn Connection> {
        &self.db
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn create<D: FromFactory>(&self) -> D {
        D::from_factory(self)
    }

    pub fn dao(&self) -> Dao {
        Dao::new(self.clone())
    }

    pub fn entity<E: EntityDefinition>(&self) -> EntityDao<E> {
        EntityDao::new(self.dao())
    }
}

impl std::fmt::Debug for DaoFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaoFactory")
            .field("dialect", &self.db.dialect())
            .finish()
    }
}

impl FromFactory for Dao {
    fn from_factory(factory: &DaoFactory) -> Self {
        factory.dao()
    }
}

/// Base data access object.
///
/// Custom DAOs hold a `Dao` and implement [`FromFactory`]. Clones share the
/// table description cache.
#[derive(Clone)]
pub struct Dao {
    factory: DaoFactory,
    descriptions: Arc<Mutex<HashMap<String, Vec<ColumnInfo>>>>,
}

impl Dao {
    pub fn new(factory: DaoFactory) -> Self {
        Self {
            factory,
            descriptions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn factory(&self) -> &DaoFactory {
        &self.factory
    }

    pub fn db(&self) -> &Arc<dyn Connection> {
        self.factory.db()
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        self.factory.clock().now()
    }

    pub fn create_dao<D: FromFactory>(&self) -> D {
        self.factory.create()
    }

    pub fn query_builder(&self) -> QueryBuilder {
        QueryBuilder::new(self.db().dialect())
    }

    pub async fn begin_transaction(&self) -> Result<()> {
        debug!(level = self.db().transaction_nesting_level(), "begin transaction");
        self.db().begin_transaction().await
    }

    pub async fn commit(&self) -> Result<()> {
        debug!(level = self.db().transaction_nesting_level(), "commit");
        self.db().commit().await
    }

    pub async fn roll_back(&self) -> Result<()> {
        debug!(level = self.db().transaction_nesting_level(), "roll back");
        self.db().roll_back().await
    }

    pub fn transaction_manager(&self) -> ConnectionTransactionManager {
        ConnectionTransactionManager::new(self.db().clone())
    }

    pub fn transaction_template(&self) -> TransactionTemplate<ConnectionTransactionManager> {
        TransactionTemplate::new(self.transaction_manager())
    }

    /// Runs `f` in its own transaction scope (a savepoint when one is active).
    /// Commits on `Ok`; rolls back and returns the error on `Err`.
    pub async fn transactional<R, F, Fut>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<R>> + Send,
        R: Send,
    {
        let manager = self.transaction_manager();
        manager
            .execute(&TransactionDefinition::nested(), move |_ctx| f())
            .await
    }

    pub async fn fetch_all(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<Row>> {
        debug!(sql, params = params.len(), "fetch_all");
        self.db().fetch_all(sql, params).await
    }

    /// First column mapped to second column, in row order.
    pub async fn fetch_pairs(
        &self,
        sql: &str,
        params: Vec<SqlValue>,
    ) -> Result<Vec<(SqlValue, SqlValue)>> {
        let rows = self.fetch_all(sql, params).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let mut values = row.values().iter().cloned();
                let key = values.next().unwrap_or_default();
                let value = values.next().unwrap_or_default();
                (key, value)
            })
            .collect())
    }

    /// First column of the first row, `Null` when there is none.
    pub async fn fetch_single_value(&self, sql: &str, params: Vec<SqlValue>) -> Result<SqlValue> {
        Ok(self
            .db()
            .fetch_one(sql, params)
            .await?
            .and_then(Row::into_first)
            .unwrap_or_default())
    }

    /// First column of every row.
    pub async fn fetch_col(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<SqlValue>> {
        let rows = self.fetch_all(sql, params).await?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_first().unwrap_or_default())
            .collect())
    }

    pub async fn fetch_query(&self, query: &QueryBuilder) -> Result<Vec<Row>> {
        let (sql, params) = query.build();
        self.fetch_all(&sql, params).await
    }

    pub async fn fetch_query_col(&self, query: &QueryBuilder) -> Result<Vec<SqlValue>> {
        let (sql, params) = query.build();
        self.fetch_col(&sql, params).await
    }

    pub async fn fetch_query_value(&self, query: &QueryBuilder) -> Result<SqlValue> {
        let (sql, params) = query.build();
        self.fetch_single_value(&sql, params).await
    }

    /// Column descriptions of `table`, cached for this DAO and its clones.
    pub async fn describe_table(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        if let Some(cols) = self.cached_description(table) {
            return Ok(cols);
        }
        let cols = self.db().describe_table(table).await?;
        self.descriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.to_string(), cols.clone());
        Ok(cols)
    }

    fn cached_description(&self, table: &str) -> Option<Vec<ColumnInfo>> {
        self.descriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
    }

    pub async fn list_tables(&self) -> Result<Vec<String>> {
        self.db().list_tables().await
    }

    pub async fn insert_row(&self, table: &str, values: &Values) -> Result<u64> {
        let columns: Vec<&str> = values.keys().map(String::as_str).collect();
        let sql = activerecord_sql_builder::insert(self.db().dialect(), table, &columns);
        debug!(sql = %sql, "insert");
        self.db().execute(&sql, values.values().cloned().collect()).await
    }

    /// `UPDATE table SET .. WHERE ..` with every `filter` entry compared by equality.
    pub async fn update_rows(&self, table: &str, values: &Values, filter: &Values) -> Result<u64> {
        let columns: Vec<&str> = values.keys().map(String::as_str).collect();
        let keys: Vec<&str> = filter.keys().map(String::as_str).collect();
        let sql = activerecord_sql_builder::update(self.db().dialect(), table, &columns, &keys);
        let params = values.values().chain(filter.values()).cloned().collect();
        debug!(sql = %sql, "update");
        self.db().execute(&sql, params).await
    }

    pub async fn delete_rows(&self, table: &str, filter: &Values) -> Result<u64> {
        let keys: Vec<&str> = filter.keys().map(String::as_str).collect();
        let sql = activerecord_sql_builder::delete(self.db().dialect(), table, &keys);
        debug!(sql = %sql, "delete");
        self.db().execute(&sql, filter.values().cloned().collect()).await
    }
}

impl std::fmt::Debug for Dao {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dao").field("factory", &self.factory).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnection;
    use activerecord_core::Error;
    use futures::executor::block_on;

    fn dao(conn: &Arc<MockConnection>) -> Dao {
        DaoFactory::new(conn.clone()).dao()
    }

    #[test]
    fn fetch_helpers_shape_results() {
        let conn = Arc::new(MockConnection::with_rows(vec![
            Row::new().with("id", 1).with("username", "Foo").with("email", "foo@bar.com"),
            Row::new().with("id", 2).with("username", "Bar").with("email", "bar@foo.com"),
        ]));
        let dao = dao(&conn);
        block_on(async {
            let pairs = dao.fetch_pairs("SELECT * FROM users", vec![]).await.unwrap();
            assert_eq!(pairs[1], (SqlValue::Integer(2), SqlValue::from("Bar")));
            let col = dao.fetch_col("SELECT * FROM users", vec![]).await.unwrap();
            assert_eq!(col, vec![SqlValue::Integer(1), SqlValue::Integer(2)]);
            let one = dao
                .fetch_single_value("SELECT * FROM users", vec![])
                .await
                .unwrap();
            assert_eq!(one, SqlValue::Integer(1));
        });
    }

    #[test]
    fn single_value_of_empty_result_is_null() {
        let conn = Arc::new(MockConnection::default());
        let value = block_on(dao(&conn).fetch_single_value("SELECT 1 WHERE 0", vec![])).unwrap();
        assert_eq!(value, SqlValue::Null);
    }

    #[test]
    fn write_helpers_build_statements() {
        let conn = Arc::new(MockConnection::default());
        let dao = dao(&conn);
        let mut values = Values::new();
        values.insert("email".into(), "x@y".into());
        values.insert("username".into(), "X".into());
        let mut filter = Values::new();
        filter.insert("id".into(), 7.into());
        block_on(async {
            dao.insert_row("users", &values).await.unwrap();
            dao.update_rows("users", &values, &filter).await.unwrap();
            dao.delete_rows("users", &filter).await.unwrap();
        });
        let statements = conn.statements();
        assert_eq!(
            statements[0].0,
            "INSERT INTO \"users\" (\"email\", \"username\") VALUES (?, ?)"
        );
        assert_eq!(
            statements[1].0,
            "UPDATE \"users\" SET \"email\" = ?, \"username\" = ? WHERE \"id\" = ?"
        );
        assert_eq!(statements[1].1.last(), Some(&SqlValue::Integer(7)));
        assert_eq!(statements[2].0, "DELETE FROM \"users\" WHERE \"id\" = ?");
    }

    #[test]
    fn transactional_commits_or_rolls_back() {
        let conn = Arc::new(MockConnection::default());
        let dao = dao(&conn);
        block_on(async {
            let ok = dao.transactional(|| async { Ok(5) }).await.unwrap();
            assert_eq!(ok, 5);
            let err = dao
                .transactional(|| async { Err::<(), _>(Error::Update("nope".into())) })
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Update(_)));
        });
        assert_eq!(conn.tx_calls(), vec!["begin", "commit", "begin", "rollback"]);
    }

    #[test]
    fn table_descriptions_are_cached() {
        let conn = Arc::new(MockConnection::default());
        let dao = dao(&conn);
        let clone = dao.clone();
        block_on(async {
            dao.describe_table("users").await.unwrap();
            clone.describe_table("users").await.unwrap();
            dao.describe_table("documents").await.unwrap();
        });
        assert_eq!(conn.describe_calls(), 2);
    }

    #[test]
    fn factory_creates_custom_daos() {
        struct TestDao {
            inner: Dao,
        }
        impl FromFactory for TestDao {
            fn from_factory(factory: &DaoFactory) -> Self {
                Self {
                    inner: factory.dao(),
                }
            }
        }
        let conn = Arc::new(MockConnection::default());
        let factory = DaoFactory::new(conn);
        let custom: TestDao = factory.create();
        let again: TestDao = custom.inner.create_dao();
        assert_eq!(again.inner.query_builder().to_sql(), "SELECT *");
    }
}
