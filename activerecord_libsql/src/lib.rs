#![forbid(unsafe_code)]
#![cfg_attr(
    not(feature = "libsql-backend"),
    doc = "Enable feature `libsql-backend` to use this adapter."
)]

#[cfg(feature = "libsql-backend")]
mod backend {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use activerecord_core::transactions::Isolation;
    use activerecord_core::{ColumnInfo, Connection, Dialect, Error, Result, Row, SqlValue};
    use async_trait::async_trait;
    use libsql::{Builder, Database, Value};

    #[cfg(feature = "tracing")]
    use tracing::info;

    #[inline]
    #[allow(unused_variables)]
    fn obs_record(op: &str, sql: &str, start: Instant, rows: usize, success: bool) {
        let elapsed = start.elapsed().as_millis() as u64;
        #[cfg(feature = "tracing")]
        {
            info!(
                sql_kind = "sql",
                sql = sql,
                op = op,
                rows = rows,
                elapsed_ms = elapsed,
                success = success,
                "db op"
            );
        }
        #[cfg(feature = "metrics")]
        {
            metrics::counter!("db_ops_total", 1, "op" => op.to_string(), "success" => success.to_string());
            metrics::histogram!("db_op_duration_ms", elapsed as f64, "op" => op.to_string());
            if !success {
                metrics::counter!("db_op_errors_total", 1, "op" => op.to_string());
            }
        }
    }

    fn begin_sql(isolation: Isolation) -> &'static str {
        match isolation {
            Isolation::Default | Isolation::ReadCommitted => "BEGIN DEFERRED",
            Isolation::RepeatableRead => "BEGIN IMMEDIATE",
            Isolation::Serializable => "BEGIN EXCLUSIVE",
        }
    }

    // SQLite has no booleans; they travel as 0/1.
    fn to_libsql_value(v: SqlValue) -> Value {
        match v {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(i) => Value::Integer(i),
            SqlValue::Real(f) => Value::Real(f),
            SqlValue::Text(s) => Value::Text(s),
            SqlValue::Blob(b) => Value::Blob(b),
        }
    }

    fn from_libsql_value(v: Value) -> SqlValue {
        match v {
            Value::Null => SqlValue::Null,
            Value::Integer(i) => SqlValue::Integer(i),
            Value::Real(f) => SqlValue::Real(f),
            Value::Text(s) => SqlValue::Text(s),
            Value::Blob(b) => SqlValue::Blob(b),
        }
    }

    /// A single libsql connection implementing [`Connection`].
    ///
    /// All statements run on the same underlying connection, so an in-memory
    /// database keeps its state for the lifetime of this value. Nested
    /// transactions are emulated with savepoints named `sp1`, `sp2`, ...
    pub struct LibsqlConnection {
        conn: libsql::Connection,
        isolation: Isolation,
        level: AtomicUsize,
        // Serializes begin/commit/rollback so the nesting level matches the database.
        tx_lock: tokio::sync::Mutex<()>,
    }

    impl LibsqlConnection {
        pub fn new(conn: libsql::Connection) -> Self {
            Self {
                conn,
                isolation: Isolation::Default,
                level: AtomicUsize::new(0),
                tx_lock: tokio::sync::Mutex::new(()),
            }
        }

        /// Connects to an existing `libsql::Database`.
        pub fn from_database(db: &Database) -> Result<Self> {
            Ok(Self::new(db.connect().map_err(Error::backend)?))
        }

        /// Opens a database by URL or path, e.g. `file:/tmp/app.db?mode=rwc`.
        pub async fn from_url(database_url: &str) -> Result<Self> {
            // Database::open is deprecated upstream; keep a narrow allow here until Builder migration
            #[allow(deprecated)]
            let db = Database::open(database_url).map_err(Error::backend)?;
            let this = Self::from_database(&db)?;
            this.set_busy_timeout().await;
            Ok(this)
        }

        /// A private in-memory database.
        pub async fn open_in_memory() -> Result<Self> {
            let db = Builder::new_local(":memory:")
                .build()
                .await
                .map_err(Error::backend)?;
            Self::from_database(&db)
        }

        /// Isolation used when a top-level transaction begins.
        pub fn with_isolation(mut self, isolation: Isolation) -> Self {
            self.isolation = isolation;
            self
        }

        pub fn inner(&self) -> &libsql::Connection {
            &self.conn
        }

        /// Runs a batch of `;`-separated statements, e.g. a schema.
        pub async fn execute_batch(&self, sql: &str) -> Result<()> {
            let start = Instant::now();
            let res = self.conn.execute_batch(sql).await;
            obs_record("execute_batch", sql, start, 0, res.is_ok());
            res.map(|_| ()).map_err(Error::backend)
        }

        // Reduces spurious SQLITE_BUSY on shared files. Failure is harmless.
        async fn set_busy_timeout(&self) {
            if let Ok(mut rows) = self.conn.query("PRAGMA busy_timeout = 1000", ()).await {
                let _ = rows.next().await;
            }
        }

        async fn run(&self, sql: &str) -> Result<()> {
            self.conn
                .execute(sql, ())
                .await
                .map(|_| ())
                .map_err(Error::backend)
        }
    }

    impl std::fmt::Debug for LibsqlConnection {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("LibsqlConnection")
                .field("isolation", &self.isolation)
                .field("level", &self.level.load(Ordering::SeqCst))
                .finish()
        }
    }

    #[async_trait]
    impl Connection for LibsqlConnection {
        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }

        async fn fetch_all(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<Row>> {
            let start = Instant::now();
            let values: Vec<Value> = params.into_iter().map(to_libsql_value).collect();
            let mut rows = match self.conn.query(sql, values).await {
                Ok(rows) => rows,
                Err(e) => {
                    obs_record("fetch_all", sql, start, 0, false);
                    return Err(Error::backend(e));
                }
            };
            let mut out = Vec::new();
            while let Some(row) = rows.next().await.map_err(Error::backend)? {
                let mut mapped = Row::new();
                for i in 0..row.column_count() {
                    let name = row.column_name(i).unwrap_or_default().to_string();
                    let value = row.get_value(i).map_err(Error::mapping)?;
                    mapped.push(name, from_libsql_value(value));
                }
                out.push(mapped);
            }
            obs_record("fetch_all", sql, start, out.len(), true);
            Ok(out)
        }

        async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64> {
            let start = Instant::now();
            let values: Vec<Value> = params.into_iter().map(to_libsql_value).collect();
            match self.conn.execute(sql, values).await {
                Ok(n) => {
                    obs_record("execute", sql, start, n as usize, true);
                    Ok(n)
                }
                Err(e) => {
                    obs_record("execute", sql, start, 0, false);
                    Err(Error::backend(e))
                }
            }
        }

        /// SQLite has no sequences; the rowid of the last insert is returned either way.
        async fn last_insert_id(&self, _sequence: Option<&str>) -> Result<SqlValue> {
            Ok(SqlValue::Integer(self.conn.last_insert_rowid()))
        }

        async fn begin_transaction(&self) -> Result<()> {
            let _guard = self.tx_lock.lock().await;
            let level = self.level.load(Ordering::SeqCst);
            if level == 0 {
                self.run(begin_sql(self.isolation)).await?;
            } else {
                self.run(&format!("SAVEPOINT sp{}", level)).await?;
            }
            self.level.store(level + 1, Ordering::SeqCst);
            Ok(())
        }

        async fn commit(&self) -> Result<()> {
            let _guard = self.tx_lock.lock().await;
            let level = self.level.load(Ordering::SeqCst);
            match level {
                0 => {
                    return Err(Error::InvalidArgument(
                        "There is no active transaction".into(),
                    ))
                }
                1 => {}
                n => {
                    let result = self.run(&format!("RELEASE SAVEPOINT sp{}", n - 1)).await;
                    self.level.store(n - 1, Ordering::SeqCst);
                    return result;
                }
            }
            let result = self.run("COMMIT").await;
            if result.is_err() {
                // A failed COMMIT leaves the transaction open.
                if let Err(_rollback) = self.run("ROLLBACK").await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %_rollback, "rollback after failed commit");
                }
            }
            self.level.store(0, Ordering::SeqCst);
            result
        }

        async fn roll_back(&self) -> Result<()> {
            let _guard = self.tx_lock.lock().await;
            let level = self.level.load(Ordering::SeqCst);
            if level == 0 {
                return Err(Error::InvalidArgument(
                    "There is no active transaction".into(),
                ));
            }
            let result = if level == 1 {
                self.run("ROLLBACK").await
            } else {
                let name = format!("sp{}", level - 1);
                match self.run(&format!("ROLLBACK TO SAVEPOINT {}", name)).await {
                    Ok(()) => self.run(&format!("RELEASE SAVEPOINT {}", name)).await,
                    Err(e) => Err(e),
                }
            };
            self.level.store(level - 1, Ordering::SeqCst);
            result
        }

        fn transaction_nesting_level(&self) -> usize {
            self.level.load(Ordering::SeqCst)
        }

        async fn list_tables(&self) -> Result<Vec<String>> {
            let rows = self
                .fetch_all(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                    Vec::new(),
                )
                .await?;
            Ok(rows
                .into_iter()
                .filter_map(|r| r.into_first())
                .map(|v| v.to_text())
                .collect())
        }

        async fn describe_table(&self, table: &str) -> Result<Vec<ColumnInfo>> {
            let sql = format!(
                "PRAGMA table_info({})",
                Dialect::Sqlite.quote_identifier(table)
            );
            let rows = self.fetch_all(&sql, Vec::new()).await?;
            if rows.is_empty() {
                return Err(Error::NotFound(format!("Table {} does not exist", table)));
            }
            Ok(rows
                .iter()
                .map(|r| ColumnInfo {
                    name: r.get("name").map(SqlValue::to_text).unwrap_or_default(),
                    data_type: r.get("type").map(SqlValue::to_text).unwrap_or_default(),
                    nullable: !r.get("notnull").map(SqlValue::truthy).unwrap_or(false),
                    default: r
                        .get("dflt_value")
                        .filter(|v| !v.is_null())
                        .map(SqlValue::to_text),
                    primary_key: r.get("pk").map(SqlValue::truthy).unwrap_or(false),
                })
                .collect())
        }
    }
}

#[cfg(feature = "libsql-backend")]
pub use backend::LibsqlConnection;

#[cfg(all(test, feature = "libsql-backend"))]
mod tests {
    use super::LibsqlConnection;
    use activerecord_core::transactions::{
        ConnectionTransactionManager, Isolation, TransactionDefinition, TransactionManager,
    };
    use activerecord_core::{Connection, Error, SqlValue};
    use std::sync::Arc;

    const SCHEMA: &str = "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, email TEXT NOT NULL UNIQUE, active INTEGER NOT NULL DEFAULT 1, note TEXT);";

    async fn setup_db() -> LibsqlConnection {
        let conn = LibsqlConnection::open_in_memory().await.expect("open db");
        conn.execute_batch(SCHEMA).await.expect("apply schema");
        conn
    }

    async fn count(conn: &LibsqlConnection) -> i64 {
        conn.fetch_one("SELECT COUNT(*) AS n FROM users", vec![])
            .await
            .expect("count")
            .and_then(|r| r.into_first())
            .and_then(|v| v.as_i64())
            .unwrap_or(-1)
    }

    #[tokio::test]
    async fn insert_fetch_and_last_insert_id() {
        let conn = setup_db().await;
        let n = conn
            .execute(
                "INSERT INTO users (email, active) VALUES (?, ?)",
                vec!["a@x".into(), true.into()],
            )
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(conn.last_insert_id(None).await.unwrap(), SqlValue::Integer(1));

        let rows = conn
            .fetch_all("SELECT id, email, active, note FROM users WHERE email = ?", vec!["a@x".into()])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].columns(), &["id", "email", "active", "note"]);
        assert_eq!(rows[0].get("active"), Some(&SqlValue::Integer(1)));
        assert_eq!(rows[0].get("note"), Some(&SqlValue::Null));
    }

    #[tokio::test]
    async fn unknown_column_surfaces_backend_error() {
        let conn = setup_db().await;
        let err = conn
            .fetch_all("SELECT does_not_exist FROM users", vec![])
            .await
            .expect_err("expected query to fail");
        assert!(matches!(err, Error::Backend { .. }));
    }

    #[tokio::test]
    async fn nested_transactions_use_savepoints() {
        let conn = setup_db().await;
        conn.begin_transaction().await.unwrap();
        conn.execute("INSERT INTO users (email) VALUES ('outer@x')", vec![])
            .await
            .unwrap();
        conn.begin_transaction().await.unwrap();
        assert_eq!(conn.transaction_nesting_level(), 2);
        conn.execute("INSERT INTO users (email) VALUES ('inner@x')", vec![])
            .await
            .unwrap();
        conn.roll_back().await.unwrap();
        assert_eq!(count(&conn).await, 1);
        conn.commit().await.unwrap();
        assert!(!conn.is_transaction_active());
        assert_eq!(count(&conn).await, 1);
    }

    #[tokio::test]
    async fn failed_commit_closes_the_transaction() {
        let conn = setup_db().await;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE notes (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id) DEFERRABLE INITIALLY DEFERRED);",
        )
        .await
        .unwrap();

        conn.begin_transaction().await.unwrap();
        conn.execute("INSERT INTO notes (user_id) VALUES (99)", vec![])
            .await
            .unwrap();
        assert!(matches!(conn.commit().await, Err(Error::Backend { .. })));
        assert_eq!(conn.transaction_nesting_level(), 0);

        conn.begin_transaction().await.unwrap();
        conn.execute("INSERT INTO users (email) VALUES ('after@x')", vec![])
            .await
            .unwrap();
        conn.commit().await.unwrap();
        assert_eq!(count(&conn).await, 1);
        let notes = conn.fetch_all("SELECT * FROM notes", vec![]).await.unwrap();
        assert!(notes.is_empty());
    }

    #[tokio::test]
    async fn commit_without_transaction_is_an_error() {
        let conn = setup_db().await;
        assert!(matches!(
            conn.commit().await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(conn.roll_back().await.is_err());
    }

    #[tokio::test]
    async fn manager_rolls_back_on_error() {
        let conn: Arc<dyn Connection> = Arc::new(setup_db().await);
        let mgr = ConnectionTransactionManager::new(conn.clone());
        let c = conn.clone();
        let res = mgr
            .execute(&TransactionDefinition::default(), |_ctx| async move {
                c.execute("INSERT INTO users (email) VALUES ('gone@x')", vec![])
                    .await?;
                Err::<(), _>(Error::Update("boom".into()))
            })
            .await;
        assert!(matches!(res, Err(Error::Update(_))));
        let rows = conn.fetch_all("SELECT * FROM users", vec![]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn describe_and_list_tables() {
        let conn = setup_db().await;
        conn.execute_batch("CREATE TABLE groups (id INTEGER PRIMARY KEY, name TEXT);")
            .await
            .unwrap();
        assert_eq!(conn.list_tables().await.unwrap(), vec!["groups", "users"]);

        let cols = conn.describe_table("users").await.unwrap();
        let names: Vec<_> = cols.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["id", "email", "active", "note"]);
        assert!(cols[0].primary_key);
        assert!(cols[1].is_required());
        assert_eq!(cols[2].default.as_deref(), Some("1"));
        assert!(!cols[2].is_required());
        assert!(cols[3].nullable);

        assert!(conn.describe_table("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn file_database_persists_across_connections() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("file:{}?mode=rwc", dir.path().join("ar.sqlite3").display());
        {
            let conn = LibsqlConnection::from_url(&url)
                .await
                .unwrap()
                .with_isolation(Isolation::RepeatableRead);
            conn.execute_batch(SCHEMA).await.unwrap();
            conn.begin_transaction().await.unwrap();
            conn.execute("INSERT INTO users (email) VALUES ('file@x')", vec![])
                .await
                .unwrap();
            conn.commit().await.unwrap();
        }
        let again = LibsqlConnection::from_url(&url).await.unwrap();
        assert_eq!(count(&again).await, 1);
    }
}
