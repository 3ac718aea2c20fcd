//! In-memory connection and entities for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use activerecord_core::{
    async_trait, ColumnInfo, Connection, Dialect, Error, FixedClock, Native, Properties, Result,
    Row, SqlValue,
};
use activerecord_sql_builder::QueryBuilder;

use crate::entity::{EntityDao, EntityDefinition, Record};
use crate::search::SearchParams;
use crate::{DaoFactory, Entity, Format};

/// Records every statement. Queries return queued results first, then the fixed rows.
#[derive(Default)]
pub(crate) struct MockConnection {
    rows: Vec<Row>,
    results: Mutex<VecDeque<Vec<Row>>>,
    statements: Mutex<Vec<(String, Vec<SqlValue>)>>,
    tx_calls: Mutex<Vec<&'static str>>,
    level: AtomicUsize,
    describe_calls: AtomicUsize,
    next_id: AtomicI64,
    fail_on: Mutex<Option<String>>,
}

impl MockConnection {
    pub(crate) fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    pub(crate) fn push_result(&self, rows: Vec<Row>) {
        lock(&self.results).push_back(rows);
    }

    pub(crate) fn set_next_id(&self, id: i64) {
        self.next_id.store(id, Ordering::SeqCst);
    }

    /// Statements containing `needle` fail.
    pub(crate) fn fail_on(&self, needle: &str) {
        *lock(&self.fail_on) = Some(needle.to_string());
    }

    pub(crate) fn statements(&self) -> Vec<(String, Vec<SqlValue>)> {
        lock(&self.statements).clone()
    }

    pub(crate) fn tx_calls(&self) -> Vec<&'static str> {
        lock(&self.tx_calls).clone()
    }

    pub(crate) fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    fn record(&self, sql: &str, params: Vec<SqlValue>) -> Result<()> {
        lock(&self.statements).push((sql.to_string(), params));
        match lock(&self.fail_on).as_deref() {
            Some(needle) if sql.contains(needle) => Err(Error::backend(std::io::Error::new(
                std::io::ErrorKind::Other,
                "statement failed",
            ))),
            _ => Ok(()),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Connection for MockConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn fetch_all(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<Row>> {
        self.record(sql, params)?;
        let queued = lock(&self.results).pop_front();
        Ok(queued.unwrap_or_else(|| self.rows.clone()))
    }

    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64> {
        self.record(sql, params)?;
        Ok(1)
    }

    async fn last_insert_id(&self, _sequence: Option<&str>) -> Result<SqlValue> {
        Ok(SqlValue::Integer(self.next_id.load(Ordering::SeqCst)))
    }

    async fn begin_transaction(&self) -> Result<()> {
        lock(&self.tx_calls).push("begin");
        self.level.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        lock(&self.tx_calls).push("commit");
        self.level.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn roll_back(&self) -> Result<()> {
        lock(&self.tx_calls).push("rollback");
        self.level.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn transaction_nesting_level(&self) -> usize {
        self.level.load(Ordering::SeqCst)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(vec!["people".into()])
    }

    async fn describe_table(&self, _table: &str) -> Result<Vec<ColumnInfo>> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(["id", "username", "email", "active", "born", "created", "updated"]
            .iter()
            .map(|name| ColumnInfo {
                name: name.to_string(),
                data_type: "TEXT".into(),
                nullable: *name != "username",
                default: None,
                primary_key: *name == "id",
            })
            .collect())
    }
}

/// Factory over `conn` with the clock fixed at 2016-01-22 23:01:42.
pub(crate) fn factory(conn: &Arc<MockConnection>) -> DaoFactory {
    let clock = FixedClock::parse("2016-01-22 23:01:42").expect("fixed clock");
    DaoFactory::new(conn.clone()).with_clock(clock)
}

/// Written out by hand to cover the hooks and the renamed `mail` property.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Person {
    pub id: Option<i64>,
    pub username: String,
    pub mail: String,
    pub active: bool,
}

impl EntityDefinition for Person {
    const NAME: &'static str = "Person";
    const TABLE: &'static str = "people";
    const FIELD_MAP: &'static [(&'static str, &'static str)] = &[("email", "mail")];
    const FORMAT_MAP: &'static [(&'static str, Format)] =
        &[("active", Format::Bool), ("born", Format::Date)];
    const TIMESTAMPS: bool = true;

    fn optimize_search_query(query: QueryBuilder, _params: &SearchParams) -> QueryBuilder {
        query.and_where("active = 1")
    }

    fn computed_value(dao: &EntityDao<Self>, property: &str) -> Option<Native> {
        match property {
            "shout" => dao
                .get("username")
                .ok()
                .map(|name| Native::Text(name.to_text().to_uppercase())),
            _ => None,
        }
    }
}

impl Record for Person {
    fn from_properties(props: &Properties) -> Result<Self> {
        let prop = |name: &str| props.get(name).cloned().unwrap_or_default();
        Ok(Self {
            id: prop("id").extract()?,
            username: prop("username").extract()?,
            mail: prop("mail").extract()?,
            active: prop("active").extract()?,
        })
    }

    fn to_properties(&self) -> Properties {
        let mut props = Properties::new();
        props.insert("id".into(), self.id.into());
        props.insert("username".into(), self.username.clone().into());
        props.insert("mail".into(), self.mail.clone().into());
        props.insert("active".into(), self.active.into());
        props
    }
}

/// Relation row with a compound key.
#[derive(Entity, Debug, Clone, PartialEq)]
#[entity(table = "pairs")]
pub(crate) struct Pair {
    #[column(id)]
    pub left_id: i64,
    #[column(id)]
    pub right_id: i64,
    pub weight: f64,
}
