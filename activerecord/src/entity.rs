//! Entity definitions and the row-level entity DAO.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use activerecord_core::{Error, Format, Native, Properties, Result, Row, SqlValue, Values};
use activerecord_sql_builder::{placeholders, Expr, Order, QueryBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::condition::Condition;
use crate::dao::{Dao, FromFactory};
use crate::search::SearchParams;
use crate::DaoFactory;

/// Static description of an entity table. Usually derived with `#[derive(Entity)]`.
pub trait EntityDefinition: Send + Sync + Sized + 'static {
    /// Display name, e.g. used in entity titles.
    const NAME: &'static str;
    const TABLE: &'static str;
    /// One entry for a single key; more entries make a compound key.
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const PRIMARY_KEY_SEQUENCE: Option<&'static str> = None;
    /// `(column, property)` pairs for columns exposed under another name.
    const FIELD_MAP: &'static [(&'static str, &'static str)] = &[];
    const FORMAT_MAP: &'static [(&'static str, Format)] = &[];
    const TIMESTAMPS: bool = false;
    const CREATED_COLUMN: &'static str = "created";
    const UPDATED_COLUMN: &'static str = "updated";

    /// Last chance to adjust a search query, applied to the result and the count query.
    fn optimize_search_query(query: QueryBuilder, _params: &SearchParams) -> QueryBuilder {
        query
    }

    /// Value for a property that is not a column.
    fn computed_value(_dao: &EntityDao<Self>, _property: &str) -> Option<Native> {
        None
    }
}

/// Typed struct for an entity, converted to and from properties.
pub trait Record: EntityDefinition {
    fn from_properties(props: &Properties) -> Result<Self>;

    fn to_properties(&self) -> Properties;

    /// The primary key part of [`Record::to_properties`].
    fn id_properties(&self) -> Properties {
        let mut props = self.to_properties();
        props.retain(|name, _| Self::PRIMARY_KEY.contains(&column_of::<Self>(name)));
        props
    }
}

pub(crate) fn column_of<E: EntityDefinition>(property: &str) -> &str {
    E::FIELD_MAP
        .iter()
        .find(|(_, prop)| *prop == property)
        .map(|(col, _)| *col)
        .unwrap_or(property)
}

pub(crate) fn property_of<E: EntityDefinition>(column: &str) -> &str {
    E::FIELD_MAP
        .iter()
        .find(|(col, _)| *col == column)
        .map(|(_, prop)| *prop)
        .unwrap_or(column)
}

pub(crate) fn format_of<E: EntityDefinition>(column: &str) -> Format {
    E::FORMAT_MAP
        .iter()
        .find(|(col, _)| *col == column)
        .map(|(_, format)| *format)
        .unwrap_or_default()
}

/// First character of the table name.
pub(crate) fn default_alias(table: &str) -> String {
    table.chars().take(1).collect()
}

/// A primary key value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Id {
    Single(SqlValue),
    Compound(BTreeMap<String, SqlValue>),
}

impl Id {
    pub fn compound<I, K, V>(parts: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<SqlValue>,
    {
        Id::Compound(
            parts
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn as_single(&self) -> Option<&SqlValue> {
        match self {
            Id::Single(v) => Some(v),
            Id::Compound(_) => None,
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Single(v) => f.write_str(&v.to_text()),
            Id::Compound(parts) => {
                let rendered: Vec<String> = parts
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v.to_text()))
                    .collect();
                f.write_str(&rendered.join(", "))
            }
        }
    }
}

impl From<SqlValue> for Id {
    fn from(v: SqlValue) -> Self {
        Id::Single(v)
    }
}

impl From<i64> for Id {
    fn from(v: i64) -> Self {
        Id::Single(v.into())
    }
}

impl From<i32> for Id {
    fn from(v: i32) -> Self {
        Id::Single(v.into())
    }
}

impl From<&str> for Id {
    fn from(v: &str) -> Self {
        Id::Single(v.into())
    }
}

impl From<String> for Id {
    fn from(v: String) -> Self {
        Id::Single(v.into())
    }
}

/// One row of an entity table.
///
/// Keeps the current column values and the values last read from or written
/// to the database, so [`EntityDao::update`] only writes what changed.
pub struct EntityDao<E: EntityDefinition> {
    dao: Dao,
    data: Values,
    original: Values,
    _entity: PhantomData<fn() -> E>,
}

impl<E: EntityDefinition> Clone for EntityDao<E> {
    fn clone(&self) -> Self {
        Self {
            dao: self.dao.clone(),
            data: self.data.clone(),
            original: self.original.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: EntityDefinition> fmt::Debug for EntityDao<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDao")
            .field("entity", &E::NAME)
            .field("data", &self.data)
            .finish()
    }
}

impl<E: EntityDefinition> FromFactory for EntityDao<E> {
    fn from_factory(factory: &DaoFactory) -> Self {
        factory.entity()
    }
}

impl<E: EntityDefinition> EntityDao<E> {
    pub fn new(dao: Dao) -> Self {
        Self {
            dao,
            data: Values::new(),
            original: Values::new(),
            _entity: PhantomData,
        }
    }

    pub fn dao(&self) -> &Dao {
        &self.dao
    }

    pub fn table_name(&self) -> &'static str {
        E::TABLE
    }

    /// The single primary key column.
    pub fn primary_key_name(&self) -> Result<&'static str> {
        match E::PRIMARY_KEY {
            [pk] => Ok(pk),
            _ => Err(Error::PrimaryKey("Primary key is compound".into())),
        }
    }

    pub fn has_timestamp_enabled(&self) -> bool {
        E::TIMESTAMPS
    }

    fn single_key(&self) -> Option<&'static str> {
        self.primary_key_name().ok()
    }

    pub(crate) fn quote(&self, ident: &str) -> String {
        self.dao.db().dialect().quote_identifier(ident)
    }

    /// Converts a value for `column` with the column's format.
    pub(crate) fn column_value(&self, column: &str, value: impl Into<Native>) -> Result<SqlValue> {
        Ok(format_of::<E>(column).to_sql(value)?)
    }

    /// `"col" IN (?, ..)`; an empty list matches nothing.
    pub(crate) fn in_expr(&self, quoted: &str, column: &str, values: &[Native]) -> Result<Expr> {
        if values.is_empty() {
            return Ok(Expr::new("1 = 0"));
        }
        let params = values
            .iter()
            .map(|v| self.column_value(column, v.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Expr::with_params(
            format!("{} IN ({})", quoted, placeholders(params.len())),
            params,
        ))
    }

    /// Reads a property, converted with its column format.
    pub fn get(&self, property: &str) -> Result<Native> {
        let column = column_of::<E>(property);
        match self.data.get(column) {
            Some(value) => Ok(format_of::<E>(column).from_sql(value)?),
            None if E::PRIMARY_KEY.contains(&column) => Ok(Native::Null),
            None => E::computed_value(self, property)
                .ok_or_else(|| Error::ColumnNotFound(property.to_string())),
        }
    }

    /// True when the property has a non-null value.
    pub fn contains(&self, property: &str) -> bool {
        self.data
            .get(column_of::<E>(property))
            .map_or(false, |v| !v.is_null())
    }

    /// Writes a property, converted with its column format. The single primary
    /// key can only be set once.
    pub fn set(&mut self, property: &str, value: impl Into<Native>) -> Result<()> {
        let column = column_of::<E>(property);
        let value = self.column_value(column, value)?;
        if self.single_key() == Some(column) {
            self.set_id(value)
        } else {
            self.data.insert(column.to_string(), value);
            Ok(())
        }
    }

    /// Replaces the raw column values, e.g. with a row read elsewhere.
    pub fn set_data(&mut self, data: Values) {
        self.original = data.clone();
        self.data = data;
    }

    pub fn data(&self) -> &Values {
        &self.data
    }

    pub fn set_values<I, K, V>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Native>,
    {
        for (property, value) in values {
            self.set(property.as_ref(), value)?;
        }
        Ok(())
    }

    /// Like [`EntityDao::set_values`], ignoring names that are not columns of the table.
    pub async fn set_defined_values(&mut self, values: &Properties) -> Result<()> {
        let columns = self.dao.describe_table(E::TABLE).await?;
        for column in columns {
            if let Some(value) = values.get(&column.name) {
                self.set(&column.name, value.clone())?;
            }
        }
        Ok(())
    }

    /// All values keyed by property name.
    pub fn values(&self) -> Result<Properties> {
        let mut out = Properties::new();
        for (column, value) in &self.data {
            let native = format_of::<E>(column).from_sql(value)?;
            out.insert(property_of::<E>(column).to_string(), native);
        }
        Ok(out)
    }

    pub fn to_record(&self) -> Result<E>
    where
        E: Record,
    {
        E::from_properties(&self.values()?)
    }

    /// Copies a record into this DAO. Null keys are left to the database.
    pub fn set_record(&mut self, record: &E) -> Result<()>
    where
        E: Record,
    {
        for (property, value) in record.to_properties() {
            let column = column_of::<E>(&property);
            if !E::PRIMARY_KEY.contains(&column) {
                self.set(&property, value)?;
                continue;
            }
            if value.is_null() {
                continue;
            }
            let value = self.column_value(column, value)?;
            match self.data.get(column) {
                Some(current) if !current.is_null() => {
                    if !current.loosely_equals(&value) {
                        return Err(Error::PrimaryKey("Can not set primary id again".into()));
                    }
                }
                _ => {
                    self.data.insert(column.to_string(), value);
                }
            }
        }
        Ok(())
    }

    /// Column filter for `id`, converted with the key formats.
    fn id_filter(&self, id: Id) -> Result<Vec<(String, SqlValue)>> {
        match (id, self.single_key()) {
            (Id::Single(value), Some(pk)) => Ok(vec![(pk.to_string(), self.column_value(pk, value)?)]),
            (Id::Single(_), None) => Err(Error::InvalidArgument(
                "id must be compound for compound primary keys".into(),
            )),
            (Id::Compound(parts), _) => {
                if let Some(missing) = E::PRIMARY_KEY.iter().find(|k| !parts.contains_key(**k)) {
                    return Err(Error::PrimaryKey(format!(
                        "Primary key not complete: {}",
                        missing
                    )));
                }
                parts
                    .into_iter()
                    .map(|(column, value)| {
                        let value = self.column_value(&column, value)?;
                        Ok((column, value))
                    })
                    .collect()
            }
        }
    }

    fn select_by_id(&self, id: Id) -> Result<QueryBuilder> {
        let alias = default_alias(E::TABLE);
        let mut query = self
            .dao
            .query_builder()
            .select(["*"])
            .from(E::TABLE, Some(&alias));
        for (column, value) in self.id_filter(id)? {
            query = query.and_where(Expr::with_params(
                format!("{} = ?", self.quote(&column)),
                vec![value],
            ));
        }
        Ok(query)
    }

    /// Loads the row with the given primary key.
    pub async fn find(&mut self, id: impl Into<Id>) -> Result<&mut Self> {
        let query = self.select_by_id(id.into())?;
        let row = self
            .dao
            .fetch_query(&query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound("No matching row found".into()))?;
        self.set_data(row.into_values());
        Ok(self)
    }

    /// Reads the current row again, discarding unsaved changes.
    pub async fn reload(&mut self) -> Result<&mut Self> {
        let id = Id::Compound(self.where_id()?);
        self.find(id).await
    }

    pub async fn exists(&self, id: impl Into<Id>) -> Result<bool> {
        let query = self.select_by_id(id.into())?;
        Ok(!self.dao.fetch_query(&query).await?.is_empty())
    }

    fn now_value(&self) -> Result<SqlValue> {
        Ok(Format::DateTime.to_sql(Native::DateTime(self.dao.now()))?)
    }

    /// Inserts the current values as a new row.
    ///
    /// Sets the created/updated timestamps when enabled and reads back the
    /// generated key when a single key was not given.
    pub async fn insert(&mut self) -> Result<()> {
        let mut fields = self.data.clone();
        if E::TIMESTAMPS {
            let now = self.now_value()?;
            fields.insert(E::CREATED_COLUMN.to_string(), now.clone());
            fields.insert(E::UPDATED_COLUMN.to_string(), now);
        }
        self.dao.insert_row(E::TABLE, &fields).await?;

        if let Some(pk) = self.single_key() {
            if fields.get(pk).map_or(true, SqlValue::is_null) {
                let id = self
                    .dao
                    .db()
                    .last_insert_id(E::PRIMARY_KEY_SEQUENCE)
                    .await?;
                debug!(table = E::TABLE, id = %id.to_text(), "inserted");
                fields.insert(pk.to_string(), id);
            }
        }
        self.set_data(fields);
        Ok(())
    }

    /// Writes changed non-key columns. Returns `false` when nothing changed.
    pub async fn update(&mut self) -> Result<bool> {
        let filter = self.where_id()?;
        let mut fields = Values::new();
        for (column, value) in &self.data {
            let changed = self
                .original
                .get(column)
                .map_or(true, |old| !old.loosely_equals(value));
            if changed && !E::PRIMARY_KEY.contains(&column.as_str()) {
                fields.insert(column.clone(), value.clone());
            }
        }
        if fields.is_empty() {
            return Ok(false);
        }
        if E::TIMESTAMPS {
            let now = self.now_value()?;
            fields.insert(E::UPDATED_COLUMN.to_string(), now.clone());
            self.data.insert(E::UPDATED_COLUMN.to_string(), now);
        }
        self.dao.update_rows(E::TABLE, &fields, &filter).await?;
        self.original = self.data.clone();
        Ok(true)
    }

    /// Deletes the row by primary key and returns the number of deleted rows.
    pub async fn delete(&self) -> Result<u64> {
        let filter = self.where_id()?;
        self.dao.delete_rows(E::TABLE, &filter).await
    }

    pub fn id(&self) -> Result<Id> {
        if let Some(pk) = self.single_key() {
            return match self.data.get(pk) {
                Some(v) if !v.is_null() => Ok(Id::Single(v.clone())),
                _ => Err(Error::PrimaryKey("No primary id set".into())),
            };
        }
        let mut parts = BTreeMap::new();
        for key in E::PRIMARY_KEY {
            match self.data.get(*key) {
                Some(v) if !v.is_null() => {
                    parts.insert(key.to_string(), v.clone());
                }
                _ => {
                    return Err(Error::PrimaryKey(format!(
                        "Primary key not complete: {}",
                        key
                    )))
                }
            }
        }
        Ok(Id::Compound(parts))
    }

    pub fn has_id(&self) -> bool {
        self.id().is_ok()
    }

    pub fn set_id(&mut self, id: impl Into<Id>) -> Result<()> {
        match (id.into(), self.single_key()) {
            (_, Some(_)) if self.has_id() => {
                Err(Error::PrimaryKey("Can not set primary id again".into()))
            }
            (Id::Single(value), Some(pk)) => {
                self.data.insert(pk.to_string(), value);
                Ok(())
            }
            (Id::Compound(mut parts), Some(pk)) => match parts.remove(pk) {
                Some(value) => {
                    self.data.insert(pk.to_string(), value);
                    Ok(())
                }
                None => Err(Error::PrimaryKey(format!("Primary key not complete: {}", pk))),
            },
            (Id::Single(_), None) => Err(Error::PrimaryKey("Primary key is compound".into())),
            (Id::Compound(parts), None) => {
                if let Some(missing) = E::PRIMARY_KEY.iter().find(|k| !parts.contains_key(**k)) {
                    return Err(Error::PrimaryKey(format!(
                        "Primary key not complete: {}",
                        missing
                    )));
                }
                for key in E::PRIMARY_KEY {
                    if let Some(value) = parts.get(*key) {
                        self.data.insert(key.to_string(), value.clone());
                    }
                }
                Ok(())
            }
        }
    }

    /// Primary key columns and values of this row.
    pub fn where_id(&self) -> Result<Values> {
        Ok(match self.id()? {
            Id::Single(value) => {
                let mut filter = Values::new();
                filter.insert(self.primary_key_name()?.to_string(), value);
                filter
            }
            Id::Compound(parts) => parts,
        })
    }

    /// A fresh DAO holding `row`.
    pub fn wrap(&self, row: Row) -> EntityDao<E> {
        let mut dao = EntityDao::new(self.dao.clone());
        dao.set_data(row.into_values());
        dao
    }

    pub fn wrap_all(&self, rows: Vec<Row>) -> Vec<EntityDao<E>> {
        rows.into_iter().map(|row| self.wrap(row)).collect()
    }

    pub async fn find_all(&self, conditions: &[Condition]) -> Result<Vec<EntityDao<E>>> {
        let rows = self.find_all_rows(conditions).await?;
        Ok(self.wrap_all(rows))
    }

    /// Every matching row, without count, offset or order.
    pub async fn find_all_rows(&self, conditions: &[Condition]) -> Result<Vec<Row>> {
        let alias = default_alias(E::TABLE);
        let mut query = self
            .dao
            .query_builder()
            .from(E::TABLE, Some(&alias))
            .select(["*"]);
        for condition in conditions {
            query = match condition {
                Condition::Id(value) => {
                    let pk = self.primary_key_name()?;
                    let value = self.column_value(pk, value.clone())?;
                    query.or_where(Expr::with_params(
                        format!("{} = ?", self.quote(pk)),
                        vec![value],
                    ))
                }
                Condition::Raw(expr) => query.and_where(expr.clone()),
                Condition::IdIn(values) => {
                    let pk = self.primary_key_name()?;
                    query.and_where(self.in_expr(&self.quote(pk), pk, values)?)
                }
                Condition::In { column, values } => {
                    query.and_where(self.in_expr(&self.quote(column), column, values)?)
                }
                Condition::Eq { column, value } if value.is_null() => {
                    query.and_where(format!("{} IS NULL", self.quote(column)))
                }
                Condition::Eq { column, value } => {
                    let value = self.column_value(column, value.clone())?;
                    query.and_where(Expr::with_params(
                        format!("{} = ?", self.quote(column)),
                        vec![value],
                    ))
                }
            };
        }
        self.dao.fetch_query(&query).await
    }

    /// `(index, column)` pairs of every matching row.
    ///
    /// `order` is `"field [ASC|DESC]"`; `index_column` defaults to the primary key.
    pub async fn find_list(
        &self,
        column: &str,
        order: Option<&str>,
        filter: Option<Expr>,
        index_column: Option<&str>,
    ) -> Result<Vec<(SqlValue, SqlValue)>> {
        let index = match index_column {
            Some(index) => index,
            None => self.primary_key_name()?,
        };
        let alias = default_alias(E::TABLE);
        let mut query = self
            .dao
            .query_builder()
            .select([self.quote(index), self.quote(column)])
            .from(E::TABLE, Some(&alias));
        if let Some(filter) = filter {
            query = query.set_where(filter);
        }
        if let Some(order) = order {
            let (field, direction) = split_order(order);
            query = query.order_by(field, direction);
        }
        let rows = self.dao.fetch_query(&query).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let key = row.get_index(0).cloned().unwrap_or_default();
                let value = row.get_index(1).cloned().unwrap_or_default();
                (key, value)
            })
            .collect())
    }

    /// Case-insensitive substring match over `columns`; `*` in `value` is a wildcard.
    pub fn fulltext_condition(&self, value: &str, columns: &[&str]) -> Expr {
        let pattern = format!("%{}%", value).replace('*', "%");
        let parts: Vec<String> = columns
            .iter()
            .map(|c| format!("UPPER({}) LIKE UPPER(?)", self.quote(c)))
            .collect();
        Expr::with_params(
            format!("({})", parts.join(" OR ")),
            vec![SqlValue::Text(pattern); columns.len()],
        )
    }

    /// Brings an n-to-m relation table from `existing` to `updated` for this row.
    pub async fn update_relation_table(
        &self,
        table: &str,
        key_column: &str,
        foreign_key_column: &str,
        existing: &[SqlValue],
        updated: &[SqlValue],
    ) -> Result<()> {
        let id = match self.id()? {
            Id::Single(v) => v,
            Id::Compound(_) => return Err(Error::PrimaryKey("Primary key is compound".into())),
        };
        let pair = |foreign: &SqlValue| {
            let mut values = Values::new();
            values.insert(key_column.to_string(), id.clone());
            values.insert(foreign_key_column.to_string(), foreign.clone());
            values
        };
        for foreign in updated {
            if !existing.iter().any(|e| e.loosely_equals(foreign)) {
                self.dao.insert_row(table, &pair(foreign)).await?;
            }
        }
        for foreign in existing {
            if !updated.iter().any(|u| u.loosely_equals(foreign)) {
                self.dao.delete_rows(table, &pair(foreign)).await?;
            }
        }
        Ok(())
    }

    /// A column is required by a search when all columns are selected, when it
    /// is selected explicitly, or when the search orders by it.
    pub fn column_is_required(&self, params: &SearchParams, column: &str) -> bool {
        if params.columns.is_empty() || params.columns.iter().any(|c| c == column) {
            return true;
        }
        params.order.iter().any(|o| split_order(o).0 == column)
    }
}

/// Splits `"field [ASC|DESC]"`. Anything other than `DESC` sorts ascending.
pub(crate) fn split_order(entry: &str) -> (&str, Order) {
    let mut parts = entry.split(' ');
    let field = parts.next().unwrap_or_default();
    let direction = match (parts.next(), parts.next()) {
        (Some(direction), None) => Order::parse(direction),
        _ => Order::Asc,
    };
    (field, direction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{factory, MockConnection, Pair, Person};
    use futures::executor::block_on;
    use std::sync::Arc;

    #[test]
    fn properties_map_to_columns_and_formats() {
        let conn = Arc::new(MockConnection::default());
        let mut dao = factory(&conn).entity::<Person>();
        dao.set("mail", "foo@bar.com").unwrap();
        dao.set("active", true).unwrap();
        dao.set("born", "2001-02-03").unwrap();
        assert_eq!(dao.data().get("email"), Some(&SqlValue::from("foo@bar.com")));
        assert_eq!(dao.data().get("active"), Some(&SqlValue::Integer(1)));
        assert_eq!(dao.data().get("born"), Some(&SqlValue::from("2001-02-03")));
        assert_eq!(dao.get("active").unwrap(), Native::Bool(true));
        assert_eq!(dao.get("mail").unwrap(), Native::from("foo@bar.com"));
        assert!(dao.contains("mail"));
        assert!(!dao.contains("nickname"));

        let values = dao.values().unwrap();
        assert!(values.contains_key("mail"));
        assert!(!values.contains_key("email"));
    }

    #[test]
    fn unknown_properties_use_computed_values() {
        let conn = Arc::new(MockConnection::default());
        let mut dao = factory(&conn).entity::<Person>();
        dao.set("username", "foo").unwrap();
        assert_eq!(dao.get("shout").unwrap(), Native::from("FOO"));
        assert!(matches!(dao.get("nothing"), Err(Error::ColumnNotFound(_))));
    }

    #[test]
    fn single_primary_key_rules() {
        let conn = Arc::new(MockConnection::default());
        let mut dao = factory(&conn).entity::<Person>();
        assert!(!dao.has_id());
        assert_eq!(dao.id().unwrap_err().to_string(), "No primary id set");
        dao.set("id", 5).unwrap();
        assert_eq!(dao.id().unwrap(), Id::from(5));
        assert_eq!(dao.get("id").unwrap(), Native::Int(5));
        assert_eq!(
            dao.set_id(6).unwrap_err().to_string(),
            "Can not set primary id again"
        );
        assert_eq!(dao.where_id().unwrap().get("id"), Some(&SqlValue::Integer(5)));
        assert_eq!(dao.primary_key_name().unwrap(), "id");
    }

    #[test]
    fn compound_primary_key_rules() {
        let conn = Arc::new(MockConnection::default());
        let mut dao = factory(&conn).entity::<Pair>();
        assert!(dao.primary_key_name().is_err());
        assert_eq!(
            dao.set_id(Id::compound([("left_id", 1)])).unwrap_err().to_string(),
            "Primary key not complete: right_id"
        );
        assert_eq!(
            dao.set_id(1).unwrap_err().to_string(),
            "Primary key is compound"
        );
        dao.set_id(Id::compound([("left_id", 1), ("right_id", 2)]))
            .unwrap();
        assert_eq!(dao.id().unwrap().to_string(), "left_id=1, right_id=2");
        assert_eq!(dao.where_id().unwrap().len(), 2);
    }

    #[test]
    fn find_builds_a_keyed_select() {
        let conn = Arc::new(MockConnection::with_rows(vec![Row::new()
            .with("id", 1)
            .with("username", "Foo")]));
        let mut dao = factory(&conn).entity::<Person>();
        block_on(dao.find(1)).unwrap();
        assert_eq!(
            conn.statements()[0],
            (
                "SELECT * FROM people p WHERE \"id\" = ?".to_string(),
                vec![SqlValue::Integer(1)]
            )
        );
        assert_eq!(dao.get("username").unwrap(), Native::from("Foo"));

        let empty = Arc::new(MockConnection::default());
        let mut missing = factory(&empty).entity::<Person>();
        let err = block_on(missing.find(99)).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "No matching row found");
    }

    #[test]
    fn find_with_partial_compound_key_fails() {
        let conn = Arc::new(MockConnection::default());
        let mut dao = factory(&conn).entity::<Pair>();
        assert!(matches!(block_on(dao.find(1)), Err(Error::InvalidArgument(_))));
        let err = block_on(dao.find(Id::compound([("right_id", 2)]))).unwrap_err();
        assert_eq!(err.to_string(), "Primary key not complete: left_id");
    }

    #[test]
    fn insert_reads_generated_id_and_stamps_times() {
        let conn = Arc::new(MockConnection::default());
        conn.set_next_id(42);
        let mut dao = factory(&conn).entity::<Person>();
        dao.set("username", "new").unwrap();
        block_on(dao.insert()).unwrap();
        assert_eq!(dao.id().unwrap(), Id::from(42));
        assert_eq!(
            dao.data().get("created"),
            Some(&SqlValue::from("2016-01-22 23:01:42"))
        );
        let (sql, params) = &conn.statements()[0];
        assert_eq!(
            sql,
            "INSERT INTO \"people\" (\"created\", \"updated\", \"username\") VALUES (?, ?, ?)"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn update_writes_only_changed_columns() {
        let conn = Arc::new(MockConnection::default());
        let mut dao = factory(&conn).entity::<Person>();
        dao.set_data(
            Row::new()
                .with("id", 1)
                .with("username", "foo")
                .with("active", "1")
                .into_values(),
        );
        assert!(!block_on(dao.update()).unwrap());
        assert!(conn.statements().is_empty());

        dao.set("active", true).unwrap();
        assert!(!block_on(dao.update()).unwrap(), "1 and \"1\" are equal");

        dao.set("username", "bar").unwrap();
        assert!(block_on(dao.update()).unwrap());
        let (sql, params) = &conn.statements()[0];
        assert_eq!(
            sql,
            "UPDATE \"people\" SET \"updated\" = ?, \"username\" = ? WHERE \"id\" = ?"
        );
        assert_eq!(params[2], SqlValue::Integer(1));
        assert!(!block_on(dao.update()).unwrap());
    }

    #[test]
    fn find_all_condition_rules() {
        let conn = Arc::new(MockConnection::default());
        let dao = factory(&conn).entity::<Person>();
        block_on(dao.find_all(&[
            Condition::eq("username", "foo"),
            Condition::is_null("email"),
            Condition::any_of("id", Vec::<i64>::new()),
            Condition::ids([1, 2]),
            Condition::raw("active = 1"),
        ]))
        .unwrap();
        let (sql, params) = &conn.statements()[0];
        assert_eq!(
            sql,
            "SELECT * FROM people p WHERE (\"username\" = ?) AND (\"email\" IS NULL) AND (1 = 0) AND (\"id\" IN (?, ?)) AND (active = 1)"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn find_all_ids_are_alternatives() {
        let conn = Arc::new(MockConnection::default());
        let dao = factory(&conn).entity::<Person>();
        block_on(dao.find_all(&[Condition::id(1), Condition::id(2)])).unwrap();
        assert_eq!(
            conn.statements()[0].0,
            "SELECT * FROM people p WHERE (\"id\" = ?) OR (\"id\" = ?)"
        );
    }

    #[test]
    fn records_round_trip_through_properties() {
        let conn = Arc::new(MockConnection::default());
        let mut dao = factory(&conn).entity::<Person>();
        let person = Person {
            id: None,
            username: "foo".into(),
            mail: "foo@bar.com".into(),
            active: true,
        };
        dao.set_record(&person).unwrap();
        assert!(!dao.has_id());
        assert_eq!(dao.data().get("email"), Some(&SqlValue::from("foo@bar.com")));
        assert_eq!(dao.to_record().unwrap(), person);
        assert!(person.id_properties().contains_key("id"));
        assert_eq!(person.id_properties().len(), 1);
    }

    #[test]
    fn fulltext_condition_wraps_each_column() {
        let conn = Arc::new(MockConnection::default());
        let dao = factory(&conn).entity::<Person>();
        let expr = dao.fulltext_condition("fo*o", &["username", "email"]);
        assert_eq!(
            expr.sql(),
            "(UPPER(\"username\") LIKE UPPER(?) OR UPPER(\"email\") LIKE UPPER(?))"
        );
        assert_eq!(expr.params()[0], SqlValue::from("%fo%o%"));
    }

    #[test]
    fn relation_table_inserts_and_deletes_differences() {
        let conn = Arc::new(MockConnection::default());
        let mut dao = factory(&conn).entity::<Person>();
        dao.set_id(1).unwrap();
        block_on(dao.update_relation_table(
            "person_groups",
            "person_id",
            "group_id",
            &[SqlValue::Integer(1), SqlValue::Integer(2)],
            &[SqlValue::Integer(2), SqlValue::Integer(3)],
        ))
        .unwrap();
        let statements = conn.statements();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].0.starts_with("INSERT INTO \"person_groups\""));
        assert_eq!(statements[0].1, vec![SqlValue::Integer(3), SqlValue::Integer(1)]);
        assert!(statements[1].0.starts_with("DELETE FROM \"person_groups\""));
    }

    #[test]
    fn order_entries_parse_direction() {
        assert_eq!(split_order("username DESC"), ("username", Order::Desc));
        assert_eq!(split_order("username desc"), ("username", Order::Desc));
        assert_eq!(split_order("username"), ("username", Order::Asc));
        assert_eq!(split_order("username up"), ("username", Order::Asc));
    }
}
