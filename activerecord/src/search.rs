//! Paginated, counted searches over an entity table.

use std::slice;
use std::vec;

use activerecord_core::{Error, Format, Native, Result, Row, SqlValue};
use activerecord_sql_builder::{number_placeholders, Expr, QueryBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::condition::Condition;
use crate::entity::{default_alias, split_order, EntityDao, EntityDefinition};

/// `JOIN table alias ON condition`, attached to the FROM entry `from_alias`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    pub from_alias: String,
    pub table: String,
    pub alias: String,
    pub condition: String,
    /// Extra select column, skipped for id-only searches.
    pub select: Option<String>,
}

impl Join {
    pub fn new(
        from_alias: impl Into<String>,
        table: impl Into<String>,
        alias: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        Self {
            from_alias: from_alias.into(),
            table: table.into(),
            alias: alias.into(),
            condition: condition.into(),
            select: None,
        }
    }

    pub fn with_select(mut self, column: impl Into<String>) -> Self {
        self.select = Some(column.into());
        self
    }
}

/// Options for [`EntityDao::search`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    /// Defaults to the entity table.
    pub table: Option<String>,
    pub conditions: Vec<Condition>,
    /// Page size; `0` returns every row.
    pub count: usize,
    pub offset: usize,
    /// Run a `COUNT(*)` query for the total instead of counting the page.
    pub count_total: bool,
    pub joins: Vec<Join>,
    pub left_joins: Vec<Join>,
    /// Select list; empty selects `alias.*`.
    pub columns: Vec<String>,
    /// `"field [ASC|DESC]"` entries.
    pub order: Vec<String>,
    pub group: Option<String>,
    pub sql_filter: Option<Expr>,
    /// Defaults to the first letter of the table.
    pub table_alias: Option<String>,
    pub id_filter: Vec<Native>,
    pub(crate) ids_only: bool,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            table: None,
            conditions: Vec::new(),
            count: 20,
            offset: 0,
            count_total: true,
            joins: Vec::new(),
            left_joins: Vec::new(),
            columns: Vec::new(),
            order: Vec::new(),
            group: None,
            sql_filter: None,
            table_alias: None,
            id_filter: Vec::new(),
            ids_only: false,
        }
    }
}

impl SearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conditions(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Self::new().conditions(conditions)
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn conditions(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.conditions.extend(conditions);
        self
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn count_total(mut self, count_total: bool) -> Self {
        self.count_total = count_total;
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn left_join(mut self, join: Join) -> Self {
        self.left_joins.push(join);
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn order<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order = order.into_iter().map(Into::into).collect();
        self
    }

    pub fn group(mut self, column: impl Into<String>) -> Self {
        self.group = Some(column.into());
        self
    }

    pub fn sql_filter(mut self, filter: impl Into<Expr>) -> Self {
        self.sql_filter = Some(filter.into());
        self
    }

    pub fn table_alias(mut self, alias: impl Into<String>) -> Self {
        self.table_alias = Some(alias.into());
        self
    }

    pub fn id_filter<I, V>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Native>,
    {
        self.id_filter = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_ids_only(&self) -> bool {
        self.ids_only
    }
}

/// One page of search results plus the query that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult<T> {
    pub rows: Vec<T>,
    pub order: Vec<String>,
    pub count: usize,
    pub offset: usize,
    pub total: u64,
    /// The query before the SQL filter, limit, order and optimizations were applied.
    pub filter_sql: String,
    pub sql: String,
    /// Empty for compound keys.
    pub table_pk: String,
    pub table_alias: String,
}

impl<T> SearchResult<T> {
    pub fn sort_order(&self) -> &[String] {
        &self.order
    }

    pub fn search_count(&self) -> usize {
        self.count
    }

    pub fn search_offset(&self) -> usize {
        self.offset
    }

    /// Rows on this page.
    pub fn result_count(&self) -> usize {
        self.rows.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Matching rows across all pages.
    pub fn total_count(&self) -> u64 {
        self.total
    }

    pub fn all_results(&self) -> &[T] {
        &self.rows
    }

    pub fn into_results(self) -> Vec<T> {
        self.rows
    }

    pub fn first_result(&self) -> Result<&T> {
        self.rows
            .first()
            .ok_or_else(|| Error::NotFound("Search result is empty".into()))
    }

    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.rows.iter()
    }

    pub fn filter_sql(&self) -> &str {
        &self.filter_sql
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn table_pk(&self) -> &str {
        &self.table_pk
    }

    pub fn table_alias(&self) -> &str {
        &self.table_alias
    }

    /// Converts every row, keeping the search metadata.
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> SearchResult<U> {
        SearchResult {
            rows: self.rows.into_iter().map(f).collect(),
            order: self.order,
            count: self.count,
            offset: self.offset,
            total: self.total,
            filter_sql: self.filter_sql,
            sql: self.sql,
            table_pk: self.table_pk,
            table_alias: self.table_alias,
        }
    }
}

impl<T> IntoIterator for SearchResult<T> {
    type Item = T;
    type IntoIter = vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a SearchResult<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

struct SearchQuery {
    select: QueryBuilder,
    count: Option<QueryBuilder>,
    filter_sql: String,
    alias: String,
}

impl<E: EntityDefinition> EntityDao<E> {
    /// `"alias"."col"`; a `table.` prefix naming the entity table becomes the alias.
    fn qualified_key(&self, key: &str, alias: &str) -> String {
        match key.split_once('.') {
            Some((table, column)) => {
                let table = if table == E::TABLE { alias } else { table };
                format!("{}.{}", self.quote(table), self.quote(column))
            }
            None => format!("{}.{}", self.quote(alias), self.quote(key)),
        }
    }

    fn build_search(&self, params: &SearchParams) -> Result<SearchQuery> {
        let table = params.table.as_deref().unwrap_or(E::TABLE);
        let alias = params
            .table_alias
            .clone()
            .unwrap_or_else(|| default_alias(table));
        let mut select = self.dao().query_builder();

        for condition in &params.conditions {
            select = match condition {
                Condition::Raw(expr) => select.and_where(expr.clone()),
                Condition::In { column, values } if !values.is_empty() => {
                    let key = self.qualified_key(column, &alias);
                    select.and_where(self.search_in(&key, values)?)
                }
                Condition::Eq { column, value } if !value.is_null() && !is_blank(value) => {
                    let key = self.qualified_key(column, &alias);
                    select.and_where(Expr::with_params(
                        format!("{} = ?", key),
                        vec![Format::None.to_sql(value.clone())?],
                    ))
                }
                Condition::Id(value) => {
                    let key = self.qualified_key(self.primary_key_name()?, &alias);
                    select.and_where(Expr::with_params(
                        format!("{} = ?", key),
                        vec![Format::None.to_sql(value.clone())?],
                    ))
                }
                Condition::IdIn(values) => {
                    let key = self.qualified_key(self.primary_key_name()?, &alias);
                    select.and_where(self.search_in(&key, values)?)
                }
                _ => select,
            };
        }

        if !params.id_filter.is_empty() {
            let key = self.qualified_key(self.primary_key_name()?, &alias);
            select = select.and_where(self.search_in(&key, &params.id_filter)?);
        }

        if let Some(group) = &params.group {
            select = select.group_by(group.as_str());
        }

        let mut count = select.clone();

        if params.columns.is_empty() {
            select = select.add_select(format!("{}.*", alias));
        } else {
            let prefix = format!("{}.", E::TABLE);
            let replacement = format!("{}.", alias);
            for column in &params.columns {
                select = select.add_select(column.replace(&prefix, &replacement));
            }
        }

        for join in &params.joins {
            count = count.join(&join.from_alias, &join.table, &join.alias, &join.condition);
            select = select.join(&join.from_alias, &join.table, &join.alias, &join.condition);
            if let (false, Some(column)) = (params.ids_only, &join.select) {
                select = select.add_select(column.as_str());
            }
        }
        for join in &params.left_joins {
            count = count.left_join(&join.from_alias, &join.table, &join.alias, &join.condition);
            select = select.left_join(&join.from_alias, &join.table, &join.alias, &join.condition);
            if let (false, Some(column)) = (params.ids_only, &join.select) {
                select = select.add_select(column.as_str());
            }
        }

        if params.ids_only {
            select = select.select([format!("{}.{}", alias, self.primary_key_name()?)]);
        }

        select = select.from(table, Some(&alias));
        let filter_sql = select.to_sql();

        if let Some(filter) = &params.sql_filter {
            select = select.and_where(filter.clone());
            count = count.and_where(filter.clone());
        }

        if params.count > 0 {
            select = select
                .set_max_results(Some(params.count))
                .set_first_result(params.offset);
        }

        let count = if params.count_total {
            let count = count.from(table, Some(&alias));
            Some(if count.has_group_by() {
                E::optimize_search_query(count.select(["1"]), params)
            } else {
                E::optimize_search_query(count.select(["COUNT(*) AS count"]), params)
            })
        } else {
            None
        };

        for entry in &params.order {
            let (field, direction) = split_order(entry);
            select = select.add_order_by(field, direction);
        }

        let select = E::optimize_search_query(select, params);

        Ok(SearchQuery {
            select,
            count,
            filter_sql,
            alias,
        })
    }

    fn search_in(&self, key: &str, values: &[Native]) -> Result<Expr> {
        let params = values
            .iter()
            .map(|v| Format::None.to_sql(v.clone()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Expr::with_params(
            format!(
                "{} IN ({})",
                key,
                activerecord_sql_builder::placeholders(params.len())
            ),
            params,
        ))
    }

    /// `None` when the count column is empty, zero or not a number; the
    /// caller then counts the fetched rows.
    async fn count_total(&self, count: &QueryBuilder) -> Result<Option<u64>> {
        let value = if count.has_group_by() {
            let dialect = count.dialect();
            let sql = format!(
                "SELECT COUNT(*) AS count FROM ({}) grouped",
                count.to_raw_sql()
            );
            let sql = number_placeholders(dialect, &sql);
            self.dao().fetch_single_value(&sql, count.params()).await?
        } else {
            self.dao().fetch_query_value(count).await?
        };
        Ok(value.as_i64().filter(|n| *n > 0).map(|n| n as u64))
    }

    async fn total_of(&self, query: &SearchQuery) -> Result<Option<u64>> {
        match &query.count {
            Some(count) => self.count_total(count).await,
            None => Ok(None),
        }
    }

    fn search_result<T>(
        &self,
        params: &SearchParams,
        query: SearchQuery,
        rows: Vec<T>,
        total: Option<u64>,
    ) -> SearchResult<T> {
        let total = total.unwrap_or(rows.len() as u64);
        debug!(table = E::TABLE, total, rows = rows.len(), "search");
        SearchResult {
            rows,
            order: params.order.clone(),
            count: params.count,
            offset: params.offset,
            total,
            filter_sql: query.filter_sql,
            sql: query.select.to_sql(),
            table_pk: self.primary_key_name().unwrap_or_default().to_string(),
            table_alias: query.alias,
        }
    }

    /// Searches rows and wraps each one in a DAO.
    pub async fn search(&self, params: &SearchParams) -> Result<SearchResult<EntityDao<E>>> {
        let result = self.search_rows(params).await?;
        Ok(result.map(|row| self.wrap(row)))
    }

    /// Searches raw rows.
    pub async fn search_rows(&self, params: &SearchParams) -> Result<SearchResult<Row>> {
        let mut params = params.clone();
        params.ids_only = false;
        let query = self.build_search(&params)?;
        let total = self.total_of(&query).await?;
        let rows = self.dao().fetch_query(&query.select).await?;
        Ok(self.search_result(&params, query, rows, total))
    }

    /// Searches primary keys only.
    pub async fn search_ids(&self, params: &SearchParams) -> Result<SearchResult<SqlValue>> {
        let mut params = params.clone();
        params.ids_only = true;
        let query = self.build_search(&params)?;
        let total = self.total_of(&query).await?;
        let ids = self.dao().fetch_query_col(&query.select).await?;
        Ok(self.search_result(&params, query, ids, total))
    }
}

/// Empty string values are not search conditions.
fn is_blank(value: &Native) -> bool {
    matches!(value, Native::Text(s) if s.is_empty())
}
