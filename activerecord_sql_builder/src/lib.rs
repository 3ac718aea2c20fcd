#![forbid(unsafe_code)]
//! SQL building blocks for the DAO layer.
//!
//! [`QueryBuilder`] assembles SELECT statements incrementally: select list,
//! FROM with aliases, inner/left joins, a WHERE tree combined with
//! `and_where` / `or_where`, GROUP BY, ORDER BY and LIMIT/OFFSET. Predicates
//! are written with `?` placeholders; [`QueryBuilder::to_sql`] renumbers them
//! for dialects that use `$n`.
//!
//! The free functions build the INSERT/UPDATE/DELETE statements used by
//! entity DAOs.

use activerecord_core::{Dialect, Placeholder, SqlValue};

fn placeholder_n(ph: Placeholder, n: usize) -> String {
    match ph {
        Placeholder::Dollar => format!("${}", n),
        Placeholder::Question => "?".to_string(),
    }
}

/// Rewrites `?` placeholders to the dialect's style. Question marks inside
/// quoted strings, quoted identifiers and comments are left alone.
pub fn number_placeholders(dialect: Dialect, sql: &str) -> String {
    if dialect.placeholder() == Placeholder::Question {
        return sql.to_string();
    }
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        out.push_str(&match c {
            '?' => {
                n += 1;
                placeholder_n(Placeholder::Dollar, n)
            }
            '\'' | '"' | '`' => {
                let mut quoted = c.to_string();
                for q in chars.by_ref() {
                    quoted.push(q);
                    if q == c {
                        break;
                    }
                }
                quoted
            }
            '-' if chars.peek() == Some(&'-') => {
                let mut comment = c.to_string();
                for q in chars.by_ref() {
                    comment.push(q);
                    if q == '\n' {
                        break;
                    }
                }
                comment
            }
            '/' if chars.peek() == Some(&'*') => {
                let mut comment = c.to_string();
                comment.extend(chars.next());
                while let Some(q) = chars.next() {
                    comment.push(q);
                    if q == '*' && chars.peek() == Some(&'/') {
                        comment.extend(chars.next());
                        break;
                    }
                }
                comment
            }
            _ => c.to_string(),
        });
    }
    out
}

/// `?, ?, ?` for an IN list of `count` values.
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// A SQL fragment with its bound parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Expr {
    sql: String,
    params: Vec<SqlValue>,
}

impl Expr {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }
}

impl From<&str> for Expr {
    fn from(sql: &str) -> Self {
        Expr::new(sql)
    }
}

impl From<String> for Expr {
    fn from(sql: String) -> Self {
        Expr::new(sql)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    And,
    Or,
}

impl Combinator {
    fn keyword(self) -> &'static str {
        match self {
            Combinator::And => "AND",
            Combinator::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Leaf(Expr),
    Composite(Combinator, Vec<Predicate>),
}

impl Predicate {
    fn render(&self, out: &mut String) {
        match self {
            Predicate::Leaf(e) => out.push_str(&e.sql),
            Predicate::Composite(_, parts) if parts.len() == 1 => parts[0].render(out),
            Predicate::Composite(kind, parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        out.push_str(") ");
                        out.push_str(kind.keyword());
                        out.push_str(" (");
                    } else {
                        out.push('(');
                    }
                    part.render(out);
                }
                out.push(')');
            }
        }
    }

    fn collect_params(&self, out: &mut Vec<SqlValue>) {
        match self {
            Predicate::Leaf(e) => out.extend(e.params.iter().cloned()),
            Predicate::Composite(_, parts) => parts.iter().for_each(|p| p.collect_params(out)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Join {
    kind: JoinKind,
    from_alias: String,
    table: String,
    alias: String,
    condition: String,
}

/// Sort direction. Anything that is not `DESC` (case-insensitive) parses as ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    pub fn parse(s: &str) -> Order {
        if s.trim().eq_ignore_ascii_case("desc") {
            Order::Desc
        } else {
            Order::Asc
        }
    }

    fn keyword(self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

/// Incremental SELECT builder.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryBuilder {
    dialect: Dialect,
    select: Vec<String>,
    from: Vec<(String, Option<String>)>,
    joins: Vec<Join>,
    predicate: Option<Predicate>,
    group_by: Vec<String>,
    order_by: Vec<String>,
    max_results: Option<usize>,
    first_result: usize,
}

impl QueryBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            select: Vec::new(),
            from: Vec::new(),
            joins: Vec::new(),
            predicate: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            max_results: None,
            first_result: 0,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn quote_identifier(&self, ident: &str) -> String {
        self.dialect.quote_identifier(ident)
    }

    /// Replaces the select list.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn add_select(mut self, column: impl Into<String>) -> Self {
        self.select.push(column.into());
        self
    }

    pub fn from(mut self, table: impl Into<String>, alias: Option<&str>) -> Self {
        self.from.push((table.into(), alias.map(str::to_string)));
        self
    }

    /// Inner join attached to the FROM entry aliased `from_alias`.
    pub fn join(
        self,
        from_alias: impl Into<String>,
        table: impl Into<String>,
        alias: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        self.push_join(JoinKind::Inner, from_alias, table, alias, condition)
    }

    pub fn left_join(
        self,
        from_alias: impl Into<String>,
        table: impl Into<String>,
        alias: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        self.push_join(JoinKind::Left, from_alias, table, alias, condition)
    }

    fn push_join(
        mut self,
        kind: JoinKind,
        from_alias: impl Into<String>,
        table: impl Into<String>,
        alias: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        self.joins.push(Join {
            kind,
            from_alias: from_alias.into(),
            table: table.into(),
            alias: alias.into(),
            condition: condition.into(),
        });
        self
    }

    /// Replaces the WHERE clause.
    pub fn set_where(mut self, expr: impl Into<Expr>) -> Self {
        self.predicate = Some(Predicate::Leaf(expr.into()));
        self
    }

    /// Adds a predicate with AND. An existing OR group becomes one operand.
    pub fn and_where(self, expr: impl Into<Expr>) -> Self {
        self.combine(Combinator::And, expr.into())
    }

    /// Adds a predicate with OR. An existing AND group becomes one operand.
    pub fn or_where(self, expr: impl Into<Expr>) -> Self {
        self.combine(Combinator::Or, expr.into())
    }

    fn combine(mut self, kind: Combinator, expr: Expr) -> Self {
        let leaf = Predicate::Leaf(expr);
        self.predicate = Some(match self.predicate.take() {
            None => Predicate::Composite(kind, vec![leaf]),
            Some(Predicate::Composite(k, mut parts)) if k == kind => {
                parts.push(leaf);
                Predicate::Composite(k, parts)
            }
            Some(existing) => Predicate::Composite(kind, vec![existing, leaf]),
        });
        self
    }

    pub fn has_where(&self) -> bool {
        self.predicate.is_some()
    }

    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by = vec![column.into()];
        self
    }

    pub fn add_group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    pub fn has_group_by(&self) -> bool {
        !self.group_by.is_empty()
    }

    pub fn order_by(mut self, sort: impl AsRef<str>, order: Order) -> Self {
        self.order_by.clear();
        self.add_order_by(sort, order)
    }

    pub fn add_order_by(mut self, sort: impl AsRef<str>, order: Order) -> Self {
        self.order_by
            .push(format!("{} {}", sort.as_ref(), order.keyword()));
        self
    }

    pub fn set_max_results(mut self, max: Option<usize>) -> Self {
        self.max_results = max;
        self
    }

    pub fn set_first_result(mut self, first: usize) -> Self {
        self.first_result = first;
        self
    }

    pub fn max_results(&self) -> Option<usize> {
        self.max_results
    }

    pub fn first_result(&self) -> usize {
        self.first_result
    }

    /// Bound parameters in placeholder order.
    pub fn params(&self) -> Vec<SqlValue> {
        let mut out = Vec::new();
        if let Some(p) = &self.predicate {
            p.collect_params(&mut out);
        }
        out
    }

    fn render_from(&self) -> String {
        let attached: Vec<&str> = self
            .from
            .iter()
            .map(|(table, alias)| alias.as_deref().unwrap_or(table.as_str()))
            .collect();
        let mut parts = Vec::with_capacity(self.from.len());
        for (i, (table, alias)) in self.from.iter().enumerate() {
            let mut part = match alias {
                Some(a) => format!("{} {}", table, a),
                None => table.clone(),
            };
            for join in &self.joins {
                let mine = join.from_alias == attached[i]
                    || (i == 0 && !attached.contains(&join.from_alias.as_str()));
                if mine {
                    let keyword = match join.kind {
                        JoinKind::Inner => "INNER JOIN",
                        JoinKind::Left => "LEFT JOIN",
                    };
                    part.push_str(&format!(
                        " {} {} {} ON {}",
                        keyword, join.table, join.alias, join.condition
                    ));
                }
            }
            parts.push(part);
        }
        parts.join(", ")
    }

    fn render_limit(&self, sql: &mut String) {
        match (self.max_results, self.first_result) {
            (Some(max), 0) => sql.push_str(&format!(" LIMIT {}", max)),
            (Some(max), first) => sql.push_str(&format!(" LIMIT {} OFFSET {}", max, first)),
            (None, 0) => {}
            (None, first) => match self.dialect {
                Dialect::Sqlite => sql.push_str(&format!(" LIMIT -1 OFFSET {}", first)),
                Dialect::MySql => {
                    sql.push_str(&format!(" LIMIT 18446744073709551615 OFFSET {}", first))
                }
                Dialect::Postgres => sql.push_str(&format!(" OFFSET {}", first)),
            },
        }
    }

    /// SQL with `?` placeholders regardless of dialect.
    pub fn to_raw_sql(&self) -> String {
        let mut sql = String::from("SELECT ");
        if self.select.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&self.select.join(", "));
        }
        if !self.from.is_empty() {
            sql.push_str(" FROM ");
            sql.push_str(&self.render_from());
        }
        if let Some(p) = &self.predicate {
            sql.push_str(" WHERE ");
            p.render(&mut sql);
        }
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        self.render_limit(&mut sql);
        sql
    }

    /// SQL with placeholders in the dialect's style.
    pub fn to_sql(&self) -> String {
        number_placeholders(self.dialect, &self.to_raw_sql())
    }

    pub fn build(&self) -> (String, Vec<SqlValue>) {
        (self.to_sql(), self.params())
    }
}

/// Build INSERT INTO <table> (<cols>) VALUES (<placeholders>)
pub fn insert(dialect: Dialect, table: &str, columns: &[&str]) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", dialect.quote_identifier(table));
    }
    let style = dialect.placeholder();
    let cols: Vec<String> = columns
        .iter()
        .map(|c| dialect.quote_identifier(c))
        .collect();
    let phs: Vec<String> = (1..=columns.len()).map(|i| placeholder_n(style, i)).collect();
    format!(
        "INSERT INTO {table} ({cols}) VALUES ({vals})",
        table = dialect.quote_identifier(table),
        cols = cols.join(", "),
        vals = phs.join(", ")
    )
}

/// Build UPDATE <table> SET <col1> = <ph1>, ... WHERE <key1> = <phN> AND ...
pub fn update(dialect: Dialect, table: &str, columns: &[&str], key_columns: &[&str]) -> String {
    let style = dialect.placeholder();
    let assignments: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, col)| {
            format!(
                "{} = {}",
                dialect.quote_identifier(col),
                placeholder_n(style, i + 1)
            )
        })
        .collect();
    format!(
        "UPDATE {table} SET {set_clause} WHERE {where_clause}",
        table = dialect.quote_identifier(table),
        set_clause = assignments.join(", "),
        where_clause = key_predicate(dialect, key_columns, columns.len() + 1)
    )
}

/// Build DELETE FROM <table> WHERE <key1> = <ph1> AND ...
pub fn delete(dialect: Dialect, table: &str, key_columns: &[&str]) -> String {
    format!(
        "DELETE FROM {table} WHERE {where_clause}",
        table = dialect.quote_identifier(table),
        where_clause = key_predicate(dialect, key_columns, 1)
    )
}

fn key_predicate(dialect: Dialect, key_columns: &[&str], first: usize) -> String {
    if key_columns.is_empty() {
        return "1 = 1".to_string();
    }
    key_columns
        .iter()
        .enumerate()
        .map(|(i, col)| {
            format!(
                "{} = {}",
                dialect.quote_identifier(col),
                placeholder_n(dialect.placeholder(), first + i)
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> QueryBuilder {
        QueryBuilder::new(Dialect::Sqlite)
            .select(["u.*"])
            .from("users", Some("u"))
    }

    #[test]
    fn single_predicate_is_not_wrapped() {
        let q = users().and_where(Expr::with_params(
            "\"u\".\"username\" = ?",
            vec![SqlValue::from("Foo")],
        ));
        assert_eq!(
            q.to_sql(),
            "SELECT u.* FROM users u WHERE \"u\".\"username\" = ?"
        );
        assert_eq!(q.params(), vec![SqlValue::from("Foo")]);
    }

    #[test]
    fn and_where_wraps_each_operand() {
        let q = users()
            .and_where("\"u\".\"username\" = ?")
            .and_where("active = 1")
            .set_max_results(Some(20));
        assert_eq!(
            q.to_sql(),
            "SELECT u.* FROM users u WHERE (\"u\".\"username\" = ?) AND (active = 1) LIMIT 20"
        );
    }

    #[test]
    fn mixing_or_and_and_nests_groups() {
        let q = QueryBuilder::new(Dialect::MySql)
            .from("users", Some("u"))
            .or_where("id = 1")
            .or_where("id = 2")
            .and_where("active = 1");
        assert_eq!(
            q.to_sql(),
            "SELECT * FROM users u WHERE ((id = 1) OR (id = 2)) AND (active = 1)"
        );
    }

    #[test]
    fn set_where_replaces_previous_predicates() {
        let q = users().and_where("a = 1").set_where("b = 2");
        assert_eq!(q.to_sql(), "SELECT u.* FROM users u WHERE b = 2");
        assert!(q.has_where());
    }

    #[test]
    fn joins_attach_to_their_from_alias() {
        let q = QueryBuilder::new(Dialect::Sqlite)
            .join("u", "documents", "d", "d.user_id = u.id")
            .left_join("u", "groups", "g", "g.id = u.group_id")
            .select(["u.*", "d.title"])
            .from("users", Some("u"));
        assert_eq!(
            q.to_sql(),
            "SELECT u.*, d.title FROM users u INNER JOIN documents d ON d.user_id = u.id LEFT JOIN groups g ON g.id = u.group_id"
        );
    }

    #[test]
    fn group_order_limit_offset() {
        let q = users()
            .group_by("u.email")
            .add_order_by("u.username", Order::parse("DESC"))
            .add_order_by("u.id", Order::parse("sideways"))
            .set_max_results(Some(10))
            .set_first_result(30);
        assert_eq!(
            q.to_sql(),
            "SELECT u.* FROM users u GROUP BY u.email ORDER BY u.username DESC, u.id ASC LIMIT 10 OFFSET 30"
        );
        let replaced = q.order_by("u.email", Order::Asc);
        assert!(replaced.to_sql().contains("ORDER BY u.email ASC LIMIT"));
    }

    #[test]
    fn quoted_names_and_comments_keep_question_marks() {
        let sql = number_placeholders(
            Dialect::Postgres,
            "SELECT \"a?b\" FROM t -- why?\nWHERE x = ? /* or ? */ AND y = 'it''s?' AND z = ?",
        );
        assert_eq!(
            sql,
            "SELECT \"a?b\" FROM t -- why?\nWHERE x = $1 /* or ? */ AND y = 'it''s?' AND z = $2"
        );
        assert_eq!(number_placeholders(Dialect::Postgres, "a = '?"), "a = '?");
        assert_eq!(number_placeholders(Dialect::Sqlite, "\"?\" = ?"), "\"?\" = ?");
    }

    #[test]
    fn offset_without_limit_per_dialect() {
        let q = users().set_first_result(5);
        assert!(q.to_sql().ends_with("LIMIT -1 OFFSET 5"));
        let pg = QueryBuilder::new(Dialect::Postgres)
            .from("users", None)
            .set_first_result(5);
        assert_eq!(pg.to_sql(), "SELECT * FROM users OFFSET 5");
    }

    #[test]
    fn postgres_placeholders_are_numbered_in_order() {
        let q = QueryBuilder::new(Dialect::Postgres)
            .from("users", Some("u"))
            .and_where(Expr::with_params("a = ?", vec![SqlValue::Integer(1)]))
            .and_where("b = '?'")
            .and_where(Expr::with_params(
                "c IN (?, ?)",
                vec![SqlValue::Integer(2), SqlValue::Integer(3)],
            ));
        let (sql, params) = q.build();
        assert_eq!(
            sql,
            "SELECT * FROM users u WHERE (a = $1) AND (b = '?') AND (c IN ($2, $3))"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn statement_helpers() {
        assert_eq!(
            insert(Dialect::Sqlite, "users", &["username", "email"]),
            "INSERT INTO \"users\" (\"username\", \"email\") VALUES (?, ?)"
        );
        assert_eq!(
            update(Dialect::Postgres, "users", &["email"], &["id"]),
            "UPDATE \"users\" SET \"email\" = $1 WHERE \"id\" = $2"
        );
        assert_eq!(
            delete(Dialect::MySql, "user_roles", &["user_id", "role_id"]),
            "DELETE FROM `user_roles` WHERE `user_id` = ? AND `role_id` = ?"
        );
        assert_eq!(
            insert(Dialect::Sqlite, "users", &[]),
            "INSERT INTO \"users\" DEFAULT VALUES"
        );
        assert_eq!(placeholders(3), "?, ?, ?");
        assert_eq!(placeholders(0), "");
    }
}
