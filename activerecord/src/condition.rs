use activerecord_core::{Native, SqlValue};
use activerecord_sql_builder::Expr;

/// A `find_all` filter.
///
/// Column conditions are combined with AND; [`Condition::Id`] entries are
/// alternatives combined with OR.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `column = value`, or `column IS NULL` for a null value.
    Eq { column: String, value: Native },
    /// `column IN (..)`. An empty list matches nothing.
    In { column: String, values: Vec<Native> },
    Id(Native),
    IdIn(Vec<Native>),
    /// Literal SQL.
    Raw(Expr),
}

impl Condition {
    pub fn eq(column: impl Into<String>, value: impl Into<Native>) -> Self {
        Condition::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Condition::Eq {
            column: column.into(),
            value: Native::Null,
        }
    }

    pub fn any_of<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Native>,
    {
        Condition::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn id(value: impl Into<Native>) -> Self {
        Condition::Id(value.into())
    }

    pub fn ids<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Native>,
    {
        Condition::IdIn(values.into_iter().map(Into::into).collect())
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Condition::Raw(Expr::new(sql))
    }

    pub fn raw_with(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Condition::Raw(Expr::with_params(sql, params))
    }
}

impl From<Expr> for Condition {
    fn from(expr: Expr) -> Self {
        Condition::Raw(expr)
    }
}
