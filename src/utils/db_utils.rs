use chrono::NaiveDate;
use sqlx::MySql;
use sqlx::mysql::MySqlArguments;
use sqlx::query::{QueryAs, QueryScalar};

/// ===============================
/// SQL bindable value enum
/// ===============================
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    String(String),
    U64(u64),
    Bool(bool),
    Date(NaiveDate),
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::String(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::String(v)
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        SqlValue::U64(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

/// ===============================
/// Dynamic WHERE clause builder
/// ===============================
/// Conditions are ANDed together; values are bound in the order added.
#[derive(Debug, Default)]
pub struct Filters {
    clauses: Vec<String>,
    values: Vec<SqlValue>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(&mut self, column: &str, value: impl Into<SqlValue>) -> &mut Self {
        self.clauses.push(format!("{column} = ?"));
        self.values.push(value.into());
        self
    }

    pub fn eq_opt<V: Into<SqlValue>>(&mut self, column: &str, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            self.eq(column, value);
        }
        self
    }

    /// Adds a hand-written condition with one `?` per value.
    pub fn raw(&mut self, clause: &str, values: Vec<SqlValue>) -> &mut Self {
        self.clauses.push(clause.to_string());
        self.values.extend(values);
        self
    }

    /// Empty, or `" WHERE a AND b"` ready to append to a SELECT.
    pub fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }
}

macro_rules! bind_all {
    ($query:expr, $values:expr) => {{
        let mut query = $query;
        for value in $values {
            query = match value {
                SqlValue::String(v) => query.bind(v.as_str()),
                SqlValue::U64(v) => query.bind(*v),
                SqlValue::Bool(v) => query.bind(*v),
                SqlValue::Date(v) => query.bind(*v),
            };
        }
        query
    }};
}

pub fn bind_query_as<'q, O>(
    query: QueryAs<'q, MySql, O, MySqlArguments>,
    values: &'q [SqlValue],
) -> QueryAs<'q, MySql, O, MySqlArguments> {
    bind_all!(query, values)
}

pub fn bind_query_scalar<'q, O>(
    query: QueryScalar<'q, MySql, O, MySqlArguments>,
    values: &'q [SqlValue],
) -> QueryScalar<'q, MySql, O, MySqlArguments> {
    bind_all!(query, values)
}
