use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use sqlx::{
    MySql, MySqlPool,
    mysql::MySqlArguments,
    query::{Query, QueryAs, QueryScalar},
};

use crate::error::AppError;

/// ===============================
/// SQL bindable value enum
/// ===============================
#[derive(Debug, PartialEq)]
pub enum SqlValue {
    String(String),
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Null,
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::String(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::String(v.to_string())
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        SqlValue::U64(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
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

/// Binds `SqlValue`s onto any of sqlx's query builders.
pub trait BindValues<'q>: Sized {
    fn bind_value(self, value: &'q SqlValue) -> Self;

    fn bind_values(self, values: &'q [SqlValue]) -> Self {
        values.iter().fold(self, |query, value| query.bind_value(value))
    }
}

macro_rules! bind_sql_value {
    ($query:expr, $value:expr) => {
        match $value {
            SqlValue::String(v) => $query.bind(v.as_str()),
            SqlValue::I64(v) => $query.bind(*v),
            SqlValue::U64(v) => $query.bind(*v),
            SqlValue::F64(v) => $query.bind(*v),
            SqlValue::Bool(v) => $query.bind(*v),
            SqlValue::Date(v) => $query.bind(*v),
            SqlValue::DateTime(v) => $query.bind(*v),
            SqlValue::Null => $query.bind(None::<String>),
        }
    };
}

impl<'q> BindValues<'q> for Query<'q, MySql, MySqlArguments> {
    fn bind_value(self, value: &'q SqlValue) -> Self {
        bind_sql_value!(self, value)
    }
}

impl<'q, O> BindValues<'q> for QueryAs<'q, MySql, O, MySqlArguments> {
    fn bind_value(self, value: &'q SqlValue) -> Self {
        bind_sql_value!(self, value)
    }
}

impl<'q, O> BindValues<'q> for QueryScalar<'q, MySql, O, MySqlArguments> {
    fn bind_value(self, value: &'q SqlValue) -> Self {
        bind_sql_value!(self, value)
    }
}

/// ===============================
/// Dynamic WHERE clause for list endpoints
/// ===============================
#[derive(Debug, Default)]
pub struct WhereBuilder {
    conditions: Vec<String>,
    values: Vec<SqlValue>,
}

impl WhereBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `condition` (with exactly one `?`) bound to `value`.
    pub fn push(&mut self, condition: &str, value: impl Into<SqlValue>) -> &mut Self {
        self.conditions.push(condition.to_string());
        self.values.push(value.into());
        self
    }

    pub fn push_opt<T: Into<SqlValue>>(&mut self, condition: &str, value: Option<T>) -> &mut Self {
        if let Some(value) = value {
            self.push(condition, value);
        }
        self
    }

    /// Adds a condition with several placeholders, e.g. a LIKE over multiple columns.
    pub fn push_many(&mut self, condition: &str, values: Vec<SqlValue>) -> &mut Self {
        self.conditions.push(condition.to_string());
        self.values.extend(values);
        self
    }

    /// Case-insensitive substring search across `columns`; blank terms are ignored.
    pub fn search(&mut self, columns: &[&str], term: Option<&str>) -> &mut Self {
        let Some(term) = term.map(str::trim).filter(|t| !t.is_empty()) else {
            return self;
        };

        let like = format!("%{}%", term);
        let condition = columns
            .iter()
            .map(|c| format!("{} LIKE ?", c))
            .collect::<Vec<_>>()
            .join(" OR ");
        let values = columns.iter().map(|_| SqlValue::String(like.clone())).collect();

        self.push_many(&format!("({})", condition), values)
    }

    pub fn clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.conditions.join(" AND "))
        }
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }
}

/// ===============================
/// SQL update container
/// ===============================
#[derive(Debug)]
pub struct SqlUpdate {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

/// ===============================
/// Build dynamic UPDATE SQL
/// ===============================
///
/// Only keys listed in `allowed_columns` may appear in the payload; keys are
/// interpolated into the statement, values are always bound. `filters` become
/// the `WHERE a = ? AND b = ?` clause (record id plus company scope).
pub fn build_update_sql(
    table: &str,
    payload: &Value,
    allowed_columns: &[&str],
    filters: &[(&str, u64)],
) -> Result<SqlUpdate, AppError> {
    let obj = payload
        .as_object()
        .ok_or_else(|| AppError::validation("Payload must be a JSON object"))?;

    if obj.is_empty() {
        return Err(AppError::validation("No fields provided for update"));
    }

    if let Some(unknown) = obj.keys().find(|k| !allowed_columns.contains(&k.as_str())) {
        return Err(AppError::validation(format!(
            "Field '{unknown}' cannot be updated; allowed: {}",
            allowed_columns.join(", ")
        )));
    }

    if filters.is_empty() {
        return Err(AppError::internal("Refusing to build an UPDATE without WHERE"));
    }

    let set_clause = obj
        .keys()
        .map(|k| format!("{} = ?", k))
        .collect::<Vec<_>>()
        .join(", ");

    let where_clause = filters
        .iter()
        .map(|(column, _)| format!("{} = ?", column))
        .collect::<Vec<_>>()
        .join(" AND ");

    let sql = format!("UPDATE {} SET {} WHERE {}", table, set_clause, where_clause);

    let mut values = Vec::with_capacity(obj.len() + filters.len());

    // Convert JSON values → SqlValue
    for value in obj.values() {
        match value {
            Value::String(s) => {
                if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                    values.push(SqlValue::Date(d));
                } else if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
                    values.push(SqlValue::DateTime(dt));
                } else {
                    values.push(SqlValue::String(s.clone()));
                }
            }
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    values.push(SqlValue::I64(i));
                } else if let Some(u) = n.as_u64() {
                    values.push(SqlValue::U64(u));
                } else if let Some(f) = n.as_f64() {
                    values.push(SqlValue::F64(f));
                }
            }
            Value::Bool(b) => values.push(SqlValue::Bool(*b)),
            Value::Null => values.push(SqlValue::Null),
            _ => return Err(AppError::validation("Unsupported JSON value type")),
        }
    }

    values.extend(filters.iter().map(|(_, v)| SqlValue::U64(*v)));

    Ok(SqlUpdate { sql, values })
}

/// ===============================
/// Execute the update
/// ===============================
pub async fn execute_update(pool: &MySqlPool, update: SqlUpdate) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(&update.sql)
        .bind_values(&update.values)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const COLUMNS: &[&str] = &["first_name", "hire_date", "base_salary", "is_active"];

    #[test]
    fn builds_scoped_update() {
        let update = build_update_sql(
            "employees",
            &json!({ "first_name": "Awa", "base_salary": 500000.5 }),
            COLUMNS,
            &[("id", 9), ("company_id", 2)],
        )
        .unwrap();

        assert!(update.sql.starts_with("UPDATE employees SET "));
        assert!(update.sql.ends_with("WHERE id = ? AND company_id = ?"));
        assert_eq!(update.values.len(), 4);
        assert_eq!(update.values[2], SqlValue::U64(9));
        assert_eq!(update.values[3], SqlValue::U64(2));
    }

    #[test]
    fn converts_dates_and_bools() {
        let update = build_update_sql(
            "employees",
            &json!({ "hire_date": "2025-03-01", "is_active": false }),
            COLUMNS,
            &[("id", 1)],
        )
        .unwrap();

        assert!(update.values.contains(&SqlValue::Date(
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
        )));
        assert!(update.values.contains(&SqlValue::Bool(false)));
    }

    #[test]
    fn rejects_columns_outside_the_allow_list() {
        let err = build_update_sql(
            "employees",
            &json!({ "company_id": 99 }),
            COLUMNS,
            &[("id", 1)],
        )
        .unwrap_err();

        assert!(matches!(err, AppError::Validation(ref m) if m.contains("company_id")));
    }

    #[test]
    fn rejects_injection_through_keys() {
        let payload = json!({ "first_name = 'x', role_id": 1 });
        assert!(build_update_sql("users", &payload, COLUMNS, &[("id", 1)]).is_err());
    }

    #[test]
    fn where_builder_joins_conditions() {
        let mut filters = WhereBuilder::new();
        filters
            .push("company_id = ?", 2u64)
            .push_opt("is_active = ?", Some(true))
            .push_opt::<u64>("employee_id = ?", None)
            .search(&["first_name", "email"], Some(" diop "));

        assert_eq!(
            filters.clause(),
            "WHERE company_id = ? AND is_active = ? AND (first_name LIKE ? OR email LIKE ?)"
        );
        assert_eq!(filters.values().len(), 4);
        assert_eq!(filters.values()[3], SqlValue::String("%diop%".to_string()));
    }

    #[test]
    fn empty_where_builder_has_no_clause() {
        let mut filters = WhereBuilder::new();
        filters.search(&["name"], Some("   "));
        assert_eq!(filters.clause(), "");
        assert!(filters.values().is_empty());
    }

    #[test]
    fn rejects_empty_and_non_object_payloads() {
        assert!(build_update_sql("employees", &json!({}), COLUMNS, &[("id", 1)]).is_err());
        assert!(build_update_sql("employees", &json!([1, 2]), COLUMNS, &[("id", 1)]).is_err());
    }
}
