use serde::Serialize;
use serde_json::{Map, Value};

/// Positional statement parameter (`$1`, `$2`, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(Value),
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        SqlParam::Bool(v)
    }
}

impl From<i32> for SqlParam {
    fn from(v: i32) -> Self {
        SqlParam::Int(i64::from(v))
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        SqlParam::Int(v)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        SqlParam::Float(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        SqlParam::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        SqlParam::Text(v)
    }
}

impl From<Value> for SqlParam {
    fn from(v: Value) -> Self {
        SqlParam::Json(v)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlParam::Null)
    }
}

pub type Row = Map<String, Value>;

/// Result shape shared by every strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryOutput {
    pub rows: Vec<Row>,
    /// Rows returned, or rows affected for statements that return none.
    pub row_count: u64,
}

impl QueryOutput {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let row_count = rows.len() as u64;
        Self { rows, row_count }
    }

    pub fn affected(row_count: u64) -> Self {
        Self {
            rows: Vec::new(),
            row_count,
        }
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// Column of the first row.
    pub fn scalar(&self, column: &str) -> Option<&Value> {
        self.first().and_then(|row| row.get(column))
    }
}
