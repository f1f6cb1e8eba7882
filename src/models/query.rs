//! Query-related data models.
//!
//! Bound arguments, execution results and the row representation shared by
//! every execution path.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A decoded result row: column name to JSON value.
pub type Row = serde_json::Map<String, JsonValue>;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    /// JSON document
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }

    /// Render the value as an SQL literal for log output.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(v) => v.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::String(v) => quote(v),
            Self::Bytes(v) => {
                let hex: String = v.iter().map(|b| format!("{:02x}", b)).collect();
                format!("X'{}'", hex)
            }
            Self::Json(v) => quote(&v.to_string()),
        }
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

macro_rules! impl_from_int {
    ($($t:ty),+) => {
        $(
            impl From<$t> for QueryParam {
                fn from(v: $t) -> Self {
                    Self::Int(i64::from(v))
                }
            }
        )+
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f32> for QueryParam {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&String> for QueryParam {
    fn from(v: &String) -> Self {
        Self::String(v.clone())
    }
}

impl From<Vec<u8>> for QueryParam {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&[u8]> for QueryParam {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl From<JsonValue> for QueryParam {
    fn from(v: JsonValue) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Build a `Vec<QueryParam>` from heterogeneous values.
///
/// ```ignore
/// conn.execute("INSERT INTO users (name, age) VALUES (?, ?)", &params!["ann", 31]).await?;
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::models::QueryParam>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::models::QueryParam::from($value)),+]
    };
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    /// Auto-generated key of the last inserted row. Not reported by PostgreSQL.
    pub last_insert_id: Option<i64>,
    pub rows_affected: u64,
}

impl ExecResult {
    pub fn new(last_insert_id: Option<i64>, rows_affected: u64) -> Self {
        Self {
            last_insert_id,
            rows_affected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param_types() {
        assert!(QueryParam::Null.is_null());
        assert!(!QueryParam::Bool(true).is_null());
        assert_eq!(QueryParam::Int(42).type_name(), "int");
        assert_eq!(
            QueryParam::String("hello".to_string()).type_name(),
            "string"
        );
        assert_eq!(QueryParam::Json(serde_json::json!({})).type_name(), "json");
    }

    #[test]
    fn test_params_macro() {
        let values = crate::params!["ann", 31, 2.5, true, None::<i64>, vec![1u8, 2]];
        assert_eq!(
            values,
            vec![
                QueryParam::String("ann".to_string()),
                QueryParam::Int(31),
                QueryParam::Float(2.5),
                QueryParam::Bool(true),
                QueryParam::Null,
                QueryParam::Bytes(vec![1, 2]),
            ]
        );
        assert!(crate::params![].is_empty());
    }

    #[test]
    fn test_sql_literal() {
        assert_eq!(QueryParam::Null.to_sql_literal(), "NULL");
        assert_eq!(QueryParam::from("it's").to_sql_literal(), "'it''s'");
        assert_eq!(QueryParam::Bytes(vec![0xde, 0xad]).to_sql_literal(), "X'dead'");
        assert_eq!(
            QueryParam::Json(serde_json::json!({"a": 1})).to_sql_literal(),
            r#"'{"a":1}'"#
        );
    }

    #[test]
    fn test_deserialize_untagged() {
        let values: Vec<QueryParam> =
            serde_json::from_str(r#"[null, true, 7, 1.5, "x", {"k": [1]}]"#).unwrap();
        assert_eq!(values[0], QueryParam::Null);
        assert_eq!(values[1], QueryParam::Bool(true));
        assert_eq!(values[2], QueryParam::Int(7));
        assert_eq!(values[3], QueryParam::Float(1.5));
        assert_eq!(values[4], QueryParam::String("x".to_string()));
        assert_eq!(values[5], QueryParam::Json(serde_json::json!({"k": [1]})));
    }
}
