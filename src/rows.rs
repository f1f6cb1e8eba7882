//! Decoding result rows into caller types.
//!
//! A row decodes as an object first (`struct`, `HashMap`, `serde_json::Value`)
//! and, when it has exactly one column, as that column's value, so
//! `query_row::<i64>("SELECT COUNT(*) ...")` works without a wrapper struct.

use crate::error::{DbError, DbResult};
use crate::models::Row;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

/// Decode one row.
pub fn decode_row<T: DeserializeOwned>(row: Row) -> DbResult<T> {
    let single = (row.len() == 1)
        .then(|| row.values().next().cloned())
        .flatten();
    match serde_json::from_value(JsonValue::Object(row)) {
        Ok(value) => Ok(value),
        Err(object_err) => match single {
            Some(column) => serde_json::from_value(column).map_err(|e| DbError::decode(e.to_string())),
            None => Err(DbError::decode(object_err.to_string())),
        },
    }
}

/// Decode the row read by a single-row fetch, or `NoRows` when there was none.
pub fn first_row<T: DeserializeOwned>(row: Option<Row>) -> DbResult<T> {
    decode_row(row.ok_or(DbError::NoRows)?)
}

/// Decode every row.
pub fn all_rows<T: DeserializeOwned>(rows: Vec<Row>) -> DbResult<Vec<T>> {
    rows.into_iter().map(decode_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: i64,
        name: String,
    }

    fn row(value: JsonValue) -> Row {
        match value {
            JsonValue::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_decode_struct() {
        let user: User = decode_row(row(json!({"id": 1, "name": "ann", "extra": null}))).unwrap();
        assert_eq!(
            user,
            User {
                id: 1,
                name: "ann".to_string()
            }
        );
    }

    #[test]
    fn test_decode_single_column_scalar() {
        let count: i64 = decode_row(row(json!({"COUNT(*)": 42}))).unwrap();
        assert_eq!(count, 42);

        let name: Option<String> = decode_row(row(json!({"name": null}))).unwrap();
        assert_eq!(name, None);
    }

    #[test]
    fn test_first_row_empty_is_no_rows() {
        let err = first_row::<User>(None).unwrap_err();
        assert!(err.is_no_rows());
    }

    #[test]
    fn test_decode_mismatch_is_decode_error() {
        let err = decode_row::<User>(row(json!({"id": "x", "name": 1}))).unwrap_err();
        assert!(matches!(err, DbError::Decode { .. }));
    }

    #[test]
    fn test_all_rows() {
        let users: Vec<User> = all_rows(vec![
            row(json!({"id": 1, "name": "a"})),
            row(json!({"id": 2, "name": "b"})),
        ])
        .unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].name, "b");
    }
}
