//! Dynamic row decoding
//!
//! The rendering layer works on field -> value string maps so that
//! configuration-bound SQL can be executed without compile-time row types.
//! Every column is rendered to its string form; NULL decodes to the empty
//! string, matching the best-effort rendering contract.

use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::collections::HashMap;

/// A database row as a column name -> string value map
pub type DataRow = HashMap<String, String>;

/// Convert a SQLite row into a string map
pub fn decode_row(row: &SqliteRow) -> DataRow {
    let mut map = DataRow::new();
    for (i, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), decode_value(row, i));
    }
    map
}

fn decode_value(row: &SqliteRow, index: usize) -> String {
    let raw = match row.try_get_raw(index) {
        Ok(raw) => raw,
        Err(_) => return String::new(),
    };
    if raw.is_null() {
        return String::new();
    }
    match raw.type_info().name() {
        "INTEGER" => row
            .try_get::<i64, _>(index)
            .map(|v| v.to_string())
            .unwrap_or_default(),
        "REAL" => row
            .try_get::<f64, _>(index)
            .map(|v| v.to_string())
            .unwrap_or_default(),
        _ => row.try_get::<String, _>(index).unwrap_or_default(),
    }
}

/// Read a field from a row, empty string when absent
pub fn field<'a>(row: &'a DataRow, name: &str) -> &'a str {
    row.get(name).map(String::as_str).unwrap_or("")
}

/// True when the row carries a non-empty value for `name`
pub fn has_field(row: &DataRow, name: &str) -> bool {
    !field(row, name).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_lookup_is_total() {
        let mut row = DataRow::new();
        row.insert("dep_set_id".to_string(), "D_1".to_string());
        assert_eq!(field(&row, "dep_set_id"), "D_1");
        assert_eq!(field(&row, "missing"), "");
        assert!(has_field(&row, "dep_set_id"));
        assert!(!has_field(&row, "missing"));
    }
}
