use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pagination::{PaginationHeaders, PaginationState};

/// Status, headers and decoded JSON body of one HTTP exchange.
///
/// Header names are stored lower-cased so lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

impl RestResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: Value::Null,
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200).with_body(body)
    }

    pub fn with_header(mut self, name: &str, value: impl ToString) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn pagination(&self, names: &PaginationHeaders) -> PaginationState {
        PaginationState::from_response(self, names)
    }

    /// Rows of a list response. An object is a single row, `null` is none.
    /// With an envelope key, rows are read from under that key when present.
    pub fn rows(&self, envelope: Option<&str>) -> Vec<Value> {
        let body = match (envelope, &self.body) {
            (Some(key), Value::Object(map)) if map.contains_key(key) => &map[key],
            _ => &self.body,
        };
        match body {
            Value::Array(rows) => rows.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = RestResponse::new(200).with_header("X-Pagination-Page-Count", 4);
        assert_eq!(response.header("x-pagination-page-count"), Some("4"));
        assert_eq!(response.header("X-PAGINATION-PAGE-COUNT"), Some("4"));
    }

    #[test]
    fn test_rows_shapes() {
        let list = RestResponse::ok(json!([{"id": 1}, {"id": 2}]));
        assert_eq!(list.rows(None).len(), 2);

        let single = RestResponse::ok(json!({"id": 1}));
        assert_eq!(single.rows(None), vec![json!({"id": 1})]);

        let empty = RestResponse::new(204);
        assert!(empty.rows(None).is_empty());

        let wrapped = RestResponse::ok(json!({"items": [{"id": 1}], "_meta": {}}));
        assert_eq!(wrapped.rows(Some("items")), vec![json!({"id": 1})]);
    }
}
