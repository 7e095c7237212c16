// src/adapters/memory.rs
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use serde_json::{Map, Value};
use tracing::debug;

use super::{HttpRequest, Method, Transport};
use crate::{error::Error, pagination::PaginationHeaders, record::value_key, response::RestResponse};

#[derive(Default)]
struct MemoryStore {
    collections: HashMap<String, Vec<Value>>,
    scripted: VecDeque<Result<RestResponse, String>>,
    requests: Vec<HttpRequest>,
}

/// Serves collections the way a paginated REST backend does: `page` and
/// `per-page` parameters, pagination headers, `/{id}` item routes, top-level
/// `eq`/`neq`/`in`/`nin` filters, and POST/PUT/DELETE on items. Scripted
/// responses, when queued, are returned first regardless of the request.
///
/// Clones share the same store.
#[derive(Clone)]
pub struct MemoryTransport {
    store: Arc<Mutex<MemoryStore>>,
    page_size: u64,
    max_page_size: u64,
    headers: PaginationHeaders,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            store: Arc::new(Mutex::new(MemoryStore::default())),
            page_size: 20,
            max_page_size: 50,
            headers: PaginationHeaders::default(),
        }
    }

    /// Page size used when a request sends no `per-page`.
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_max_page_size(mut self, max_page_size: u64) -> Self {
        self.max_page_size = max_page_size.max(1);
        self
    }

    pub fn with_pagination_headers(mut self, headers: PaginationHeaders) -> Self {
        self.headers = headers;
        self
    }

    /// Replaces the rows served under `path`.
    pub fn serve(&self, path: &str, rows: Vec<Value>) {
        self.store
            .lock()
            .collections
            .insert(path.trim_matches('/').to_string(), rows);
    }

    /// Queues a response returned by the next request.
    pub fn enqueue(&self, response: RestResponse) {
        self.store.lock().scripted.push_back(Ok(response));
    }

    /// Queues a transport failure for the next request.
    pub fn enqueue_failure(&self, message: impl Into<String>) {
        self.store.lock().scripted.push_back(Err(message.into()));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.store.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.store.lock().requests.len()
    }

    pub fn rows(&self, path: &str) -> Vec<Value> {
        self.store
            .lock()
            .collections
            .get(path.trim_matches('/'))
            .cloned()
            .unwrap_or_default()
    }

    fn list(&self, rows: &[Value], request: &HttpRequest) -> RestResponse {
        let filters = parse_filters(&request.query);
        let matching: Vec<&Value> = rows.iter().filter(|row| matches(row, &filters)).collect();

        let per_page = request
            .query_value("per-page")
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|per_page| *per_page > 0)
            .unwrap_or(self.page_size)
            .min(self.max_page_size);
        let page = request
            .query_value("page")
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(1)
            .max(1);
        let total = matching.len() as u64;
        let page_count = total.div_ceil(per_page);

        let start = ((page - 1) * per_page).min(total) as usize;
        let end = (page * per_page).min(total) as usize;
        let body = if request.method == Method::Head {
            Value::Null
        } else {
            Value::Array(
                matching[start..end]
                    .iter()
                    .map(|row| project(row, request.query_value("fields")))
                    .collect(),
            )
        };

        RestResponse::ok(body)
            .with_header(&self.headers.total_count, total)
            .with_header(&self.headers.page_count, page_count)
            .with_header(&self.headers.current_page, page)
            .with_header(&self.headers.per_page, per_page)
    }

    fn handle(&self, request: &HttpRequest) -> RestResponse {
        let path = request.path.trim_matches('/');
        let mut store = self.store.lock();

        if let Some(rows) = store.collections.get(path).cloned() {
            return match request.method {
                Method::Get | Method::Head => self.list(&rows, request),
                Method::Post => {
                    let mut row = request.body.clone().unwrap_or(Value::Object(Map::new()));
                    if let Value::Object(map) = &mut row {
                        if !map.contains_key("id") {
                            let next_id = rows
                                .iter()
                                .filter_map(|row| row.get("id").and_then(Value::as_u64))
                                .max()
                                .unwrap_or(0)
                                + 1;
                            map.insert("id".to_string(), Value::from(next_id));
                        }
                    }
                    if let Some(collection) = store.collections.get_mut(path) {
                        collection.push(row.clone());
                    }
                    RestResponse::new(201).with_body(row)
                }
                Method::Put | Method::Delete => RestResponse::new(405).with_header("Allow", "GET, HEAD, POST"),
            };
        }

        let Some((collection_path, id)) = path.rsplit_once('/') else {
            return RestResponse::new(404);
        };
        let Some(collection) = store.collections.get_mut(collection_path) else {
            return RestResponse::new(404);
        };
        let id = percent_decode_str(id).decode_utf8_lossy();
        let Some(position) = collection
            .iter()
            .position(|row| row.get("id").map(value_key).as_deref() == Some(id.as_ref()))
        else {
            return RestResponse::new(404);
        };

        match request.method {
            Method::Get | Method::Head => RestResponse::ok(project(
                &collection[position],
                request.query_value("fields"),
            )),
            Method::Put => {
                if let (Value::Object(row), Some(Value::Object(changes))) =
                    (&mut collection[position], &request.body)
                {
                    row.extend(changes.clone());
                }
                RestResponse::ok(collection[position].clone())
            }
            Method::Delete => {
                collection.remove(position);
                RestResponse::new(204)
            }
            Method::Post => RestResponse::new(405).with_header("Allow", "GET, HEAD, PUT, DELETE"),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, _base_url: &str, request: &HttpRequest) -> Result<RestResponse, Error> {
        let scripted = {
            let mut store = self.store.lock();
            store.requests.push(request.clone());
            store.scripted.pop_front()
        };
        match scripted {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(Error::Transport(message)),
            None => Ok(self.handle(request)),
        }
    }
}

/// `(field, operator, values)` triples read from `filter[field][op]...` keys.
fn parse_filters(query: &[(String, String)]) -> Vec<(String, String, Vec<String>)> {
    let mut filters: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
    for (key, value) in query {
        let Some(rest) = key.strip_prefix("filter[") else {
            continue;
        };
        let segments: Vec<&str> = rest
            .trim_end_matches(']')
            .split("][")
            .collect();
        match segments.as_slice() {
            [field, op] | [field, op, _] if matches!(*op, "eq" | "neq" | "in" | "nin") => {
                filters
                    .entry((field.to_string(), op.to_string()))
                    .or_default()
                    .push(value.clone());
            }
            _ => debug!(key = %key, "Memory transport ignores filter"),
        }
    }
    filters
        .into_iter()
        .map(|((field, op), values)| (field, op, values))
        .collect()
}

fn matches(row: &Value, filters: &[(String, String, Vec<String>)]) -> bool {
    filters.iter().all(|(field, op, values)| {
        let actual = row.get(field).map(value_key).unwrap_or_default();
        let found = values.contains(&actual);
        match op.as_str() {
            "eq" | "in" => found,
            _ => !found,
        }
    })
}

fn project(row: &Value, fields: Option<&str>) -> Value {
    match (row, fields) {
        (Value::Object(map), Some(fields)) => {
            let wanted: Vec<&str> = fields.split(',').collect();
            Value::Object(
                map.iter()
                    .filter(|(key, value)| wanted.contains(&key.as_str()) || value.is_object() || value.is_array())
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            )
        }
        _ => row.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn get(path: &str, query: &[(&str, &str)]) -> HttpRequest {
        HttpRequest::new(Method::Get, path).with_query(
            query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_pages_and_headers() {
        let transport = MemoryTransport::new().with_page_size(2);
        transport.serve("items", (1..=5).map(|id| json!({"id": id})).collect());

        let response = transport.send("", &get("items", &[("page", "3")])).await.unwrap();
        assert_eq!(response.body, json!([{"id": 5}]));
        assert_eq!(response.header("x-pagination-page-count"), Some("3"));
        assert_eq!(response.header("x-pagination-current-page"), Some("3"));
        assert_eq!(response.header("x-pagination-total-count"), Some("5"));
    }

    #[tokio::test]
    async fn test_filters_and_items() {
        let transport = MemoryTransport::new();
        transport.serve(
            "items",
            vec![json!({"id": 1, "kind": "a"}), json!({"id": 2, "kind": "b"}), json!({"id": 3, "kind": "a"})],
        );

        let response = transport
            .send("", &get("items", &[("filter[kind][eq]", "a"), ("filter[id][nin][0]", "1")]))
            .await
            .unwrap();
        assert_eq!(response.body, json!([{"id": 3, "kind": "a"}]));

        let response = transport.send("", &get("items/2", &[])).await.unwrap();
        assert_eq!(response.body, json!({"id": 2, "kind": "b"}));
        let response = transport.send("", &get("items/9", &[])).await.unwrap();
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_scripted_responses_come_first() {
        let transport = MemoryTransport::new();
        transport.serve("items", vec![json!({"id": 1})]);
        transport.enqueue(RestResponse::new(503));

        assert_eq!(transport.send("", &get("items", &[])).await.unwrap().status, 503);
        assert_eq!(transport.send("", &get("items", &[])).await.unwrap().status, 200);
        assert_eq!(transport.request_count(), 2);
    }
}
