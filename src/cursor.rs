//! Page-by-page iteration over a query.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::{
    connection::Connection,
    error::Error,
    materialize,
    pagination::PaginationState,
    query::{Params, Query},
    record::Model,
};

/// Key of a row in a [`RecordSet`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowKey {
    Index(usize),
    Named(String),
}

/// Ordered, keyed result of a query. Inserting an existing key replaces the
/// model in place.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    entries: Vec<(RowKey, Model)>,
    positions: HashMap<RowKey, usize>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: RowKey, model: Model) {
        match self.positions.get(&key) {
            Some(&position) => self.entries[position].1 = model,
            None => {
                self.positions.insert(key.clone(), self.entries.len());
                self.entries.push((key, model));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &RowKey) -> Option<&Model> {
        self.positions.get(key).map(|&position| &self.entries[position].1)
    }

    pub fn get_named(&self, key: &str) -> Option<&Model> {
        self.get(&RowKey::Named(key.to_string()))
    }

    pub fn first(&self) -> Option<&Model> {
        self.entries.first().map(|(_, model)| model)
    }

    pub fn keys(&self) -> impl Iterator<Item = &RowKey> {
        self.entries.iter().map(|(key, _)| key)
    }

    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.entries.iter().map(|(_, model)| model)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RowKey, &Model)> {
        self.entries.iter().map(|(key, model)| (key, model))
    }

    pub fn into_models(self) -> Vec<Model> {
        self.entries.into_iter().map(|(_, model)| model).collect()
    }
}

impl IntoIterator for RecordSet {
    type Item = (RowKey, Model);
    type IntoIter = std::vec::IntoIter<(RowKey, Model)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Fresh,
    Fetching,
    Exhausted,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    limit: Option<u64>,
    offset: Option<u64>,
    per_page: Option<u64>,
}

/// Replays a query page by page. Each page's offset and size come from the
/// pagination headers of the previous response, so pages are fetched
/// strictly one after another.
///
/// The query's `limit` caps the total number of rows: the page that reaches
/// it is truncated and no further page is requested.
pub struct PageCursor<'c> {
    connection: &'c Connection,
    query: Query,
    initial: Window,
    state: CursorState,
    pagination: Option<PaginationState>,
    fetched: u64,
    next_index: usize,
    buffer: VecDeque<Model>,
}

impl<'c> PageCursor<'c> {
    pub fn new(connection: &'c Connection, query: Query) -> Result<Self, Error> {
        let mut query = query;
        query.prepare()?;
        let initial = Window {
            limit: query.limit,
            offset: query.offset,
            per_page: query.per_page,
        };
        Ok(Self {
            connection,
            query,
            initial,
            state: CursorState::Fresh,
            pagination: None,
            fetched: 0,
            next_index: 0,
            buffer: VecDeque::new(),
        })
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Pagination metadata of the last response.
    pub fn pagination(&self) -> Option<PaginationState> {
        self.pagination
    }

    /// Rows delivered so far.
    pub fn fetched(&self) -> u64 {
        self.fetched
    }

    /// Next page of models, or `None` once the cursor is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Model>>, Error> {
        if self.state == CursorState::Exhausted {
            return Ok(None);
        }
        if matches!(self.initial.limit, Some(limit) if self.fetched >= limit) {
            self.state = CursorState::Exhausted;
            return Ok(None);
        }

        if self.state == CursorState::Fetching {
            match self.pagination {
                Some(page) if page.has_more() => {
                    let per_page = page
                        .per_page
                        .or(self.query.per_page)
                        .unwrap_or(self.connection.config().default_per_page);
                    let page = PaginationState {
                        per_page: Some(per_page),
                        ..page
                    };
                    let Some(offset) = page.next_offset() else {
                        self.state = CursorState::Exhausted;
                        return Ok(None);
                    };
                    self.query.per_page = Some(per_page);
                    self.query.offset = Some(offset);
                }
                _ => {
                    self.state = CursorState::Exhausted;
                    return Ok(None);
                }
            }
        }
        self.state = CursorState::Fetching;

        let connection = self.connection;
        let config = connection.config();
        let response = connection
            .create_command(&self.query, &Params::new())?
            .query_all()
            .await?;
        let pagination = response.pagination(&config.pagination_headers);
        self.pagination = Some(pagination);

        let rows = response.rows(config.collection_envelope.as_deref());
        let mut models = materialize::populate(&self.query, connection, rows).await?;

        if let Some(limit) = self.initial.limit {
            let remaining = limit.saturating_sub(self.fetched);
            if models.len() as u64 >= remaining {
                models.truncate(remaining as usize);
                debug!(limit = limit, "Row limit reached, stopping cursor");
                self.state = CursorState::Exhausted;
            }
        }
        self.fetched += models.len() as u64;

        if models.is_empty() || !pagination.has_more() {
            self.state = CursorState::Exhausted;
        }
        if models.is_empty() {
            return Ok(None);
        }
        Ok(Some(models))
    }

    /// Next model with its key: the query's index-by value, or a running
    /// position.
    pub async fn next_row(&mut self) -> Result<Option<(RowKey, Model)>, Error> {
        if self.buffer.is_empty() {
            match self.next_page().await? {
                Some(models) => self.buffer.extend(models),
                None => return Ok(None),
            }
        }
        let Some(model) = self.buffer.pop_front() else {
            return Ok(None);
        };
        let key = match &self.query.index_by {
            Some(index_by) => RowKey::Named(index_by.key(&model)),
            None => {
                let key = RowKey::Index(self.next_index);
                self.next_index += 1;
                key
            }
        };
        Ok(Some((key, model)))
    }

    /// Drains the cursor into a [`RecordSet`].
    pub async fn collect(mut self) -> Result<RecordSet, Error> {
        let mut records = RecordSet::new();
        while let Some((key, model)) = self.next_row().await? {
            records.insert(key, model);
        }
        Ok(records)
    }

    /// Restores the initial window and forgets every response seen, so
    /// iteration starts over.
    pub fn reset(&mut self) {
        self.query.limit = self.initial.limit;
        self.query.offset = self.initial.offset;
        self.query.per_page = self.initial.per_page;
        self.state = CursorState::Fresh;
        self.pagination = None;
        self.fetched = 0;
        self.next_index = 0;
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::IndexBy;
    use crate::record::Schema;
    use serde_json::json;

    static ITEM: Schema = Schema::new("Item", &["id", "code"]);

    fn model(id: i64, code: &str) -> Model {
        Model::from_row(&ITEM, json!({"id": id, "code": code}), false).unwrap()
    }

    #[test]
    fn test_record_set_overwrites_in_place() {
        let mut records = RecordSet::new();
        records.insert(RowKey::Named("a".into()), model(1, "a"));
        records.insert(RowKey::Named("b".into()), model(2, "b"));
        records.insert(RowKey::Named("a".into()), model(3, "a"));

        assert_eq!(records.len(), 2);
        let ids: Vec<_> = records.models().map(|m| m.attributes()["id"].clone()).collect();
        assert_eq!(ids, vec![json!(3), json!(2)]);
        assert!(records.get_named("b").is_some());
    }

    #[test]
    fn test_index_by_key() {
        let by_code = IndexBy::Field("code".into());
        assert_eq!(by_code.key(&model(1, "x")), "x");
        let by_fn = IndexBy::function(|m| format!("item-{}", m.attributes()["id"]));
        assert_eq!(by_fn.key(&model(4, "x")), "item-4");
    }
}
