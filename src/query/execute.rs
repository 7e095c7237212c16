use serde_json::Value;

use super::{Action, Params, Query};
use crate::{
    adapters::Method,
    connection::{Command, Connection},
    cursor::{PageCursor, RecordSet, RowKey},
    error::{Error, HttpErrorKind},
    materialize,
    record::Model,
};

impl Query {
    /// Compiles the query for `connection`. The action defaults to `get`.
    pub fn create_command<'c>(&self, connection: &'c Connection) -> Result<Command<'c>, Error> {
        let query = self.clone().add_action(Action::Get);
        connection.create_command(&query, &Params::new())
    }

    /// Every matching record across all pages, up to the query's limit.
    pub async fn all(&self, connection: &Connection) -> Result<RecordSet, Error> {
        PageCursor::new(connection, self.clone())?.collect().await
    }

    /// The first matching record. A 404 reads as no record.
    pub async fn one(&self, connection: &Connection) -> Result<Option<Model>, Error> {
        let mut query = self.clone().add_action(Action::View);
        query.prepare()?;

        let response = match connection.create_command(&query, &Params::new())?.query_one().await {
            Ok(response) => response,
            Err(Error::Http(err)) if err.kind == HttpErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        let rows = response.rows(connection.config().collection_envelope.as_deref());
        let models = materialize::populate(&query, connection, rows).await?;
        Ok(models.into_iter().next())
    }

    /// Total count reported by the server in response to a HEAD request.
    pub async fn count(&self, connection: &Connection) -> Result<u64, Error> {
        self.head_total(connection, Action::Count).await
    }

    pub async fn exists(&self, connection: &Connection) -> Result<bool, Error> {
        Ok(self.head_total(connection, Action::Exists).await? > 0)
    }

    async fn head_total(&self, connection: &Connection, action: Action) -> Result<u64, Error> {
        let query = self.clone().add_action(action);
        let response = connection
            .create_command(&query, &Params::new())?
            .execute(Method::Head)
            .await?;
        Ok(response
            .pagination(&connection.config().pagination_headers)
            .total_count
            .unwrap_or(0))
    }

    /// One value per record: the single selected field, or the first
    /// primary key field otherwise. Keyed like [`Query::all`]; a field
    /// index is fetched alongside the selected field.
    pub async fn column(&self, connection: &Connection) -> Result<Vec<(RowKey, Value)>, Error> {
        let schema = materialize::require_schema(self)?;
        let value_field = match self.select.as_slice() {
            [field] => field.clone(),
            _ => schema
                .primary_key
                .first()
                .map(|field| field.to_string())
                .ok_or_else(|| Error::MissingPrimaryKey(schema.type_name.to_string()))?,
        };

        let mut query = self.clone();
        if let (Some(super::IndexBy::Field(field)), [_]) = (&self.index_by, self.select.as_slice()) {
            query = query.add_select([field.clone()]);
        }

        Ok(query
            .all(connection)
            .await?
            .into_iter()
            .map(|(key, model)| {
                let value = model
                    .attributes()
                    .get(&value_field)
                    .cloned()
                    .unwrap_or(Value::Null);
                (key, value)
            })
            .collect())
    }

    /// Row-at-a-time cursor; `batch_size` becomes the page size unless the
    /// query sets one.
    pub fn each<'c>(&self, connection: &'c Connection, batch_size: u64) -> Result<PageCursor<'c>, Error> {
        self.batch(connection, batch_size)
    }

    /// Page-at-a-time cursor, see [`PageCursor::next_page`].
    pub fn batch<'c>(&self, connection: &'c Connection, batch_size: u64) -> Result<PageCursor<'c>, Error> {
        let mut query = self.clone();
        if query.per_page.is_none() {
            query.per_page = Some(batch_size.min(connection.config().max_per_page));
        }
        PageCursor::new(connection, query)
    }
}
