//! Single-page access for listings: one request per page, pagination read
//! back from the response.

use crate::{
    connection::Connection,
    error::Error,
    materialize,
    pagination::PaginationState,
    query::{Params, Query, SortDirection},
    record::Model,
};

/// One page of a [`DataProvider`].
#[derive(Debug, Clone)]
pub struct DataPage {
    pub models: Vec<Model>,
    pub pagination: PaginationState,
    /// Zero-based index of the page the server returned
    pub page: u64,
    pub page_size: u64,
}

impl DataPage {
    pub fn total_count(&self) -> u64 {
        self.pagination.total_count.unwrap_or(self.models.len() as u64)
    }

    pub fn page_count(&self) -> u64 {
        self.pagination.page_count.unwrap_or(1)
    }
}

#[derive(Debug, Clone)]
pub struct DataProvider {
    query: Query,
    page_size: u64,
    sort: Vec<(String, SortDirection)>,
}

impl DataProvider {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            page_size: 20,
            sort: Vec::new(),
        }
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push((field.into(), direction));
        self
    }

    /// Fetches page `page` (zero-based). The server's headers decide the
    /// page and size actually reported; a zero total count yields no models.
    pub async fn fetch(&self, connection: &Connection, page: u64) -> Result<DataPage, Error> {
        let mut query = self
            .query
            .clone()
            .limit(self.page_size)
            .per_page(self.page_size)
            .offset(page * self.page_size);
        for (field, direction) in &self.sort {
            query = query.order_by(field.clone(), *direction);
        }
        query.prepare()?;

        let response = connection
            .create_command(&query, &Params::new())?
            .query_all()
            .await?;
        let pagination = response.pagination(&connection.config().pagination_headers);

        let models = if pagination.total_count == Some(0) {
            Vec::new()
        } else {
            let rows = response.rows(connection.config().collection_envelope.as_deref());
            materialize::populate(&query, connection, rows).await?
        };

        Ok(DataPage {
            page: pagination
                .current_page
                .map(|current| current.saturating_sub(1))
                .unwrap_or(page),
            page_size: pagination.per_page.unwrap_or(self.page_size),
            pagination,
            models,
        })
    }
}
