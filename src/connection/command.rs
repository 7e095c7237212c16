use serde_json::Value;

use super::Connection;
use crate::{
    adapters::{HttpRequest, Method},
    error::Error,
    query::RequestDescriptor,
    record::{Schema, key_segment, value_key},
    response::RestResponse,
};

/// A compiled request bound to the connection that will send it.
pub struct Command<'c> {
    connection: &'c Connection,
    descriptor: RequestDescriptor,
    schema: Option<&'static Schema>,
}

impl<'c> Command<'c> {
    pub(crate) fn new(
        connection: &'c Connection,
        descriptor: RequestDescriptor,
        schema: Option<&'static Schema>,
    ) -> Self {
        Self {
            connection,
            descriptor,
            schema,
        }
    }

    pub fn descriptor(&self) -> &RequestDescriptor {
        &self.descriptor
    }

    pub fn connection(&self) -> &'c Connection {
        self.connection
    }

    /// GET on the collection.
    pub async fn query_all(&self) -> Result<RestResponse, Error> {
        self.execute(Method::Get).await
    }

    /// GET on a single resource. With a single-column primary key compared
    /// for equality at the top of the filter, the key moves into the URI
    /// (`posts/7`) and out of the filter.
    pub async fn query_one(&self) -> Result<RestResponse, Error> {
        let mut descriptor = self.descriptor.clone();
        if let Some(key) = self.single_key_lookup() {
            descriptor.uri = format!("{}/{}", descriptor.uri, key_segment(&key));
            if let (Some(filter), Some([pk])) =
                (descriptor.query_params.filter.as_mut(), self.schema.map(|s| s.primary_key))
            {
                filter.remove(*pk);
                if filter.is_empty() {
                    descriptor.query_params.filter = None;
                }
            }
        }
        self.send(Method::Get, &descriptor).await
    }

    fn single_key_lookup(&self) -> Option<String> {
        let [pk] = self.schema?.primary_key else {
            return None;
        };
        let condition = self.descriptor.query_params.filter.as_ref()?.get(*pk)?;
        let Value::Object(ops) = condition else {
            return None;
        };
        match (ops.len(), ops.get("eq")) {
            (1, Some(value)) if !value.is_array() && !value.is_object() && !value.is_null() => {
                Some(value_key(value))
            }
            _ => None,
        }
    }

    pub async fn execute(&self, method: Method) -> Result<RestResponse, Error> {
        self.send(method, &self.descriptor).await
    }

    /// POST `body` to the collection.
    pub async fn insert(&self, body: Value) -> Result<RestResponse, Error> {
        let request = HttpRequest::new(Method::Post, self.descriptor.uri.clone())
            .with_headers(self.descriptor.headers.clone())
            .with_body(body);
        self.connection.execute(request).await
    }

    /// PUT `body` to `{uri}/{id}`, or to the collection without an id. The
    /// id is percent-encoded as one path segment.
    pub async fn update(&self, id: Option<&str>, body: Value) -> Result<RestResponse, Error> {
        let request = HttpRequest::new(Method::Put, self.item_path(id))
            .with_headers(self.descriptor.headers.clone())
            .with_body(body);
        self.connection.execute(request).await
    }

    pub async fn delete(&self, id: Option<&str>) -> Result<RestResponse, Error> {
        let request = HttpRequest::new(Method::Delete, self.item_path(id))
            .with_headers(self.descriptor.headers.clone());
        self.connection.execute(request).await
    }

    fn item_path(&self, id: Option<&str>) -> String {
        match id {
            Some(id) if !id.is_empty() => format!("{}/{}", self.descriptor.uri, key_segment(id)),
            _ => self.descriptor.uri.clone(),
        }
    }

    async fn send(&self, method: Method, descriptor: &RequestDescriptor) -> Result<RestResponse, Error> {
        let request = HttpRequest::new(method, descriptor.uri.clone())
            .with_query(descriptor.query_params.query_pairs())
            .with_headers(descriptor.headers.clone());
        self.connection.execute(request).await
    }
}
