//! Compiles a [`Query`] into a [`RequestDescriptor`].

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use super::condition::{self, Params};
use super::{Action, Query, SortDirection};
use crate::auth::Auth;
use crate::config::ConnectionConfig;
use crate::error::Error;

/// Clauses of a compiled request. `None` clauses are never sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    #[serde(rename = "per-page", skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
}

impl QueryParams {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Flattens the clauses into `key=value` pairs using bracketed keys for
    /// nested filters (`filter[id][in][0]=1`).
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(fields) = &self.fields {
            pairs.push(("fields".to_string(), fields.clone()));
        }
        if let Some(expand) = &self.expand {
            pairs.push(("expand".to_string(), expand.clone()));
        }
        if let Some(filter) = &self.filter {
            for (key, value) in filter {
                flatten(&format!("filter[{}]", key), value, &mut pairs);
            }
        }
        if let Some(sort) = &self.sort {
            pairs.push(("sort".to_string(), sort.clone()));
        }
        if let Some(per_page) = self.per_page {
            pairs.push(("per-page".to_string(), per_page.to_string()));
        }
        if let Some(page) = self.page {
            pairs.push(("page".to_string(), page.to_string()));
        }
        pairs
    }
}

fn flatten(prefix: &str, value: &Value, pairs: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten(&format!("{}[{}]", prefix, key), nested, pairs);
            }
        }
        Value::Array(values) => {
            for (index, nested) in values.iter().enumerate() {
                flatten(&format!("{}[{}]", prefix, index), nested, pairs);
            }
        }
        Value::Bool(flag) => pairs.push((prefix.to_string(), if *flag { "1" } else { "0" }.to_string())),
        Value::Null => pairs.push((prefix.to_string(), String::new())),
        Value::String(s) => pairs.push((prefix.to_string(), s.clone())),
        Value::Number(n) => pairs.push((prefix.to_string(), n.to_string())),
    }
}

/// Immutable result of compiling a query.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub type_name: Option<&'static str>,
    pub uri: String,
    pub headers: BTreeMap<String, String>,
    pub query_params: QueryParams,
    pub action: Option<Action>,
}

pub struct RequestBuilder<'a> {
    config: &'a ConnectionConfig,
    auth: &'a Auth,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(config: &'a ConnectionConfig, auth: &'a Auth) -> Self {
        Self { config, auth }
    }

    /// Compiles `query` with `params` as the base parameter table; the
    /// query's own params overlay it. The query itself is left untouched.
    pub fn build(&self, query: &Query, params: &Params) -> Result<RequestDescriptor, Error> {
        let mut query = query.clone();
        query.prepare()?;

        let mut merged = params.clone();
        merged.extend(query.params.iter().map(|(k, v)| (k.clone(), v.clone())));

        let filter = match &query.condition {
            Some(condition) => condition::compile(condition, &merged)?,
            None => Map::new(),
        };
        let (per_page, page) = self.build_pagination(&query);

        let query_params = QueryParams {
            fields: join_nonempty(query.select.iter().map(String::as_str)),
            expand: join_nonempty(query.join.iter().flat_map(|join| join.expand_names())),
            filter: (!filter.is_empty()).then_some(filter),
            sort: join_nonempty(query.order_by.iter().map(|(field, direction)| match direction {
                SortDirection::Asc => field.clone(),
                SortDirection::Desc => format!("-{}", field),
            })),
            per_page,
            page,
        };

        Ok(RequestDescriptor {
            type_name: query.schema.map(|schema| schema.type_name),
            uri: query
                .resource()
                .map(|resource| resource.trim().to_string())
                .unwrap_or_default(),
            headers: self.build_headers(),
            query_params,
            action: query.action,
        })
    }

    pub fn build_headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        if let Some(value) = self.auth.header_value() {
            headers.insert("Authorization".to_string(), value);
        }
        headers
    }

    /// `(per-page, page)` for one request.
    fn build_pagination(&self, query: &Query) -> (Option<u64>, Option<u64>) {
        let max = self.config.max_per_page;
        let (per_page, explicit) = match (query.per_page, query.limit) {
            (Some(per_page), _) if per_page <= max => (per_page, true),
            (_, Some(limit)) if limit < max => (limit, true),
            _ => (self.config.default_per_page, false),
        };
        match query.offset {
            Some(offset) => {
                let page = offset.checked_div(per_page).unwrap_or(0) + 1;
                (Some(per_page), Some(page))
            }
            None if explicit => (Some(per_page), None),
            None => (None, None),
        }
    }
}

fn join_nonempty<S: AsRef<str>>(parts: impl Iterator<Item = S>) -> Option<String> {
    let joined = parts
        .filter(|part| !part.as_ref().is_empty())
        .map(|part| part.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(",");
    (!joined.is_empty()).then_some(joined)
}
