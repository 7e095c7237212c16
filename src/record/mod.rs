pub mod inflect;
pub mod model;
mod persist;

pub use model::*;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::Value;

use crate::{error::Error, query::Query};

/// Static description of a remote record type.
///
/// ```rust,ignore
/// static ORDER: Schema = Schema::new("Order", &["id", "customer_id", "total"])
///     .with_relations(&[Relation::has_one("customer", customer, &[("id", "customer_id")])]);
/// ```
#[derive(Debug)]
pub struct Schema {
    pub type_name: &'static str,
    pub fields: &'static [&'static str],
    pub primary_key: &'static [&'static str],
    /// Overrides the derived resource path
    pub resource: Option<&'static str>,
    pub relations: &'static [Relation],
}

impl Schema {
    pub const fn new(type_name: &'static str, fields: &'static [&'static str]) -> Self {
        Self {
            type_name,
            fields,
            primary_key: &["id"],
            resource: None,
            relations: &[],
        }
    }

    pub const fn with_primary_key(self, primary_key: &'static [&'static str]) -> Self {
        Self {
            primary_key,
            ..self
        }
    }

    pub const fn with_resource(self, resource: &'static str) -> Self {
        Self {
            resource: Some(resource),
            ..self
        }
    }

    pub const fn with_relations(self, relations: &'static [Relation]) -> Self {
        Self { relations, ..self }
    }

    /// Pluralized, kebab-cased type name unless overridden.
    pub fn resource_path(&self) -> String {
        match self.resource {
            Some(resource) => resource.to_string(),
            None => inflect::resource_path(self.type_name),
        }
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains(&name)
    }

    pub fn relation(&self, name: &str) -> Result<&'static Relation, Error> {
        // Relations live in a 'static slice, so the borrow outlives `self`.
        let relations: &'static [Relation] = self.relations;
        relations
            .iter()
            .find(|relation| relation.name == name)
            .ok_or_else(|| Error::UnknownRelation {
                type_name: self.type_name.to_string(),
                relation: name.to_string(),
            })
    }

    /// Relation whose payload arrives under `key` in a response row.
    pub fn relation_for_key(&self, key: &str) -> Option<&'static Relation> {
        let relations: &'static [Relation] = self.relations;
        relations
            .iter()
            .find(|relation| relation.response_key() == key)
    }
}

/// Declared link from one record type to another.
#[derive(Debug, Clone, Copy)]
pub struct Relation {
    pub name: &'static str,
    pub target: fn() -> &'static Schema,
    pub multiple: bool,
    /// Pairs of (field on the target, field on this record)
    pub link: &'static [(&'static str, &'static str)],
    /// Response key carrying the expanded payload, when it differs from `name`
    pub attribute: Option<&'static str>,
}

impl Relation {
    pub const fn has_one(
        name: &'static str,
        target: fn() -> &'static Schema,
        link: &'static [(&'static str, &'static str)],
    ) -> Self {
        Self {
            name,
            target,
            multiple: false,
            link,
            attribute: None,
        }
    }

    pub const fn has_many(
        name: &'static str,
        target: fn() -> &'static Schema,
        link: &'static [(&'static str, &'static str)],
    ) -> Self {
        Self {
            name,
            target,
            multiple: true,
            link,
            attribute: None,
        }
    }

    pub const fn with_attribute(self, attribute: &'static str) -> Self {
        Self {
            attribute: Some(attribute),
            ..self
        }
    }

    pub fn target(&self) -> &'static Schema {
        (self.target)()
    }

    pub fn response_key(&self) -> &'static str {
        self.attribute.unwrap_or(self.name)
    }
}

/// A Rust type standing for a remote record type.
pub trait Resource {
    fn schema() -> &'static Schema;

    fn find() -> Query {
        Query::for_schema(Self::schema())
    }
}

/// String form of a value used for keys and URL segments.
pub(crate) fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Bytes left as-is in a key segment. `,` separates composite keys.
const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b',');

/// Percent-encodes a key so it stays a single URL path segment.
pub(crate) fn key_segment(key: &str) -> String {
    utf8_percent_encode(key, KEY_SEGMENT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_segment_escapes_path_characters() {
        assert_eq!(key_segment("42"), "42");
        assert_eq!(key_segment("7,2"), "7,2");
        assert_eq!(key_segment("a/b"), "a%2Fb");
        assert_eq!(key_segment("x?y#z"), "x%3Fy%23z");
        assert_eq!(key_segment("hello world"), "hello%20world");
    }
}
