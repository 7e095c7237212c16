use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use super::{Schema, value_key};
use crate::error::Error;

/// Records attached to a model through a relation.
#[derive(Debug, Clone)]
pub enum Related {
    One(Box<Model>),
    Many(Vec<Model>),
    /// The relation was loaded and is empty
    Nothing,
}

impl Related {
    pub fn as_one(&self) -> Option<&Model> {
        match self {
            Related::One(model) => Some(model),
            _ => None,
        }
    }

    pub fn as_many(&self) -> &[Model] {
        match self {
            Related::Many(models) => models,
            _ => &[],
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Related::One(model) => model.to_json(),
            Related::Many(models) => Value::Array(models.iter().map(Model::to_json).collect()),
            Related::Nothing => Value::Null,
        }
    }
}

/// Attribute bag of one remote record, checked against its [`Schema`].
#[derive(Debug, Clone)]
pub struct Model {
    schema: &'static Schema,
    attributes: BTreeMap<String, Value>,
    old_attributes: Option<BTreeMap<String, Value>>,
    related: BTreeMap<String, Related>,
}

impl Model {
    pub fn new(schema: &'static Schema) -> Self {
        Self {
            schema,
            attributes: BTreeMap::new(),
            old_attributes: None,
            related: BTreeMap::new(),
        }
    }

    /// Builds a model from a response row. Keys matching a relation are
    /// materialized as related models; undeclared keys fail in strict mode
    /// and are skipped otherwise. A row carrying its full primary key is
    /// treated as persisted.
    pub fn from_row(schema: &'static Schema, row: Value, strict: bool) -> Result<Self, Error> {
        let Value::Object(row) = row else {
            return Err(Error::Decode(format!(
                "expected an object for `{}`, got {}",
                schema.type_name, row
            )));
        };

        let mut model = Self::new(schema);
        for (key, value) in row {
            if let Some(relation) = schema.relation_for_key(&key) {
                let related = Self::related_from_value(relation.target(), relation.multiple, value, strict)?;
                model.related.insert(relation.name.to_string(), related);
            } else if schema.has_field(&key) {
                model.attributes.insert(key, value);
            } else if strict {
                return Err(Error::unknown_attribute(schema.type_name, &key));
            } else {
                debug!(model = schema.type_name, attribute = %key, "Skipping undeclared attribute");
            }
        }

        if model.primary_key().is_some() {
            model.old_attributes = Some(model.attributes.clone());
        }
        Ok(model)
    }

    fn related_from_value(
        schema: &'static Schema,
        multiple: bool,
        value: Value,
        strict: bool,
    ) -> Result<Related, Error> {
        match (multiple, value) {
            (_, Value::Null) => Ok(Related::Nothing),
            (true, Value::Array(rows)) => rows
                .into_iter()
                .map(|row| Self::from_row(schema, row, strict))
                .collect::<Result<Vec<_>, _>>()
                .map(Related::Many),
            (true, row) => Ok(Related::Many(vec![Self::from_row(schema, row, strict)?])),
            (false, Value::Array(rows)) => match rows.into_iter().next() {
                Some(row) => Ok(Related::One(Box::new(Self::from_row(schema, row, strict)?))),
                None => Ok(Related::Nothing),
            },
            (false, row) => Ok(Related::One(Box::new(Self::from_row(schema, row, strict)?))),
        }
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    pub fn type_name(&self) -> &'static str {
        self.schema.type_name
    }

    /// Value of a declared attribute; `None` when it was never set.
    pub fn get(&self, name: &str) -> Result<Option<&Value>, Error> {
        self.check(name)?;
        Ok(self.attributes.get(name))
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), Error> {
        self.check(name)?;
        self.attributes.insert(name.to_string(), value.into());
        Ok(())
    }

    fn check(&self, name: &str) -> Result<(), Error> {
        if self.schema.has_field(name) {
            Ok(())
        } else {
            Err(Error::unknown_attribute(self.schema.type_name, name))
        }
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Primary key values in declaration order, `None` if any is missing or null.
    pub fn primary_key(&self) -> Option<Vec<&Value>> {
        self.schema
            .primary_key
            .iter()
            .map(|field| self.attributes.get(*field).filter(|value| !value.is_null()))
            .collect()
    }

    /// Primary key as it appears in a resource URL (`7`, or `7,2` when composite).
    pub fn primary_key_segment(&self) -> Option<String> {
        let values = match &self.old_attributes {
            Some(old) => self
                .schema
                .primary_key
                .iter()
                .map(|field| old.get(*field).filter(|value| !value.is_null()))
                .collect::<Option<Vec<_>>>(),
            None => self.primary_key(),
        }?;
        Some(values.into_iter().map(value_key).collect::<Vec<_>>().join(","))
    }

    pub fn related(&self, name: &str) -> Option<&Related> {
        self.related.get(name)
    }

    pub fn is_related_populated(&self, name: &str) -> bool {
        self.related.contains_key(name)
    }

    pub fn populate_related(&mut self, name: &str, related: Related) -> Result<(), Error> {
        self.schema.relation(name)?;
        self.related.insert(name.to_string(), related);
        Ok(())
    }

    pub fn is_new_record(&self) -> bool {
        self.old_attributes.is_none()
    }

    /// Attributes changed since the model was loaded or last saved.
    pub fn dirty_attributes(&self) -> BTreeMap<String, Value> {
        match &self.old_attributes {
            None => self.attributes.clone(),
            Some(old) => self
                .attributes
                .iter()
                .filter(|(name, value)| old.get(*name) != Some(*value))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }

    pub(crate) fn mark_clean(&mut self) {
        self.old_attributes = Some(self.attributes.clone());
    }

    pub(crate) fn take_related(&mut self, name: &str) -> Option<Related> {
        self.related.remove(name)
    }

    pub(crate) fn forget_persisted(&mut self) {
        self.old_attributes = None;
    }

    /// Merges attributes returned by the server, ignoring undeclared keys.
    pub(crate) fn absorb(&mut self, body: &Value) {
        if let Value::Object(map) = body {
            for (key, value) in map {
                if self.schema.has_field(key) {
                    self.attributes.insert(key.clone(), value.clone());
                }
            }
        }
    }

    pub fn to_json(&self) -> Value {
        let mut map: Map<String, Value> = self
            .attributes
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        for (name, related) in &self.related {
            map.insert(name.clone(), related.to_json());
        }
        Value::Object(map)
    }

    /// Deserializes attributes and loaded relations into a typed struct.
    pub fn into_typed<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_value(self.to_json()).map_err(|e| Error::Decode(e.to_string()))
    }
}
