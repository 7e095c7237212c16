//! Turns response rows into [`Model`]s: de-duplication of joined rows and
//! loading of `with` relations.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tracing::debug;

use crate::{
    connection::Connection,
    error::Error,
    query::{Condition, Query},
    record::{Model, Related, Relation, Schema, value_key},
};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Materializes `rows` for a prepared `query`.
pub(crate) async fn populate(
    query: &Query,
    connection: &Connection,
    rows: Vec<Value>,
) -> Result<Vec<Model>, Error> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let schema = require_schema(query)?;
    let strict = connection.config().strict_attributes;

    let mut models = rows
        .into_iter()
        .map(|row| Model::from_row(schema, row, strict))
        .collect::<Result<Vec<_>, _>>()?;

    if !query.join.is_empty() && query.index_by.is_none() {
        models = deduplicate(schema, models)?;
    }
    if !query.with.is_empty() {
        load_with(schema, &query.with, &mut models, connection).await?;
    }
    Ok(models)
}

pub(crate) fn require_schema(query: &Query) -> Result<&'static Schema, Error> {
    query.schema.ok_or_else(|| {
        Error::Config(format!(
            "query on `{}` has no record schema",
            query.resource().unwrap_or_default()
        ))
    })
}

/// Drops models whose primary key was already seen, keeping first-seen
/// order. Stops de-duplicating at the first model without a complete key.
pub(crate) fn deduplicate(schema: &'static Schema, models: Vec<Model>) -> Result<Vec<Model>, Error> {
    if schema.primary_key.is_empty() {
        return Err(Error::MissingPrimaryKey(schema.type_name.to_string()));
    }

    let mut seen = HashSet::new();
    let mut distinct = Vec::with_capacity(models.len());
    let mut models = models.into_iter();
    while let Some(model) = models.next() {
        let Some(key) = model.primary_key() else {
            debug!(model = schema.type_name, "Primary key missing from result, keeping remaining rows");
            distinct.push(model);
            distinct.extend(models);
            break;
        };
        let key = key.into_iter().map(value_key).collect::<Vec<_>>().join("\u{1f}");
        if seen.insert(key) {
            distinct.push(model);
        }
    }
    Ok(distinct)
}

/// Groups dotted relation names by their first segment:
/// `["author", "author.profile", "tags"]` becomes
/// `[("author", ["profile"]), ("tags", [])]`.
fn group_relations(with: &[String]) -> Vec<(String, Vec<String>)> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for name in with {
        let (head, nested) = match name.split_once('.') {
            Some((head, nested)) => (head, Some(nested)),
            None => (name.as_str(), None),
        };
        let position = match groups.iter().position(|(existing, _)| existing == head) {
            Some(position) => position,
            None => {
                groups.push((head.to_string(), Vec::new()));
                groups.len() - 1
            }
        };
        if let Some(nested) = nested {
            groups[position].1.push(nested.to_string());
        }
    }
    groups
}

/// Attaches the `with` relations to `models`. Relations the server already
/// expanded inline are not fetched again, but their own nested relations
/// are loaded onto the inline records.
///
/// Boxed with a named `Send` type since `Query::all` leads back here.
fn load_with<'a>(
    schema: &'static Schema,
    with: &'a [String],
    models: &'a mut [Model],
    connection: &'a Connection,
) -> BoxFuture<'a, Result<(), Error>> {
    Box::pin(async move {
        for (name, nested) in group_relations(with) {
            let relation = schema.relation(&name)?;
            let (inline, pending): (Vec<usize>, Vec<usize>) =
                (0..models.len()).partition(|&i| models[i].is_related_populated(relation.name));

            if !inline.is_empty() && !nested.is_empty() {
                load_nested_inline(relation, &nested, &inline, models, connection).await?;
            }
            if pending.is_empty() {
                debug!(model = schema.type_name, relation = relation.name, "Relation already expanded inline");
                continue;
            }

            let related = match link_condition(relation, pending.iter().map(|&i| &models[i])) {
                Some(condition) => {
                    Query::for_schema(relation.target())
                        .filter(condition)
                        .with(nested)
                        .all(connection)
                        .await?
                        .into_models()
                }
                None => Vec::new(),
            };

            for i in pending {
                let mut matching = related
                    .iter()
                    .filter(|candidate| is_linked(relation, &models[i], candidate))
                    .cloned();
                let value = if relation.multiple {
                    Related::Many(matching.collect())
                } else {
                    match matching.next() {
                        Some(first) => Related::One(Box::new(first)),
                        None => Related::Nothing,
                    }
                };
                models[i].populate_related(relation.name, value)?;
            }
        }
        Ok(())
    })
}

/// Loads `nested` onto the records already attached through `relation` on
/// the models at `positions`, then puts them back in the same shape.
async fn load_nested_inline(
    relation: &'static Relation,
    nested: &[String],
    positions: &[usize],
    models: &mut [Model],
    connection: &Connection,
) -> Result<(), Error> {
    // (position, was a list, number of records taken)
    let mut shapes = Vec::with_capacity(positions.len());
    let mut gathered = Vec::new();
    for &i in positions {
        match models[i].take_related(relation.name) {
            Some(Related::One(model)) => {
                shapes.push((i, false, 1));
                gathered.push(*model);
            }
            Some(Related::Many(many)) => {
                shapes.push((i, true, many.len()));
                gathered.extend(many);
            }
            Some(Related::Nothing) | None => shapes.push((i, false, 0)),
        }
    }

    load_with(relation.target(), nested, &mut gathered, connection).await?;

    let mut gathered = gathered.into_iter();
    for (i, multiple, count) in shapes {
        let value = match (multiple, count) {
            (true, _) => Related::Many(gathered.by_ref().take(count).collect()),
            (false, 0) => Related::Nothing,
            (false, _) => match gathered.next() {
                Some(model) => Related::One(Box::new(model)),
                None => Related::Nothing,
            },
        };
        models[i].populate_related(relation.name, value)?;
    }
    Ok(())
}

/// Filter selecting every target record linked to one of `models`. `None`
/// when no model carries a usable link value.
fn link_condition<'m>(
    relation: &Relation,
    models: impl Iterator<Item = &'m Model>,
) -> Option<Condition> {
    if let [(target_field, local_field)] = relation.link {
        let mut values: Vec<Value> = Vec::new();
        for model in models {
            if let Some(value) = model.attributes().get(*local_field).filter(|v| !v.is_null()) {
                if !values.contains(value) {
                    values.push(value.clone());
                }
            }
        }
        return (!values.is_empty()).then(|| Condition::in_list(*target_field, values));
    }

    let operands: Vec<Condition> = models
        .filter_map(|model| {
            relation
                .link
                .iter()
                .map(|(target_field, local_field)| {
                    model
                        .attributes()
                        .get(*local_field)
                        .filter(|v| !v.is_null())
                        .map(|value| (target_field.to_string(), value.clone()))
                })
                .collect::<Option<Vec<_>>>()
                .map(Condition::Hash)
        })
        .collect();
    (!operands.is_empty()).then(|| Condition::or(operands))
}

fn is_linked(relation: &Relation, model: &Model, candidate: &Model) -> bool {
    !relation.link.is_empty()
        && relation.link.iter().all(|(target_field, local_field)| {
            match (
                candidate.attributes().get(*target_field),
                model.attributes().get(*local_field),
            ) {
                (Some(target), Some(local)) if !local.is_null() => value_key(target) == value_key(local),
                _ => false,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    static ITEM: Schema = Schema::new("Item", &["id", "name"]);
    static LINE: Schema = Schema::new("Line", &["order_id", "position", "sku"])
        .with_primary_key(&["order_id", "position"]);
    static KEYLESS: Schema = Schema::new("Keyless", &["name"]).with_primary_key(&[]);

    fn models(schema: &'static Schema, rows: Vec<Value>) -> Vec<Model> {
        rows.into_iter()
            .map(|row| Model::from_row(schema, row, false).unwrap())
            .collect()
    }

    fn ids(models: &[Model]) -> Vec<Value> {
        models.iter().map(|m| m.attributes()["id"].clone()).collect()
    }

    #[test]
    fn test_deduplicate_keeps_first_seen_order() {
        let rows = vec![
            json!({"id": 1, "name": "first"}),
            json!({"id": 1, "name": "again"}),
            json!({"id": 2, "name": "second"}),
        ];
        let distinct = deduplicate(&ITEM, models(&ITEM, rows)).unwrap();
        assert_eq!(ids(&distinct), vec![json!(1), json!(2)]);
        assert_eq!(distinct[0].attributes()["name"], json!("first"));
    }

    #[test]
    fn test_deduplicate_stops_at_missing_key() {
        let rows = vec![
            json!({"id": 1}),
            json!({"name": "no key"}),
            json!({"id": 1}),
        ];
        let distinct = deduplicate(&ITEM, models(&ITEM, rows)).unwrap();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn test_deduplicate_composite_key() {
        let rows = vec![
            json!({"order_id": 1, "position": 1, "sku": "a"}),
            json!({"order_id": 1, "position": 2, "sku": "b"}),
            json!({"order_id": 1, "position": 1, "sku": "a"}),
        ];
        let distinct = deduplicate(&LINE, models(&LINE, rows)).unwrap();
        assert_eq!(distinct.len(), 2);
    }

    #[test]
    fn test_deduplicate_requires_primary_key() {
        let err = deduplicate(&KEYLESS, models(&KEYLESS, vec![json!({"name": "x"})])).unwrap_err();
        assert!(matches!(err, Error::MissingPrimaryKey(ref name) if name == "Keyless"));
    }

    #[test]
    fn test_group_relations() {
        let with = vec![
            "author".to_string(),
            "author.profile".to_string(),
            "tags".to_string(),
        ];
        assert_eq!(
            group_relations(&with),
            vec![
                ("author".to_string(), vec!["profile".to_string()]),
                ("tags".to_string(), vec![]),
            ]
        );
    }
}
