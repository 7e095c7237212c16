pub mod builder;
pub mod condition;
mod execute;
mod relation;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

pub use builder::{QueryParams, RequestBuilder, RequestDescriptor};
pub use condition::{ComparisonOp, Condition, Connective, Params};

use crate::record::{Model, Schema};

/// What a request does on the remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Get,
    View,
    Count,
    Exists,
    Insert,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Get => "get",
            Action::View => "view",
            Action::Count => "count",
            Action::Exists => "exists",
            Action::Insert => "insert",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Keys rows of a result either by one of their attributes or by a function.
#[derive(Clone)]
pub enum IndexBy {
    Field(String),
    Function(Arc<dyn Fn(&Model) -> String + Send + Sync>),
}

impl IndexBy {
    pub fn function(f: impl Fn(&Model) -> String + Send + Sync + 'static) -> Self {
        IndexBy::Function(Arc::new(f))
    }

    /// Key of `model`. A missing attribute keys as the empty string.
    pub fn key(&self, model: &Model) -> String {
        match self {
            IndexBy::Field(field) => model
                .attributes()
                .get(field)
                .map(crate::record::value_key)
                .unwrap_or_default(),
            IndexBy::Function(f) => f(model),
        }
    }
}

impl fmt::Debug for IndexBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexBy::Field(field) => f.debug_tuple("Field").field(field).finish(),
            IndexBy::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Relations the server is asked to expand inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinDirective {
    pub join_type: String,
    pub targets: Vec<String>,
}

impl JoinDirective {
    pub fn new<S: Into<String>>(
        join_type: impl Into<String>,
        targets: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            join_type: join_type.into(),
            targets: targets.into_iter().map(Into::into).collect(),
        }
    }

    /// Expand names: only the first whitespace-separated token of each target.
    pub fn expand_names(&self) -> impl Iterator<Item = &str> {
        self.targets
            .iter()
            .filter_map(|target| target.split_whitespace().next())
    }
}

pub type RelationCallback = Arc<dyn Fn(Query) -> Query + Send + Sync>;

#[derive(Clone)]
pub(crate) struct PendingJoin {
    pub relations: Vec<(String, Option<RelationCallback>)>,
    pub join_type: String,
}

impl fmt::Debug for PendingJoin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.relations.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("PendingJoin")
            .field("relations", &names)
            .field("join_type", &self.join_type)
            .finish()
    }
}

/// Declarative description of a read against a REST resource.
///
/// Builder methods consume and return the query, so a query reads as one
/// chain:
///
/// ```rust,ignore
/// let query = Order::find()
///     .filter(Condition::eq("status", "open"))
///     .join_with(["customer", "items"])
///     .order_by("created_at", SortDirection::Desc)
///     .limit(120);
/// let orders = query.all(&connection).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub(crate) schema: Option<&'static Schema>,
    pub(crate) select: Vec<String>,
    pub(crate) condition: Option<Condition>,
    pub(crate) join: Vec<JoinDirective>,
    pub(crate) pending_joins: Vec<PendingJoin>,
    pub(crate) with: Vec<String>,
    pub(crate) order_by: Vec<(String, SortDirection)>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) per_page: Option<u64>,
    pub(crate) from: Option<String>,
    pub(crate) action: Option<Action>,
    pub(crate) index_by: Option<IndexBy>,
    pub(crate) params: Params,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_schema(schema: &'static Schema) -> Self {
        Self {
            schema: Some(schema),
            ..Default::default()
        }
    }

    pub fn schema(&self) -> Option<&'static Schema> {
        self.schema
    }

    /// Resource path, falling back to the schema's when `from` was never set.
    pub fn resource(&self) -> Option<String> {
        match (&self.from, self.schema) {
            (Some(from), _) => Some(from.clone()),
            (None, Some(schema)) => Some(schema.resource_path()),
            (None, None) => None,
        }
    }

    pub fn from(mut self, resource: impl Into<String>) -> Self {
        self.from = Some(resource.into());
        self
    }

    pub fn select<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.select = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn add_select<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        for field in fields {
            let field = field.into();
            if !self.select.contains(&field) {
                self.select.push(field);
            }
        }
        self
    }

    /// Replaces the filter.
    pub fn filter(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn and_filter(self, condition: Condition) -> Self {
        self.combine(Connective::And, condition)
    }

    pub fn or_filter(self, condition: Condition) -> Self {
        self.combine(Connective::Or, condition)
    }

    fn combine(self, connective: Connective, condition: Condition) -> Self {
        let mut consumed_self = self;
        consumed_self.condition = Some(match consumed_self.condition.take() {
            None => condition,
            Some(Condition::Conjunction {
                connective: existing,
                mut operands,
            }) if existing == connective => {
                operands.push(condition);
                Condition::Conjunction {
                    connective,
                    operands,
                }
            }
            Some(current) => Condition::Conjunction {
                connective,
                operands: vec![current, condition],
            },
        });
        consumed_self
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and_filter(Condition::eq(field, value))
    }

    pub fn where_ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and_filter(Condition::compare(ComparisonOp::Neq, field, value))
    }

    pub fn where_gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and_filter(Condition::compare(ComparisonOp::Gt, field, value))
    }

    pub fn where_gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and_filter(Condition::compare(ComparisonOp::Gte, field, value))
    }

    pub fn where_lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and_filter(Condition::compare(ComparisonOp::Lt, field, value))
    }

    pub fn where_lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and_filter(Condition::compare(ComparisonOp::Lte, field, value))
    }

    pub fn where_in<V: Into<Value>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.and_filter(Condition::in_list(field, values))
    }

    pub fn where_like(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and_filter(Condition::like(field, value))
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        let field = field.into();
        self.order_by.retain(|(existing, _)| *existing != field);
        self.order_by.push((field, direction));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Page size requested from the server, independent of `limit`.
    pub fn per_page(mut self, per_page: u64) -> Self {
        self.per_page = Some(per_page);
        self
    }

    pub fn index_by(mut self, index_by: IndexBy) -> Self {
        self.index_by = Some(index_by);
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    /// Sets the action unless one is already set.
    pub fn add_action(mut self, action: Action) -> Self {
        self.action.get_or_insert(action);
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params.extend(params);
        self
    }

    /// Appends an explicit expand directive.
    pub fn join<S: Into<String>>(
        mut self,
        join_type: impl Into<String>,
        targets: impl IntoIterator<Item = S>,
    ) -> Self {
        self.join.push(JoinDirective::new(join_type, targets));
        self
    }

    /// Queues relations to be expanded inline. Names may be dotted
    /// (`author.profile`) to reach nested relations. Resolution is deferred
    /// to [`Query::prepare`].
    pub fn join_with<S: Into<String>>(self, relations: impl IntoIterator<Item = S>) -> Self {
        let mut consumed_self = self;
        consumed_self.pending_joins.push(PendingJoin {
            relations: relations.into_iter().map(|name| (name.into(), None)).collect(),
            join_type: "LEFT JOIN".to_string(),
        });
        consumed_self
    }

    /// Queues one relation whose query is customized by `callback` before
    /// its own nested joins are resolved.
    pub fn join_with_callback(
        self,
        relation: impl Into<String>,
        callback: impl Fn(Query) -> Query + Send + Sync + 'static,
    ) -> Self {
        let mut consumed_self = self;
        consumed_self.pending_joins.push(PendingJoin {
            relations: vec![(relation.into(), Some(Arc::new(callback) as RelationCallback))],
            join_type: "LEFT JOIN".to_string(),
        });
        consumed_self
    }

    /// Relations loaded after the primary rows, with one extra query each
    /// unless the server already expanded them.
    pub fn with<S: Into<String>>(mut self, relations: impl IntoIterator<Item = S>) -> Self {
        for relation in relations {
            let relation = relation.into();
            if !self.with.contains(&relation) {
                self.with.push(relation);
            }
        }
        self
    }

    pub fn joins(&self) -> &[JoinDirective] {
        &self.join
    }

    pub fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_add_action_never_overwrites() {
        let query = Query::new().add_action(Action::View).add_action(Action::Get);
        assert_eq!(query.action, Some(Action::View));
        let query = query.action(Action::Count);
        assert_eq!(query.action, Some(Action::Count));
    }

    #[test]
    fn test_filters_accumulate() {
        let query = Query::new()
            .where_eq("status", "open")
            .where_gt("total", 10)
            .or_filter(Condition::eq("vip", true));
        assert_eq!(
            query.condition,
            Some(Condition::or([
                Condition::and([
                    Condition::eq("status", "open"),
                    Condition::compare(ComparisonOp::Gt, "total", 10),
                ]),
                Condition::eq("vip", json!(true)),
            ]))
        );
    }

    #[test]
    fn test_order_by_replaces_same_field() {
        let query = Query::new()
            .order_by("name", SortDirection::Asc)
            .order_by("id", SortDirection::Desc)
            .order_by("name", SortDirection::Desc);
        assert_eq!(
            query.order_by,
            vec![
                ("id".to_string(), SortDirection::Desc),
                ("name".to_string(), SortDirection::Desc)
            ]
        );
    }

    #[test]
    fn test_expand_names_use_first_token() {
        let join = JoinDirective::new("LEFT JOIN", ["author a", "comments"]);
        assert_eq!(join.expand_names().collect::<Vec<_>>(), vec!["author", "comments"]);
    }
}
