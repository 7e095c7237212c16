use crate::error::Error;

use super::{JoinDirective, Query, RelationCallback};

impl Query {
    /// Resolves queued [`Query::join_with`] entries into expand directives.
    ///
    /// Resolved relation joins come first, followed by any explicit joins.
    /// Pending entries are drained, so preparing twice is a no-op.
    pub fn prepare(&mut self) -> Result<(), Error> {
        if self.pending_joins.is_empty() {
            return Ok(());
        }
        self.join = self.merged_joins()?;
        self.pending_joins.clear();
        Ok(())
    }

    /// Join list this query would have after [`Query::prepare`], computed
    /// without touching `self`.
    pub(crate) fn merged_joins(&self) -> Result<Vec<JoinDirective>, Error> {
        let mut seen: Vec<String> = Vec::new();
        let mut merged = Vec::new();

        for pending in &self.pending_joins {
            let mut targets = Vec::new();
            for (name, callback) in &pending.relations {
                for target in self.resolve_relation(name, callback.as_ref())? {
                    if !seen.contains(&target) {
                        seen.push(target.clone());
                        targets.push(target);
                    }
                }
            }
            if !targets.is_empty() {
                merged.push(JoinDirective {
                    join_type: pending.join_type.clone(),
                    targets,
                });
            }
        }

        for explicit in &self.join {
            let targets: Vec<String> = explicit
                .targets
                .iter()
                .filter(|target| !seen.contains(target))
                .cloned()
                .collect();
            seen.extend(targets.iter().cloned());
            if !targets.is_empty() {
                merged.push(JoinDirective {
                    join_type: explicit.join_type.clone(),
                    targets,
                });
            }
        }

        Ok(merged)
    }

    /// Expand targets contributed by one `join_with` entry: the relation
    /// itself, then whatever its own query joins, prefixed with its name.
    fn resolve_relation(
        &self,
        name: &str,
        callback: Option<&RelationCallback>,
    ) -> Result<Vec<String>, Error> {
        let (head, nested) = match name.split_once('.') {
            Some((head, nested)) => (head, Some(nested)),
            None => (name, None),
        };
        let relation_name = head.split_whitespace().next().unwrap_or(head);

        let schema = self.schema.ok_or_else(|| Error::UnknownRelation {
            type_name: self.resource().unwrap_or_default(),
            relation: relation_name.to_string(),
        })?;
        let relation = schema.relation(relation_name)?;

        let mut relation_query = Query::for_schema(relation.target());
        match (nested, callback) {
            (Some(nested), Some(callback)) => {
                let callback = callback.clone();
                relation_query = relation_query
                    .join_with_callback(nested, move |query| callback(query));
            }
            (Some(nested), None) => relation_query = relation_query.join_with([nested]),
            (None, Some(callback)) => relation_query = callback(relation_query),
            (None, None) => {}
        }

        let mut targets = vec![head.to_string()];
        for join in relation_query.merged_joins()? {
            for nested_name in join.expand_names() {
                targets.push(format!("{}.{}", relation_name, nested_name));
            }
        }
        Ok(targets)
    }
}
