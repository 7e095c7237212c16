use serde_json::{Map, Value};

use super::Model;
use crate::{
    connection::{Command, Connection},
    error::Error,
    query::{Action, Params, Query},
};

impl Model {
    fn command<'c>(&self, connection: &'c Connection, action: Action) -> Result<Command<'c>, Error> {
        let query = Query::for_schema(self.schema()).action(action);
        connection.create_command(&query, &Params::new())
    }

    /// POSTs the set attributes and merges the server's answer back.
    pub async fn insert(&mut self, connection: &Connection) -> Result<(), Error> {
        let values: Map<String, Value> = self.dirty_attributes().into_iter().collect();
        let response = self
            .command(connection, Action::Insert)?
            .insert(Value::Object(values))
            .await?;
        self.absorb(&response.body);
        self.mark_clean();
        Ok(())
    }

    /// PUTs changed attributes to the record's URL. Returns `false` without
    /// a request when nothing changed.
    pub async fn update(&mut self, connection: &Connection) -> Result<bool, Error> {
        let values: Map<String, Value> = self.dirty_attributes().into_iter().collect();
        if values.is_empty() {
            return Ok(false);
        }
        let id = self.persisted_key()?;
        self.command(connection, Action::Update)?
            .update(Some(&id), Value::Object(values))
            .await?;
        self.mark_clean();
        Ok(true)
    }

    pub async fn delete(&mut self, connection: &Connection) -> Result<(), Error> {
        let id = self.persisted_key()?;
        self.command(connection, Action::Delete)?
            .delete(Some(&id))
            .await?;
        self.forget_persisted();
        Ok(())
    }

    fn persisted_key(&self) -> Result<String, Error> {
        self.primary_key_segment()
            .ok_or_else(|| Error::MissingPrimaryKey(self.type_name().to_string()))
    }

    /// Query for the records `relation` links to this model.
    pub fn related_query(&self, relation: &str) -> Result<Query, Error> {
        let relation = self.schema().relation(relation)?;
        let mut query = Query::for_schema(relation.target());
        for (target_field, local_field) in relation.link {
            let value = self.attributes().get(*local_field).cloned().unwrap_or(Value::Null);
            query = query.where_eq(*target_field, value);
        }
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryTransport;
    use crate::config::ConnectionConfig;
    use crate::record::{Relation, Schema};
    use serde_json::json;

    static NOTE: Schema = Schema::new("Note", &["id", "body", "owner_id"])
        .with_relations(&[Relation::has_one("owner", note, &[("id", "owner_id")])]);

    fn note() -> &'static Schema {
        &NOTE
    }

    fn setup() -> (MemoryTransport, Connection) {
        let transport = MemoryTransport::new();
        transport.serve("notes", vec![json!({"id": 1, "body": "first"})]);
        let conn = Connection::new(ConnectionConfig::new("https://api.example.com"), transport.clone())
            .unwrap();
        (transport, conn)
    }

    #[tokio::test]
    async fn test_insert_update_delete() {
        let (transport, conn) = setup();

        let mut model = Model::new(&NOTE);
        model.set("body", "second").unwrap();
        assert!(model.is_new_record());
        model.insert(&conn).await.unwrap();
        assert!(!model.is_new_record());
        assert_eq!(model.get("id").unwrap(), Some(&json!(2)));

        assert!(!model.update(&conn).await.unwrap());
        model.set("body", "edited").unwrap();
        assert!(model.update(&conn).await.unwrap());
        assert_eq!(transport.rows("notes")[1]["body"], json!("edited"));
        let put = transport.requests().pop().unwrap();
        assert_eq!(put.path, "notes/2");
        assert_eq!(put.body, Some(json!({"body": "edited"})));

        model.delete(&conn).await.unwrap();
        assert!(model.is_new_record());
        assert_eq!(transport.rows("notes").len(), 1);
    }

    #[tokio::test]
    async fn test_delete_without_key_fails() {
        let (_, conn) = setup();
        let mut model = Model::new(&NOTE);
        assert!(matches!(
            model.delete(&conn).await,
            Err(Error::MissingPrimaryKey(_))
        ));
    }

    #[test]
    fn test_related_query_filters_by_link() {
        let model = Model::from_row(&NOTE, json!({"id": 3, "owner_id": 9}), false).unwrap();
        let query = model.related_query("owner").unwrap();
        assert_eq!(
            query.condition(),
            Some(&crate::query::Condition::eq("id", 9))
        );
    }
}
