//! Records - hydrated rows of a model
//!
//! A [`Record`] carries its attributes, the attributes as last loaded or saved
//! (for dirty tracking), a cache of loaded relations and the connection it was
//! read from.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use tracing::debug;

use super::core_trait::{fresh_timestamp, Model, ModelRef};
use crate::backends::ConnectionRef;
use crate::builder::{Builder, EagerLoad};
use crate::collection::Collection;
use crate::error::{ModelError, OrmResult};
use crate::query::{QueryBuilder, Row};
use crate::relationships::{BelongsTo, BelongsToMany, HasManyThrough, HasOneOrMany, Pivot, Relation};

/// A loaded relation value
#[derive(Debug, Clone)]
pub enum Related {
    /// `HasOne`, `BelongsTo` and `HasOneThrough`
    One(Option<Box<Record>>),
    /// `HasMany`, `BelongsToMany` and `HasManyThrough`
    Many(Collection<Record>),
    /// The junction row attached to a `BelongsToMany` result
    Pivot(Pivot),
}

impl Related {
    pub fn one(&self) -> Option<&Record> {
        match self {
            Related::One(record) => record.as_deref(),
            _ => None,
        }
    }

    pub fn many(&self) -> Option<&Collection<Record>> {
        match self {
            Related::Many(records) => Some(records),
            _ => None,
        }
    }

    pub fn pivot(&self) -> Option<&Pivot> {
        match self {
            Related::Pivot(pivot) => Some(pivot),
            _ => None,
        }
    }

    /// Mutable access to every record held by this value
    pub(crate) fn records_mut(&mut self) -> Vec<&mut Record> {
        match self {
            Related::One(Some(record)) => vec![&mut **record],
            Related::Many(records) => records.iter_mut().collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn records(&self) -> Vec<&Record> {
        match self {
            Related::One(Some(record)) => vec![&**record],
            Related::Many(records) => records.iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Related::One(None) => Value::Null,
            Related::One(Some(record)) => record.to_array(),
            Related::Many(records) => records.to_array(),
            Related::Pivot(pivot) => Value::Object(pivot.attributes().clone()),
        }
    }
}

/// One row of a model's table
#[derive(Clone)]
pub struct Record {
    model: ModelRef,
    attributes: Row,
    original: Row,
    relations: BTreeMap<String, Related>,
    exists: bool,
    connection: Option<ConnectionRef>,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("model", &self.model.model_name())
            .field("attributes", &self.attributes)
            .field("relations", &self.relations)
            .field("exists", &self.exists)
            .finish()
    }
}

impl Record {
    /// A new record that does not exist in the database yet
    pub fn new(model: ModelRef) -> Self {
        Self {
            model,
            attributes: Row::new(),
            original: Row::new(),
            relations: BTreeMap::new(),
            exists: false,
            connection: None,
        }
    }

    /// Build a record from a database row
    pub fn hydrate(model: ModelRef, row: Row, connection: Option<ConnectionRef>) -> Self {
        Self {
            model,
            original: row.clone(),
            attributes: row,
            relations: BTreeMap::new(),
            exists: true,
            connection,
        }
    }

    pub fn with_connection(mut self, connection: Option<ConnectionRef>) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_attributes(mut self, attributes: Row) -> Self {
        self.fill(attributes);
        self
    }

    pub fn model(&self) -> &ModelRef {
        &self.model
    }

    pub fn connection(&self) -> Option<&ConnectionRef> {
        self.connection.as_ref()
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    /// A copy of this record without its relation cache
    pub(crate) fn shallow_clone(&self) -> Record {
        Record {
            model: self.model.clone(),
            attributes: self.attributes.clone(),
            original: self.original.clone(),
            relations: BTreeMap::new(),
            exists: self.exists,
            connection: self.connection.clone(),
        }
    }

    // --- attributes -------------------------------------------------------

    pub fn attributes(&self) -> &Row {
        &self.attributes
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Attribute value, `Null` when unset
    pub fn get_value(&self, key: &str) -> Value {
        self.attributes.get(key).cloned().unwrap_or(Value::Null)
    }

    /// Deserialize one attribute
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> OrmResult<T> {
        Ok(serde_json::from_value(self.get_value(key))?)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.attributes.insert(key.to_string(), value.into());
    }

    pub fn fill(&mut self, attributes: Row) {
        for (key, value) in attributes {
            self.attributes.insert(key, value);
        }
    }

    /// Remove an attribute without marking the record dirty
    pub(crate) fn forget_attribute(&mut self, key: &str) -> Option<Value> {
        self.original.remove(key);
        self.attributes.remove(key)
    }

    /// Primary key value, `Null` when unset
    pub fn key(&self) -> Value {
        self.get_value(self.model.primary_key_name())
    }

    pub fn key_name(&self) -> &str {
        self.model.primary_key_name()
    }

    pub fn qualified_key_name(&self) -> String {
        self.model.qualify_column(self.model.primary_key_name())
    }

    pub fn is_dirty(&self) -> bool {
        !self.get_dirty().is_empty()
    }

    /// Attributes changed since the record was loaded or last saved
    pub fn get_dirty(&self) -> Row {
        self.attributes
            .iter()
            .filter(|(key, value)| self.original.get(key.as_str()) != Some(value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn sync_original(&mut self) {
        self.original = self.attributes.clone();
    }

    /// Deserialize the attributes into a typed struct
    pub fn into_typed<T: DeserializeOwned>(self) -> OrmResult<T> {
        Ok(serde_json::from_value(Value::Object(self.attributes))?)
    }

    // --- relation cache ---------------------------------------------------

    pub fn set_relation(&mut self, name: &str, value: Related) {
        self.relations.insert(name.to_string(), value);
    }

    pub fn get_relation(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    pub(crate) fn get_relation_mut(&mut self, name: &str) -> Option<&mut Related> {
        self.relations.get_mut(name)
    }

    pub fn relation_loaded(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    pub fn unset_relation(&mut self, name: &str) -> Option<Related> {
        self.relations.remove(name)
    }

    pub fn relations(&self) -> &BTreeMap<String, Related> {
        &self.relations
    }

    /// The junction row attached by a `BelongsToMany` query
    pub fn pivot(&self) -> Option<&Pivot> {
        self.get_relation("pivot").and_then(Related::pivot)
    }

    /// Whether `path` (possibly nested, `posts.comments`) is loaded all the way down
    pub fn relation_path_loaded(&self, path: &str) -> bool {
        match path.split_once('.') {
            None => self.relation_loaded(path),
            Some((first, rest)) => match self.get_relation(first) {
                None => false,
                Some(related) => related.records().iter().all(|r| r.relation_path_loaded(rest)),
            },
        }
    }

    /// The relation called `name`, constrained to this record
    pub fn relation(&self, name: &str) -> OrmResult<Relation> {
        let relation = self.model.relation(self, name).ok_or_else(|| ModelError::RelationNotFound {
            model: self.model.model_name().to_string(),
            relation: name.to_string(),
        })?;
        Ok(relation.add_constraints())
    }

    /// Cached relation value, loading it on first access
    pub async fn get_relation_value(&mut self, name: &str) -> OrmResult<&Related> {
        if !self.relation_loaded(name) {
            debug!(model = self.model.model_name(), relation = name, "lazy loading relation");
            let value = self.relation(name)?.get_results().await?;
            self.set_relation(name, value);
        }
        self.relations.get(name).ok_or_else(|| ModelError::RelationNotFound {
            model: self.model.model_name().to_string(),
            relation: name.to_string(),
        })
    }

    /// Eager load relations onto this record
    pub async fn load<I, E>(&mut self, relations: I) -> OrmResult<()>
    where
        I: IntoIterator<Item = E>,
        E: Into<EagerLoad>,
    {
        let builder = Builder::new(self.model.clone(), self.connection.clone()).with(relations);
        let mut targets = [&mut *self];
        builder.load_relations(&mut targets).await
    }

    /// Eager load only the relation paths not already loaded
    pub async fn load_missing(&mut self, relations: &[&str]) -> OrmResult<()> {
        let missing: Vec<&str> = relations
            .iter()
            .copied()
            .filter(|path| !self.relation_path_loaded(path))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        self.load(missing).await
    }

    /// Point the `BelongsTo` relation `name` at `related`
    pub fn associate(&mut self, name: &str, related: &Record) -> OrmResult<()> {
        let relation = self.belongs_to_relation(name)?;
        relation.associate(self, related, name);
        Ok(())
    }

    /// Clear the `BelongsTo` relation `name`
    pub fn dissociate(&mut self, name: &str) -> OrmResult<()> {
        let relation = self.belongs_to_relation(name)?;
        relation.dissociate(self, name);
        Ok(())
    }

    fn belongs_to_relation(&self, name: &str) -> OrmResult<BelongsTo> {
        match self.relation(name)? {
            Relation::BelongsTo(relation) => Ok(relation),
            _ => Err(ModelError::InvalidArgument(format!(
                "Relation [{}] on model [{}] is not a belongs-to relation",
                name,
                self.model.model_name()
            ))),
        }
    }

    // --- relation declarations --------------------------------------------

    /// `related.foreign_key = self.local_key`, at most one row
    pub fn has_one<M: Model>(
        &self,
        related: M,
        foreign_key: &str,
        local_key: &str,
    ) -> HasOneOrMany {
        HasOneOrMany::new(std::sync::Arc::new(related), self, foreign_key, local_key, false)
    }

    /// `related.foreign_key = self.local_key`
    pub fn has_many<M: Model>(
        &self,
        related: M,
        foreign_key: &str,
        local_key: &str,
    ) -> HasOneOrMany {
        HasOneOrMany::new(std::sync::Arc::new(related), self, foreign_key, local_key, true)
    }

    /// `related.owner_key = self.foreign_key`
    pub fn belongs_to<M: Model>(
        &self,
        related: M,
        foreign_key: &str,
        owner_key: &str,
    ) -> BelongsTo {
        BelongsTo::new(std::sync::Arc::new(related), self, foreign_key, owner_key)
    }

    /// Many-to-many through the junction `table`
    pub fn belongs_to_many<M: Model>(
        &self,
        related: M,
        table: &str,
        foreign_pivot_key: &str,
        related_pivot_key: &str,
    ) -> BelongsToMany {
        BelongsToMany::new(
            std::sync::Arc::new(related),
            self,
            table,
            foreign_pivot_key,
            related_pivot_key,
        )
    }

    /// One far row reached through an intermediate model
    pub fn has_one_through<R: Model, T: Model>(
        &self,
        related: R,
        through: T,
        first_key: &str,
        second_key: &str,
        local_key: &str,
        second_local_key: &str,
    ) -> HasManyThrough {
        HasManyThrough::new(
            std::sync::Arc::new(related),
            std::sync::Arc::new(through),
            self,
            [first_key, second_key, local_key, second_local_key],
            false,
        )
    }

    /// Many far rows reached through an intermediate model
    pub fn has_many_through<R: Model, T: Model>(
        &self,
        related: R,
        through: T,
        first_key: &str,
        second_key: &str,
        local_key: &str,
        second_local_key: &str,
    ) -> HasManyThrough {
        HasManyThrough::new(
            std::sync::Arc::new(related),
            std::sync::Arc::new(through),
            self,
            [first_key, second_key, local_key, second_local_key],
            true,
        )
    }

    // --- persistence -------------------------------------------------------

    fn require_connection(&self) -> OrmResult<ConnectionRef> {
        self.connection.clone().ok_or_else(|| {
            ModelError::Connection(format!(
                "No connection bound to record of model [{}]",
                self.model.model_name()
            ))
        })
    }

    /// Insert the record, or update its dirty attributes when it already exists
    pub async fn save(&mut self) -> OrmResult<()> {
        let connection = self.require_connection()?;
        let table = self.model.table_name().to_string();
        let key_name = self.model.primary_key_name().to_string();

        if self.exists {
            let mut dirty = self.get_dirty();
            if dirty.is_empty() {
                return Ok(());
            }
            if self.model.uses_timestamps() {
                let column = self.model.updated_at_column().to_string();
                let now = fresh_timestamp();
                self.set(&column, now.clone());
                dirty.insert(column, now);
            }
            let key = self.key();
            if key.is_null() {
                return Err(ModelError::MissingPrimaryKey);
            }
            QueryBuilder::table(&table)
                .where_eq(&key_name, key)
                .into_update()
                .set_values(dirty)
                .execute(connection.as_ref())
                .await?;
        } else {
            if self.model.uses_timestamps() {
                let now = fresh_timestamp();
                let columns = [
                    self.model.created_at_column().to_string(),
                    self.model.updated_at_column().to_string(),
                ];
                for column in columns {
                    if self.get(&column).map_or(true, Value::is_null) {
                        self.set(&column, now.clone());
                    }
                }
            }
            let query = QueryBuilder::new().insert_into(&table).values(self.attributes.clone());
            let id = query.insert_get_id(connection.as_ref(), &key_name).await?;
            if !id.is_null() {
                self.set(&key_name, id);
            }
            self.exists = true;
        }

        self.sync_original();
        Ok(())
    }

    /// Delete the record through its model's builder, so delete hooks apply
    pub async fn delete(&mut self) -> OrmResult<bool> {
        let key = self.key();
        if key.is_null() {
            return Err(ModelError::MissingPrimaryKey);
        }
        let affected = Builder::new(self.model.clone(), Some(self.require_connection()?))
            .where_key(key)
            .delete()
            .await?;
        self.exists = false;
        Ok(affected > 0)
    }

    /// Hard delete, bypassing delete hooks and global scopes
    pub async fn force_delete(&mut self) -> OrmResult<bool> {
        let key = self.key();
        if key.is_null() {
            return Err(ModelError::MissingPrimaryKey);
        }
        let affected = Builder::new(self.model.clone(), Some(self.require_connection()?))
            .without_global_scopes()
            .where_key(key)
            .force_delete()
            .await?;
        self.exists = false;
        Ok(affected > 0)
    }

    /// Attributes plus loaded relations, as JSON
    pub fn to_array(&self) -> Value {
        let mut map = self.attributes.clone();
        for (name, related) in &self.relations {
            map.insert(name.clone(), related.to_value());
        }
        Value::Object(map)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.attributes.len() + self.relations.len()))?;
        for (key, value) in &self.attributes {
            map.serialize_entry(key, value)?;
        }
        for (name, related) in &self.relations {
            map.serialize_entry(name, &related.to_value())?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Account;

    impl Model for Account {
        fn table_name(&self) -> &str {
            "accounts"
        }

        fn model_name(&self) -> &str {
            "Account"
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct AccountRow {
        id: i64,
        name: String,
    }

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => Row::new(),
        }
    }

    #[test]
    fn test_dirty_tracking() {
        let mut record =
            Record::hydrate(Arc::new(Account), row(json!({"id": 1, "name": "ops"})), None);
        assert!(!record.is_dirty());

        record.set("name", "infra");
        assert!(record.is_dirty());
        assert_eq!(record.get_dirty(), row(json!({"name": "infra"})));

        record.sync_original();
        assert!(!record.is_dirty());
    }

    #[test]
    fn test_typed_access() {
        let record = Record::hydrate(Arc::new(Account), row(json!({"id": 3, "name": "ops"})), None);
        assert_eq!(record.get_as::<i64>("id").unwrap(), 3);
        assert_eq!(record.key(), json!(3));
        assert_eq!(
            record.into_typed::<AccountRow>().unwrap(),
            AccountRow { id: 3, name: "ops".to_string() }
        );
    }

    #[test]
    fn test_unknown_relation_is_an_error() {
        let record = Record::new(Arc::new(Account));
        let err = record.relation("owner").unwrap_err();
        assert_eq!(
            err,
            ModelError::RelationNotFound {
                model: "Account".to_string(),
                relation: "owner".to_string()
            }
        );
    }

    #[test]
    fn test_to_array_includes_relations() {
        let mut record = Record::hydrate(Arc::new(Account), row(json!({"id": 1})), None);
        record.set_relation("owner", Related::One(None));
        assert_eq!(record.to_array(), json!({"id": 1, "owner": null}));
        assert_eq!(serde_json::to_value(&record).unwrap(), json!({"id": 1, "owner": null}));
    }

    #[tokio::test]
    async fn test_save_without_connection_fails() {
        let mut record = Record::new(Arc::new(Account));
        record.set("name", "ops");
        assert!(matches!(record.save().await, Err(ModelError::Connection(_))));
    }
}
