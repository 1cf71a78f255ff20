//! BelongsToMany Relationship - many-to-many through a junction table
//!
//! Related rows are read joined to the junction table. Junction columns come
//! back aliased as `pivot_<column>` and are moved into a [`Pivot`] cached on
//! each related record under the `pivot` relation. Attach, detach, sync and
//! toggle write to the junction table through the parent's connection.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::correlated_query;
use super::dictionary::{build_dictionary, key_string, unique_keys};
use super::pivot::Pivot;
use crate::backends::ConnectionRef;
use crate::builder::Builder;
use crate::collection::Collection;
use crate::error::{ModelError, OrmResult};
use crate::model::{fresh_timestamp, ModelRef, Record, Related};
use crate::query::{QueryBuilder, QueryOperator, Row};

const PIVOT_PREFIX: &str = "pivot_";

/// Relation name the junction row is cached under on each related record
pub const PIVOT_RELATION: &str = "pivot";

/// Ids to attach, detach, sync or toggle, each with its own extra pivot attributes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PivotIds(Vec<(Value, Row)>);

impl PivotIds {
    /// Ids paired with per-row pivot attributes
    pub fn with_attributes<I, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (V, Row)>,
        V: Into<Value>,
    {
        Self(entries.into_iter().map(|(id, row)| (id.into(), row)).collect())
    }

    fn from_values<I, V>(ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self(ids.into_iter().map(|id| (id.into(), Row::new())).collect())
    }

    pub fn ids(&self) -> Vec<Value> {
        self.0.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn entries(&self) -> &[(Value, Row)] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Drop null ids and repeated ids, keeping the first occurrence
    fn normalized(self) -> Self {
        let mut seen = HashSet::new();
        Self(
            self.0
                .into_iter()
                .filter(|(id, _)| key_string(id).map_or(false, |key| seen.insert(key)))
                .collect(),
        )
    }
}

impl From<Value> for PivotIds {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::default(),
            Value::Array(values) => Self::from_values(values),
            other => Self::from_values([other]),
        }
    }
}

impl From<i64> for PivotIds {
    fn from(id: i64) -> Self {
        Self::from_values([id])
    }
}

impl From<i32> for PivotIds {
    fn from(id: i32) -> Self {
        Self::from_values([id])
    }
}

impl From<u64> for PivotIds {
    fn from(id: u64) -> Self {
        Self::from_values([id])
    }
}

impl From<&str> for PivotIds {
    fn from(id: &str) -> Self {
        Self::from_values([id])
    }
}

impl From<String> for PivotIds {
    fn from(id: String) -> Self {
        Self::from_values([id])
    }
}

impl From<Vec<Value>> for PivotIds {
    fn from(ids: Vec<Value>) -> Self {
        Self::from_values(ids)
    }
}

impl From<Vec<i64>> for PivotIds {
    fn from(ids: Vec<i64>) -> Self {
        Self::from_values(ids)
    }
}

impl From<Vec<i32>> for PivotIds {
    fn from(ids: Vec<i32>) -> Self {
        Self::from_values(ids)
    }
}

impl From<Vec<&str>> for PivotIds {
    fn from(ids: Vec<&str>) -> Self {
        Self::from_values(ids)
    }
}

impl From<Vec<String>> for PivotIds {
    fn from(ids: Vec<String>) -> Self {
        Self::from_values(ids)
    }
}

impl<const N: usize> From<[i64; N]> for PivotIds {
    fn from(ids: [i64; N]) -> Self {
        Self::from_values(ids)
    }
}

impl From<&Record> for PivotIds {
    fn from(record: &Record) -> Self {
        Self::from_values([record.key()])
    }
}

impl From<&Collection<Record>> for PivotIds {
    fn from(records: &Collection<Record>) -> Self {
        Self::from_values(records.model_keys())
    }
}

/// Outcome of `sync` / `toggle`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncChanges {
    pub attached: Vec<Value>,
    pub detached: Vec<Value>,
    /// Never populated by `sync`; kept for callers that inspect all three lists
    pub updated: Vec<Value>,
}

impl SyncChanges {
    pub fn is_empty(&self) -> bool {
        self.attached.is_empty() && self.detached.is_empty() && self.updated.is_empty()
    }
}

/// `parent.parent_key = pivot.foreign_pivot_key`, `pivot.related_pivot_key = related.related_key`
#[derive(Debug, Clone)]
pub struct BelongsToMany {
    query: Builder,
    parent: Box<Record>,
    table: String,
    foreign_pivot_key: String,
    related_pivot_key: String,
    parent_key: String,
    related_key: String,
    pivot_columns: Vec<String>,
    pivot_wheres: Vec<(String, Value)>,
    pivot_values: Row,
    with_timestamps: bool,
}

impl BelongsToMany {
    pub(crate) fn new(
        related: ModelRef,
        parent: &Record,
        table: &str,
        foreign_pivot_key: &str,
        related_pivot_key: &str,
    ) -> Self {
        let related_key = related.primary_key_name().to_string();
        let join_left = related.qualify_column(&related_key);
        let join_right = format!("{}.{}", table, related_pivot_key);
        let query = Builder::new(related, parent.connection().cloned())
            .join(table, &join_left, &join_right);

        Self {
            query,
            parent: Box::new(parent.shallow_clone()),
            table: table.to_string(),
            foreign_pivot_key: foreign_pivot_key.to_string(),
            related_pivot_key: related_pivot_key.to_string(),
            parent_key: parent.model().primary_key_name().to_string(),
            related_key,
            pivot_columns: Vec::new(),
            pivot_wheres: Vec::new(),
            pivot_values: Row::new(),
            with_timestamps: false,
        }
    }

    /// Use non-primary keys on the parent and related side
    pub fn with_keys(mut self, parent_key: &str, related_key: &str) -> Self {
        let related = self.query.model().clone();
        self.parent_key = parent_key.to_string();
        self.related_key = related_key.to_string();
        let join_left = related.qualify_column(related_key);
        let join_right = self.pivot_column(&self.related_pivot_key);
        self.query = Builder::new(related, self.parent.connection().cloned())
            .join(&self.table, &join_left, &join_right);
        self
    }

    /// Extra junction columns to select into the pivot
    pub fn with_pivot(mut self, columns: &[&str]) -> Self {
        for column in columns {
            if !self.pivot_columns.iter().any(|c| c == column) {
                self.pivot_columns.push(column.to_string());
            }
        }
        self
    }

    /// Maintain `created_at` / `updated_at` on the junction table
    pub fn with_timestamps(mut self) -> Self {
        self.with_timestamps = true;
        self.with_pivot(&["created_at", "updated_at"])
    }

    /// Filter related rows by a junction column; also applies to detach and sync
    pub fn where_pivot(mut self, column: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        let qualified = self.pivot_column(column);
        self.query = self.query.where_eq(&qualified, value.clone());
        self.pivot_wheres.push((column.to_string(), value));
        self
    }

    /// Like `where_pivot`, and the value is written on attach
    pub fn with_pivot_value(self, column: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        let mut relation = self.where_pivot(column, value.clone());
        relation.pivot_values.insert(column.to_string(), value);
        relation
    }

    pub fn query(&self) -> &Builder {
        &self.query
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn foreign_pivot_key(&self) -> &str {
        &self.foreign_pivot_key
    }

    pub fn related_pivot_key(&self) -> &str {
        &self.related_pivot_key
    }

    fn pivot_column(&self, column: &str) -> String {
        format!("{}.{}", self.table, column)
    }

    fn parent_value(&self) -> Value {
        self.parent.get_value(&self.parent_key)
    }

    pub fn map_query<F: FnOnce(Builder) -> Builder>(mut self, f: F) -> Self {
        self.query = f(self.query);
        self
    }

    pub fn add_constraints(self) -> Self {
        let column = self.pivot_column(&self.foreign_pivot_key);
        let key = self.parent_value();
        self.map_query(|q| q.where_eq(&column, key))
    }

    pub fn add_eager_constraints(self, models: &[&Record]) -> Self {
        let column = self.pivot_column(&self.foreign_pivot_key);
        let keys = unique_keys(models.iter().copied(), &self.parent_key);
        self.map_query(|q| q.where_in(&column, keys))
    }

    /// Pivot columns selected onto related rows, with the alias each is read back from
    fn pivot_aliases(&self) -> Vec<(&str, String)> {
        let mut seen = HashSet::new();
        [&self.foreign_pivot_key, &self.related_pivot_key]
            .into_iter()
            .chain(self.pivot_columns.iter())
            .filter(|column| seen.insert(column.as_str()))
            .map(|column| (column.as_str(), format!("{}{}", PIVOT_PREFIX, column)))
            .collect()
    }

    fn select_list(&self) -> Vec<String> {
        let mut columns = vec![format!("{}.*", self.query.model().table_name())];
        for (column, alias) in self.pivot_aliases() {
            columns.push(format!("{}.{} as {}", self.table, column, alias));
        }
        columns
    }

    /// Move the selected pivot aliases off `record` into its pivot relation.
    ///
    /// Related columns that merely share the prefix stay on the record.
    fn hydrate_pivot(&self, record: &mut Record) {
        let mut attributes = Row::new();
        for (column, alias) in self.pivot_aliases() {
            if let Some(value) = record.forget_attribute(&alias) {
                attributes.insert(column.to_string(), value);
            }
        }

        let pivot = Pivot::new(
            &self.table,
            &self.foreign_pivot_key,
            &self.related_pivot_key,
            attributes,
        );
        record.set_relation(PIVOT_RELATION, Related::Pivot(pivot));
    }

    pub fn init_relation(&self, models: &mut [&mut Record], name: &str) {
        for model in models.iter_mut() {
            model.set_relation(name, Related::Many(Collection::new()));
        }
    }

    pub async fn get_eager(&self) -> OrmResult<Collection<Record>> {
        let mut results = self.query.clone().select_columns(self.select_list()).get().await?;
        for record in results.iter_mut() {
            self.hydrate_pivot(record);
        }
        Ok(results)
    }

    pub fn match_results(
        &self,
        models: &mut [&mut Record],
        results: Collection<Record>,
        name: &str,
    ) {
        let dictionary = build_dictionary(results, |r| {
            r.pivot().map(Pivot::foreign_key).unwrap_or(Value::Null)
        });

        for model in models.iter_mut() {
            let Some(key) = key_string(&model.get_value(&self.parent_key)) else {
                continue;
            };
            if let Some(matches) = dictionary.get(&key) {
                model.set_relation(name, Related::Many(Collection::make(matches.iter().cloned())));
            }
        }
    }

    pub async fn get_results(&self) -> OrmResult<Related> {
        if self.parent_value().is_null() {
            return Ok(Related::Many(Collection::new()));
        }
        Ok(Related::Many(self.get_eager().await?))
    }

    pub fn existence_query(&self) -> Builder {
        let parent_column = self.parent.model().qualify_column(&self.parent_key);
        correlated_query(&self.query, self.parent.model().as_ref()).where_column(
            &self.pivot_column(&self.foreign_pivot_key),
            QueryOperator::Equal,
            &parent_column,
        )
    }

    // --- junction table writes -------------------------------------------

    fn connection(&self) -> OrmResult<ConnectionRef> {
        self.parent.connection().cloned().ok_or_else(|| {
            ModelError::Connection(format!(
                "No connection bound to parent of pivot table [{}]",
                self.table
            ))
        })
    }

    fn parent_key_value(&self) -> OrmResult<Value> {
        let value = self.parent_value();
        if value.is_null() {
            return Err(ModelError::MissingPrimaryKey);
        }
        Ok(value)
    }

    /// Junction rows of this parent, restricted by `where_pivot` filters
    fn pivot_query(&self) -> OrmResult<QueryBuilder> {
        let mut query = QueryBuilder::table(&self.table)
            .where_eq(&self.foreign_pivot_key, self.parent_key_value()?);
        for (column, value) in &self.pivot_wheres {
            query = query.where_eq(column, value.clone());
        }
        Ok(query)
    }

    fn pivot_row(&self, parent: &Value, id: &Value, attributes: &Row, extra: &Row) -> Row {
        let mut row = Row::new();
        row.insert(self.foreign_pivot_key.clone(), parent.clone());
        row.insert(self.related_pivot_key.clone(), id.clone());
        row.extend(self.pivot_values.clone());
        row.extend(attributes.clone());
        row.extend(extra.clone());
        if self.with_timestamps {
            let now = fresh_timestamp();
            for column in ["created_at", "updated_at"] {
                row.entry(column.to_string()).or_insert_with(|| now.clone());
            }
        }
        row
    }

    /// Insert one junction row per id
    pub async fn attach(&self, ids: impl Into<PivotIds>, attributes: Row) -> OrmResult<()> {
        let ids = ids.into().normalized();
        if ids.is_empty() {
            return Ok(());
        }
        let parent = self.parent_key_value()?;
        let connection = self.connection()?;

        let rows: Vec<Row> = ids
            .entries()
            .iter()
            .map(|(id, extra)| self.pivot_row(&parent, id, &attributes, extra))
            .collect();

        debug!(table = %self.table, count = rows.len(), "attaching pivot rows");
        QueryBuilder::new()
            .insert_into(&self.table)
            .values_many(rows)
            .execute(connection.as_ref())
            .await?;
        Ok(())
    }

    /// Remove the junction rows for `ids`
    pub async fn detach(&self, ids: impl Into<PivotIds>) -> OrmResult<u64> {
        let ids = ids.into().normalized();
        if ids.is_empty() {
            return Ok(0);
        }
        let connection = self.connection()?;
        let query = self.pivot_query()?.where_in(&self.related_pivot_key, ids.ids()).into_delete();
        query.execute(connection.as_ref()).await
    }

    /// Remove every junction row of the parent
    pub async fn detach_all(&self) -> OrmResult<u64> {
        let connection = self.connection()?;
        self.pivot_query()?.into_delete().execute(connection.as_ref()).await
    }

    /// Related keys currently linked to the parent
    pub async fn current_ids(&self) -> OrmResult<Vec<Value>> {
        let connection = self.connection()?;
        let rows = self
            .pivot_query()?
            .select(&self.related_pivot_key)
            .get(connection.as_ref())
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| row.remove(&self.related_pivot_key))
            .collect())
    }

    /// Make the linked set equal `ids`; with `detaching == false` only adds
    pub async fn sync(&self, ids: impl Into<PivotIds>, detaching: bool) -> OrmResult<SyncChanges> {
        let target = ids.into().normalized();
        let current = self.current_ids().await?;
        let current_keys: HashSet<String> = current.iter().filter_map(key_string).collect();
        let target_keys: HashSet<String> = target.ids().iter().filter_map(key_string).collect();

        let mut changes = SyncChanges::default();

        if detaching {
            let stale: Vec<Value> = current
                .into_iter()
                .filter(|id| key_string(id).map_or(false, |key| !target_keys.contains(&key)))
                .collect();
            if !stale.is_empty() {
                self.detach(stale.clone()).await?;
                changes.detached = stale;
            }
        }

        let fresh: Vec<(Value, Row)> = target
            .entries()
            .iter()
            .filter(|(id, _)| key_string(id).map_or(false, |key| !current_keys.contains(&key)))
            .cloned()
            .collect();
        if !fresh.is_empty() {
            changes.attached = fresh.iter().map(|(id, _)| id.clone()).collect();
            self.attach(PivotIds(fresh), Row::new()).await?;
        }

        Ok(changes)
    }

    pub async fn sync_without_detaching(&self, ids: impl Into<PivotIds>) -> OrmResult<SyncChanges> {
        self.sync(ids, false).await
    }

    /// Detach the linked ids among `ids` and attach the rest
    pub async fn toggle(&self, ids: impl Into<PivotIds>) -> OrmResult<SyncChanges> {
        let target = ids.into().normalized();
        let current_keys: HashSet<String> =
            self.current_ids().await?.iter().filter_map(key_string).collect();

        let (linked, unlinked): (Vec<_>, Vec<_>) = target
            .entries()
            .iter()
            .cloned()
            .partition(|(id, _)| key_string(id).map_or(false, |key| current_keys.contains(&key)));

        let mut changes = SyncChanges::default();
        if !linked.is_empty() {
            changes.detached = linked.iter().map(|(id, _)| id.clone()).collect();
            self.detach(changes.detached.clone()).await?;
        }
        if !unlinked.is_empty() {
            changes.attached = unlinked.iter().map(|(id, _)| id.clone()).collect();
            self.attach(PivotIds(unlinked), Row::new()).await?;
        }
        Ok(changes)
    }

    /// Update the junction row linking the parent to `id`
    pub async fn update_existing_pivot(
        &self,
        id: impl Into<Value>,
        mut attributes: Row,
    ) -> OrmResult<u64> {
        if self.with_timestamps {
            attributes
                .entry("updated_at".to_string())
                .or_insert_with(fresh_timestamp);
        }
        if attributes.is_empty() {
            return Ok(0);
        }
        let connection = self.connection()?;
        let query = self
            .pivot_query()?
            .where_eq(&self.related_pivot_key, id)
            .into_update()
            .set_values(attributes);
        query.execute(connection.as_ref()).await
    }

    /// Save a new related record and link it to the parent
    pub async fn create(&self, attributes: Row, pivot_attributes: Row) -> OrmResult<Record> {
        let mut record = Record::new(self.query.model().clone())
            .with_connection(self.parent.connection().cloned())
            .with_attributes(attributes);
        record.save().await?;
        self.attach(record.get_value(&self.related_key), pivot_attributes).await?;
        Ok(record)
    }
}
