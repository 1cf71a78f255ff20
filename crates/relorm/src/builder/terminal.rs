//! Terminal operations - the calls that run queries
//!
//! Each applies the global scopes once on its own copy of the builder.

use serde_json::Value;
use tracing::debug;

use super::Builder;
use crate::collection::{Collection, Key};
use crate::error::{ModelError, OrmResult};
use crate::model::{fresh_timestamp, Record};
use crate::query::Row;

fn column_key(column: &str) -> &str {
    match crate::security::split_alias(column) {
        Some((_, alias)) => alias,
        None => column.rsplit('.').next().unwrap_or(column),
    }
}

impl Builder {
    /// Run the query, hydrate the rows and eager load requested relations
    pub async fn get(self) -> OrmResult<Collection<Record>> {
        let builder = self.apply_scopes();
        let connection = builder.require_connection()?;
        let rows = builder.query.get(connection.as_ref()).await?;

        let mut records: Vec<Record> = rows
            .into_iter()
            .map(|row| Record::hydrate(builder.model.clone(), row, Some(connection.clone())))
            .collect();

        if !records.is_empty() && !builder.eager_load.is_empty() {
            let mut targets: Vec<&mut Record> = records.iter_mut().collect();
            builder.load_relations(&mut targets).await?;
        }

        Ok(Collection::make(records))
    }

    pub async fn first(self) -> OrmResult<Option<Record>> {
        Ok(self.take(1).get().await?.into_iter().next())
    }

    pub async fn first_or_fail(self) -> OrmResult<Record> {
        let model = self.model.model_name().to_string();
        self.first().await?.ok_or(ModelError::NotFound { model, ids: Vec::new() })
    }

    pub async fn find(self, id: impl Into<Value>) -> OrmResult<Option<Record>> {
        self.where_key(id).first().await
    }

    pub async fn find_or_fail(self, id: impl Into<Value>) -> OrmResult<Record> {
        let id = id.into();
        let model = self.model.model_name().to_string();
        self.find(id.clone())
            .await?
            .ok_or(ModelError::NotFound { model, ids: vec![id] })
    }

    /// Records for every id; an empty id list runs no query
    pub async fn find_many<I, V>(self, ids: I) -> OrmResult<Collection<Record>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Ok(Collection::new());
        }
        self.where_key_in(ids).get().await
    }

    /// The record with `id`, or a new unsaved record
    pub async fn find_or_new(self, id: impl Into<Value>) -> OrmResult<Record> {
        let blank = self.new_record(Row::new());
        Ok(self.find(id).await?.unwrap_or(blank))
    }

    /// First record matching `attributes`, or a new unsaved one filled with
    /// `attributes` and `values`
    pub async fn first_or_new(self, attributes: Row, values: Row) -> OrmResult<Record> {
        let mut fresh = self.new_record(attributes.clone());
        let query = attributes
            .iter()
            .fold(self, |q, (column, value)| q.where_eq(column, value.clone()));
        match query.first().await? {
            Some(record) => Ok(record),
            None => {
                fresh.fill(values);
                Ok(fresh)
            }
        }
    }

    /// First record matching `attributes`, or a saved new one
    pub async fn first_or_create(self, attributes: Row, values: Row) -> OrmResult<Record> {
        let mut record = self.first_or_new(attributes, values).await?;
        if !record.exists() {
            record.save().await?;
        }
        Ok(record)
    }

    /// Update the first record matching `attributes` with `values`, or create it
    pub async fn update_or_create(self, attributes: Row, values: Row) -> OrmResult<Record> {
        let mut record = self.first_or_new(attributes, Row::new()).await?;
        record.fill(values);
        record.save().await?;
        Ok(record)
    }

    fn new_record(&self, attributes: Row) -> Record {
        Record::new(self.model.clone())
            .with_connection(self.connection.clone())
            .with_attributes(attributes)
    }

    /// Values of one column, optionally keyed by another
    pub async fn pluck(self, column: &str, key: Option<&str>) -> OrmResult<Collection<Value>> {
        let mut columns = vec![column.to_string()];
        if let Some(key) = key {
            columns.push(key.to_string());
        }

        let builder = self.select_columns(columns).apply_scopes();
        let connection = builder.require_connection()?;
        let rows = builder.query.get(connection.as_ref()).await?;

        let value_key = column_key(column);
        let mut plucked = Collection::new();
        for row in rows {
            let value = row.get(value_key).cloned().unwrap_or(Value::Null);
            match key.and_then(|k| row.get(column_key(k))).and_then(Key::from_value) {
                Some(k) => plucked.put(k, value),
                None => plucked.push(value),
            }
        }
        Ok(plucked)
    }

    /// One column of the first row
    pub async fn value(self, column: &str) -> OrmResult<Option<Value>> {
        let builder = self.select(column).take(1).apply_scopes();
        let connection = builder.require_connection()?;
        let row = builder.query.first(connection.as_ref()).await?;
        Ok(row.and_then(|mut row| row.remove(column_key(column))))
    }

    pub async fn count(self) -> OrmResult<i64> {
        let builder = self.apply_scopes();
        let connection = builder.require_connection()?;
        builder.query.count(connection.as_ref()).await
    }

    pub async fn exists(self) -> OrmResult<bool> {
        let builder = self.apply_scopes();
        let connection = builder.require_connection()?;
        builder.query.exists(connection.as_ref()).await
    }

    pub async fn doesnt_exist(self) -> OrmResult<bool> {
        Ok(!self.exists().await?)
    }

    // --- writes ----------------------------------------------------------

    /// Update every matching row, touching `updated_at` on timestamped models
    pub async fn update(self, mut values: Row) -> OrmResult<u64> {
        if self.model.uses_timestamps() {
            let column = self.model.updated_at_column().to_string();
            values.entry(column).or_insert_with(fresh_timestamp);
        }
        if values.is_empty() {
            return Ok(0);
        }

        let builder = self.apply_scopes();
        let connection = builder.require_connection()?;
        let affected = builder
            .query
            .into_update()
            .set_values(values)
            .execute(connection.as_ref())
            .await?;
        debug!(model = builder.model.model_name(), affected, "updated rows");
        Ok(affected)
    }

    /// Delete matching rows, through the delete hook when one is registered
    pub async fn delete(self) -> OrmResult<u64> {
        match self.on_delete.clone() {
            Some(hook) => hook(self).await,
            None => self.force_delete().await,
        }
    }

    /// Delete matching rows, ignoring any delete hook
    pub async fn force_delete(self) -> OrmResult<u64> {
        let builder = self.apply_scopes();
        let connection = builder.require_connection()?;
        let affected = builder.query.into_delete().execute(connection.as_ref()).await?;
        debug!(model = builder.model.model_name(), affected, "deleted rows");
        Ok(affected)
    }

    /// Insert a record with `attributes` and return it
    pub async fn create(self, attributes: Row) -> OrmResult<Record> {
        let mut record = self.new_record(attributes);
        record.save().await?;
        Ok(record)
    }

    // --- chunking --------------------------------------------------------

    /// Process the results `size` rows at a time, ordered by primary key unless
    /// an order is set. `callback` gets each page and its 1-based number and
    /// returns `false` to stop. Returns `false` when stopped early.
    pub async fn chunk<F>(self, size: i64, mut callback: F) -> OrmResult<bool>
    where
        F: FnMut(Collection<Record>, i64) -> bool,
    {
        if size < 1 {
            return Err(ModelError::InvalidArgument(format!(
                "Chunk size must be positive, got {}",
                size
            )));
        }

        let builder = if self.query.has_orders() {
            self
        } else {
            let key = self.model.qualify_column(self.model.primary_key_name());
            self.order_by(&key)
        };

        let mut page = 1;
        loop {
            let results = builder.clone().for_page(page, size).get().await?;
            let count = results.len() as i64;
            if count == 0 {
                break;
            }
            if !callback(results, page) {
                return Ok(false);
            }
            if count < size {
                break;
            }
            page += 1;
        }
        Ok(true)
    }

    /// Process the results one record at a time, fetched in chunks of `size`
    pub async fn each<F>(self, size: i64, mut callback: F) -> OrmResult<bool>
    where
        F: FnMut(Record) -> bool,
    {
        self.chunk(size, |records, _| {
            for record in records {
                if !callback(record) {
                    return false;
                }
            }
            true
        })
        .await
    }

    /// Like `chunk`, paging on `primary key > last seen key` instead of offsets
    pub async fn chunk_by_id<F>(self, size: i64, mut callback: F) -> OrmResult<bool>
    where
        F: FnMut(Collection<Record>, i64) -> bool,
    {
        if size < 1 {
            return Err(ModelError::InvalidArgument(format!(
                "Chunk size must be positive, got {}",
                size
            )));
        }

        let key_name = self.model.primary_key_name().to_string();
        let qualified = self.model.qualify_column(&key_name);
        let mut last: Option<Value> = None;
        let mut page = 1;

        loop {
            let mut query = self.clone().reorder().order_by(&qualified).take(size);
            if let Some(last) = &last {
                query = query.where_gt(&qualified, last.clone());
            }
            let results = query.get().await?;
            let count = results.len() as i64;
            if count == 0 {
                break;
            }

            let last_key = results.last().map(|r| r.get_value(&key_name)).unwrap_or(Value::Null);
            if last_key.is_null() {
                return Err(ModelError::InvalidArgument(format!(
                    "Column [{}] is not present in the chunked results",
                    key_name
                )));
            }

            if !callback(results, page) {
                return Ok(false);
            }
            if count < size {
                break;
            }
            last = Some(last_key);
            page += 1;
        }
        Ok(true)
    }
}
