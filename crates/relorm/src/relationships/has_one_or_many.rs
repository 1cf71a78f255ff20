//! HasOne / HasMany - the related table holds a key pointing back at the parent

use serde_json::Value;

use super::correlated_query;
use super::dictionary::{build_dictionary, key_string, unique_keys};
use crate::builder::Builder;
use crate::collection::Collection;
use crate::error::OrmResult;
use crate::model::{ModelRef, Record, Related};
use crate::query::{QueryOperator, Row};

/// `related.foreign_key = parent.local_key`
#[derive(Debug, Clone)]
pub struct HasOneOrMany {
    query: Builder,
    parent: Box<Record>,
    foreign_key: String,
    local_key: String,
    many: bool,
}

impl HasOneOrMany {
    pub(crate) fn new(
        related: ModelRef,
        parent: &Record,
        foreign_key: &str,
        local_key: &str,
        many: bool,
    ) -> Self {
        Self {
            query: Builder::new(related, parent.connection().cloned()),
            parent: Box::new(parent.shallow_clone()),
            foreign_key: foreign_key.to_string(),
            local_key: local_key.to_string(),
            many,
        }
    }

    pub fn query(&self) -> &Builder {
        &self.query
    }

    pub fn is_many(&self) -> bool {
        self.many
    }

    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    pub fn local_key(&self) -> &str {
        &self.local_key
    }

    pub fn qualified_foreign_key(&self) -> String {
        self.query.model().qualify_column(&self.foreign_key)
    }

    /// The parent's value for the local key
    pub fn parent_key(&self) -> Value {
        self.parent.get_value(&self.local_key)
    }

    pub fn map_query<F: FnOnce(Builder) -> Builder>(mut self, f: F) -> Self {
        self.query = f(self.query);
        self
    }

    pub fn add_constraints(self) -> Self {
        let key = self.parent_key();
        let column = self.qualified_foreign_key();
        self.map_query(|q| q.where_eq(&column, key).where_not_null(&column))
    }

    pub fn add_eager_constraints(self, models: &[&Record]) -> Self {
        let keys = unique_keys(models.iter().copied(), &self.local_key);
        let column = self.qualified_foreign_key();
        self.map_query(|q| q.where_in(&column, keys))
    }

    fn empty_value(&self) -> Related {
        if self.many {
            Related::Many(Collection::new())
        } else {
            Related::One(None)
        }
    }

    pub fn init_relation(&self, models: &mut [&mut Record], name: &str) {
        for model in models.iter_mut() {
            model.set_relation(name, self.empty_value());
        }
    }

    pub fn match_results(
        &self,
        models: &mut [&mut Record],
        results: Collection<Record>,
        name: &str,
    ) {
        let dictionary = build_dictionary(results, |r| r.get_value(&self.foreign_key));

        for model in models.iter_mut() {
            let Some(key) = key_string(&model.get_value(&self.local_key)) else {
                continue;
            };
            if let Some(matches) = dictionary.get(&key) {
                let value = if self.many {
                    Related::Many(Collection::make(matches.iter().cloned()))
                } else {
                    Related::One(matches.first().cloned().map(Box::new))
                };
                model.set_relation(name, value);
            }
        }
    }

    pub async fn get_eager(&self) -> OrmResult<Collection<Record>> {
        self.query.clone().get().await
    }

    pub async fn get_results(&self) -> OrmResult<Related> {
        if self.parent_key().is_null() {
            return Ok(self.empty_value());
        }
        if self.many {
            Ok(Related::Many(self.query.clone().get().await?))
        } else {
            Ok(Related::One(self.query.clone().first().await?.map(Box::new)))
        }
    }

    /// Related rows correlated with the outer parent query
    pub fn existence_query(&self) -> Builder {
        let parent_column = self.parent.model().qualify_column(&self.local_key);
        let query = correlated_query(&self.query, self.parent.model().as_ref());
        let foreign_key = query.model().qualify_column(&self.foreign_key);
        query.where_column(&foreign_key, QueryOperator::Equal, &parent_column)
    }

    /// A new related record pointing at the parent, not yet saved
    pub fn make(&self, attributes: Row) -> Record {
        let mut record = Record::new(self.query.model().clone())
            .with_connection(self.query.connection().cloned())
            .with_attributes(attributes);
        record.set(&self.foreign_key, self.parent_key());
        record
    }

    /// Create and save a related record pointing at the parent
    pub async fn create(&self, attributes: Row) -> OrmResult<Record> {
        let mut record = self.make(attributes);
        record.save().await?;
        Ok(record)
    }

    /// Point `record` at the parent and save it
    pub async fn save(&self, record: &mut Record) -> OrmResult<()> {
        record.set(&self.foreign_key, self.parent_key());
        record.save().await
    }
}
