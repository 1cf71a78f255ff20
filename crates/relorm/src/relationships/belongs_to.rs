//! BelongsTo Relationship - the child holds the key of its owner

use serde_json::Value;

use super::correlated_query;
use super::dictionary::{build_dictionary, key_string, unique_keys};
use crate::builder::Builder;
use crate::collection::Collection;
use crate::error::OrmResult;
use crate::model::{ModelRef, Record, Related};
use crate::query::QueryOperator;

/// `related.owner_key = child.foreign_key`
#[derive(Debug, Clone)]
pub struct BelongsTo {
    query: Builder,
    child: Box<Record>,
    foreign_key: String,
    owner_key: String,
}

impl BelongsTo {
    pub(crate) fn new(
        related: ModelRef,
        child: &Record,
        foreign_key: &str,
        owner_key: &str,
    ) -> Self {
        Self {
            query: Builder::new(related, child.connection().cloned()),
            child: Box::new(child.shallow_clone()),
            foreign_key: foreign_key.to_string(),
            owner_key: owner_key.to_string(),
        }
    }

    pub fn query(&self) -> &Builder {
        &self.query
    }

    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    pub fn owner_key(&self) -> &str {
        &self.owner_key
    }

    pub fn qualified_owner_key(&self) -> String {
        self.query.model().qualify_column(&self.owner_key)
    }

    fn child_key(&self) -> Value {
        self.child.get_value(&self.foreign_key)
    }

    pub fn map_query<F: FnOnce(Builder) -> Builder>(mut self, f: F) -> Self {
        self.query = f(self.query);
        self
    }

    pub fn add_constraints(self) -> Self {
        let key = self.child_key();
        let column = self.qualified_owner_key();
        self.map_query(|q| q.where_eq(&column, key))
    }

    pub fn add_eager_constraints(self, models: &[&Record]) -> Self {
        let keys = unique_keys(models.iter().copied(), &self.foreign_key);
        let column = self.qualified_owner_key();
        self.map_query(|q| q.where_in(&column, keys))
    }

    pub fn init_relation(&self, models: &mut [&mut Record], name: &str) {
        for model in models.iter_mut() {
            model.set_relation(name, Related::One(None));
        }
    }

    pub fn match_results(
        &self,
        models: &mut [&mut Record],
        results: Collection<Record>,
        name: &str,
    ) {
        let dictionary = build_dictionary(results, |r| r.get_value(&self.owner_key));

        for model in models.iter_mut() {
            let Some(key) = key_string(&model.get_value(&self.foreign_key)) else {
                continue;
            };
            if let Some(owner) = dictionary.get(&key).and_then(|owners| owners.first()) {
                model.set_relation(name, Related::One(Some(Box::new(owner.clone()))));
            }
        }
    }

    pub async fn get_eager(&self) -> OrmResult<Collection<Record>> {
        self.query.clone().get().await
    }

    pub async fn get_results(&self) -> OrmResult<Related> {
        if self.child_key().is_null() {
            return Ok(Related::One(None));
        }
        Ok(Related::One(self.query.clone().first().await?.map(Box::new)))
    }

    pub fn existence_query(&self) -> Builder {
        let child_column = self.child.model().qualify_column(&self.foreign_key);
        let query = correlated_query(&self.query, self.child.model().as_ref());
        let owner_key = query.model().qualify_column(&self.owner_key);
        query.where_column(&owner_key, QueryOperator::Equal, &child_column)
    }

    /// Set the child's foreign key from `owner` and cache it; nothing is saved
    pub fn associate(&self, child: &mut Record, owner: &Record, name: &str) {
        child.set(&self.foreign_key, owner.get_value(&self.owner_key));
        child.set_relation(name, Related::One(Some(Box::new(owner.clone()))));
    }

    /// Null the child's foreign key and cache the empty relation; nothing is saved
    pub fn dissociate(&self, child: &mut Record, name: &str) {
        child.set(&self.foreign_key, Value::Null);
        child.set_relation(name, Related::One(None));
    }
}
