//! HasOneThrough / HasManyThrough - far rows reached via an intermediate table
//!
//! `far_parent.local_key = through.first_key` and
//! `through.second_local_key = related.second_key`. The through key is selected
//! under an alias unique to the relation instance, matched on, then dropped.
//!
//! The through model's global scopes are registered on the relation query as
//! `<through table>.<identifier>`, e.g. `users.soft_deletes`, so
//! `without_global_scope` can lift them.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use super::dictionary::{build_dictionary, key_string, unique_keys};
use super::{correlated_query, self_relation_alias};
use crate::builder::Builder;
use crate::collection::Collection;
use crate::error::OrmResult;
use crate::model::{AliasedModel, Model, ModelRef, Record, Related, Scope};
use crate::query::QueryOperator;

/// A global scope of the through model, applied against the through table
struct ThroughScope {
    scope: Arc<dyn Scope>,
    through: ModelRef,
}

impl Scope for ThroughScope {
    fn apply(&self, builder: Builder, _model: &dyn Model) -> Builder {
        self.scope.apply(builder, self.through.as_ref())
    }
}

fn through_scope_identifier(through: &dyn Model, identifier: &str) -> String {
    format!("{}.{}", through.table_name(), identifier)
}

#[derive(Debug, Clone)]
pub struct HasManyThrough {
    query: Builder,
    far_parent: Box<Record>,
    through: ModelRef,
    first_key: String,
    second_key: String,
    local_key: String,
    second_local_key: String,
    through_key_alias: String,
    many: bool,
}

impl HasManyThrough {
    /// `keys` is `[first_key, second_key, local_key, second_local_key]`
    pub(crate) fn new(
        related: ModelRef,
        through: ModelRef,
        far_parent: &Record,
        keys: [&str; 4],
        many: bool,
    ) -> Self {
        let [first_key, second_key, local_key, second_local_key] = keys;

        let join_left = through.qualify_column(second_local_key);
        let join_right = related.qualify_column(second_key);
        let mut query = Builder::new(related, far_parent.connection().cloned()).join(
            through.table_name(),
            &join_left,
            &join_right,
        );

        for (identifier, scope) in through.global_scopes() {
            let identifier = through_scope_identifier(through.as_ref(), &identifier);
            let scope = Arc::new(ThroughScope {
                scope,
                through: through.clone(),
            });
            query = query.with_global_scope(&identifier, scope);
        }

        Self {
            query,
            far_parent: Box::new(far_parent.shallow_clone()),
            through,
            first_key: first_key.to_string(),
            second_key: second_key.to_string(),
            local_key: local_key.to_string(),
            second_local_key: second_local_key.to_string(),
            through_key_alias: format!("__through_key_{}", Uuid::new_v4().simple()),
            many,
        }
    }

    pub fn query(&self) -> &Builder {
        &self.query
    }

    pub fn is_many(&self) -> bool {
        self.many
    }

    pub fn through(&self) -> &ModelRef {
        &self.through
    }

    pub fn second_key(&self) -> &str {
        &self.second_key
    }

    pub fn second_local_key(&self) -> &str {
        &self.second_local_key
    }

    /// Alias the through key is selected under
    pub fn through_key_alias(&self) -> &str {
        &self.through_key_alias
    }

    pub fn qualified_first_key(&self) -> String {
        self.through.qualify_column(&self.first_key)
    }

    fn far_key(&self) -> Value {
        self.far_parent.get_value(&self.local_key)
    }

    pub fn map_query<F: FnOnce(Builder) -> Builder>(mut self, f: F) -> Self {
        self.query = f(self.query);
        self
    }

    pub fn add_constraints(self) -> Self {
        let column = self.qualified_first_key();
        let key = self.far_key();
        self.map_query(|q| q.where_eq(&column, key))
    }

    pub fn add_eager_constraints(self, models: &[&Record]) -> Self {
        let column = self.qualified_first_key();
        let keys = unique_keys(models.iter().copied(), &self.local_key);
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

    /// Related rows, still carrying the through key alias
    pub async fn get_eager(&self) -> OrmResult<Collection<Record>> {
        let columns = vec![
            format!("{}.*", self.query.model().table_name()),
            format!("{} as {}", self.qualified_first_key(), self.through_key_alias),
        ];
        self.query.clone().select_columns(columns).get().await
    }

    pub fn match_results(
        &self,
        models: &mut [&mut Record],
        results: Collection<Record>,
        name: &str,
    ) {
        let mut dictionary = build_dictionary(results, |r| r.get_value(&self.through_key_alias));
        for records in dictionary.values_mut() {
            for record in records.iter_mut() {
                record.forget_attribute(&self.through_key_alias);
            }
        }

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

    pub async fn get_results(&self) -> OrmResult<Related> {
        if self.far_key().is_null() {
            return Ok(self.empty_value());
        }
        let mut results = self.get_eager().await?;
        for record in results.iter_mut() {
            record.forget_attribute(&self.through_key_alias);
        }
        if self.many {
            Ok(Related::Many(results))
        } else {
            Ok(Related::One(results.into_iter().next().map(Box::new)))
        }
    }

    pub fn existence_query(&self) -> Builder {
        let parent = self.far_parent.model();
        let parent_column = parent.qualify_column(&self.local_key);
        let mut query = correlated_query(&self.query, parent.as_ref());
        let mut first_key = self.qualified_first_key();

        if self.through.table_name() == parent.table_name() {
            let alias = self_relation_alias();
            let through: ModelRef = Arc::new(AliasedModel::new(self.through.clone(), &alias));
            let table = self.through.table_name().to_string();
            query = query.map_base(|q| q.alias_join(&table, &alias));
            for (identifier, scope) in self.through.global_scopes() {
                let identifier = through_scope_identifier(self.through.as_ref(), &identifier);
                let scope = Arc::new(ThroughScope {
                    scope,
                    through: through.clone(),
                });
                query = query.replace_global_scope(&identifier, scope);
            }
            first_key = through.qualify_column(&self.first_key);
        }

        query.where_column(&first_key, QueryOperator::Equal, &parent_column)
    }
}
