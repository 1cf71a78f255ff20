//! Eager loading
//!
//! Requested paths are kept flat (`posts`, `posts.comments`) with every prefix
//! registered. They are resolved shallowest first, so when `posts.comments`
//! runs every parent already carries its `posts`. Each path costs one query,
//! whatever the number of parents.

use std::sync::Arc;

use tracing::trace;

use super::{BoxFuture, Builder};
use crate::error::{ModelError, OrmResult};
use crate::model::{ModelRef, Record};
use crate::relationships::Relation;

/// Extra constraint applied to the query of one eager-loaded relation
pub type EagerConstraint = Arc<dyn Fn(Builder) -> Builder + Send + Sync>;

/// One requested eager-load path
#[derive(Clone)]
pub struct EagerLoad {
    path: String,
    constraint: Option<EagerConstraint>,
}

impl EagerLoad {
    /// `path` with a constraint on its query
    pub fn constrained<F>(path: &str, constraint: F) -> Self
    where
        F: Fn(Builder) -> Builder + Send + Sync + 'static,
    {
        Self {
            path: path.to_string(),
            constraint: Some(Arc::new(constraint)),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl From<&str> for EagerLoad {
    fn from(path: &str) -> Self {
        Self {
            path: path.to_string(),
            constraint: None,
        }
    }
}

impl From<String> for EagerLoad {
    fn from(path: String) -> Self {
        Self { path, constraint: None }
    }
}

impl From<&String> for EagerLoad {
    fn from(path: &String) -> Self {
        Self::from(path.as_str())
    }
}

fn depth(path: &str) -> usize {
    path.matches('.').count()
}

impl Builder {
    /// Request relations to be loaded with the results
    pub fn with<I, E>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<EagerLoad>,
    {
        for load in relations.into_iter().map(Into::into) {
            self.register_eager_load(load);
        }
        self
    }

    /// Request one relation whose query is adjusted by `constraint`
    pub fn with_constraint<F>(self, path: &str, constraint: F) -> Self
    where
        F: Fn(Builder) -> Builder + Send + Sync + 'static,
    {
        self.with([EagerLoad::constrained(path, constraint)])
    }

    /// Drop previously requested paths
    pub fn without<'p, I>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = &'p str>,
    {
        let removed: Vec<&str> = relations.into_iter().collect();
        self.eager_load.retain(|(path, _)| !removed.contains(&path.as_str()));
        self
    }

    /// Replace every requested path with `relations`
    pub fn with_only<I, E>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<EagerLoad>,
    {
        self.eager_load.clear();
        self.with(relations)
    }

    /// Requested paths, in registration order
    pub fn eager_loads(&self) -> Vec<&str> {
        self.eager_load.iter().map(|(path, _)| path.as_str()).collect()
    }

    fn register_eager_load(&mut self, load: EagerLoad) {
        let mut prefix = String::new();
        let segments: Vec<&str> = load.path.split('.').collect();
        let last = segments.len().saturating_sub(1);

        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                prefix.push('.');
            }
            prefix.push_str(segment);

            if i < last {
                if !self.eager_load.iter().any(|(path, _)| *path == prefix) {
                    self.eager_load.push((prefix.clone(), None));
                }
            } else if let Some(entry) =
                self.eager_load.iter_mut().find(|(path, _)| *path == prefix)
            {
                entry.1 = load.constraint.clone();
            } else {
                self.eager_load.push((prefix.clone(), load.constraint.clone()));
            }
        }
    }

    /// Load every requested relation onto `models`, shallowest paths first
    pub fn load_relations<'a, 'r>(
        &'a self,
        models: &'a mut [&'r mut Record],
    ) -> BoxFuture<'a, OrmResult<()>> {
        Box::pin(async move {
            if models.is_empty() || self.eager_load.is_empty() {
                return Ok(());
            }

            let mut loads = self.eager_load.clone();
            loads.sort_by_key(|(path, _)| depth(path));

            for (path, constraint) in &loads {
                let (parent_path, name) = match path.rsplit_once('.') {
                    Some((parent, name)) => (Some(parent), name),
                    None => (None, path.as_str()),
                };

                let mut targets: Vec<&mut Record> = match parent_path {
                    None => models.iter_mut().map(|m| &mut **m).collect(),
                    Some(parent) => nested_targets(models, parent),
                };
                if targets.is_empty() {
                    trace!(relation = %path, "no parents to eager load onto");
                    continue;
                }

                let model = targets[0].model().clone();
                let relation = self.relation_on(&model, name)?;
                trace!(
                    relation = %path,
                    parents = targets.len(),
                    kind = relation.kind(),
                    "eager loading"
                );
                self.eager_load_relation(relation, &mut targets, name, constraint.as_ref())
                    .await?;
            }
            Ok(())
        })
    }

    /// The unconstrained relation `name` declared on `model`
    pub(crate) fn relation_on(&self, model: &ModelRef, name: &str) -> OrmResult<Relation> {
        let blank = Record::new(model.clone()).with_connection(self.connection.clone());
        model.relation(&blank, name).ok_or_else(|| ModelError::RelationNotFound {
            model: model.model_name().to_string(),
            relation: name.to_string(),
        })
    }

    async fn eager_load_relation(
        &self,
        relation: Relation,
        models: &mut [&mut Record],
        name: &str,
        constraint: Option<&EagerConstraint>,
    ) -> OrmResult<()> {
        let relation = {
            let parents: Vec<&Record> = models.iter().map(|m| &**m).collect();
            relation.add_eager_constraints(&parents)
        };
        let relation = match constraint {
            Some(constraint) => relation.map_query(|query| constraint(query)),
            None => relation,
        };

        relation.init_relation(models, name);
        let results = relation.get_eager().await?;
        relation.match_results(models, results, name);
        Ok(())
    }
}

/// Records reached from `models` by following the loaded relations along `path`
fn nested_targets<'m>(models: &'m mut [&mut Record], path: &str) -> Vec<&'m mut Record> {
    let mut current: Vec<&'m mut Record> = models.iter_mut().map(|m| &mut **m).collect();
    for segment in path.split('.') {
        current = current
            .into_iter()
            .flat_map(|record| match record.get_relation_mut(segment) {
                Some(related) => related.records_mut(),
                None => Vec::new(),
            })
            .collect();
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    #[derive(Debug)]
    struct Author;

    impl Model for Author {
        fn table_name(&self) -> &str {
            "authors"
        }

        fn model_name(&self) -> &str {
            "Author"
        }
    }

    fn authors() -> Builder {
        Builder::new(Arc::new(Author), None)
    }

    #[test]
    fn test_nested_paths_register_prefixes() {
        let builder = authors().with(["books.chapters.pages", "books"]);
        assert_eq!(builder.eager_loads(), vec!["books", "books.chapters", "books.chapters.pages"]);
    }

    #[test]
    fn test_without_and_with_only() {
        let builder = authors().with(["books", "awards"]).without(["awards"]);
        assert_eq!(builder.eager_loads(), vec!["books"]);

        let builder = builder.with_only(["awards"]);
        assert_eq!(builder.eager_loads(), vec!["awards"]);
    }

    #[test]
    fn test_constraint_replaces_plain_registration() {
        let builder = authors()
            .with(["books"])
            .with_constraint("books", |q| q.where_eq("books.published", true));
        assert_eq!(builder.eager_loads(), vec!["books"]);
        assert!(builder.eager_load[0].1.is_some());
    }

    #[test]
    fn test_depth() {
        assert_eq!(depth("a"), 0);
        assert_eq!(depth("a.b.c"), 2);
    }

    #[tokio::test]
    async fn test_unknown_relation_fails() {
        let mut record = Record::new(Arc::new(Author));
        record.set("id", 1);
        let builder = authors().with(["ghost"]);
        let mut targets = [&mut record];
        let err = builder.load_relations(&mut targets).await.unwrap_err();
        assert_eq!(
            err,
            ModelError::RelationNotFound {
                model: "Author".to_string(),
                relation: "ghost".to_string()
            }
        );
    }
}
