//! Relationships Module - the six relation kinds and their eager-loading contract
//!
//! Every relation can constrain its query to one parent (lazy loading) or to a
//! batch of parents (eager loading), match a batch of results back onto the
//! parents through a key dictionary, and produce a correlated subquery for
//! existence filters.

pub mod belongs_to;
pub mod belongs_to_many;
pub mod dictionary;
pub mod has_many_through;
pub mod has_one_or_many;
pub mod pivot;

pub use belongs_to::BelongsTo;
pub use belongs_to_many::{BelongsToMany, PivotIds, SyncChanges, PIVOT_RELATION};
pub use has_many_through::HasManyThrough;
pub use has_one_or_many::HasOneOrMany;
pub use pivot::Pivot;

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::builder::Builder;
use crate::collection::Collection;
use crate::error::OrmResult;
use crate::model::{Model, ModelRef, Record, Related};

static SELF_RELATION_ALIASES: AtomicUsize = AtomicUsize::new(0);

/// A table alias no other query in the process uses
pub(crate) fn self_relation_alias() -> String {
    format!("relorm_reserved_{}", SELF_RELATION_ALIASES.fetch_add(1, Ordering::Relaxed))
}

/// `query` for use inside a subquery correlated with `parent`. When both read
/// the same table the inner one is aliased so outer columns stay reachable.
pub(crate) fn correlated_query(query: &Builder, parent: &dyn Model) -> Builder {
    if query.model().table_name() == parent.table_name() {
        query.clone().aliased(&self_relation_alias())
    } else {
        query.clone()
    }
}

/// A declared relation between a parent record and a related model
#[derive(Debug, Clone)]
pub enum Relation {
    HasOne(HasOneOrMany),
    HasMany(HasOneOrMany),
    BelongsTo(BelongsTo),
    BelongsToMany(BelongsToMany),
    HasOneThrough(HasManyThrough),
    HasManyThrough(HasManyThrough),
}

impl From<HasOneOrMany> for Relation {
    fn from(relation: HasOneOrMany) -> Self {
        if relation.is_many() {
            Relation::HasMany(relation)
        } else {
            Relation::HasOne(relation)
        }
    }
}

impl From<BelongsTo> for Relation {
    fn from(relation: BelongsTo) -> Self {
        Relation::BelongsTo(relation)
    }
}

impl From<BelongsToMany> for Relation {
    fn from(relation: BelongsToMany) -> Self {
        Relation::BelongsToMany(relation)
    }
}

impl From<HasManyThrough> for Relation {
    fn from(relation: HasManyThrough) -> Self {
        if relation.is_many() {
            Relation::HasManyThrough(relation)
        } else {
            Relation::HasOneThrough(relation)
        }
    }
}

impl Relation {
    pub fn kind(&self) -> &'static str {
        match self {
            Relation::HasOne(_) => "HasOne",
            Relation::HasMany(_) => "HasMany",
            Relation::BelongsTo(_) => "BelongsTo",
            Relation::BelongsToMany(_) => "BelongsToMany",
            Relation::HasOneThrough(_) => "HasOneThrough",
            Relation::HasManyThrough(_) => "HasManyThrough",
        }
    }

    /// Query for the related model
    pub fn query(&self) -> &Builder {
        match self {
            Relation::HasOne(r) | Relation::HasMany(r) => r.query(),
            Relation::BelongsTo(r) => r.query(),
            Relation::BelongsToMany(r) => r.query(),
            Relation::HasOneThrough(r) | Relation::HasManyThrough(r) => r.query(),
        }
    }

    pub fn related(&self) -> &ModelRef {
        self.query().model()
    }

    /// Transform the related query, e.g. with an eager-load constraint
    pub fn map_query<F: FnOnce(Builder) -> Builder>(self, f: F) -> Self {
        match self {
            Relation::HasOne(r) => Relation::HasOne(r.map_query(f)),
            Relation::HasMany(r) => Relation::HasMany(r.map_query(f)),
            Relation::BelongsTo(r) => Relation::BelongsTo(r.map_query(f)),
            Relation::BelongsToMany(r) => Relation::BelongsToMany(r.map_query(f)),
            Relation::HasOneThrough(r) => Relation::HasOneThrough(r.map_query(f)),
            Relation::HasManyThrough(r) => Relation::HasManyThrough(r.map_query(f)),
        }
    }

    /// Constrain to the single parent the relation was declared on
    pub fn add_constraints(self) -> Self {
        match self {
            Relation::HasOne(r) => Relation::HasOne(r.add_constraints()),
            Relation::HasMany(r) => Relation::HasMany(r.add_constraints()),
            Relation::BelongsTo(r) => Relation::BelongsTo(r.add_constraints()),
            Relation::BelongsToMany(r) => Relation::BelongsToMany(r.add_constraints()),
            Relation::HasOneThrough(r) => Relation::HasOneThrough(r.add_constraints()),
            Relation::HasManyThrough(r) => Relation::HasManyThrough(r.add_constraints()),
        }
    }

    /// Constrain to the keys of a batch of parents
    pub fn add_eager_constraints(self, models: &[&Record]) -> Self {
        match self {
            Relation::HasOne(r) => Relation::HasOne(r.add_eager_constraints(models)),
            Relation::HasMany(r) => Relation::HasMany(r.add_eager_constraints(models)),
            Relation::BelongsTo(r) => Relation::BelongsTo(r.add_eager_constraints(models)),
            Relation::BelongsToMany(r) => Relation::BelongsToMany(r.add_eager_constraints(models)),
            Relation::HasOneThrough(r) => Relation::HasOneThrough(r.add_eager_constraints(models)),
            Relation::HasManyThrough(r) => {
                Relation::HasManyThrough(r.add_eager_constraints(models))
            }
        }
    }

    /// Set the empty value (`None` or an empty collection) on every parent
    pub fn init_relation(&self, models: &mut [&mut Record], name: &str) {
        match self {
            Relation::HasOne(r) | Relation::HasMany(r) => r.init_relation(models, name),
            Relation::BelongsTo(r) => r.init_relation(models, name),
            Relation::BelongsToMany(r) => r.init_relation(models, name),
            Relation::HasOneThrough(r) | Relation::HasManyThrough(r) => {
                r.init_relation(models, name)
            }
        }
    }

    /// Run the eager query
    pub async fn get_eager(&self) -> OrmResult<Collection<Record>> {
        match self {
            Relation::HasOne(r) | Relation::HasMany(r) => r.get_eager().await,
            Relation::BelongsTo(r) => r.get_eager().await,
            Relation::BelongsToMany(r) => r.get_eager().await,
            Relation::HasOneThrough(r) | Relation::HasManyThrough(r) => r.get_eager().await,
        }
    }

    /// Distribute eager results onto their parents
    pub fn match_results(
        &self,
        models: &mut [&mut Record],
        results: Collection<Record>,
        name: &str,
    ) {
        match self {
            Relation::HasOne(r) | Relation::HasMany(r) => r.match_results(models, results, name),
            Relation::BelongsTo(r) => r.match_results(models, results, name),
            Relation::BelongsToMany(r) => r.match_results(models, results, name),
            Relation::HasOneThrough(r) | Relation::HasManyThrough(r) => {
                r.match_results(models, results, name)
            }
        }
    }

    /// Lazily load the value for the constrained parent
    pub async fn get_results(&self) -> OrmResult<Related> {
        match self {
            Relation::HasOne(r) | Relation::HasMany(r) => r.get_results().await,
            Relation::BelongsTo(r) => r.get_results().await,
            Relation::BelongsToMany(r) => r.get_results().await,
            Relation::HasOneThrough(r) | Relation::HasManyThrough(r) => r.get_results().await,
        }
    }

    /// Related query correlated with the parent table, for `has` / `where_has`
    pub fn existence_query(&self) -> Builder {
        match self {
            Relation::HasOne(r) | Relation::HasMany(r) => r.existence_query(),
            Relation::BelongsTo(r) => r.existence_query(),
            Relation::BelongsToMany(r) => r.existence_query(),
            Relation::HasOneThrough(r) | Relation::HasManyThrough(r) => r.existence_query(),
        }
    }

    pub fn into_belongs_to_many(self) -> Option<BelongsToMany> {
        match self {
            Relation::BelongsToMany(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_has_one_or_many(self) -> Option<HasOneOrMany> {
        match self {
            Relation::HasOne(r) | Relation::HasMany(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_belongs_to(self) -> Option<BelongsTo> {
        match self {
            Relation::BelongsTo(r) => Some(r),
            _ => None,
        }
    }
}
