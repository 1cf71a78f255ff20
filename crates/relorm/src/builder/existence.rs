//! Relationship existence filters
//!
//! `has("posts")` becomes `EXISTS (SELECT * FROM posts WHERE posts.user_id =
//! users.id)`. Comparisons other than "at least one" / "none" compare a
//! `COUNT(*)` subquery instead. Dotted names nest one subquery per segment.

use super::Builder;
use crate::error::OrmResult;
use crate::query::{Connective, QueryOperator};

impl Builder {
    /// Filter by the number of related rows of `relation`
    pub fn has_with(
        self,
        relation: &str,
        operator: QueryOperator,
        count: i64,
        connective: Connective,
        callback: Option<&dyn Fn(Builder) -> Builder>,
    ) -> OrmResult<Self> {
        let (name, nested) = match relation.split_once('.') {
            Some((name, rest)) => (name, Some(rest)),
            None => (relation, None),
        };

        let model = self.model.clone();
        let relation = self.relation_on(&model, name)?;
        let subquery = relation.existence_query();

        match nested {
            Some(rest) => {
                let subquery = subquery.has_with(rest, operator, count, Connective::And, callback)?;
                Ok(self.add_has_where(subquery, QueryOperator::GreaterThanOrEqual, 1, connective))
            }
            None => {
                let subquery = match callback {
                    Some(callback) => subquery.call_scope(callback),
                    None => subquery,
                };
                Ok(self.add_has_where(subquery, operator, count, connective))
            }
        }
    }

    fn add_has_where(
        self,
        subquery: Builder,
        operator: QueryOperator,
        count: i64,
        connective: Connective,
    ) -> Self {
        let subquery = subquery.apply_scopes().query;
        match (operator, count) {
            (QueryOperator::GreaterThanOrEqual, 1) => {
                self.map_base(|q| q.where_exists(connective, subquery, false))
            }
            (QueryOperator::LessThan, 1) => {
                self.map_base(|q| q.where_exists(connective, subquery, true))
            }
            _ => self.map_base(|q| q.where_count(connective, subquery, operator, count)),
        }
    }

    /// Rows with at least one related row
    pub fn has(self, relation: &str) -> OrmResult<Self> {
        self.has_with(relation, QueryOperator::GreaterThanOrEqual, 1, Connective::And, None)
    }

    /// Rows whose related row count satisfies `operator count`
    pub fn has_count(self, relation: &str, operator: QueryOperator, count: i64) -> OrmResult<Self> {
        self.has_with(relation, operator, count, Connective::And, None)
    }

    pub fn or_has(self, relation: &str) -> OrmResult<Self> {
        self.has_with(relation, QueryOperator::GreaterThanOrEqual, 1, Connective::Or, None)
    }

    pub fn doesnt_have(self, relation: &str) -> OrmResult<Self> {
        self.has_with(relation, QueryOperator::LessThan, 1, Connective::And, None)
    }

    pub fn or_doesnt_have(self, relation: &str) -> OrmResult<Self> {
        self.has_with(relation, QueryOperator::LessThan, 1, Connective::Or, None)
    }

    /// Rows with at least one related row matching `callback`
    pub fn where_has<F>(self, relation: &str, callback: F) -> OrmResult<Self>
    where
        F: Fn(Builder) -> Builder,
    {
        self.has_with(
            relation,
            QueryOperator::GreaterThanOrEqual,
            1,
            Connective::And,
            Some(&callback),
        )
    }

    pub fn or_where_has<F>(self, relation: &str, callback: F) -> OrmResult<Self>
    where
        F: Fn(Builder) -> Builder,
    {
        self.has_with(
            relation,
            QueryOperator::GreaterThanOrEqual,
            1,
            Connective::Or,
            Some(&callback),
        )
    }

    pub fn where_doesnt_have<F>(self, relation: &str, callback: F) -> OrmResult<Self>
    where
        F: Fn(Builder) -> Builder,
    {
        self.has_with(relation, QueryOperator::LessThan, 1, Connective::And, Some(&callback))
    }

    pub fn or_where_doesnt_have<F>(self, relation: &str, callback: F) -> OrmResult<Self>
    where
        F: Fn(Builder) -> Builder,
    {
        self.has_with(relation, QueryOperator::LessThan, 1, Connective::Or, Some(&callback))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::ModelError;
    use crate::model::{Model, Record};
    use crate::relationships::Relation;

    #[derive(Debug)]
    struct Writer;

    #[derive(Debug)]
    struct Essay;

    #[derive(Debug)]
    struct Note;

    impl Model for Writer {
        fn table_name(&self) -> &str {
            "writers"
        }

        fn model_name(&self) -> &str {
            "Writer"
        }

        fn relation(&self, parent: &Record, name: &str) -> Option<Relation> {
            match name {
                "essays" => Some(parent.has_many(Essay, "writer_id", "id").into()),
                "mentees" => Some(parent.has_many(Writer, "mentor_id", "id").into()),
                "mentor" => Some(parent.belongs_to(Writer, "mentor_id", "id").into()),
                _ => None,
            }
        }
    }

    impl Model for Essay {
        fn table_name(&self) -> &str {
            "essays"
        }

        fn model_name(&self) -> &str {
            "Essay"
        }

        fn relation(&self, parent: &Record, name: &str) -> Option<Relation> {
            match name {
                "notes" => Some(parent.has_many(Note, "essay_id", "id").into()),
                _ => None,
            }
        }
    }

    impl Model for Note {
        fn table_name(&self) -> &str {
            "notes"
        }

        fn model_name(&self) -> &str {
            "Note"
        }
    }

    fn writers() -> Builder {
        Builder::new(Arc::new(Writer), None)
    }

    #[test]
    fn test_has_compiles_to_exists() {
        let sql = writers().has("essays").unwrap().to_sql();
        assert_eq!(
            sql,
            concat!(
                r#"SELECT * FROM "writers" WHERE EXISTS (SELECT * FROM "essays" "#,
                r#"WHERE "essays"."writer_id" = "writers"."id")"#
            )
        );
    }

    #[test]
    fn test_doesnt_have_compiles_to_not_exists() {
        let sql = writers().doesnt_have("essays").unwrap().to_sql();
        assert!(sql.contains("WHERE NOT EXISTS (SELECT * FROM \"essays\""));
    }

    #[test]
    fn test_count_comparison_uses_count_subquery() {
        let sql = writers()
            .has_count("essays", QueryOperator::GreaterThanOrEqual, 3)
            .unwrap()
            .to_sql();
        assert_eq!(
            sql,
            concat!(
                r#"SELECT * FROM "writers" WHERE (SELECT COUNT(*) AS "aggregate" FROM "essays" "#,
                r#"WHERE "essays"."writer_id" = "writers"."id") >= $1"#
            )
        );
    }

    #[test]
    fn test_where_has_callback_and_nesting() {
        let (sql, params) = writers()
            .where_has("essays.notes", |q| q.where_eq("notes.flagged", true))
            .unwrap()
            .to_query()
            .to_sql_with_params();
        assert_eq!(
            sql,
            concat!(
                r#"SELECT * FROM "writers" WHERE EXISTS (SELECT * FROM "essays" "#,
                r#"WHERE "essays"."writer_id" = "writers"."id" "#,
                r#"AND EXISTS (SELECT * FROM "notes" "#,
                r#"WHERE "notes"."essay_id" = "essays"."id" AND "notes"."flagged" = $1))"#
            )
        );
        assert_eq!(params, vec![serde_json::json!(true)]);
    }

    /// Table aliases in order of appearance
    fn aliases(sql: &str) -> Vec<String> {
        sql.split(" AS \"")
            .skip(1)
            .filter_map(|rest| rest.split('"').next())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_self_relation_aliases_inner_table() {
        let sql = writers().has("mentees").unwrap().to_sql();
        let alias = &aliases(&sql)[0];
        assert!(alias.starts_with("relorm_reserved_"));
        assert_eq!(
            sql,
            format!(
                concat!(
                    r#"SELECT * FROM "writers" WHERE EXISTS (SELECT * FROM "writers" AS "{a}" "#,
                    r#"WHERE "{a}"."mentor_id" = "writers"."id")"#
                ),
                a = alias
            )
        );

        let sql = writers().has("mentor").unwrap().to_sql();
        let alias = &aliases(&sql)[0];
        assert_eq!(
            sql,
            format!(
                concat!(
                    r#"SELECT * FROM "writers" WHERE EXISTS (SELECT * FROM "writers" AS "{a}" "#,
                    r#"WHERE "{a}"."id" = "writers"."mentor_id")"#
                ),
                a = alias
            )
        );
    }

    #[test]
    fn test_nested_self_relation_correlates_with_alias() {
        let sql = writers().has("mentees.mentees").unwrap().to_sql();
        let found = aliases(&sql);
        assert_eq!(found.len(), 1);
        assert_eq!(
            sql,
            format!(
                concat!(
                    r#"SELECT * FROM "writers" WHERE EXISTS (SELECT * FROM "writers" AS "{a}" "#,
                    r#"WHERE "{a}"."mentor_id" = "writers"."id" "#,
                    r#"AND EXISTS (SELECT * FROM "writers" "#,
                    r#"WHERE "writers"."mentor_id" = "{a}"."id"))"#
                ),
                a = found[0]
            )
        );
    }

    #[test]
    fn test_unknown_relation() {
        let err = writers().has("drafts").unwrap_err();
        assert_eq!(
            err,
            ModelError::RelationNotFound {
                model: "Writer".to_string(),
                relation: "drafts".to_string()
            }
        );
    }
}
