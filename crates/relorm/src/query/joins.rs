//! Query Builder JOIN operations

use super::builder::QueryBuilder;
use super::types::*;

impl QueryBuilder {
    /// Add INNER JOIN to the query
    pub fn join(self, table: &str, left_col: &str, right_col: &str) -> Self {
        self.join_with(JoinType::Inner, table, left_col, right_col)
    }

    /// Add LEFT JOIN to the query
    pub fn left_join(self, table: &str, left_col: &str, right_col: &str) -> Self {
        self.join_with(JoinType::Left, table, left_col, right_col)
    }

    /// Add RIGHT JOIN to the query
    pub fn right_join(self, table: &str, left_col: &str, right_col: &str) -> Self {
        self.join_with(JoinType::Right, table, left_col, right_col)
    }

    pub fn join_with(
        mut self,
        join_type: JoinType,
        table: &str,
        left_col: &str,
        right_col: &str,
    ) -> Self {
        self.joins.push(JoinClause {
            join_type,
            table: table.to_string(),
            on_conditions: vec![(left_col.to_string(), right_col.to_string())],
        });
        self
    }

    /// Read the joined `table` under `alias`
    pub(crate) fn alias_join(mut self, table: &str, alias: &str) -> Self {
        for join in self.joins.iter_mut().filter(|j| j.table == table) {
            join.table = format!("{} as {}", table, alias);
        }
        self.rename_join_references(table, alias)
    }

    /// Point join conditions naming `table.column` at `alias.column`
    pub(crate) fn rename_join_references(mut self, table: &str, alias: &str) -> Self {
        let prefix = format!("{}.", table);
        for join in &mut self.joins {
            for (left, right) in &mut join.on_conditions {
                for side in [left, right] {
                    if let Some(column) = side.strip_prefix(prefix.as_str()).map(str::to_string) {
                        *side = format!("{}.{}", alias, column);
                    }
                }
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_join_renames_conditions() {
        let query = QueryBuilder::table("products")
            .join("categories", "categories.id", "products.category_id")
            .alias_join("categories", "c2");
        assert_eq!(query.joins[0].table, "categories as c2");
        assert_eq!(
            query.joins[0].on_conditions,
            vec![("c2.id".to_string(), "products.category_id".to_string())]
        );
        assert_eq!(
            query.to_sql(),
            concat!(
                r#"SELECT * FROM "products" "#,
                r#"INNER JOIN "categories" AS "c2" ON "c2"."id" = "products"."category_id""#
            )
        );
    }
}
