//! Query Builder SQL generation
//!
//! Every value becomes a `$n` placeholder; identifiers are quoted per segment.
//! Subqueries share the parameter list of the query that embeds them.

use serde_json::Value;

use super::builder::QueryBuilder;
use super::types::*;
use crate::security::{escape_identifier, is_plain_reference, quote_reference};

impl QueryBuilder {
    /// Generate SQL with `$n` placeholders and the values bound to them
    pub fn to_sql_with_params(&self) -> (String, Vec<Value>) {
        let mut compiler = SqlCompiler::default();
        let sql = compiler.compile(self);
        (sql, compiler.params)
    }

    /// Generate SQL with placeholders, dropping the bound values
    pub fn to_sql(&self) -> String {
        self.to_sql_with_params().0
    }
}

#[derive(Default)]
struct SqlCompiler {
    params: Vec<Value>,
}

impl SqlCompiler {
    fn bind(&mut self, value: &Value) -> String {
        self.params.push(value.clone());
        format!("${}", self.params.len())
    }

    fn compile(&mut self, query: &QueryBuilder) -> String {
        match query.query_type {
            QueryType::Select => self.compile_select(query),
            QueryType::Insert => self.compile_insert(query),
            QueryType::Update => self.compile_update(query),
            QueryType::Delete => self.compile_delete(query),
        }
    }

    fn compile_select(&mut self, query: &QueryBuilder) -> String {
        let mut sql = String::from("SELECT ");
        if query.distinct {
            sql.push_str("DISTINCT ");
        }

        match query.aggregate {
            Some(Aggregate::Count) => sql.push_str("COUNT(*) AS \"aggregate\""),
            None if query.select_fields.is_empty() => sql.push('*'),
            None => {
                let columns: Vec<String> = query
                    .select_fields
                    .iter()
                    .map(|field| column_sql(field))
                    .collect();
                sql.push_str(&columns.join(", "));
            }
        }

        if !query.from_tables.is_empty() {
            sql.push_str(" FROM ");
            let tables: Vec<String> =
                query.from_tables.iter().map(|t| quote_reference(t)).collect();
            sql.push_str(&tables.join(", "));
        }

        for join in &query.joins {
            sql.push_str(&format!(" {} {} ON ", join.join_type, quote_reference(&join.table)));
            let on: Vec<String> = join
                .on_conditions
                .iter()
                .map(|(left, right)| {
                    format!("{} = {}", quote_reference(left), quote_reference(right))
                })
                .collect();
            sql.push_str(&on.join(" AND "));
        }

        self.push_where(&mut sql, &query.where_conditions);

        if !query.group_by.is_empty() {
            let groups: Vec<String> = query.group_by.iter().map(|g| column_sql(g)).collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&groups.join(", "));
        }

        if !query.order_by.is_empty() {
            let orders: Vec<String> = query
                .order_by
                .iter()
                .map(|(column, direction)| format!("{} {}", column_sql(column), direction))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(", "));
        }

        if let Some(limit) = query.limit_count {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = query.offset_value {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        sql
    }

    fn compile_insert(&mut self, query: &QueryBuilder) -> String {
        let table = query.table_name().unwrap_or_default();
        let mut sql = format!("INSERT INTO {}", quote_reference(table));

        if query.insert_rows.is_empty() {
            sql.push_str(" DEFAULT VALUES");
            return sql;
        }
        // Union of every row's columns, in first-seen order
        let mut columns: Vec<&String> = Vec::new();
        for column in query.insert_rows.iter().flat_map(|row| row.keys()) {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        let quoted: Vec<String> = columns.iter().map(|c| escape_identifier(c)).collect();
        sql.push_str(&format!(" ({}) VALUES ", quoted.join(", ")));

        let mut tuples = Vec::with_capacity(query.insert_rows.len());
        for row in &query.insert_rows {
            let placeholders: Vec<String> = columns
                .iter()
                .map(|column| self.bind(row.get(column.as_str()).unwrap_or(&Value::Null)))
                .collect();
            tuples.push(format!("({})", placeholders.join(", ")));
        }
        sql.push_str(&tuples.join(", "));
        sql
    }

    fn compile_update(&mut self, query: &QueryBuilder) -> String {
        let table = query.table_name().unwrap_or_default();
        let mut sql = format!("UPDATE {} SET ", quote_reference(table));
        let sets: Vec<String> = query
            .set_clauses
            .iter()
            .map(|clause| {
                format!("{} = {}", escape_identifier(&clause.column), self.bind(&clause.value))
            })
            .collect();
        sql.push_str(&sets.join(", "));
        self.push_where(&mut sql, &query.where_conditions);
        sql
    }

    fn compile_delete(&mut self, query: &QueryBuilder) -> String {
        let table = query.table_name().unwrap_or_default();
        let mut sql = format!("DELETE FROM {}", quote_reference(table));
        self.push_where(&mut sql, &query.where_conditions);
        sql
    }

    fn push_where(&mut self, sql: &mut String, conditions: &[WhereCondition]) {
        if conditions.is_empty() {
            return;
        }
        sql.push_str(" WHERE ");
        let body = self.compile_conditions(conditions);
        sql.push_str(&body);
    }

    fn compile_conditions(&mut self, conditions: &[WhereCondition]) -> String {
        let mut sql = String::new();
        for (i, condition) in conditions.iter().enumerate() {
            if i > 0 {
                sql.push_str(&format!(" {} ", condition.connective));
            }
            let fragment = self.compile_condition(&condition.kind);
            sql.push_str(&fragment);
        }
        sql
    }

    fn compile_condition(&mut self, kind: &ConditionKind) -> String {
        match kind {
            ConditionKind::Basic { column, operator, value } => match (operator, value) {
                (QueryOperator::Equal, Value::Null) => format!("{} IS NULL", column_sql(column)),
                (QueryOperator::NotEqual, Value::Null) => {
                    format!("{} IS NOT NULL", column_sql(column))
                }
                _ => format!("{} {} {}", column_sql(column), operator, self.bind(value)),
            },
            ConditionKind::In { values, negated, .. } if values.is_empty() => {
                // Nothing is IN an empty set, everything is NOT IN it
                if *negated { "1 = 1".to_string() } else { "0 = 1".to_string() }
            }
            ConditionKind::In { column, values, negated } => {
                let placeholders: Vec<String> = values.iter().map(|v| self.bind(v)).collect();
                let keyword = if *negated { "NOT IN" } else { "IN" };
                format!("{} {} ({})", column_sql(column), keyword, placeholders.join(", "))
            }
            ConditionKind::Null { column, negated } => {
                let keyword = if *negated { "IS NOT NULL" } else { "IS NULL" };
                format!("{} {}", column_sql(column), keyword)
            }
            ConditionKind::Between { column, low, high } => {
                let low = self.bind(low);
                let high = self.bind(high);
                format!("{} BETWEEN {} AND {}", column_sql(column), low, high)
            }
            ConditionKind::Column { first, operator, second } => {
                format!("{} {} {}", column_sql(first), operator, column_sql(second))
            }
            ConditionKind::Raw { sql, bindings } => self.compile_raw(sql, bindings),
            ConditionKind::Nested(conditions) => {
                format!("({})", self.compile_conditions(conditions))
            }
            ConditionKind::Count { query, operator, count } => {
                let subquery = self.compile(query);
                let count = self.bind(&Value::from(*count));
                format!("({}) {} {}", subquery, operator, count)
            }
            ConditionKind::Exists { query, negated } => {
                let subquery = self.compile(query);
                let keyword = if *negated { "NOT EXISTS" } else { "EXISTS" };
                format!("{} ({})", keyword, subquery)
            }
        }
    }

    /// Replace each `?` with the next placeholder
    fn compile_raw(&mut self, sql: &str, bindings: &[Value]) -> String {
        let mut out = String::with_capacity(sql.len());
        let mut bindings = bindings.iter();
        for c in sql.chars() {
            if c == '?' {
                if let Some(value) = bindings.next() {
                    out.push_str(&self.bind(value));
                    continue;
                }
            }
            out.push(c);
        }
        format!("({})", out)
    }
}

fn column_sql(column: &str) -> String {
    if is_plain_reference(column) {
        quote_reference(column)
    } else {
        column.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_select_with_where_in() {
        let query = QueryBuilder::table("posts")
            .select("posts.*")
            .where_in("posts.user_id", vec![1, 2, 3])
            .order_by("posts.id");

        let (sql, params) = query.to_sql_with_params();
        assert_eq!(
            sql,
            concat!(
                "SELECT \"posts\".* FROM \"posts\" ",
                "WHERE \"posts\".\"user_id\" IN ($1, $2, $3) ORDER BY \"posts\".\"id\" ASC"
            )
        );
        assert_eq!(params, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_empty_in_never_matches() {
        let sql = QueryBuilder::table("posts").where_in::<i64>("id", vec![]).to_sql();
        assert_eq!(sql, "SELECT * FROM \"posts\" WHERE 0 = 1");

        let sql = QueryBuilder::table("posts").where_not_in::<i64>("id", vec![]).to_sql();
        assert_eq!(sql, "SELECT * FROM \"posts\" WHERE 1 = 1");
    }

    #[test]
    fn test_or_connective_and_nested() {
        let (sql, params) = QueryBuilder::table("users")
            .where_eq("active", true)
            .where_nested(Connective::Or, |q| q.where_eq("role", "admin").or_where_null("role"))
            .to_sql_with_params();

        assert_eq!(
            sql,
            "SELECT * FROM \"users\" WHERE \"active\" = $1 OR (\"role\" = $2 OR \"role\" IS NULL)"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_exists_subquery_shares_parameters() {
        let sub = QueryBuilder::table("posts")
            .where_column("users.id", QueryOperator::Equal, "posts.user_id")
            .where_eq("published", true);
        let (sql, params) = QueryBuilder::table("users")
            .where_eq("name", "ada")
            .where_exists(Connective::And, sub, false)
            .to_sql_with_params();

        assert_eq!(
            sql,
            concat!(
                "SELECT * FROM \"users\" WHERE \"name\" = $1 AND EXISTS (SELECT * FROM \"posts\" ",
                "WHERE \"users\".\"id\" = \"posts\".\"user_id\" AND \"published\" = $2)"
            )
        );
        assert_eq!(params, vec![json!("ada"), json!(true)]);
    }

    #[test]
    fn test_count_subquery() {
        let sub = QueryBuilder::table("posts").where_column(
            "users.id",
            QueryOperator::Equal,
            "posts.user_id",
        );
        let sql = QueryBuilder::table("users")
            .where_count(Connective::And, sub, QueryOperator::GreaterThanOrEqual, 3)
            .to_sql();

        assert_eq!(
            sql,
            concat!(
                "SELECT * FROM \"users\" WHERE (SELECT COUNT(*) AS \"aggregate\" FROM \"posts\" ",
                "WHERE \"users\".\"id\" = \"posts\".\"user_id\") >= $1"
            )
        );
    }

    #[test]
    fn test_raw_placeholders_are_numbered() {
        let (sql, params) = QueryBuilder::table("users")
            .where_eq("id", 1)
            .where_raw("lower(name) = ?", vec![json!("ada")])
            .to_sql_with_params();

        assert_eq!(sql, "SELECT * FROM \"users\" WHERE \"id\" = $1 AND (lower(name) = $2)");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_multi_row_insert() {
        let mut first = Row::new();
        first.insert("user_id".into(), json!(1));
        first.insert("role_id".into(), json!(2));
        let mut second = Row::new();
        second.insert("user_id".into(), json!(1));
        second.insert("role_id".into(), json!(3));

        let (sql, params) = QueryBuilder::new()
            .insert_into("role_user")
            .values_many(vec![first, second])
            .to_sql_with_params();

        assert_eq!(
            sql,
            "INSERT INTO \"role_user\" (\"user_id\", \"role_id\") VALUES ($1, $2), ($3, $4)"
        );
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_update_and_delete() {
        let (sql, params) = QueryBuilder::table("users")
            .where_eq("id", 7)
            .into_update()
            .set("name", "grace")
            .to_sql_with_params();
        assert_eq!(sql, "UPDATE \"users\" SET \"name\" = $1 WHERE \"id\" = $2");
        assert_eq!(params, vec![json!("grace"), json!(7)]);

        let sql = QueryBuilder::new().delete_from("users").where_eq("id", 7).to_sql();
        assert_eq!(sql, "DELETE FROM \"users\" WHERE \"id\" = $1");
    }

    #[test]
    fn test_join_with_alias_and_limit() {
        let sql = QueryBuilder::table("roles")
            .select("roles.*, role_user.user_id as pivot_user_id")
            .join("role_user", "roles.id", "role_user.role_id")
            .limit(10)
            .offset(20)
            .to_sql();

        assert_eq!(
            sql,
            concat!(
                "SELECT \"roles\".*, \"role_user\".\"user_id\" AS \"pivot_user_id\" ",
                "FROM \"roles\" INNER JOIN \"role_user\" ",
                "ON \"roles\".\"id\" = \"role_user\".\"role_id\" ",
                "LIMIT 10 OFFSET 20"
            )
        );
    }
}
