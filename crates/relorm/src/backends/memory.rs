//! In-memory backend
//!
//! Evaluates structured queries against tables held in memory. It understands
//! everything the ORM itself generates (joins, correlated `EXISTS` and `COUNT`
//! subqueries, ordering, grouping, pagination and DML) and keeps a log of the
//! SQL each operation would have sent, which makes query counts observable in
//! tests. Raw SQL fragments are rejected.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use super::core::Connection;
use crate::error::{OrmError, OrmResult};
use crate::query::types::{
    ConditionKind, Connective, JoinType, OrderDirection, QueryOperator, QueryType, WhereCondition,
};
use crate::query::{compare_values, Aggregate, QueryBuilder, Row};
use crate::security::{is_plain_reference, split_alias};

/// One statement recorded by [`MemoryConnection`]
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedQuery {
    pub sql: String,
    pub bindings: Vec<Value>,
}

#[derive(Debug, Default)]
struct Database {
    tables: HashMap<String, Vec<Row>>,
    sequences: HashMap<String, i64>,
}

/// A row under evaluation: one named row per table in the FROM and JOIN clauses
type Tuple = Vec<(String, Row)>;

/// Connection that keeps every table in memory
#[derive(Debug, Default)]
pub struct MemoryConnection {
    db: RwLock<Database>,
    log: RwLock<Vec<LoggedQuery>>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure `table` exists, even without rows
    pub async fn create_table(&self, table: &str) {
        self.db.write().await.tables.entry(table.to_string()).or_default();
    }

    /// Append rows to `table`; every row must be a JSON object
    pub async fn seed<I>(&self, table: &str, rows: I) -> OrmResult<()>
    where
        I: IntoIterator<Item = Value>,
    {
        let mut parsed = Vec::new();
        for row in rows {
            match row {
                Value::Object(map) => parsed.push(map),
                other => {
                    return Err(OrmError::InvalidArgument(format!(
                        "Seed rows for '{}' must be objects, got {}",
                        table, other
                    )))
                }
            }
        }
        self.db
            .write()
            .await
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(parsed);
        Ok(())
    }

    /// Snapshot of the rows currently stored in `table`
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        self.db.read().await.tables.get(table).cloned().unwrap_or_default()
    }

    /// Every statement run so far, oldest first
    pub async fn query_log(&self) -> Vec<LoggedQuery> {
        self.log.read().await.clone()
    }

    pub async fn query_count(&self) -> usize {
        self.log.read().await.len()
    }

    pub async fn flush_query_log(&self) {
        self.log.write().await.clear();
    }

    async fn record(&self, query: &QueryBuilder) {
        let (sql, bindings) = query.to_sql_with_params();
        debug!(
            target: "relorm::sql",
            sql = %sql,
            bindings = bindings.len(),
            backend = "memory",
            "query"
        );
        self.log.write().await.push(LoggedQuery { sql, bindings });
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn select(&self, query: &QueryBuilder) -> OrmResult<Vec<Row>> {
        self.record(query).await;
        let db = self.db.read().await;
        select_rows(&db, query, &[])
    }

    async fn execute(&self, query: &QueryBuilder) -> OrmResult<u64> {
        self.record(query).await;
        let mut db = self.db.write().await;
        match query.query_type() {
            QueryType::Insert => {
                let table = target_table(query)?;
                let rows = query.insert_rows().to_vec();
                let count = rows.len() as u64;
                db.tables.entry(table).or_default().extend(rows);
                Ok(count)
            }
            QueryType::Update => update_rows(&mut db, query),
            QueryType::Delete => delete_rows(&mut db, query),
            QueryType::Select => Err(OrmError::Query(
                "execute() expects an INSERT, UPDATE or DELETE".to_string(),
            )),
        }
    }

    async fn insert_get_id(&self, query: &QueryBuilder, key: &str) -> OrmResult<Value> {
        self.record(query).await;
        let table = target_table(query)?;
        let mut row = match query.insert_rows() {
            [row] => row.clone(),
            rows => {
                return Err(OrmError::Query(format!(
                    "insert_get_id() expects exactly one row, got {}",
                    rows.len()
                )))
            }
        };

        let mut db = self.db.write().await;
        let id = match row.get(key) {
            Some(value) if !value.is_null() => value.clone(),
            _ => {
                let id = Value::from(next_id(&mut db, &table, key));
                row.insert(key.to_string(), id.clone());
                id
            }
        };
        if let Some(id) = id.as_i64() {
            let sequence = db.sequences.entry(table.clone()).or_insert(0);
            *sequence = (*sequence).max(id);
        }
        db.tables.entry(table).or_default().push(row);
        Ok(id)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

fn target_table(query: &QueryBuilder) -> OrmResult<String> {
    query
        .table_name()
        .map(|t| split_alias(t).map_or(t, |(table, _)| table).trim().to_string())
        .ok_or_else(|| OrmError::Query("Query has no target table".to_string()))
}

fn next_id(db: &mut Database, table: &str, key: &str) -> i64 {
    let max_existing = db
        .tables
        .get(table)
        .map(|rows| {
            rows.iter()
                .filter_map(|r| r.get(key).and_then(Value::as_i64))
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0);
    let sequence = db.sequences.get(table).copied().unwrap_or(0);
    max_existing.max(sequence) + 1
}

/// `(table, binding name)` for `users` or `users as u`
fn parse_table(reference: &str) -> (String, String) {
    match split_alias(reference) {
        Some((table, alias)) => (table.to_string(), alias.to_string()),
        None => (reference.trim().to_string(), reference.trim().to_string()),
    }
}

fn table_rows(db: &Database, table: &str) -> Vec<Row> {
    db.tables.get(table).cloned().unwrap_or_default()
}

fn select_rows(db: &Database, query: &QueryBuilder, outer: &[&Tuple]) -> OrmResult<Vec<Row>> {
    let tuples = source_tuples(db, query, outer)?;

    let mut kept = Vec::with_capacity(tuples.len());
    for tuple in tuples {
        if eval_conditions(db, &query.where_conditions, &tuple, outer)? {
            kept.push(tuple);
        }
    }

    if !query.group_by.is_empty() {
        let mut seen: Vec<Vec<Value>> = Vec::new();
        kept.retain(|tuple| {
            let key: Vec<Value> = query.group_by.iter().map(|g| lookup(g, tuple, outer)).collect();
            if seen.contains(&key) {
                false
            } else {
                seen.push(key);
                true
            }
        });
    }

    if let Some(Aggregate::Count) = query.aggregate {
        let mut row = Row::new();
        row.insert("aggregate".to_string(), Value::from(kept.len() as i64));
        return Ok(vec![row]);
    }

    if !query.order_by.is_empty() {
        kept.sort_by(|a, b| compare_tuples(a, b, &query.order_by, outer));
    }

    let mut rows = Vec::with_capacity(kept.len());
    for tuple in &kept {
        rows.push(project(&query.select_fields, tuple)?);
    }
    if query.distinct {
        let mut unique: Vec<Row> = Vec::with_capacity(rows.len());
        for row in rows {
            if !unique.contains(&row) {
                unique.push(row);
            }
        }
        rows = unique;
    }

    let offset = query.offset_value.unwrap_or(0).max(0) as usize;
    let limit = query.limit_count.map_or(usize::MAX, |l| l.max(0) as usize);
    Ok(rows.into_iter().skip(offset).take(limit).collect())
}

fn source_tuples(db: &Database, query: &QueryBuilder, outer: &[&Tuple]) -> OrmResult<Vec<Tuple>> {
    let mut tuples: Vec<Tuple> = vec![Vec::new()];
    let mut names: Vec<String> = Vec::new();

    for reference in &query.from_tables {
        let (table, name) = parse_table(reference);
        let rows = table_rows(db, &table);
        let mut next = Vec::with_capacity(tuples.len() * rows.len());
        for tuple in &tuples {
            for row in &rows {
                let mut candidate = tuple.clone();
                candidate.push((name.clone(), row.clone()));
                next.push(candidate);
            }
        }
        tuples = next;
        names.push(name);
    }

    for join in &query.joins {
        let (table, name) = parse_table(&join.table);
        let rows = table_rows(db, &table);
        let mut next = Vec::new();

        match join.join_type {
            JoinType::Inner | JoinType::Left => {
                for tuple in &tuples {
                    let mut matched = false;
                    for row in &rows {
                        let mut candidate = tuple.clone();
                        candidate.push((name.clone(), row.clone()));
                        if join_matches(&candidate, &join.on_conditions, outer) {
                            next.push(candidate);
                            matched = true;
                        }
                    }
                    if !matched && join.join_type == JoinType::Left {
                        let mut candidate = tuple.clone();
                        candidate.push((name.clone(), Row::new()));
                        next.push(candidate);
                    }
                }
            }
            JoinType::Right => {
                for row in &rows {
                    let mut matched = false;
                    for tuple in &tuples {
                        let mut candidate = tuple.clone();
                        candidate.push((name.clone(), row.clone()));
                        if join_matches(&candidate, &join.on_conditions, outer) {
                            next.push(candidate);
                            matched = true;
                        }
                    }
                    if !matched {
                        let mut candidate: Tuple =
                            names.iter().map(|n| (n.clone(), Row::new())).collect();
                        candidate.push((name.clone(), row.clone()));
                        next.push(candidate);
                    }
                }
            }
        }

        tuples = next;
        names.push(name);
    }

    Ok(tuples)
}

fn join_matches(tuple: &Tuple, on: &[(String, String)], outer: &[&Tuple]) -> bool {
    on.iter().all(|(left, right)| {
        compare_values(&lookup(left, tuple, outer), &lookup(right, tuple, outer))
            == Some(Ordering::Equal)
    })
}

fn lookup(column: &str, tuple: &Tuple, outer: &[&Tuple]) -> Value {
    std::iter::once(tuple)
        .chain(outer.iter().copied())
        .find_map(|scope| lookup_in(column, scope))
        .unwrap_or(Value::Null)
}

fn lookup_in(column: &str, tuple: &Tuple) -> Option<Value> {
    match column.trim().rsplit_once('.') {
        Some((table, name)) => tuple
            .iter()
            .find(|(binding, _)| binding == table)
            .map(|(_, row)| row.get(name).cloned().unwrap_or(Value::Null)),
        None => tuple.iter().find_map(|(_, row)| row.get(column.trim()).cloned()),
    }
}

fn project(fields: &[String], tuple: &Tuple) -> OrmResult<Row> {
    let mut row = Row::new();
    if fields.is_empty() {
        merge_all(&mut row, tuple);
        return Ok(row);
    }

    for field in fields {
        let field = field.trim();
        if !is_plain_reference(field) {
            return Err(OrmError::Query(format!(
                "Unsupported select expression '{}' for the in-memory connection",
                field
            )));
        }
        let (target, alias) = match split_alias(field) {
            Some((target, alias)) => (target, Some(alias)),
            None => (field, None),
        };

        if target == "*" {
            merge_all(&mut row, tuple);
        } else if let Some(table) = target.strip_suffix(".*") {
            if let Some((_, source)) = tuple.iter().find(|(binding, _)| binding == table) {
                for (column, value) in source {
                    row.insert(column.clone(), value.clone());
                }
            }
        } else {
            let key = alias.unwrap_or_else(|| target.rsplit('.').next().unwrap_or(target));
            row.insert(key.to_string(), lookup(target, tuple, &[]));
        }
    }
    Ok(row)
}

fn merge_all(row: &mut Row, tuple: &Tuple) {
    for (_, source) in tuple {
        for (column, value) in source {
            row.insert(column.clone(), value.clone());
        }
    }
}

/// WHERE clauses bind AND tighter than OR
fn eval_conditions(
    db: &Database,
    conditions: &[WhereCondition],
    tuple: &Tuple,
    outer: &[&Tuple],
) -> OrmResult<bool> {
    let mut any_group = false;
    let mut group = true;
    for (i, condition) in conditions.iter().enumerate() {
        if i > 0 && condition.connective == Connective::Or {
            any_group |= group;
            group = true;
        }
        let result = eval_condition(db, &condition.kind, tuple, outer)?;
        group = group && result;
    }
    Ok(any_group || group)
}

fn eval_condition(
    db: &Database,
    kind: &ConditionKind,
    tuple: &Tuple,
    outer: &[&Tuple],
) -> OrmResult<bool> {
    Ok(match kind {
        ConditionKind::Basic { column, operator, value } => {
            let current = lookup(column, tuple, outer);
            match (operator, value) {
                (QueryOperator::Equal, Value::Null) => current.is_null(),
                (QueryOperator::NotEqual, Value::Null) => !current.is_null(),
                _ => satisfies(*operator, &current, value),
            }
        }
        ConditionKind::In { column, values, negated } => {
            let current = lookup(column, tuple, outer);
            if values.is_empty() {
                *negated
            } else if current.is_null() {
                false
            } else {
                let found = values
                    .iter()
                    .any(|v| compare_values(&current, v) == Some(Ordering::Equal));
                found != *negated
            }
        }
        ConditionKind::Null { column, negated } => {
            lookup(column, tuple, outer).is_null() != *negated
        }
        ConditionKind::Between { column, low, high } => {
            let current = lookup(column, tuple, outer);
            satisfies(QueryOperator::GreaterThanOrEqual, &current, low)
                && satisfies(QueryOperator::LessThanOrEqual, &current, high)
        }
        ConditionKind::Column { first, operator, second } => {
            satisfies(*operator, &lookup(first, tuple, outer), &lookup(second, tuple, outer))
        }
        ConditionKind::Raw { sql, .. } => {
            return Err(OrmError::Query(format!(
                "Raw SQL fragment '{}' cannot be evaluated by the in-memory connection",
                sql
            )))
        }
        ConditionKind::Nested(conditions) => eval_conditions(db, conditions, tuple, outer)?,
        ConditionKind::Count { query, operator, count } => {
            let scopes = nested_scopes(tuple, outer);
            let rows = select_rows(db, query, &scopes)?;
            let found = rows
                .first()
                .and_then(|row| row.get("aggregate"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            satisfies(*operator, &Value::from(found), &Value::from(*count))
        }
        ConditionKind::Exists { query, negated } => {
            let scopes = nested_scopes(tuple, outer);
            let rows = select_rows(db, query, &scopes)?;
            rows.is_empty() == *negated
        }
    })
}

fn nested_scopes<'a>(tuple: &'a Tuple, outer: &[&'a Tuple]) -> Vec<&'a Tuple> {
    let mut scopes = Vec::with_capacity(outer.len() + 1);
    scopes.push(tuple);
    scopes.extend_from_slice(outer);
    scopes
}

fn satisfies(operator: QueryOperator, left: &Value, right: &Value) -> bool {
    match operator {
        QueryOperator::Like => like(left, right).unwrap_or(false),
        QueryOperator::NotLike => like(left, right).map_or(false, |m| !m),
        _ => match compare_values(left, right) {
            None => false,
            Some(ordering) => match operator {
                QueryOperator::Equal => ordering == Ordering::Equal,
                QueryOperator::NotEqual => ordering != Ordering::Equal,
                QueryOperator::GreaterThan => ordering == Ordering::Greater,
                QueryOperator::GreaterThanOrEqual => ordering != Ordering::Less,
                QueryOperator::LessThan => ordering == Ordering::Less,
                QueryOperator::LessThanOrEqual => ordering != Ordering::Greater,
                QueryOperator::Like | QueryOperator::NotLike => false,
            },
        },
    }
}

/// NULL sorts after everything, like PostgreSQL
fn compare_tuples(
    a: &Tuple,
    b: &Tuple,
    orders: &[(String, OrderDirection)],
    outer: &[&Tuple],
) -> Ordering {
    for (column, direction) in orders {
        let left = lookup(column, a, outer);
        let right = lookup(column, b, outer);
        let ordering = match (left.is_null(), right.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => compare_values(&left, &right).unwrap_or(Ordering::Equal),
        };
        let ordering = match direction {
            OrderDirection::Asc => ordering,
            OrderDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn like(value: &Value, pattern: &Value) -> Option<bool> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let pattern = pattern.as_str()?;
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    Some(like_match(&text, &pattern))
}

fn like_match(text: &[char], pattern: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('%', rest)) => (0..=text.len()).any(|skip| like_match(&text[skip..], rest)),
        Some(('_', rest)) => !text.is_empty() && like_match(&text[1..], rest),
        Some((c, rest)) => text.first() == Some(c) && like_match(&text[1..], rest),
    }
}

fn matching_indexes(
    db: &Database,
    query: &QueryBuilder,
    table: &str,
    name: &str,
) -> OrmResult<Vec<usize>> {
    let mut indexes = Vec::new();
    if let Some(rows) = db.tables.get(table) {
        for (index, row) in rows.iter().enumerate() {
            let tuple: Tuple = vec![(name.to_string(), row.clone())];
            if eval_conditions(db, &query.where_conditions, &tuple, &[])? {
                indexes.push(index);
            }
        }
    }
    Ok(indexes)
}

fn update_rows(db: &mut Database, query: &QueryBuilder) -> OrmResult<u64> {
    let reference = query.table_name().unwrap_or_default();
    let (table, name) = parse_table(reference);
    let indexes = matching_indexes(db, query, &table, &name)?;

    if let Some(rows) = db.tables.get_mut(&table) {
        for index in &indexes {
            let row = &mut rows[*index];
            for clause in &query.set_clauses {
                let column = clause.column.rsplit('.').next().unwrap_or(&clause.column);
                row.insert(column.to_string(), clause.value.clone());
            }
        }
    }
    Ok(indexes.len() as u64)
}

fn delete_rows(db: &mut Database, query: &QueryBuilder) -> OrmResult<u64> {
    let reference = query.table_name().unwrap_or_default();
    let (table, name) = parse_table(reference);
    let indexes = matching_indexes(db, query, &table, &name)?;

    if let Some(rows) = db.tables.get_mut(&table) {
        let mut position = 0;
        rows.retain(|_| {
            let keep = !indexes.contains(&position);
            position += 1;
            keep
        });
    }
    Ok(indexes.len() as u64)
}
