//! PostgreSQL Backend Implementation
//!
//! Compiles queries to SQL with `$n` placeholders and runs them on a sqlx pool.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{Column, Pool, Postgres, Row as SqlxRow, TypeInfo};
use tracing::{debug, warn};

use super::core::Connection;
use crate::config::DatabaseConfig;
use crate::error::{OrmError, OrmResult};
use crate::query::{QueryBuilder, Row};
use crate::security::escape_identifier;

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// PostgreSQL connection backed by a sqlx pool
#[derive(Debug, Clone)]
pub struct PostgresConnection {
    pool: Pool<Postgres>,
}

impl PostgresConnection {
    /// Open a pool according to `config`
    pub async fn connect(config: &DatabaseConfig) -> OrmResult<Self> {
        config.validate()?;

        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout))
            .test_before_acquire(config.test_before_acquire);

        if let Some(idle_timeout) = config.idle_timeout {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }
        if let Some(max_lifetime) = config.max_lifetime {
            options = options.max_lifetime(Duration::from_secs(max_lifetime));
        }

        let pool = options
            .connect(&config.url)
            .await
            .map_err(|e| OrmError::Connection(format!("Failed to create PostgreSQL pool: {}", e)))?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    async fn fetch(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<PgRow>> {
        debug!(target: "relorm::sql", sql, bindings = params.len(), "select");
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn select(&self, query: &QueryBuilder) -> OrmResult<Vec<Row>> {
        let (sql, params) = query.to_sql_with_params();
        let rows = self.fetch(&sql, &params).await?;
        rows.iter().map(row_to_map).collect()
    }

    async fn execute(&self, query: &QueryBuilder) -> OrmResult<u64> {
        let (sql, params) = query.to_sql_with_params();
        debug!(target: "relorm::sql", sql = %sql, bindings = params.len(), "execute");

        let mut statement = sqlx::query(&sql);
        for param in &params {
            statement = bind_value(statement, param);
        }
        let result = statement.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn insert_get_id(&self, query: &QueryBuilder, key: &str) -> OrmResult<Value> {
        let (sql, params) = query.to_sql_with_params();
        let sql = format!("{} RETURNING {}", sql, escape_identifier(key));
        let rows = self.fetch(&sql, &params).await?;

        let row = rows
            .first()
            .ok_or_else(|| OrmError::Query("INSERT returned no rows".to_string()))?;
        let mut attributes = row_to_map(row)?;
        Ok(attributes.remove(key).unwrap_or(Value::Null))
    }

    fn backend_name(&self) -> &'static str {
        "postgresql"
    }
}

/// Bind a JSON value to a sqlx query with the closest native type
fn bind_value<'q>(query: PgQuery<'q>, value: &Value) -> PgQuery<'q> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.clone()),
    }
}

fn row_to_map(row: &PgRow) -> OrmResult<Row> {
    let mut map = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), column_value(row, index)?);
    }
    Ok(map)
}

/// Convert a PostgreSQL column value to JSON
fn column_value(row: &PgRow, index: usize) -> OrmResult<Value> {
    let type_name = row.columns()[index].type_info().name().to_string();

    let decode_error = |e: sqlx::Error| {
        OrmError::Query(format!("Failed to decode {} column: {}", type_name, e))
    };

    let value = match type_name.as_str() {
        "BOOL" => row.try_get::<Option<bool>, _>(index).map_err(decode_error)?.map(Value::from),
        "INT2" => row.try_get::<Option<i16>, _>(index).map_err(decode_error)?.map(Value::from),
        "INT4" => row.try_get::<Option<i32>, _>(index).map_err(decode_error)?.map(Value::from),
        "INT8" => row.try_get::<Option<i64>, _>(index).map_err(decode_error)?.map(Value::from),
        "FLOAT4" => row.try_get::<Option<f32>, _>(index).map_err(decode_error)?.map(Value::from),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index).map_err(decode_error)?.map(Value::from),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(index).map_err(decode_error)?.map(Value::from)
        }
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(index)
            .map_err(decode_error)?
            .map(|u| Value::from(u.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)
            .map_err(decode_error)?
            .map(|dt| Value::from(dt.to_rfc3339())),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)
            .map_err(decode_error)?
            .map(|dt| Value::from(dt.to_string())),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(index)
            .map_err(decode_error)?
            .map(|d| Value::from(d.to_string())),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(index).map_err(decode_error)?,
        other => match row.try_get::<Option<String>, _>(index) {
            Ok(value) => value.map(Value::from),
            Err(e) => {
                warn!(column_type = other, error = %e, "Dropping undecodable column value");
                None
            }
        },
    };

    Ok(value.unwrap_or(Value::Null))
}
