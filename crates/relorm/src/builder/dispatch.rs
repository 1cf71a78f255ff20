//! Dynamic calls by name
//!
//! `call` resolves a name in a fixed order: macros registered on this builder,
//! process-wide macros, the model's local scopes, then a short list of query
//! methods that take JSON arguments. Anything else is a `BadMethodCall`.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::Value;
use tracing::trace;

use super::Builder;
use crate::error::{ModelError, OrmResult};
use crate::query::{OrderDirection, QueryOperator};

/// A named builder extension taking JSON arguments
pub type Macro = Arc<dyn Fn(Builder, &[Value]) -> OrmResult<Builder> + Send + Sync>;

static GLOBAL_MACROS: Lazy<DashMap<String, Macro>> = Lazy::new(DashMap::new);

/// Query methods reachable through `call`
const DELEGATED: &[&str] = &[
    "where",
    "or_where",
    "where_in",
    "where_not_in",
    "where_null",
    "where_not_null",
    "order_by",
    "order_by_desc",
    "limit",
    "offset",
    "take",
    "skip",
    "select",
    "group_by",
    "latest",
    "oldest",
];

impl Builder {
    /// Register a macro on this builder only
    pub fn register_macro<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(Builder, &[Value]) -> OrmResult<Builder> + Send + Sync + 'static,
    {
        self.local_macros.insert(name.to_string(), Arc::new(f));
        self
    }

    /// Register a macro for every builder in the process
    pub fn register_global_macro<F>(name: &str, f: F)
    where
        F: Fn(Builder, &[Value]) -> OrmResult<Builder> + Send + Sync + 'static,
    {
        GLOBAL_MACROS.insert(name.to_string(), Arc::new(f));
    }

    pub fn has_macro(&self, name: &str) -> bool {
        self.local_macros.contains_key(name) || GLOBAL_MACROS.contains_key(name)
    }

    pub fn has_global_macro(name: &str) -> bool {
        GLOBAL_MACROS.contains_key(name)
    }

    /// Apply the model's local scope `name`
    pub fn scope(self, name: &str, args: &[Value]) -> OrmResult<Self> {
        match self.model.local_scope(name) {
            Some(scope) => self.try_call_scope(|builder| scope(builder, args)),
            None => Err(self.bad_method(name)),
        }
    }

    /// Call a macro, local scope or delegated query method by name
    pub fn call(self, name: &str, args: &[Value]) -> OrmResult<Self> {
        if let Some(found) = self.local_macros.get(name).cloned() {
            trace!(method = name, "calling builder macro");
            return found(self, args);
        }
        let global = GLOBAL_MACROS.get(name).map(|entry| entry.value().clone());
        if let Some(found) = global {
            trace!(method = name, "calling global macro");
            return found(self, args);
        }
        if let Some(scope) = self.model.local_scope(name) {
            return self.try_call_scope(|builder| scope(builder, args));
        }
        if DELEGATED.contains(&name) {
            return self.call_delegated(name, args);
        }
        Err(self.bad_method(name))
    }

    fn bad_method(&self, name: &str) -> ModelError {
        ModelError::BadMethodCall {
            model: self.model.model_name().to_string(),
            method: name.to_string(),
        }
    }

    fn call_delegated(self, name: &str, args: &[Value]) -> OrmResult<Self> {
        match name {
            "where" | "or_where" => {
                let column = string_arg(name, args, 0)?;
                let (operator, value) = match args.len() {
                    2 => (QueryOperator::Equal, args[1].clone()),
                    3 => {
                        let operator = string_arg(name, args, 1)?;
                        let operator = QueryOperator::parse(operator).ok_or_else(|| {
                            ModelError::InvalidArgument(format!(
                                "Unsupported operator [{}]",
                                operator
                            ))
                        })?;
                        (operator, args[2].clone())
                    }
                    n => {
                        return Err(ModelError::InvalidArgument(format!(
                            "[{}] expects 2 or 3 arguments, got {}",
                            name, n
                        )))
                    }
                };
                if name == "where" {
                    Ok(self.where_op(column, operator, value))
                } else {
                    Ok(self.or_where_op(column, operator, value))
                }
            }
            "where_in" | "where_not_in" => {
                let column = string_arg(name, args, 0)?;
                let values = match args.get(1) {
                    Some(Value::Array(values)) => values.clone(),
                    _ => {
                        return Err(ModelError::InvalidArgument(format!(
                            "[{}] expects an array of values",
                            name
                        )))
                    }
                };
                if name == "where_in" {
                    Ok(self.where_in(column, values))
                } else {
                    Ok(self.where_not_in(column, values))
                }
            }
            "where_null" => Ok(self.where_null(string_arg(name, args, 0)?)),
            "where_not_null" => Ok(self.where_not_null(string_arg(name, args, 0)?)),
            "order_by" => {
                let column = string_arg(name, args, 0)?;
                let direction = match args.get(1).and_then(Value::as_str) {
                    Some(d) if d.eq_ignore_ascii_case("desc") => OrderDirection::Desc,
                    _ => OrderDirection::Asc,
                };
                Ok(self.order_by_direction(column, direction))
            }
            "order_by_desc" => Ok(self.order_by_desc(string_arg(name, args, 0)?)),
            "limit" | "take" => Ok(self.limit(int_arg(name, args, 0)?)),
            "offset" | "skip" => Ok(self.offset(int_arg(name, args, 0)?)),
            "select" | "group_by" => {
                let columns = args
                    .iter()
                    .map(|arg| {
                        arg.as_str().map(str::to_string).ok_or_else(|| {
                            ModelError::InvalidArgument(format!("[{}] expects column names", name))
                        })
                    })
                    .collect::<OrmResult<Vec<String>>>()?;
                if name == "select" {
                    Ok(self.select_columns(columns))
                } else {
                    Ok(columns.iter().fold(self, |b, column| b.group_by(column)))
                }
            }
            "latest" => {
                let column = args.first().and_then(Value::as_str).map(str::to_string);
                Ok(self.latest(column.as_deref()))
            }
            "oldest" => {
                let column = args.first().and_then(Value::as_str).map(str::to_string);
                Ok(self.oldest(column.as_deref()))
            }
            _ => Err(self.bad_method(name)),
        }
    }
}

fn string_arg<'a>(method: &str, args: &'a [Value], index: usize) -> OrmResult<&'a str> {
    args.get(index).and_then(Value::as_str).ok_or_else(|| {
        ModelError::InvalidArgument(format!(
            "[{}] expects a string at argument {}",
            method,
            index + 1
        ))
    })
}

fn int_arg(method: &str, args: &[Value], index: usize) -> OrmResult<i64> {
    args.get(index).and_then(Value::as_i64).ok_or_else(|| {
        ModelError::InvalidArgument(format!(
            "[{}] expects an integer at argument {}",
            method,
            index + 1
        ))
    })
}
