//! Matching dictionaries for eager loading
//!
//! Related rows are bucketed by their join key once, then every parent picks
//! its bucket, so matching is linear in parents plus results.

use std::collections::HashMap;

use serde_json::Value;

use crate::model::Record;

/// Normalized dictionary key; NULL (and non-scalar) values never match
pub fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Array(_) | Value::Object(_) => None,
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Some(i.to_string()),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Some((f as i64).to_string())
            }
            _ => Some(n.to_string()),
        },
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
    }
}

/// Distinct non-null values of `column` across `models`, in first-seen order
pub fn unique_keys<'a, I>(models: I, column: &str) -> Vec<Value>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut seen = std::collections::HashSet::new();
    let mut keys = Vec::new();
    for model in models {
        let value = model.get_value(column);
        if let Some(key) = key_string(&value) {
            if seen.insert(key) {
                keys.push(value);
            }
        }
    }
    keys
}

/// Bucket `results` by the key `key_of` extracts, keeping result order inside buckets
pub fn build_dictionary<F>(
    results: impl IntoIterator<Item = Record>,
    key_of: F,
) -> HashMap<String, Vec<Record>>
where
    F: Fn(&Record) -> Value,
{
    let mut dictionary: HashMap<String, Vec<Record>> = HashMap::new();
    for result in results {
        if let Some(key) = key_string(&key_of(&result)) {
            dictionary.entry(key).or_default().push(result);
        }
    }
    dictionary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Post;

    impl Model for Post {
        fn table_name(&self) -> &str {
            "posts"
        }

        fn model_name(&self) -> &str {
            "Post"
        }
    }

    fn post(value: Value) -> Record {
        let row = value.as_object().cloned().unwrap_or_default();
        Record::hydrate(Arc::new(Post), row, None)
    }

    #[test]
    fn test_key_normalization() {
        assert_eq!(key_string(&json!(7)), Some("7".to_string()));
        assert_eq!(key_string(&json!("7")), Some("7".to_string()));
        assert_eq!(key_string(&json!(7.0)), Some("7".to_string()));
        assert_eq!(key_string(&Value::Null), None);
        assert_eq!(key_string(&json!([1])), None);
    }

    #[test]
    fn test_dictionary_skips_null_keys() {
        let results = vec![
            post(json!({"id": 1, "user_id": 7})),
            post(json!({"id": 2, "user_id": null})),
            post(json!({"id": 3, "user_id": 7})),
        ];
        let dictionary = build_dictionary(results, |r| r.get_value("user_id"));

        assert_eq!(dictionary.len(), 1);
        let ids: Vec<Value> = dictionary["7"].iter().map(Record::key).collect();
        assert_eq!(ids, vec![json!(1), json!(3)]);
    }

    #[test]
    fn test_unique_keys() {
        let models = vec![
            post(json!({"user_id": 1})),
            post(json!({"user_id": null})),
            post(json!({"user_id": 1})),
            post(json!({"user_id": 2})),
        ];
        assert_eq!(unique_keys(&models, "user_id"), vec![json!(1), json!(2)]);
    }
}
