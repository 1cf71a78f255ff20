//! Collections - ordered, keyed containers of records or values
//!
//! Transformations return new collections and leave the source untouched.
//! Keys are preserved by `filter`, `sort_by` and friends; call `values` to
//! renumber them.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::Value;

use crate::builder::{Builder, EagerLoad};
use crate::error::OrmResult;
use crate::model::Record;
use crate::query::compare_values;
use crate::relationships::dictionary::key_string;

/// Collection key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Index(i64),
    Name(String),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(i) => write!(f, "{}", i),
            Key::Name(name) => write!(f, "{}", name),
        }
    }
}

impl From<i64> for Key {
    fn from(index: i64) -> Self {
        Key::Index(index)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index as i64)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(name)
    }
}

impl Key {
    /// Key for an attribute value; `None` for values that cannot key a dictionary
    pub(crate) fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) if n.is_i64() => n.as_i64().map(Key::Index),
            other => key_string(other).map(Key::Name),
        }
    }
}

/// Ordered, keyed container.
///
/// A side index maps each key to its position so lookups and inserts do not
/// scan the items.
#[derive(Debug, Clone)]
pub struct Collection<T> {
    items: Vec<(Key, T)>,
    positions: HashMap<Key, usize>,
    next_index: i64,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            positions: HashMap::new(),
            next_index: 0,
        }
    }
}

impl<T: PartialEq> PartialEq for Collection<T> {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl<T> Collection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collection keyed `0..n`
    pub fn make<I: IntoIterator<Item = T>>(items: I) -> Self {
        let mut collection = Self::new();
        for item in items {
            collection.push(item);
        }
        collection
    }

    /// Collection from key/item pairs; a repeated key replaces the earlier item in place
    pub fn from_keyed(items: Vec<(Key, T)>) -> Self {
        let mut collection = Self::new();
        collection.items.reserve(items.len());
        for (key, item) in items {
            collection.put(key, item);
        }
        collection
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[(Key, T)] {
        &self.items
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.items.iter().map(|(key, _)| key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter().map(|(_, item)| item)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut().map(|(_, item)| item)
    }

    pub fn get(&self, key: impl Into<Key>) -> Option<&T> {
        let position = *self.positions.get(&key.into())?;
        self.items.get(position).map(|(_, item)| item)
    }

    pub fn get_or(&self, key: impl Into<Key>, default: T) -> T
    where
        T: Clone,
    {
        self.get(key).cloned().unwrap_or(default)
    }

    pub fn has(&self, key: impl Into<Key>) -> bool {
        self.positions.contains_key(&key.into())
    }

    pub fn first(&self) -> Option<&T> {
        self.items.first().map(|(_, item)| item)
    }

    pub fn first_where<F: Fn(&T) -> bool>(&self, predicate: F) -> Option<&T> {
        self.iter().find(|item| predicate(item))
    }

    pub fn last(&self) -> Option<&T> {
        self.items.last().map(|(_, item)| item)
    }

    pub fn contains<F: Fn(&T) -> bool>(&self, predicate: F) -> bool {
        self.iter().any(predicate)
    }

    pub fn map<U, F: Fn(&T) -> U>(&self, f: F) -> Collection<U> {
        Collection {
            items: self
                .items
                .iter()
                .map(|(key, item)| (key.clone(), f(item)))
                .collect(),
            positions: self.positions.clone(),
            next_index: self.next_index,
        }
    }

    pub fn filter<F: Fn(&T) -> bool>(&self, predicate: F) -> Self
    where
        T: Clone,
    {
        self.rebuilt(
            self.items
                .iter()
                .filter(|(_, item)| predicate(item))
                .cloned()
                .collect(),
        )
    }

    pub fn reject<F: Fn(&T) -> bool>(&self, predicate: F) -> Self
    where
        T: Clone,
    {
        self.filter(|item| !predicate(item))
    }

    /// Renumber keys `0..n`
    pub fn values(&self) -> Self
    where
        T: Clone,
    {
        Self::make(self.iter().cloned())
    }

    /// First `limit` items, or the last `-limit` when negative
    pub fn take(&self, limit: i64) -> Self
    where
        T: Clone,
    {
        let len = self.items.len();
        let items = if limit < 0 {
            let count = (limit.unsigned_abs() as usize).min(len);
            self.items[len - count..].to_vec()
        } else {
            self.items[..(limit as usize).min(len)].to_vec()
        };
        self.rebuilt(items)
    }

    pub fn reverse(&self) -> Self
    where
        T: Clone,
    {
        self.rebuilt(self.items.iter().rev().cloned().collect())
    }

    /// Named keys in `other` replace ours; indexed items are appended
    pub fn merge(&self, other: &Collection<T>) -> Self
    where
        T: Clone,
    {
        let mut merged = self.clone();
        for (key, item) in &other.items {
            match key {
                Key::Index(_) => merged.push(item.clone()),
                Key::Name(_) => merged.put(key.clone(), item.clone()),
            }
        }
        merged
    }

    /// Append under the next free integer key.
    ///
    /// The counter only moves forward, so a forgotten index is not reused.
    pub fn push(&mut self, item: T) {
        let key = Key::Index(self.next_index);
        self.next_index += 1;
        self.positions.insert(key.clone(), self.items.len());
        self.items.push((key, item));
    }

    /// Insert or replace the item under `key`
    pub fn put(&mut self, key: impl Into<Key>, item: T) {
        let key = key.into();
        if let Some(&position) = self.positions.get(&key) {
            self.items[position].1 = item;
            return;
        }
        if let Key::Index(i) = key {
            self.next_index = self.next_index.max(i.saturating_add(1));
        }
        self.positions.insert(key.clone(), self.items.len());
        self.items.push((key, item));
    }

    pub fn forget(&mut self, key: impl Into<Key>) -> Option<T> {
        let position = self.positions.remove(&key.into())?;
        let (_, item) = self.items.remove(position);
        for (key, _) in &self.items[position..] {
            if let Some(slot) = self.positions.get_mut(key) {
                *slot -= 1;
            }
        }
        Some(item)
    }

    /// Group items by the key `f` returns; each group is keyed `0..n`
    pub fn group_by<K, F>(&self, f: F) -> Collection<Collection<T>>
    where
        K: Into<Key>,
        F: Fn(&T) -> K,
        T: Clone,
    {
        let mut groups: Collection<Collection<T>> = Collection::new();
        for item in self.iter() {
            let key = f(item).into();
            match groups.positions.get(&key) {
                Some(&position) => groups.items[position].1.push(item.clone()),
                None => groups.put(key, Collection::make([item.clone()])),
            }
        }
        groups
    }

    /// Re-key items by `f`; later items win on collisions
    pub fn key_by<K, F>(&self, f: F) -> Self
    where
        K: Into<Key>,
        F: Fn(&T) -> K,
        T: Clone,
    {
        let mut keyed = Self::new();
        for item in self.iter() {
            keyed.put(f(item), item.clone());
        }
        keyed
    }

    /// Stable sort by the value `f` extracts, keys preserved
    pub fn sort_by<K, F>(&self, f: F, descending: bool) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K,
        T: Clone,
    {
        self.sort_by_cmp(|a, b| f(a).cmp(&f(b)), descending)
    }

    pub fn sort_by_cmp<F>(&self, mut compare: F, descending: bool) -> Self
    where
        F: FnMut(&T, &T) -> Ordering,
        T: Clone,
    {
        let mut items = self.items.clone();
        items.sort_by(|(_, a), (_, b)| {
            let ordering = compare(a, b);
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
        self.rebuilt(items)
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items.into_iter().map(|(_, item)| item).collect()
    }

    /// Same keys in a new order or subset; the push counter carries over
    fn rebuilt(&self, items: Vec<(Key, T)>) -> Self {
        let positions = items
            .iter()
            .enumerate()
            .map(|(position, (key, _))| (key.clone(), position))
            .collect();
        Self {
            items,
            positions,
            next_index: self.next_index,
        }
    }

    fn is_list(&self) -> bool {
        self.items
            .iter()
            .enumerate()
            .all(|(i, (key, _))| *key == Key::Index(i as i64))
    }
}

impl<T> FromIterator<T> for Collection<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::make(iter)
    }
}

impl<T> IntoIterator for Collection<T> {
    type Item = T;
    type IntoIter = std::iter::Map<std::vec::IntoIter<(Key, T)>, fn((Key, T)) -> T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter().map(take_item as fn((Key, T)) -> T)
    }
}

fn take_item<T>((_, item): (Key, T)) -> T {
    item
}

impl<T: Serialize> Serialize for Collection<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_list() {
            let mut seq = serializer.serialize_seq(Some(self.items.len()))?;
            for item in self.iter() {
                seq.serialize_element(item)?;
            }
            seq.end()
        } else {
            let mut map = serializer.serialize_map(Some(self.items.len()))?;
            for (key, item) in &self.items {
                map.serialize_entry(&key.to_string(), item)?;
            }
            map.end()
        }
    }
}

impl Collection<Value> {
    /// Plain JSON values of every item
    pub fn all_values(&self) -> Vec<Value> {
        self.iter().cloned().collect()
    }
}

impl Collection<Record> {
    /// Attribute values, optionally keyed by another attribute
    pub fn pluck(&self, value: &str, key: Option<&str>) -> Collection<Value> {
        match key {
            None => self.map(|record| record.get_value(value)).values(),
            Some(key) => {
                let mut plucked = Collection::new();
                for record in self.iter() {
                    match Key::from_value(&record.get_value(key)) {
                        Some(k) => plucked.put(k, record.get_value(value)),
                        None => plucked.push(record.get_value(value)),
                    }
                }
                plucked
            }
        }
    }

    pub fn where_eq(&self, column: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.filter(|record| {
            compare_values(&record.get_value(column), &value) == Some(Ordering::Equal)
        })
    }

    pub fn where_in(&self, column: &str, values: &[Value]) -> Self {
        self.filter(|record| {
            let current = record.get_value(column);
            values.iter().any(|v| compare_values(&current, v) == Some(Ordering::Equal))
        })
    }

    pub fn where_null(&self, column: &str) -> Self {
        self.filter(|record| record.get_value(column).is_null())
    }

    pub fn where_not_null(&self, column: &str) -> Self {
        self.filter(|record| !record.get_value(column).is_null())
    }

    /// Group by attribute; records with unusable keys group under `""`
    pub fn group_by_attribute(&self, column: &str) -> Collection<Collection<Record>> {
        self.group_by(|record| {
            Key::from_value(&record.get_value(column)).unwrap_or_else(|| Key::Name(String::new()))
        })
    }

    pub fn key_by_attribute(&self, column: &str) -> Self {
        self.key_by(|record| {
            Key::from_value(&record.get_value(column)).unwrap_or_else(|| Key::Name(String::new()))
        })
    }

    /// Stable sort on an attribute; NULLs sort first
    pub fn sort_by_attribute(&self, column: &str, descending: bool) -> Self {
        self.sort_by_cmp(
            |a, b| {
                let (a, b) = (a.get_value(column), b.get_value(column));
                match (a.is_null(), b.is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Less,
                    (false, true) => Ordering::Greater,
                    (false, false) => compare_values(&a, &b).unwrap_or(Ordering::Equal),
                }
            },
            descending,
        )
    }

    /// Primary keys of every record
    pub fn model_keys(&self) -> Vec<Value> {
        self.iter().map(Record::key).collect()
    }

    /// Record whose primary key equals `key`
    pub fn find(&self, key: impl Into<Value>) -> Option<&Record> {
        let key = key.into();
        self.iter()
            .find(|record| compare_values(&record.key(), &key) == Some(Ordering::Equal))
    }

    pub fn to_array(&self) -> Value {
        if self.is_list() {
            Value::Array(self.iter().map(Record::to_array).collect())
        } else {
            Value::Object(
                self.items
                    .iter()
                    .map(|(key, record)| (key.to_string(), record.to_array()))
                    .collect(),
            )
        }
    }

    /// Eager load relations onto every record, through a builder for the first record's model
    pub async fn load<I, E>(&mut self, relations: I) -> OrmResult<()>
    where
        I: IntoIterator<Item = E>,
        E: Into<EagerLoad>,
    {
        let Some(first) = self.first() else {
            return Ok(());
        };
        let builder = Builder::new(first.model().clone(), first.connection().cloned())
            .with(relations);
        let mut targets: Vec<&mut Record> = self.iter_mut().collect();
        builder.load_relations(&mut targets).await
    }

    /// Load the relation paths that are not loaded on every record.
    ///
    /// If any record lacks part of a path, the whole path is loaded again for
    /// every record.
    pub async fn load_missing(&mut self, relations: &[&str]) -> OrmResult<()> {
        let missing: Vec<&str> = relations
            .iter()
            .copied()
            .filter(|path| !self.iter().all(|record| record.relation_path_loaded(path)))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        self.load(missing).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transforms_leave_source_untouched() {
        let numbers = Collection::make(vec![3, 1, 2]);
        let doubled = numbers.map(|n| n * 2);
        let odd = numbers.filter(|n| n % 2 == 1);

        assert_eq!(numbers.iter().copied().collect::<Vec<_>>(), vec![3, 1, 2]);
        assert_eq!(doubled.into_vec(), vec![6, 2, 4]);
        assert_eq!(odd.keys().cloned().collect::<Vec<_>>(), vec![Key::Index(0), Key::Index(1)]);
    }

    #[test]
    fn test_get_with_defaults() {
        let items = Collection::make(vec!["a", "b"]);
        assert_eq!(items.get(1i64), Some(&"b"));
        assert_eq!(items.get(5i64), None);
        assert_eq!(items.get_or(5i64, "z"), "z");
        assert_eq!(items.first(), Some(&"a"));
        assert_eq!(items.last(), Some(&"b"));
        assert_eq!(Collection::<i32>::new().first(), None);
    }

    #[test]
    fn test_sort_is_stable_and_keeps_keys() {
        let items = Collection::make(vec![("b", 1), ("a", 2), ("c", 1)]);
        let sorted = items.sort_by(|(_, rank)| *rank, false);
        let names: Vec<&str> = sorted.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
        assert_eq!(sorted.keys().next(), Some(&Key::Index(0)));
        assert_eq!(sorted.keys().nth(1), Some(&Key::Index(2)));

        let descending = items.sort_by(|(_, rank)| *rank, true);
        assert_eq!(descending.first(), Some(&("a", 2)));
    }

    #[test]
    fn test_group_and_key_by() {
        let words = Collection::make(vec!["apple", "avocado", "banana"]);
        let groups = words.group_by(|w| w[..1].to_string());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups.get("a").map(Collection::len), Some(2));

        let keyed = words.key_by(|w| w.len() as i64);
        assert_eq!(keyed.get(6i64), Some(&"banana"));
        assert_eq!(keyed.get(5i64), Some(&"apple"));
    }

    #[test]
    fn test_take_push_put_forget() {
        let mut items = Collection::make(vec![1, 2, 3, 4]);
        assert_eq!(items.take(2).into_vec(), vec![1, 2]);
        assert_eq!(items.take(-1).into_vec(), vec![4]);

        items.push(5);
        assert_eq!(items.get(4i64), Some(&5));
        items.put("extra", 9);
        assert_eq!(items.forget("extra"), Some(9));
        assert_eq!(items.len(), 5);
    }

    #[test]
    fn test_large_collections_stay_indexed() {
        let mut items = Collection::make(0..10_000i32);
        items.put(20_000i64, -1);
        items.push(-2);
        assert_eq!(items.get(20_001i64), Some(&-2));
        assert_eq!(items.get(9_999i64), Some(&9_999));

        assert_eq!(items.forget(0i64), Some(0));
        assert_eq!(items.get(1i64), Some(&1));
        assert_eq!(items.first(), Some(&1));
        assert!(!items.has(0i64));

        // Forgotten indexes are not handed out again
        items.forget(20_001i64);
        items.push(-3);
        assert_eq!(items.get(20_002i64), Some(&-3));
        assert_eq!(items.len(), 10_001);

        let by_bucket = items.group_by(|n| n.rem_euclid(100) as i64);
        assert_eq!(by_bucket.len(), 100);
        assert_eq!(by_bucket.get(1i64).map(Collection::len), Some(100));

        let keyed = items.key_by(|n| n.rem_euclid(10) as i64);
        assert_eq!(keyed.len(), 10);
        assert_eq!(keyed.get(7i64), Some(&-3));
    }

    #[test]
    fn test_serializes_lists_and_maps() {
        let list = Collection::make(vec![1, 2]);
        assert_eq!(serde_json::to_value(&list).unwrap(), json!([1, 2]));

        let keyed = Collection::from_keyed(vec![(Key::from("x"), 1)]);
        assert_eq!(serde_json::to_value(&keyed).unwrap(), json!({"x": 1}));

        let filtered = list.filter(|n| *n == 2);
        assert_eq!(serde_json::to_value(&filtered).unwrap(), json!({"1": 2}));
    }
}
