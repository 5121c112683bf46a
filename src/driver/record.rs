// Copyright the graphbolt authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::iter;
use std::sync::Arc;

use super::io::bolt::BoltRecordFields;
use crate::value::ValueReceive;

/// A record is a collection of key-value pairs representing a single row of a
/// query result.
#[derive(Debug)]
pub struct Record {
    entries: Vec<(Arc<String>, Option<ValueReceive>)>,
}

impl Record {
    pub(crate) fn new(keys: &[Arc<String>], fields: BoltRecordFields) -> Self {
        assert_eq!(keys.len(), fields.len());
        Self {
            entries: iter::zip(keys.iter().map(Arc::clone), fields.into_iter().map(Some)).collect(),
        }
    }

    /// Iterate over the keys of the record.
    /// The order of the keys corresponds to the order of the values.
    pub fn keys(&self) -> impl Iterator<Item = Arc<String>> + '_ {
        self.entries
            .iter()
            .filter_map(|(key, value)| value.as_ref().map(|_| Arc::clone(key)))
    }

    /// Iterate over the values of the record.
    /// The order of the values corresponds to the order of the keys.
    pub fn values(&self) -> impl Iterator<Item = &ValueReceive> {
        self.entries
            .iter()
            .map(|(_, value)| value)
            .filter_map(Option::as_ref)
    }

    /// Turn the record into an iterator over its values.
    pub fn into_values(self) -> impl Iterator<Item = ValueReceive> {
        self.entries.into_iter().filter_map(|(_, value)| value)
    }

    /// Iterate over the key-value pairs of the record.
    pub fn entries(&self) -> impl Iterator<Item = (Arc<String>, &ValueReceive)> {
        self.entries
            .iter()
            .filter_map(|(key, value)| value.as_ref().map(|value| (Arc::clone(key), value)))
    }

    /// Turn the record into an iterator over its key-value pairs.
    pub fn into_entries(self) -> impl Iterator<Item = (Arc<String>, ValueReceive)> {
        self.entries
            .into_iter()
            .filter_map(|(key, value)| value.map(|value| (key, value)))
    }

    /// Get the value for the given key, if present.
    pub fn value(&self, key: &str) -> Option<&ValueReceive> {
        self.entries.iter().find_map(|(k, v)| {
            if k.as_str() == key {
                v.as_ref()
            } else {
                None
            }
        })
    }

    /// Take the value for the given key out of the record, if present.
    ///
    /// Subsequent calls for the same key will return [`None`].
    pub fn take_value(&mut self, key: &str) -> Option<ValueReceive> {
        self.entries
            .iter_mut()
            .find_map(|(k, v)| if k.as_str() == key { v.take() } else { None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(entries: Vec<(&str, ValueReceive)>) -> Record {
        let keys = entries
            .iter()
            .map(|(k, _)| Arc::new(String::from(*k)))
            .collect::<Vec<_>>();
        let values = entries.into_iter().map(|(_, v)| v).collect();
        Record::new(&keys, values)
    }

    #[test]
    fn test_value_lookup() {
        let record = record(vec![
            ("a", ValueReceive::Integer(1)),
            ("b", ValueReceive::Integer(2)),
        ]);
        assert_eq!(record.value("b"), Some(&ValueReceive::Integer(2)));
        assert_eq!(record.value("c"), None);
    }

    #[test]
    fn test_take_value_removes_entry() {
        let mut record = record(vec![("a", ValueReceive::Integer(1))]);
        assert_eq!(record.take_value("a"), Some(ValueReceive::Integer(1)));
        assert_eq!(record.take_value("a"), None);
        assert_eq!(record.keys().count(), 0);
    }

    #[test]
    fn test_keys_and_values_are_aligned() {
        let record = record(vec![
            ("a", ValueReceive::Integer(1)),
            ("b", ValueReceive::Boolean(true)),
        ]);
        let keys: Vec<_> = record.keys().map(|k| k.to_string()).collect();
        let values: Vec<_> = record.values().cloned().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(
            values,
            vec![ValueReceive::Integer(1), ValueReceive::Boolean(true)]
        );
    }
}
