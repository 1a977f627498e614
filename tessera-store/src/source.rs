use crate::{Record, StoreError};
use fnv::FnvHashMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use tessera::DataId;

/// Whether a source knows about a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Existent,
    /// The record was deleted. Readers see `null` rather than missing data.
    Nonexistent,
    Unknown
}

/// Read access to a set of records.
pub trait RecordSource {
    /// The record with this id, if it exists.
    fn get(&self, id: &str) -> Option<&Arc<Record>>;

    fn status(&self, id: &str) -> RecordState;

    fn has(&self, id: &str) -> bool {
        self.status(id) != RecordState::Unknown
    }

    /// The number of entries, tombstones included.
    fn size(&self) -> usize;

    fn record_ids(&self) -> Vec<DataId>;
}

/// An in-memory record source.
///
/// Deleting a record leaves a tombstone that is distinct from the record never having been
/// there. Publishing a source with tombstones deletes those records from the target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSourceMap {
    records: FnvHashMap<DataId, Option<Arc<Record>>>
}

impl RecordSourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, record: Record) {
        self.set_arc(Arc::new(record));
    }

    pub fn set_arc(&mut self, record: Arc<Record>) {
        self.records.insert(record.id().to_string(), Some(record));
    }

    /// Mark a record as deleted.
    pub fn delete(&mut self, id: &str) {
        self.records.insert(id.to_string(), None);
    }

    /// Forget about a record entirely, tombstone or not.
    pub fn remove(&mut self, id: &str) -> Option<Option<Arc<Record>>> {
        self.records.remove(id)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The raw entry for `id`: `Some(None)` is a tombstone.
    pub fn entry(&self, id: &str) -> Option<&Option<Arc<Record>>> {
        self.records.get(id)
    }

    pub(crate) fn entry_mut(&mut self, id: &str) -> Option<&mut Option<Arc<Record>>> {
        self.records.get_mut(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&DataId, &Option<Arc<Record>>)> {
        self.records.iter()
    }

    /// Merge `source` into this one and return the ids whose records changed. Records are
    /// merged field by field, tombstones delete.
    pub fn publish(&mut self, source: &RecordSourceMap) -> Vec<DataId> {
        let mut updated = Vec::new();
        for (id, entry) in &source.records {
            match entry {
                None => {
                    if self.status(id) != RecordState::Nonexistent {
                        self.records.insert(id.clone(), None);
                        updated.push(id.clone());
                    }
                }
                Some(next) => match self.records.get(id) {
                    Some(Some(prev)) => {
                        if let Some(merged) = Record::update(prev, next) {
                            self.records.insert(id.clone(), Some(Arc::new(merged)));
                            updated.push(id.clone());
                        }
                    }
                    _ => {
                        self.records.insert(id.clone(), Some(next.clone()));
                        updated.push(id.clone());
                    }
                }
            }
        }
        updated
    }

    /// Serialize every record. Tombstones serialize as `null`.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (id, record) in &self.records {
            let value = match record {
                Some(record) => record.to_json(),
                None => Value::Null
            };
            map.insert(id.clone(), value);
        }
        Value::Object(map)
    }

    pub fn from_json(value: &Value) -> Result<Self, StoreError> {
        let object = value.as_object().ok_or_else(|| {
            StoreError::InvalidRecordSource("expected an object of records".to_string())
        })?;
        let mut source = RecordSourceMap::new();
        for (id, value) in object {
            if value.is_null() {
                source.delete(id);
                continue;
            }
            let record = Record::from_json(value)?;
            if record.id() != id {
                return Err(StoreError::InvalidRecordSource(format!(
                    "record `{}` is stored under `{}`",
                    record.id(),
                    id
                )));
            }
            source.set(record);
        }
        Ok(source)
    }
}

impl RecordSource for RecordSourceMap {
    fn get(&self, id: &str) -> Option<&Arc<Record>> {
        self.records.get(id).and_then(Option::as_ref)
    }

    fn status(&self, id: &str) -> RecordState {
        match self.records.get(id) {
            Some(Some(_)) => RecordState::Existent,
            Some(None) => RecordState::Nonexistent,
            None => RecordState::Unknown
        }
    }

    fn size(&self) -> usize {
        self.records.len()
    }

    fn record_ids(&self) -> Vec<DataId> {
        self.records.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(id: &str, name: &str) -> Record {
        let mut record = Record::new(format!("User:{}", id), "User");
        record.set_value("id", json!(id));
        record.set_value("name", json!(name));
        record
    }

    #[test]
    fn tombstones_are_not_unknown() {
        let mut source = RecordSourceMap::new();
        source.set(user("1", "Alice"));
        source.delete("User:2");

        assert_eq!(source.status("User:1"), RecordState::Existent);
        assert_eq!(source.status("User:2"), RecordState::Nonexistent);
        assert_eq!(source.status("User:3"), RecordState::Unknown);
        assert!(source.get("User:2").is_none());
        assert!(source.has("User:2"));
        assert_eq!(source.size(), 2);

        source.remove("User:2");
        assert_eq!(source.status("User:2"), RecordState::Unknown);
    }

    #[test]
    fn publishing_twice_is_idempotent() {
        let mut batch = RecordSourceMap::new();
        batch.set(user("1", "Alice"));
        batch.set(user("2", "Bob"));

        let mut base = RecordSourceMap::new();
        let mut first = base.publish(&batch);
        first.sort();
        assert_eq!(first, vec!["User:1".to_string(), "User:2".to_string()]);
        let after_first = base.clone();

        assert!(base.publish(&batch).is_empty());
        assert_eq!(base, after_first);
    }

    #[test]
    fn publishing_a_tombstone_deletes() {
        let mut base = RecordSourceMap::new();
        base.set(user("1", "Alice"));

        let mut batch = RecordSourceMap::new();
        batch.delete("User:1");
        assert_eq!(base.publish(&batch), vec!["User:1".to_string()]);
        assert_eq!(base.status("User:1"), RecordState::Nonexistent);
        assert!(base.publish(&batch).is_empty());
    }

    #[test]
    fn json_round_trip_keeps_tombstones() {
        let mut source = RecordSourceMap::new();
        source.set(user("1", "Alice"));
        source.delete("User:2");

        let hydrated = RecordSourceMap::from_json(&source.to_json()).unwrap();
        assert_eq!(hydrated, source);
    }

    #[test]
    fn from_json_rejects_mismatched_ids() {
        let json = json!({ "User:1": { "__id": "User:2", "__typename": "User" } });
        assert!(matches!(
            RecordSourceMap::from_json(&json),
            Err(StoreError::InvalidRecordSource(_))
        ));
    }
}
