use crate::StoreError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tessera::DataId;

/// The id of the root record every operation reads from.
pub const ROOT_ID: &str = "client:root";
/// The typename of the root record.
pub const ROOT_TYPE: &str = "__Root";

pub const TYPENAME_KEY: &str = "__typename";
pub const ID_KEY: &str = "__id";
const REF_KEY: &str = "__ref";
const REFS_KEY: &str = "__refs";

/// The value stored under one storage key of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    /// A scalar (or a fetched `null`).
    Scalar(Value),
    Link(DataId),
    Links(Vec<Option<DataId>>)
}

impl RecordValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RecordValue::Scalar(Value::Null))
    }

    fn to_json(&self) -> Value {
        match self {
            RecordValue::Scalar(value) => value.clone(),
            RecordValue::Link(id) => json_object(REF_KEY, Value::String(id.clone())),
            RecordValue::Links(ids) => {
                let ids = ids
                    .iter()
                    .map(|id| id.clone().map(Value::String).unwrap_or(Value::Null))
                    .collect();
                json_object(REFS_KEY, Value::Array(ids))
            }
        }
    }

    fn from_json(value: &Value) -> Result<Self, StoreError> {
        let object = match value {
            Value::Object(object) if object.len() == 1 => object,
            _ => return Ok(RecordValue::Scalar(value.clone()))
        };
        if let Some(reference) = object.get(REF_KEY) {
            let id = reference.as_str().ok_or_else(|| {
                StoreError::InvalidRecordSource(format!("`{}` must be a string", REF_KEY))
            })?;
            return Ok(RecordValue::Link(id.to_string()));
        }
        if let Some(references) = object.get(REFS_KEY) {
            let ids = references.as_array().ok_or_else(|| {
                StoreError::InvalidRecordSource(format!("`{}` must be an array", REFS_KEY))
            })?;
            let ids = ids
                .iter()
                .map(|id| match id {
                    Value::Null => Ok(None),
                    Value::String(id) => Ok(Some(id.clone())),
                    other => Err(StoreError::InvalidRecordSource(format!(
                        "invalid reference `{}`",
                        other
                    )))
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(RecordValue::Links(ids));
        }
        Ok(RecordValue::Scalar(value.clone()))
    }
}

fn json_object(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

/// A normalized record: the fields of one object keyed by storage key.
///
/// A key that isn't present is undefined (not fetched yet); a fetched `null` is stored as
/// `RecordValue::Scalar(Value::Null)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: DataId,
    typename: String,
    fields: BTreeMap<String, RecordValue>
}

impl Record {
    pub fn new<I: Into<DataId>, T: Into<String>>(id: I, typename: T) -> Self {
        Record {
            id: id.into(),
            typename: typename.into(),
            fields: BTreeMap::new()
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn typename(&self) -> &str {
        &self.typename
    }

    pub fn get(&self, key: &str) -> Option<&RecordValue> {
        self.fields.get(key)
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        match self.fields.get(key) {
            Some(RecordValue::Scalar(value)) => Some(value),
            _ => None
        }
    }

    pub fn get_link(&self, key: &str) -> Option<&str> {
        match self.fields.get(key) {
            Some(RecordValue::Link(id)) => Some(id),
            _ => None
        }
    }

    pub fn get_links(&self, key: &str) -> Option<&[Option<DataId>]> {
        match self.fields.get(key) {
            Some(RecordValue::Links(ids)) => Some(ids),
            _ => None
        }
    }

    pub fn set<K: Into<String>>(&mut self, key: K, value: RecordValue) {
        self.fields.insert(key.into(), value);
    }

    pub fn set_value<K: Into<String>>(&mut self, key: K, value: Value) {
        self.set(key, RecordValue::Scalar(value));
    }

    pub fn set_link<K: Into<String>, I: Into<DataId>>(&mut self, key: K, id: I) {
        self.set(key, RecordValue::Link(id.into()));
    }

    pub fn set_links<K: Into<String>>(&mut self, key: K, ids: Vec<Option<DataId>>) {
        self.set(key, RecordValue::Links(ids));
    }

    pub fn remove(&mut self, key: &str) -> Option<RecordValue> {
        self.fields.remove(key)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &RecordValue)> {
        self.fields.iter()
    }

    /// Copy every field of `other` onto this record, keeping this record's identity.
    pub fn copy_fields_from(&mut self, other: &Record) {
        for (key, value) in &other.fields {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Merge `next` into `prev`. Returns `None` if that wouldn't change anything, which keeps
    /// republishing identical data from touching the store.
    pub fn update(prev: &Record, next: &Record) -> Option<Record> {
        if prev.typename != next.typename && !next.typename.is_empty() {
            tracing::warn!(
                id = %prev.id,
                prev = %prev.typename,
                next = %next.typename,
                "record typename changed"
            );
        }
        let typename_changed = !next.typename.is_empty() && prev.typename != next.typename;
        let changed = typename_changed
            || next
                .fields
                .iter()
                .any(|(key, value)| prev.fields.get(key) != Some(value));
        if !changed {
            return None;
        }

        let mut merged = prev.clone();
        if typename_changed {
            merged.typename = next.typename.clone();
        }
        merged.copy_fields_from(next);
        Some(merged)
    }

    /// Serialize into the standard record format, where links are `{"__ref": id}` and
    /// plural links `{"__refs": [id]}`.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert(ID_KEY.to_string(), Value::String(self.id.clone()));
        map.insert(
            TYPENAME_KEY.to_string(),
            Value::String(self.typename.clone())
        );
        for (key, value) in &self.fields {
            map.insert(key.clone(), value.to_json());
        }
        Value::Object(map)
    }

    pub fn from_json(value: &Value) -> Result<Self, StoreError> {
        let object = value.as_object().ok_or_else(|| {
            StoreError::InvalidRecordSource(format!("expected a record object, got `{}`", value))
        })?;
        let id = object
            .get(ID_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::InvalidRecordSource(format!("record without `{}`", ID_KEY)))?;
        let typename = object
            .get(TYPENAME_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default();

        let mut record = Record::new(id, typename);
        for (key, value) in object {
            if key == ID_KEY || key == TYPENAME_KEY {
                continue;
            }
            record.set(key.clone(), RecordValue::from_json(value)?);
        }
        Ok(record)
    }
}

/// The id of a record that has no global identity, derived from its parent and position.
///
/// ```
/// use tessera_store::generate_client_id;
///
/// assert_eq!(generate_client_id("User:1", "friends(first:2)", Some(0)), "client:User:1:friends(first:2):0");
/// ```
pub fn generate_client_id(parent_id: &str, storage_key: &str, index: Option<usize>) -> DataId {
    let mut key = String::with_capacity(parent_id.len() + storage_key.len() + 12);
    if !parent_id.starts_with("client:") {
        key.push_str("client:");
    }
    key.push_str(parent_id);
    key.push(':');
    key.push_str(storage_key);
    if let Some(index) = index {
        key.push(':');
        key.push_str(&index.to_string());
    }
    key
}

pub fn is_client_id(id: &str) -> bool {
    id.starts_with("client:")
}

/// The record field holding the component reference of a `@module` selection.
pub fn module_component_key(document_name: &str) -> String {
    format!("__module_component_{}", document_name)
}

/// The record field holding the operation reference of a `@module` selection.
pub fn module_operation_key(document_name: &str) -> String {
    format!("__module_operation_{}", document_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(name: &str) -> Record {
        let mut record = Record::new("User:1", "User");
        record.set_value("id", json!("1"));
        record.set_value("name", json!(name));
        record
    }

    #[test]
    fn update_is_none_for_identical_fields() {
        let prev = user("Alice");
        assert_eq!(Record::update(&prev, &user("Alice")), None);

        let mut partial = Record::new("User:1", "User");
        partial.set_value("name", json!("Alice"));
        assert_eq!(Record::update(&prev, &partial), None);
    }

    #[test]
    fn update_merges_new_fields() {
        let prev = user("Alice");
        let mut next = Record::new("User:1", "User");
        next.set_value("name", json!("Zuck"));
        next.set_link("bestFriend", "User:2");

        let merged = Record::update(&prev, &next).unwrap();
        assert_eq!(merged.get_value("id"), Some(&json!("1")));
        assert_eq!(merged.get_value("name"), Some(&json!("Zuck")));
        assert_eq!(merged.get_link("bestFriend"), Some("User:2"));
    }

    #[test]
    fn records_survive_json() {
        let mut record = user("Alice");
        record.set_links("friends", vec![Some("User:2".into()), None]);
        record.set_value("nickname", Value::Null);

        let json = record.to_json();
        assert_eq!(
            json,
            json!({
                "__id": "User:1",
                "__typename": "User",
                "id": "1",
                "name": "Alice",
                "nickname": null,
                "friends": { "__refs": ["User:2", null] }
            })
        );
        assert_eq!(Record::from_json(&json).unwrap(), record);
    }

    #[test]
    fn client_ids_nest_under_their_parent() {
        assert_eq!(generate_client_id(ROOT_ID, "viewer", None), "client:root:viewer");
        assert_eq!(
            generate_client_id("client:root:viewer", "items", Some(2)),
            "client:root:viewer:items:2"
        );
    }
}
