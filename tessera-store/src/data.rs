use crate::RequestDescriptor;
use serde_json::{Map, Value};
use std::{collections::BTreeMap, sync::Arc};
use tessera::{DataId, Variables};

/// The data produced by reading a selector.
///
/// `Undefined` marks a value that isn't in the store yet, as opposed to a fetched `Null`.
/// Objects and lists are reference counted, and unchanged subtrees keep their allocation
/// across reads, so `Arc::ptr_eq` tells whether a subtree changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Undefined,
    Null,
    Scalar(Value),
    Object(Arc<DataObject>),
    List(Arc<Vec<Data>>)
}

impl Default for Data {
    fn default() -> Self {
        Data::Undefined
    }
}

/// An object in read data, optionally carrying fragment pointers.
///
/// For every fragment spread on the object, `fragments` maps the fragment name to the
/// arguments of the spread. Together with `id` and `owner` that is enough to read the
/// fragment later.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataObject {
    pub fields: BTreeMap<String, Data>,
    pub id: Option<DataId>,
    pub fragments: BTreeMap<String, Variables>,
    pub owner: Option<Arc<RequestDescriptor>>
}

impl DataObject {
    pub fn get(&self, key: &str) -> Option<&Data> {
        self.fields.get(key)
    }

    /// Returns `true` if the object points to data for the named fragment.
    pub fn has_fragment(&self, name: &str) -> bool {
        self.fragments.contains_key(name)
    }
}

impl Data {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Data::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Data::Null)
    }

    /// `null` or undefined.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Data::Null | Data::Undefined)
    }

    pub fn as_object(&self) -> Option<&Arc<DataObject>> {
        match self {
            Data::Object(object) => Some(object),
            _ => None
        }
    }

    pub fn as_list(&self) -> Option<&Arc<Vec<Data>>> {
        match self {
            Data::List(list) => Some(list),
            _ => None
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Data::Scalar(value) => Some(value),
            _ => None
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_scalar().and_then(Value::as_str)
    }

    /// A field of an object. `None` for anything else.
    pub fn get(&self, key: &str) -> Option<&Data> {
        self.as_object().and_then(|object| object.get(key))
    }

    /// Follow a path of object keys.
    pub fn get_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&Data> {
        path.iter().try_fold(self, |data, key| data.get(key.as_ref()))
    }

    /// Convert to JSON, dropping undefined fields. Fragment pointers show up as `__id` and
    /// `__fragments`.
    pub fn to_json(&self) -> Value {
        match self {
            Data::Undefined | Data::Null => Value::Null,
            Data::Scalar(value) => value.clone(),
            Data::List(items) => Value::Array(items.iter().map(Data::to_json).collect()),
            Data::Object(object) => {
                let mut map = Map::new();
                for (key, value) in &object.fields {
                    if !value.is_undefined() {
                        map.insert(key.clone(), value.to_json());
                    }
                }
                if !object.fragments.is_empty() {
                    if let Some(id) = &object.id {
                        map.insert("__id".to_string(), Value::String(id.clone()));
                    }
                    let fragments = object
                        .fragments
                        .iter()
                        .map(|(name, args)| (name.clone(), Value::Object(args.clone())))
                        .collect();
                    map.insert("__fragments".to_string(), Value::Object(fragments));
                }
                Value::Object(map)
            }
        }
    }
}

/// Whether two reads are identical: objects and lists by pointer, anything else by value.
pub(crate) fn same(prev: &Data, next: &Data) -> bool {
    match (prev, next) {
        (Data::Object(prev), Data::Object(next)) => Arc::ptr_eq(prev, next),
        (Data::List(prev), Data::List(next)) => Arc::ptr_eq(prev, next),
        (Data::Object(_), _) | (Data::List(_), _) => false,
        (prev, next) => prev == next
    }
}

/// Reuse every subtree of `prev` that is deep-equal to the corresponding subtree of `next`.
///
/// If nothing changed the result is `prev` itself, so callers can compare reads with
/// `Arc::ptr_eq` instead of walking them.
pub fn recycle_nodes_into(prev: &Data, next: Data) -> Data {
    match (prev, next) {
        (Data::Object(prev_object), Data::Object(next_object)) => {
            if Arc::ptr_eq(prev_object, &next_object) {
                return prev.clone();
            }
            let next_object = Arc::try_unwrap(next_object).unwrap_or_else(|arc| (*arc).clone());
            let mut all_same = prev_object.fields.len() == next_object.fields.len()
                && prev_object.id == next_object.id
                && prev_object.fragments == next_object.fragments
                && prev_object.owner == next_object.owner;

            let mut fields = BTreeMap::new();
            for (key, value) in next_object.fields {
                let value = match prev_object.fields.get(&key) {
                    Some(prev_value) => {
                        let value = recycle_nodes_into(prev_value, value);
                        all_same = all_same && same(prev_value, &value);
                        value
                    }
                    None => {
                        all_same = false;
                        value
                    }
                };
                fields.insert(key, value);
            }

            if all_same {
                prev.clone()
            } else {
                Data::Object(Arc::new(DataObject {
                    fields,
                    id: next_object.id,
                    fragments: next_object.fragments,
                    owner: next_object.owner
                }))
            }
        }
        (Data::List(prev_items), Data::List(next_items)) => {
            if Arc::ptr_eq(prev_items, &next_items) {
                return prev.clone();
            }
            let next_items = Arc::try_unwrap(next_items).unwrap_or_else(|arc| (*arc).clone());
            let mut all_same = prev_items.len() == next_items.len();
            let items: Vec<Data> = next_items
                .into_iter()
                .enumerate()
                .map(|(i, item)| match prev_items.get(i) {
                    Some(prev_item) => {
                        let item = recycle_nodes_into(prev_item, item);
                        all_same = all_same && same(prev_item, &item);
                        item
                    }
                    None => item
                })
                .collect();
            if all_same {
                prev.clone()
            } else {
                Data::List(Arc::new(items))
            }
        }
        (_, next) => next
    }
}
