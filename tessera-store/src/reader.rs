use crate::{
    module_component_key, Data, DataObject, PluralReaderSelector, Record, RecordSource,
    RecordState, RecordValue, RequestDescriptor, SingularReaderSelector
};
use fnv::FnvHashSet;
use serde_json::Value;
use std::sync::Arc;
use tessera::{
    ast::{LinkedField, ModuleImport, ScalarField, Selection},
    utils::{field_storage_key, get_argument_values},
    DataId, Variables
};

/// The result of reading a selector.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub data: Data,
    /// Set if any value the selector asked for isn't in the store.
    pub is_missing_data: bool,
    /// Every record the read looked at. A change to any other record can't change `data`.
    pub seen_records: FnvHashSet<DataId>,
    pub selector: SingularReaderSelector
}

/// Read the data described by `selector` from `source`.
///
/// Reading never fails. Values that aren't in the source come back as
/// [`Data::Undefined`](./enum.Data.html#variant.Undefined) and set `is_missing_data`.
pub fn read(source: &dyn RecordSource, selector: &SingularReaderSelector) -> Snapshot {
    let mut reader = Reader {
        source,
        variables: &selector.variables,
        owner: &selector.owner,
        seen: FnvHashSet::default(),
        is_missing_data: false
    };
    let data = reader.read_record(&selector.data_id, &selector.node.selections);
    Snapshot {
        data,
        is_missing_data: reader.is_missing_data,
        seen_records: reader.seen,
        selector: selector.clone()
    }
}

/// Read every entry of a plural selector.
pub fn read_plural(
    source: &dyn RecordSource,
    selector: &PluralReaderSelector
) -> Vec<Option<Snapshot>> {
    selector
        .selectors
        .iter()
        .map(|selector| selector.as_ref().map(|selector| read(source, selector)))
        .collect()
}

struct Reader<'a> {
    source: &'a dyn RecordSource,
    variables: &'a Variables,
    owner: &'a Arc<RequestDescriptor>,
    seen: FnvHashSet<DataId>,
    is_missing_data: bool
}

impl<'a> Reader<'a> {
    fn read_record(&mut self, id: &str, selections: &[Selection]) -> Data {
        self.seen.insert(id.to_string());
        let source = self.source;
        match source.status(id) {
            RecordState::Unknown => {
                self.is_missing_data = true;
                Data::Undefined
            }
            RecordState::Nonexistent => Data::Null,
            RecordState::Existent => match source.get(id) {
                Some(record) => {
                    let mut object = DataObject::default();
                    self.traverse_selections(selections, record, &mut object);
                    Data::Object(Arc::new(object))
                }
                None => Data::Null
            }
        }
    }

    fn traverse_selections(
        &mut self,
        selections: &[Selection],
        record: &Record,
        object: &mut DataObject
    ) {
        for selection in selections {
            match selection {
                Selection::ScalarField(field) => {
                    let value = self.read_scalar(field, record);
                    object.fields.insert(field.response_key().to_string(), value);
                }
                Selection::LinkedField(field) => {
                    let value = if field.plural {
                        self.read_plural_link(field, record)
                    } else {
                        self.read_link(field, record)
                    };
                    object.fields.insert(field.response_key().to_string(), value);
                }
                Selection::FragmentSpread(spread) => {
                    object.id = Some(record.id().to_string());
                    object.owner = Some(self.owner.clone());
                    object.fragments.insert(
                        spread.name.clone(),
                        get_argument_values(&spread.args, self.variables)
                    );
                }
                Selection::InlineFragment(fragment) => match &fragment.abstract_key {
                    None => {
                        if record.typename() == fragment.type_condition {
                            self.traverse_selections(&fragment.selections, record, object);
                        }
                    }
                    Some(abstract_key) => match record.get_value(abstract_key) {
                        Some(Value::Bool(true)) => {
                            self.traverse_selections(&fragment.selections, record, object)
                        }
                        Some(_) => {}
                        None => self.is_missing_data = true
                    }
                },
                Selection::Condition(condition) => {
                    let value = self
                        .variables
                        .get(&condition.condition)
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    if value == condition.passing_value {
                        self.traverse_selections(&condition.selections, record, object);
                    }
                }
                Selection::Defer(defer) => {
                    self.traverse_selections(&defer.selections, record, object)
                }
                Selection::Stream(stream) => {
                    self.traverse_selections(&stream.selections, record, object)
                }
                Selection::ModuleImport(module) => self.read_module_import(module, record, object),
                Selection::ClientExtension(extension) => {
                    let is_missing_data = self.is_missing_data;
                    self.traverse_selections(&extension.selections, record, object);
                    self.is_missing_data = is_missing_data;
                }
                // Handles only exist in normalization artifacts.
                Selection::LinkedHandle(_) => {}
            }
        }
    }

    fn read_scalar(&mut self, field: &ScalarField, record: &Record) -> Data {
        match field.name.as_str() {
            "__typename" => return Data::Scalar(Value::String(record.typename().to_string())),
            "__id" => return Data::Scalar(Value::String(record.id().to_string())),
            _ => {}
        }
        let key = field_storage_key(
            &field.name,
            field.storage_key.as_deref(),
            &field.args,
            self.variables
        );
        match record.get(&key) {
            Some(RecordValue::Scalar(Value::Null)) => Data::Null,
            Some(RecordValue::Scalar(value)) => Data::Scalar(value.clone()),
            Some(_) => {
                tracing::warn!(
                    id = record.id(),
                    field = %key,
                    "expected a scalar value, found a link"
                );
                Data::Undefined
            }
            None => {
                self.is_missing_data = true;
                Data::Undefined
            }
        }
    }

    fn read_link(&mut self, field: &LinkedField, record: &Record) -> Data {
        let key = field_storage_key(
            &field.name,
            field.storage_key.as_deref(),
            &field.args,
            self.variables
        );
        match record.get(&key) {
            Some(RecordValue::Link(id)) => self.read_record(id, &field.selections),
            Some(RecordValue::Scalar(Value::Null)) => Data::Null,
            Some(_) => {
                tracing::warn!(
                    id = record.id(),
                    field = %key,
                    "expected a singular link"
                );
                Data::Undefined
            }
            None => {
                self.is_missing_data = true;
                Data::Undefined
            }
        }
    }

    fn read_plural_link(&mut self, field: &LinkedField, record: &Record) -> Data {
        let key = field_storage_key(
            &field.name,
            field.storage_key.as_deref(),
            &field.args,
            self.variables
        );
        match record.get(&key) {
            Some(RecordValue::Links(ids)) => {
                let items = ids
                    .iter()
                    .map(|id| match id {
                        Some(id) => self.read_record(id, &field.selections),
                        None => Data::Null
                    })
                    .collect();
                Data::List(Arc::new(items))
            }
            Some(RecordValue::Scalar(Value::Null)) => Data::Null,
            Some(_) => {
                tracing::warn!(
                    id = record.id(),
                    field = %key,
                    "expected a list of links"
                );
                Data::Undefined
            }
            None => {
                self.is_missing_data = true;
                Data::Undefined
            }
        }
    }

    fn read_module_import(&mut self, module: &ModuleImport, record: &Record, object: &mut DataObject) {
        let component = match record.get_value(&module_component_key(&module.document_name)) {
            Some(component) => component.clone(),
            None => {
                self.is_missing_data = true;
                return;
            }
        };
        object.fields.insert(
            "__fragmentPropName".to_string(),
            Data::Scalar(Value::String(module.fragment_prop_name.clone()))
        );
        object
            .fields
            .insert("__module_component".to_string(), Data::Scalar(component));
        object.id = Some(record.id().to_string());
        object.owner = Some(self.owner.clone());
        object
            .fragments
            .insert(module.fragment_name.clone(), Variables::new());
    }
}
