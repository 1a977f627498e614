use crate::{module_operation_key, NormalizationSelector, Record, RecordSource};
use fnv::FnvHashSet;
use serde_json::Value;
use tessera::{
    ast::{LinkedField, Selection},
    utils::{field_storage_key, get_handle_storage_key},
    DataId, OperationLoader, Variables
};

/// Add the id of every record reachable from `selector` in `source` to `references`.
///
/// `@module` selections are followed through `loader` if their operation is already loaded.
pub fn mark(
    source: &dyn RecordSource,
    selector: &NormalizationSelector,
    references: &mut FnvHashSet<DataId>,
    loader: Option<&dyn OperationLoader>
) {
    let mut marker = Marker {
        source,
        variables: &selector.variables,
        references,
        loader
    };
    marker.trace(&selector.data_id, selector.node.selections());
}

struct Marker<'a> {
    source: &'a dyn RecordSource,
    variables: &'a Variables,
    references: &'a mut FnvHashSet<DataId>,
    loader: Option<&'a dyn OperationLoader>
}

impl<'a> Marker<'a> {
    fn trace(&mut self, id: &str, selections: &[Selection]) {
        // Visited ids are traversed again: the selections may differ.
        self.references.insert(id.to_string());
        let source = self.source;
        if let Some(record) = source.get(id) {
            self.traverse_selections(selections, record);
        }
    }

    fn traverse_selections(&mut self, selections: &[Selection], record: &Record) {
        for selection in selections {
            match selection {
                Selection::LinkedField(field) => self.traverse_link(field, record),
                Selection::LinkedHandle(handle) => {
                    // The handle field holds the same kind of records as the server field.
                    let response_key = handle.alias.as_deref().unwrap_or(&handle.name);
                    if let Some(field) = sibling_field(selections, response_key) {
                        let key = get_handle_storage_key(handle, self.variables);
                        self.traverse_key(&key, field, record);
                    }
                }
                Selection::InlineFragment(fragment) => match &fragment.abstract_key {
                    None => {
                        if record.typename() == fragment.type_condition {
                            self.traverse_selections(&fragment.selections, record);
                        }
                    }
                    Some(_) => self.traverse_selections(&fragment.selections, record)
                },
                Selection::Condition(condition) => {
                    let value = self
                        .variables
                        .get(&condition.condition)
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    if value == condition.passing_value {
                        self.traverse_selections(&condition.selections, record);
                    }
                }
                Selection::Defer(defer) => self.traverse_selections(&defer.selections, record),
                Selection::Stream(stream) => self.traverse_selections(&stream.selections, record),
                Selection::ClientExtension(extension) => {
                    self.traverse_selections(&extension.selections, record)
                }
                Selection::ModuleImport(module) => {
                    let operation = record
                        .get_value(&module_operation_key(&module.document_name))
                        .and_then(Value::as_str)
                        .and_then(|reference| self.loader.and_then(|loader| loader.get(reference)));
                    if let Some(operation) = operation {
                        self.traverse_selections(&operation.selections, record);
                    }
                }
                Selection::ScalarField(_) | Selection::FragmentSpread(_) => {}
            }
        }
    }

    fn traverse_link(&mut self, field: &LinkedField, record: &Record) {
        let key = field_storage_key(
            &field.name,
            field.storage_key.as_deref(),
            &field.args,
            self.variables
        );
        self.traverse_key(&key, field, record);
    }

    fn traverse_key(&mut self, key: &str, field: &LinkedField, record: &Record) {
        if field.plural {
            if let Some(ids) = record.get_links(key) {
                for id in ids.iter().flatten() {
                    self.trace(id, &field.selections);
                }
            }
        } else if let Some(id) = record.get_link(key) {
            self.trace(id, &field.selections);
        }
    }
}

/// The server field a handle field was declared on.
pub(crate) fn sibling_field<'s>(
    selections: &'s [Selection],
    response_key: &str
) -> Option<&'s LinkedField> {
    selections.iter().find_map(|selection| match selection {
        Selection::LinkedField(field) if field.response_key() == response_key => Some(field),
        _ => None
    })
}
