use crate::{
    module_operation_key, references::sibling_field, NormalizationSelector, Record, RecordSource,
    RecordState, RecordValue
};
use serde_json::Value;
use tessera::{
    ast::{LinkedField, Selection},
    utils::{field_storage_key, get_handle_storage_key},
    OperationLoader, Variables
};

/// Whether every record and field a selector needs is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Missing
}

/// Check whether `source` holds all the data for `selector`.
///
/// Deleted records count as available (they read as `null`). `@module` selections whose
/// operation isn't loaded yet count as missing.
pub fn check(
    source: &dyn RecordSource,
    selector: &NormalizationSelector,
    loader: Option<&dyn OperationLoader>
) -> Availability {
    let mut checker = Checker {
        source,
        variables: &selector.variables,
        loader,
        is_missing_data: false
    };
    checker.check_record(&selector.data_id, selector.node.selections());
    if checker.is_missing_data {
        Availability::Missing
    } else {
        Availability::Available
    }
}

struct Checker<'a> {
    source: &'a dyn RecordSource,
    variables: &'a Variables,
    loader: Option<&'a dyn OperationLoader>,
    is_missing_data: bool
}

impl<'a> Checker<'a> {
    fn check_record(&mut self, id: &str, selections: &[Selection]) {
        let source = self.source;
        match source.status(id) {
            RecordState::Unknown => self.is_missing_data = true,
            RecordState::Nonexistent => {}
            RecordState::Existent => {
                if let Some(record) = source.get(id) {
                    self.traverse_selections(selections, record);
                }
            }
        }
    }

    fn traverse_selections(&mut self, selections: &[Selection], record: &Record) {
        for selection in selections {
            if self.is_missing_data {
                return;
            }
            match selection {
                Selection::ScalarField(field) => {
                    if field.name == "__typename" {
                        continue;
                    }
                    let key = field_storage_key(
                        &field.name,
                        field.storage_key.as_deref(),
                        &field.args,
                        self.variables
                    );
                    if record.get(&key).is_none() {
                        self.is_missing_data = true;
                    }
                }
                Selection::LinkedField(field) => {
                    let key = field_storage_key(
                        &field.name,
                        field.storage_key.as_deref(),
                        &field.args,
                        self.variables
                    );
                    self.check_link(&key, field, record);
                }
                Selection::LinkedHandle(handle) => {
                    let response_key = handle.alias.as_deref().unwrap_or(&handle.name);
                    if let Some(field) = sibling_field(selections, response_key) {
                        let key = get_handle_storage_key(handle, self.variables);
                        self.check_link(&key, field, record);
                    }
                }
                Selection::InlineFragment(fragment) => match &fragment.abstract_key {
                    None => {
                        if record.typename() == fragment.type_condition {
                            self.traverse_selections(&fragment.selections, record);
                        }
                    }
                    Some(abstract_key) => match record.get_value(abstract_key) {
                        Some(Value::Bool(true)) => {
                            self.traverse_selections(&fragment.selections, record)
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
                        self.traverse_selections(&condition.selections, record);
                    }
                }
                Selection::Defer(defer) => self.traverse_selections(&defer.selections, record),
                Selection::Stream(stream) => self.traverse_selections(&stream.selections, record),
                Selection::ClientExtension(extension) => {
                    let is_missing_data = self.is_missing_data;
                    self.traverse_selections(&extension.selections, record);
                    self.is_missing_data = is_missing_data;
                }
                Selection::ModuleImport(module) => {
                    match record.get_value(&module_operation_key(&module.document_name)) {
                        Some(Value::String(reference)) => {
                            match self.loader.and_then(|loader| loader.get(reference)) {
                                Some(operation) => {
                                    self.traverse_selections(&operation.selections, record)
                                }
                                None => self.is_missing_data = true
                            }
                        }
                        Some(_) => {}
                        None => self.is_missing_data = true
                    }
                }
                Selection::FragmentSpread(_) => {}
            }
        }
    }

    fn check_link(&mut self, key: &str, field: &LinkedField, record: &Record) {
        match record.get(key) {
            None => self.is_missing_data = true,
            Some(RecordValue::Scalar(Value::Null)) => {}
            Some(RecordValue::Link(id)) if !field.plural => {
                self.check_record(id, &field.selections)
            }
            Some(RecordValue::Links(ids)) if field.plural => {
                for id in ids.iter().flatten() {
                    self.check_record(id, &field.selections);
                }
            }
            Some(other) => {
                tracing::warn!(
                    id = record.id(),
                    field = key,
                    value = ?other,
                    "record field doesn't match the shape of its selection"
                );
                self.is_missing_data = true;
            }
        }
    }
}
