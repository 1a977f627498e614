use crate::{
    generate_client_id, module_component_key, module_operation_key, NormalizationNode,
    NormalizationSelector, Record, RecordSource, RecordSourceMap, RecordValue, StoreError,
    StoreOptions
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tessera::{
    ast::{LinkedField, LinkedHandle, ModuleImport, Selection},
    path_to_string,
    utils::{
        field_storage_key, format_storage_key, get_argument_values, get_handle_storage_key
    },
    DataId, PathFragment, Variables
};

/// A handle (e.g. `@connection`) to run over a freshly written field.
#[derive(Debug, Clone, PartialEq)]
pub struct HandleFieldPayload {
    /// The field arguments.
    pub args: Variables,
    /// The record the field was written to.
    pub data_id: DataId,
    /// The storage key of the server field.
    pub field_key: String,
    pub handle: String,
    /// The storage key of the client field the handle writes.
    pub handle_key: String,
    pub handle_args: Variables
}

/// A `@defer` or `@stream` selection whose data arrives in a later payload.
#[derive(Debug, Clone, PartialEq)]
pub enum IncrementalPlaceholder {
    Defer {
        label: String,
        path: Vec<PathFragment>,
        selector: NormalizationSelector,
        typename: String
    },
    Stream {
        label: String,
        path: Vec<PathFragment>,
        parent_id: DataId,
        field: Arc<LinkedField>,
        variables: Variables
    }
}

impl IncrementalPlaceholder {
    pub fn label(&self) -> &str {
        match self {
            IncrementalPlaceholder::Defer { label, .. } => label,
            IncrementalPlaceholder::Stream { label, .. } => label
        }
    }

    pub fn path(&self) -> &[PathFragment] {
        match self {
            IncrementalPlaceholder::Defer { path, .. } => path,
            IncrementalPlaceholder::Stream { path, .. } => path
        }
    }

    /// The key incremental payloads are matched against.
    pub fn key(&self) -> String {
        incremental_key(self.label(), self.path())
    }
}

/// The key of the placeholder an incremental payload belongs to.
pub fn incremental_key(label: &str, path: &[PathFragment]) -> String {
    format!("{}:{}", label, path_to_string(path))
}

/// A `@module` selection whose normalization selections must be loaded first.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleImportPayload {
    pub data: Map<String, Value>,
    pub data_id: DataId,
    pub typename: String,
    pub operation_reference: String,
    pub path: Vec<PathFragment>,
    pub variables: Variables
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizationResult {
    pub source: RecordSourceMap,
    pub field_payloads: Vec<HandleFieldPayload>,
    pub incremental_placeholders: Vec<IncrementalPlaceholder>,
    pub module_import_payloads: Vec<ModuleImportPayload>
}

/// Write `data` (the response object for `selector.data_id`, of type `typename`) into a new
/// batch of records.
pub fn normalize(
    selector: &NormalizationSelector,
    typename: &str,
    data: &Map<String, Value>,
    path: Vec<PathFragment>,
    options: &StoreOptions
) -> Result<NormalizationResult, StoreError> {
    let mut normalizer = Normalizer {
        variables: &selector.variables,
        options,
        path,
        is_client_extension: false,
        result: NormalizationResult::default()
    };
    normalizer.normalize_record(
        selector.node.selections(),
        &selector.data_id,
        typename,
        data
    )?;
    Ok(normalizer.result)
}

/// The global id of a response object: its id field, prefixed with its typename.
pub fn get_data_id(
    data: &Map<String, Value>,
    typename: &str,
    options: &StoreOptions
) -> Option<DataId> {
    let id = match options.id_key(typename) {
        Some(key) => data.get(key),
        None => data.get("id").or_else(|| data.get("_id"))
    };
    let id = match id {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => return None
    };
    let mut key = String::with_capacity(typename.len() + id.len() + 1);
    key.push_str(typename);
    key.push(':');
    key.push_str(&id);
    Some(key)
}

struct Normalizer<'a> {
    variables: &'a Variables,
    options: &'a StoreOptions,
    path: Vec<PathFragment>,
    is_client_extension: bool,
    result: NormalizationResult
}

impl<'a> Normalizer<'a> {
    fn error(&self, message: String) -> StoreError {
        StoreError::Normalization {
            path: path_to_string(&self.path),
            message
        }
    }

    fn normalize_record(
        &mut self,
        selections: &[Selection],
        id: &str,
        typename: &str,
        data: &Map<String, Value>
    ) -> Result<(), StoreError> {
        let mut record = match self.result.source.get(id) {
            Some(existing) => Record::clone(existing),
            None => Record::new(id, typename)
        };
        self.traverse_selections(selections, &mut record, data)?;

        let merged = match self.result.source.get(id) {
            Some(written) => Record::update(written, &record).unwrap_or_else(|| Record::clone(written)),
            None => record
        };
        self.result.source.set(merged);
        Ok(())
    }

    fn traverse_selections(
        &mut self,
        selections: &[Selection],
        record: &mut Record,
        data: &Map<String, Value>
    ) -> Result<(), StoreError> {
        for selection in selections {
            match selection {
                Selection::ScalarField(field) => {
                    if field.name == "__typename" {
                        continue;
                    }
                    let value = match data.get(field.response_key()) {
                        Some(value) => value,
                        None => {
                            if !self.is_client_extension {
                                tracing::trace!(
                                    field = field.response_key(),
                                    path = %path_to_string(&self.path),
                                    "payload is missing an expected field"
                                );
                            }
                            continue;
                        }
                    };
                    let key = field_storage_key(
                        &field.name,
                        field.storage_key.as_deref(),
                        &field.args,
                        self.variables
                    );
                    record.set_value(key, value.clone());
                }
                Selection::LinkedField(field) => self.normalize_field(field, record, data)?,
                Selection::LinkedHandle(handle) => self.push_handle(handle, record),
                Selection::InlineFragment(fragment) => match &fragment.abstract_key {
                    None => {
                        if record.typename() == fragment.type_condition {
                            self.traverse_selections(&fragment.selections, record, data)?;
                        }
                    }
                    Some(abstract_key) => {
                        let implements = data.contains_key(abstract_key);
                        record.set_value(abstract_key.clone(), Value::Bool(implements));
                        if implements {
                            self.traverse_selections(&fragment.selections, record, data)?;
                        }
                    }
                },
                Selection::Condition(condition) => {
                    let value = self
                        .variables
                        .get(&condition.condition)
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    if value == condition.passing_value {
                        self.traverse_selections(&condition.selections, record, data)?;
                    }
                }
                Selection::Defer(defer) => {
                    if self.is_enabled(defer.if_.as_deref()) {
                        self.result
                            .incremental_placeholders
                            .push(IncrementalPlaceholder::Defer {
                                label: defer.label.clone(),
                                path: self.path.clone(),
                                selector: NormalizationSelector {
                                    data_id: record.id().to_string(),
                                    node: NormalizationNode::Selections(Arc::new(
                                        defer.selections.clone()
                                    )),
                                    variables: self.variables.clone()
                                },
                                typename: record.typename().to_string()
                            });
                    } else {
                        self.traverse_selections(&defer.selections, record, data)?;
                    }
                }
                Selection::Stream(stream) => {
                    self.traverse_selections(&stream.selections, record, data)?;
                    if self.is_enabled(stream.if_.as_deref()) {
                        for selection in &stream.selections {
                            if let Selection::LinkedField(field) = selection {
                                self.result.incremental_placeholders.push(
                                    IncrementalPlaceholder::Stream {
                                        label: stream.label.clone(),
                                        path: self.path.clone(),
                                        parent_id: record.id().to_string(),
                                        field: Arc::new(field.clone()),
                                        variables: self.variables.clone()
                                    }
                                );
                            }
                        }
                    }
                }
                Selection::ModuleImport(module) => self.normalize_module_import(module, record, data),
                Selection::ClientExtension(extension) => {
                    let is_client_extension = self.is_client_extension;
                    self.is_client_extension = true;
                    let result = self.traverse_selections(&extension.selections, record, data);
                    self.is_client_extension = is_client_extension;
                    result?;
                }
                // Spreads are inlined into normalization artifacts.
                Selection::FragmentSpread(_) => {}
            }
        }
        Ok(())
    }

    fn is_enabled(&self, condition: Option<&str>) -> bool {
        match condition {
            None => true,
            Some(variable) => self
                .variables
                .get(variable)
                .and_then(Value::as_bool)
                .unwrap_or(false)
        }
    }

    fn typename_of(
        &self,
        field: &LinkedField,
        data: &Map<String, Value>
    ) -> Result<String, StoreError> {
        match (data.get("__typename"), &field.concrete_type) {
            (Some(Value::String(typename)), _) => Ok(typename.clone()),
            (_, Some(typename)) => Ok(typename.clone()),
            _ => Err(StoreError::MissingTypename(path_to_string(&self.path)))
        }
    }

    fn normalize_field(
        &mut self,
        field: &LinkedField,
        record: &mut Record,
        data: &Map<String, Value>
    ) -> Result<(), StoreError> {
        let response_key = field.response_key();
        let value = match data.get(response_key) {
            Some(value) => value,
            None => return Ok(())
        };
        let key = field_storage_key(
            &field.name,
            field.storage_key.as_deref(),
            &field.args,
            self.variables
        );

        self.path.push(PathFragment::Key(response_key.to_string()));
        let result = match (value, field.plural) {
            (Value::Null, _) => {
                record.set_value(key, Value::Null);
                Ok(())
            }
            (Value::Object(object), false) => {
                self.normalize_link(field, record.id(), &key, None, object)
                    .map(|id| record.set_link(key.clone(), id))
            }
            (Value::Array(items), true) => {
                let mut ids = Vec::with_capacity(items.len());
                let mut result = Ok(());
                for (index, item) in items.iter().enumerate() {
                    self.path.push(PathFragment::Index(index as i32));
                    let id = match item {
                        Value::Null => Ok(None),
                        Value::Object(object) => self
                            .normalize_link(field, record.id(), &key, Some(index), object)
                            .map(Some),
                        other => Err(self.error(format!(
                            "expected an object or null in list `{}`, got `{}`",
                            response_key, other
                        )))
                    };
                    self.path.pop();
                    match id {
                        Ok(id) => ids.push(id),
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    }
                }
                result.map(|_| record.set(key.clone(), RecordValue::Links(ids)))
            }
            (other, true) => Err(self.error(format!(
                "expected a list for plural field `{}`, got `{}`",
                response_key, other
            ))),
            (other, false) => Err(self.error(format!(
                "expected an object for field `{}`, got `{}`",
                response_key, other
            )))
        };
        self.path.pop();
        result
    }

    fn normalize_link(
        &mut self,
        field: &LinkedField,
        parent_id: &str,
        storage_key: &str,
        index: Option<usize>,
        data: &Map<String, Value>
    ) -> Result<DataId, StoreError> {
        let typename = self.typename_of(field, data)?;
        let id = get_data_id(data, &typename, self.options)
            .unwrap_or_else(|| generate_client_id(parent_id, storage_key, index));
        self.normalize_record(&field.selections, &id, &typename, data)?;
        Ok(id)
    }

    fn push_handle(&mut self, handle: &LinkedHandle, record: &Record) {
        let args = get_argument_values(&handle.args, self.variables);
        self.result.field_payloads.push(HandleFieldPayload {
            field_key: format_storage_key(&handle.name, &args),
            args,
            data_id: record.id().to_string(),
            handle: handle.handle.clone(),
            handle_key: get_handle_storage_key(handle, self.variables),
            handle_args: get_argument_values(&handle.handle_args, self.variables)
        });
    }

    fn normalize_module_import(
        &mut self,
        module: &ModuleImport,
        record: &mut Record,
        data: &Map<String, Value>
    ) {
        let component_key = module_component_key(&module.document_name);
        let component = data.get(&component_key).cloned().unwrap_or(Value::Null);
        record.set_value(component_key, component);

        let operation_key = module_operation_key(&module.document_name);
        let operation = data.get(&operation_key).cloned().unwrap_or(Value::Null);
        record.set_value(operation_key, operation.clone());

        if let Value::String(operation_reference) = operation {
            self.result
                .module_import_payloads
                .push(ModuleImportPayload {
                    data: data.clone(),
                    data_id: record.id().to_string(),
                    typename: record.typename().to_string(),
                    operation_reference,
                    path: self.path.clone(),
                    variables: self.variables.clone()
                });
        }
    }
}
