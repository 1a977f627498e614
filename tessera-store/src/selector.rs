use crate::{Data, StoreError, ROOT_ID};
use serde_json::Value;
use std::{fmt, sync::Arc};
use tessera::{
    ast::{
        ArgumentDefinition, ConcreteRequest, NormalizationOperation, NormalizationSplitOperation,
        ReaderFragment, Selection
    },
    utils::{progressive_hash, stable_variables},
    CacheConfig, DataId, Variables
};

/// An operation together with its variables. Fragment pointers hold on to the request
/// descriptor of the operation they were read from.
///
/// Two descriptors are equal when their identifiers are, i.e. same artifact and deep-equal
/// variables.
#[derive(Clone)]
pub struct RequestDescriptor {
    /// The artifact's cache id followed by its stable-serialized variables.
    pub identifier: String,
    /// A hash of `identifier`.
    pub key: u64,
    pub node: Arc<ConcreteRequest>,
    pub variables: Variables,
    pub cache_config: CacheConfig
}

impl PartialEq for RequestDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("identifier", &self.identifier)
            .field("cache_config", &self.cache_config)
            .finish()
    }
}

impl RequestDescriptor {
    pub fn new(
        node: Arc<ConcreteRequest>,
        variables: Variables,
        cache_config: Option<CacheConfig>
    ) -> Self {
        let identifier = request_identifier(&node, &variables);
        let key = progressive_hash(5381, &identifier);
        RequestDescriptor {
            identifier,
            key,
            node,
            variables,
            cache_config: cache_config.unwrap_or_default()
        }
    }
}

/// The identifier of an operation and its variables.
pub fn request_identifier(request: &ConcreteRequest, variables: &Variables) -> String {
    let id = request
        .params
        .id
        .as_deref()
        .unwrap_or(&request.params.cache_id);
    format!("{}{}", id, stable_variables(variables))
}

/// Where to read a singular fragment from.
#[derive(Debug, Clone, PartialEq)]
pub struct SingularReaderSelector {
    pub data_id: DataId,
    pub node: Arc<ReaderFragment>,
    pub variables: Variables,
    pub owner: Arc<RequestDescriptor>
}

impl SingularReaderSelector {
    pub fn new(
        data_id: DataId,
        node: Arc<ReaderFragment>,
        variables: Variables,
        owner: Arc<RequestDescriptor>
    ) -> Self {
        SingularReaderSelector {
            data_id,
            node,
            variables,
            owner
        }
    }
}

/// Where to read a plural fragment from. Entries are `None` where the fragment reference
/// list had a `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct PluralReaderSelector {
    pub selectors: Vec<Option<SingularReaderSelector>>
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReaderSelector {
    Singular(SingularReaderSelector),
    Plural(PluralReaderSelector)
}

/// The normalization selections of a selector.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizationNode {
    Operation(Arc<NormalizationOperation>),
    /// The selections of a `@module` fragment.
    Split(Arc<NormalizationSplitOperation>),
    /// A subtree, such as a deferred fragment or a streamed field.
    Selections(Arc<Vec<Selection>>)
}

impl NormalizationNode {
    pub fn selections(&self) -> &[Selection] {
        match self {
            NormalizationNode::Operation(operation) => &operation.selections,
            NormalizationNode::Split(operation) => &operation.selections,
            NormalizationNode::Selections(selections) => selections
        }
    }
}

/// Where to write (or mark, or check) normalized data.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationSelector {
    pub data_id: DataId,
    pub node: NormalizationNode,
    pub variables: Variables
}

/// Everything needed to read, write and retain one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDescriptor {
    /// Reads the operation's root fragment from the root record.
    pub fragment: SingularReaderSelector,
    pub request: Arc<RequestDescriptor>,
    /// Writes the operation's response to the root record.
    pub root: NormalizationSelector
}

/// Build the descriptor of an operation. The result only depends on its inputs; deep-equal
/// inputs produce equal descriptors.
pub fn create_operation_descriptor(
    request: Arc<ConcreteRequest>,
    variables: &Variables,
    cache_config: Option<CacheConfig>
) -> OperationDescriptor {
    let operation_variables = get_operation_variables(&request.operation, variables);
    let descriptor = Arc::new(RequestDescriptor::new(
        request.clone(),
        operation_variables.clone(),
        cache_config
    ));

    OperationDescriptor {
        fragment: SingularReaderSelector::new(
            ROOT_ID.to_string(),
            request.fragment.clone(),
            operation_variables.clone(),
            descriptor.clone()
        ),
        request: descriptor,
        root: NormalizationSelector {
            data_id: ROOT_ID.to_string(),
            node: NormalizationNode::Operation(request.operation.clone()),
            variables: operation_variables
        }
    }
}

/// The variables of an operation: the declared ones, falling back to their defaults.
pub fn get_operation_variables(
    operation: &NormalizationOperation,
    variables: &Variables
) -> Variables {
    let mut operation_variables = Variables::new();
    for definition in &operation.argument_definitions {
        let value = match definition {
            ArgumentDefinition::LocalArgument {
                name,
                default_value
            } => variables
                .get(name)
                .cloned()
                .unwrap_or_else(|| default_value.clone()),
            ArgumentDefinition::RootArgument { name } => {
                variables.get(name).cloned().unwrap_or(Value::Null)
            }
        };
        operation_variables.insert(definition.name().to_string(), value);
    }
    operation_variables
}

/// The variables a fragment is read with: the arguments of its spread, then the defaults of
/// its local arguments, then the root variables it references.
pub fn get_fragment_variables(
    fragment: &ReaderFragment,
    root_variables: &Variables,
    argument_variables: &Variables
) -> Variables {
    let mut variables = argument_variables.clone();
    for definition in &fragment.argument_definitions {
        if argument_variables.contains_key(definition.name()) {
            continue;
        }
        match definition {
            ArgumentDefinition::LocalArgument {
                name,
                default_value
            } => {
                variables.insert(name.clone(), default_value.clone());
            }
            ArgumentDefinition::RootArgument { name } => {
                if let Some(value) = root_variables.get(name) {
                    variables.insert(name.clone(), value.clone());
                }
            }
        }
    }
    variables
}

/// Resolve a fragment reference into a selector.
///
/// Returns `Ok(None)` for `null` references and (with a warning) for objects that don't point
/// to the fragment. Anything other than an object is an invariant violation.
pub fn get_singular_selector(
    fragment: &Arc<ReaderFragment>,
    item: &Data
) -> Result<Option<SingularReaderSelector>, StoreError> {
    let object = match item {
        Data::Null | Data::Undefined => return Ok(None),
        Data::Object(object) => object,
        other => {
            return Err(StoreError::InvariantViolation(format!(
                "expected a singular object reference for fragment `{}`, got `{}`",
                fragment.name,
                other.to_json()
            )))
        }
    };

    let pointer = (
        object.id.as_ref(),
        object.fragments.get(&fragment.name),
        object.owner.as_ref()
    );
    match pointer {
        (Some(id), Some(arguments), Some(owner)) => {
            let variables = get_fragment_variables(fragment, &owner.variables, arguments);
            Ok(Some(SingularReaderSelector::new(
                id.clone(),
                fragment.clone(),
                variables,
                owner.clone()
            )))
        }
        _ => {
            tracing::warn!(
                fragment = %fragment.name,
                "expected object to contain data for fragment, did you spread it?"
            );
            Ok(None)
        }
    }
}

/// Resolve a list of fragment references. `null` entries stay `None`.
pub fn get_plural_selector(
    fragment: &Arc<ReaderFragment>,
    items: &Data
) -> Result<Option<PluralReaderSelector>, StoreError> {
    let items = match items {
        Data::Null | Data::Undefined => return Ok(None),
        Data::List(items) => items,
        other => {
            return Err(StoreError::InvariantViolation(format!(
                "expected a list of references for plural fragment `{}`, got `{}`",
                fragment.name,
                other.to_json()
            )))
        }
    };
    let selectors = items
        .iter()
        .map(|item| get_singular_selector(fragment, item))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(PluralReaderSelector { selectors }))
}

/// Resolve a fragment reference, singular or plural depending on the fragment.
pub fn get_selector(
    fragment: &Arc<ReaderFragment>,
    item: &Data
) -> Result<Option<ReaderSelector>, StoreError> {
    if fragment.is_plural() {
        Ok(get_plural_selector(fragment, item)?.map(ReaderSelector::Plural))
    } else {
        Ok(get_singular_selector(fragment, item)?.map(ReaderSelector::Singular))
    }
}

/// Whether two selectors read the same data: same record, fragment, variables and owner.
pub fn are_equal_selectors(a: &SingularReaderSelector, b: &SingularReaderSelector) -> bool {
    a.data_id == b.data_id
        && (Arc::ptr_eq(&a.node, &b.node) || a.node == b.node)
        && a.variables == b.variables
        && a.owner.identifier == b.owner.identifier
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DataObject;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tessera_test::queries::{user_fragment, user_query};

    fn vars(value: Value) -> Variables {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn descriptors_are_keyed_by_stable_variables() {
        let a = create_operation_descriptor(user_query(), &vars(json!({ "id": "1" })), None);
        let b = create_operation_descriptor(user_query(), &vars(json!({ "id": "1" })), None);
        let c = create_operation_descriptor(user_query(), &vars(json!({ "id": "2" })), None);

        assert_eq!(a, b);
        assert_eq!(a.request.key, b.request.key);
        assert_ne!(a.request.identifier, c.request.identifier);
        assert_eq!(a.fragment.data_id, ROOT_ID);
        assert_eq!(a.root.data_id, ROOT_ID);
    }

    #[test]
    fn undeclared_variables_are_dropped() {
        let operation = create_operation_descriptor(
            user_query(),
            &vars(json!({ "id": "1", "unused": true })),
            None
        );
        assert_eq!(operation.request.variables, vars(json!({ "id": "1" })));
    }

    #[test]
    fn fragment_variables_fall_back_to_defaults() {
        let fragment: ReaderFragment = serde_json::from_value(json!({
            "name": "F",
            "typeName": "User",
            "selections": [],
            "argumentDefinitions": [
                { "kind": "LocalArgument", "name": "count", "defaultValue": 10 },
                { "kind": "RootArgument", "name": "scale" }
            ]
        }))
        .unwrap();

        let variables =
            get_fragment_variables(&fragment, &vars(json!({ "scale": 2 })), &Variables::new());
        assert_eq!(variables, vars(json!({ "count": 10, "scale": 2 })));

        let variables = get_fragment_variables(
            &fragment,
            &vars(json!({ "scale": 2 })),
            &vars(json!({ "count": 3 }))
        );
        assert_eq!(variables, vars(json!({ "count": 3, "scale": 2 })));
    }

    #[test]
    fn pointers_resolve_into_selectors() {
        let operation = create_operation_descriptor(user_query(), &vars(json!({ "id": "1" })), None);
        let fragment = user_fragment();
        let mut fragments = BTreeMap::new();
        fragments.insert(fragment.name.clone(), Variables::new());
        let pointer = Data::Object(Arc::new(DataObject {
            fields: BTreeMap::new(),
            id: Some("User:1".into()),
            fragments,
            owner: Some(operation.request.clone())
        }));

        let selector = get_singular_selector(&fragment, &pointer).unwrap().unwrap();
        assert_eq!(selector.data_id, "User:1");
        assert_eq!(selector.owner, operation.request);
        assert!(are_equal_selectors(&selector, &selector.clone()));

        assert_eq!(get_singular_selector(&fragment, &Data::Null).unwrap(), None);
        assert!(matches!(
            get_singular_selector(&fragment, &Data::Scalar(json!(1))),
            Err(StoreError::InvariantViolation(_))
        ));
        assert!(matches!(
            get_plural_selector(&fragment, &pointer),
            Err(StoreError::InvariantViolation(_))
        ));

        let plural = Data::List(Arc::new(vec![pointer, Data::Null]));
        let selectors = get_plural_selector(&fragment, &plural).unwrap().unwrap();
        assert_eq!(selectors.selectors.len(), 2);
        assert!(selectors.selectors[1].is_none());
    }
}
