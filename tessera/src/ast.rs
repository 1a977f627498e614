//! The precompiled selection tree artifacts.
//!
//! Artifacts are produced by external compiler tooling and handed to the store as immutable,
//! already validated trees. Reader artifacts ([`ReaderFragment`](./struct.ReaderFragment.html))
//! describe what a component reads; normalization artifacts
//! ([`NormalizationOperation`](./struct.NormalizationOperation.html)) describe how a response
//! is written into records. Both share the [`Selection`](./enum.Selection.html) node type.
//!
//! Every node kind is a variant of a closed enum, so adding a kind is a compile error in every
//! traversal that doesn't handle it. Artifacts deserialize from their JSON form:
//!
//! ```
//! # use serde_json::json;
//! use tessera::ast::{ReaderFragment, Selection};
//!
//! let fragment: ReaderFragment = serde_json::from_value(json!({
//!     "name": "UserFragment",
//!     "typeName": "User",
//!     "selections": [
//!         { "kind": "ScalarField", "name": "id" },
//!         { "kind": "ScalarField", "name": "name" }
//!     ]
//! })).unwrap();
//!
//! assert!(matches!(fragment.selections[0], Selection::ScalarField(_)));
//! ```

use crate::{OperationKind, Variables};
use serde_json::Value;
use std::sync::Arc;

/// A field argument as written in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Argument {
    /// A constant value.
    Literal { name: String, value: Value },
    /// A reference to an operation or fragment variable.
    #[serde(rename_all = "camelCase")]
    Variable {
        name: String,
        variable_name: String
    }
}

impl Argument {
    pub fn name(&self) -> &str {
        match self {
            Argument::Literal { name, .. } => name,
            Argument::Variable { name, .. } => name
        }
    }
}

/// A variable declared by an operation or fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ArgumentDefinition {
    /// Declared locally (`@argumentDefinitions` or operation variables), with a default.
    #[serde(rename_all = "camelCase")]
    LocalArgument {
        name: String,
        #[serde(default)]
        default_value: Value
    },
    /// Taken from the variables of the owning operation.
    RootArgument { name: String }
}

impl ArgumentDefinition {
    pub fn name(&self) -> &str {
        match self {
            ArgumentDefinition::LocalArgument { name, .. } => name,
            ArgumentDefinition::RootArgument { name } => name
        }
    }
}

/// One node of a selection tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Selection {
    ScalarField(ScalarField),
    LinkedField(LinkedField),
    LinkedHandle(LinkedHandle),
    FragmentSpread(FragmentSpread),
    InlineFragment(InlineFragment),
    Condition(Condition),
    Defer(Defer),
    Stream(Stream),
    ModuleImport(ModuleImport),
    ClientExtension(ClientExtension)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalarField {
    #[serde(default)]
    pub alias: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Vec<Argument>,
    /// Precomputed storage key, set when all arguments are literals.
    #[serde(default)]
    pub storage_key: Option<String>
}

impl ScalarField {
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedField {
    #[serde(default)]
    pub alias: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Vec<Argument>,
    #[serde(default)]
    pub storage_key: Option<String>,
    /// The concrete type of the field if it isn't abstract.
    #[serde(default)]
    pub concrete_type: Option<String>,
    #[serde(default)]
    pub plural: bool,
    pub selections: Vec<Selection>
}

impl LinkedField {
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// A client-side handle (e.g. `@connection`) attached to a server field.
/// Only present in normalization artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedHandle {
    #[serde(default)]
    pub alias: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Vec<Argument>,
    pub handle: String,
    #[serde(default)]
    pub key: String,
    /// Argument names that partition the handle's storage (e.g. `orderBy`).
    #[serde(default)]
    pub filters: Option<Vec<String>>,
    #[serde(default)]
    pub handle_args: Vec<Argument>
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentSpread {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Argument>
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineFragment {
    pub type_condition: String,
    /// For abstract type conditions: the record field recording whether the type matches.
    #[serde(default)]
    pub abstract_key: Option<String>,
    pub selections: Vec<Selection>
}

/// `@include`/`@skip` on a set of selections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// The boolean variable controlling the selections.
    pub condition: String,
    pub passing_value: bool,
    pub selections: Vec<Selection>
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defer {
    pub label: String,
    /// Variable name of the `if` argument. Absent means always deferred.
    #[serde(default, rename = "if")]
    pub if_: Option<String>,
    pub selections: Vec<Selection>
}

/// `@stream` on a plural linked field. The single selection is that field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub label: String,
    #[serde(default, rename = "if")]
    pub if_: Option<String>,
    pub selections: Vec<Selection>
}

/// A `@module` fragment whose selections are resolved at runtime by the operation loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleImport {
    pub document_name: String,
    pub fragment_name: String,
    pub fragment_prop_name: String
}

/// Selections on client-only schema extensions. Missing values are never reported as missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientExtension {
    pub selections: Vec<Selection>
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionDirection {
    Forward,
    Backward,
    Bidirectional
}

/// Describes a `@connection` field a fragment reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetadata {
    pub path: Vec<String>,
    pub direction: ConnectionDirection,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub count: Option<String>
}

/// The cursor and count variable names of one pagination direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorVariables {
    pub cursor: String,
    pub count: String
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationMetadata {
    pub path: Vec<String>,
    #[serde(default)]
    pub forward: Option<CursorVariables>,
    #[serde(default)]
    pub backward: Option<CursorVariables>
}

/// Present on fragments that can be refetched (and paginated) through a generated query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefetchMetadata {
    /// Name of the refetch query.
    pub operation: String,
    /// Where the fragment is spread inside the refetch query's result.
    #[serde(default)]
    pub fragment_path_in_result: Vec<String>,
    /// The field identifying the fragment's record, for fragments on `Node`.
    #[serde(default)]
    pub identifier_field: Option<String>,
    #[serde(default)]
    pub identifier_query_variable_name: Option<String>,
    #[serde(default)]
    pub connection: Option<PaginationMetadata>
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentMetadata {
    #[serde(default)]
    pub plural: bool,
    #[serde(default)]
    pub connection: Vec<ConnectionMetadata>,
    #[serde(default)]
    pub refetch: Option<RefetchMetadata>
}

/// What a fragment (or the root of an operation) reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderFragment {
    pub name: String,
    pub type_name: String,
    pub selections: Vec<Selection>,
    #[serde(default)]
    pub argument_definitions: Vec<ArgumentDefinition>,
    #[serde(default)]
    pub metadata: FragmentMetadata
}

impl ReaderFragment {
    pub fn is_plural(&self) -> bool {
        self.metadata.plural
    }
}

/// How a response to an operation is written into records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizationOperation {
    pub name: String,
    #[serde(default)]
    pub argument_definitions: Vec<ArgumentDefinition>,
    pub selections: Vec<Selection>
}

/// The normalization selections of a `@module` fragment, loaded on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationSplitOperation {
    pub name: String,
    pub selections: Vec<Selection>
}

/// Everything the network needs to send an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestParameters {
    /// Persisted query id.
    #[serde(default)]
    pub id: Option<String>,
    /// The stable content hash of the artifact.
    pub cache_id: String,
    pub name: String,
    #[serde(default)]
    pub operation_kind: OperationKind,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub metadata: Variables
}

/// A compiled operation: its reader root, its normalization tree and its request parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcreteRequest {
    pub fragment: Arc<ReaderFragment>,
    pub operation: Arc<NormalizationOperation>,
    pub params: RequestParameters
}
