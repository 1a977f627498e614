use serde_json::{Map, Value};

/// Variable bindings of an operation or fragment.
pub type Variables = Map<String, Value>;

/// The stable identity of a normalized record.
pub type DataId = String;

/// The kind of a GraphQL operation.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription
}

impl Default for OperationKind {
    fn default() -> Self {
        OperationKind::Query
    }
}

impl OperationKind {
    pub fn to_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription"
        }
    }
}

/// How a fetch combines data already in the store with the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPolicy {
    /// Use the store if the operation is fully available, otherwise fetch.
    CacheFirst,
    /// Never fetch. Missing data stays missing.
    CacheOnly,
    /// Always fetch, bypassing the store.
    NetworkOnly
}

impl Default for RequestPolicy {
    fn default() -> Self {
        RequestPolicy::CacheFirst
    }
}

/// Per-request configuration forwarded to the network layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheConfig {
    /// Bypass any network-level response cache.
    pub force: bool,
    /// Free-form metadata for custom network implementations.
    pub metadata: Option<Map<String, Value>>
}

impl CacheConfig {
    pub fn force() -> Self {
        CacheConfig {
            force: true,
            metadata: None
        }
    }
}
