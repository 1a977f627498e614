use thiserror::Error;

/// Errors raised by the store, the normalizer and the environment.
///
/// Missing data is never an error; it is reported through
/// [`Snapshot::is_missing_data`](./struct.Snapshot.html#structfield.is_missing_data).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// A caller broke a contract, e.g. by passing a malformed fragment reference.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// The response didn't match the shape of its selections.
    #[error("failed to normalize response at `{path}`: {message}")]
    Normalization { path: String, message: String },
    /// An object in the response had no `__typename` and its field no concrete type.
    #[error("missing `__typename` for the object at `{0}`")]
    MissingTypename(String),
    /// Serialized records couldn't be hydrated.
    #[error("invalid record source: {0}")]
    InvalidRecordSource(String),
    /// The operation loader failed or returned nothing for a module reference.
    #[error("failed to load operation `{reference}`: {message}")]
    OperationLoader { reference: String, message: String },
    #[error("request was cancelled")]
    Cancelled
}
