//! A normalized GraphQL store and the environment that fills it.
//!
//! Responses are flattened into records keyed by id ([`normalize`](./fn.normalize.html)),
//! kept in a [`Store`](./struct.Store.html) with optional optimistic layers on top and read
//! back into immutable, structurally shared [`Data`](./enum.Data.html) trees. Subscribers are
//! notified when a write changes what they read, and records nothing retains anymore are
//! garbage collected.
//!
//! An [`Environment`](./struct.Environment.html) ties a store to a network, executes
//! queries, mutations and incremental (`@defer`/`@stream`/`@module`) responses, and the
//! [`PaginationController`](./struct.PaginationController.html) pages through connections.

mod checker;
mod data;
mod environment;
mod error;
pub mod handlers;
mod normalizer;
mod optimistic;
mod pagination;
mod proxy;
mod reader;
mod record;
mod references;
mod selector;
mod source;
mod store;
mod types;

pub use checker::{check, Availability};
pub use data::{recycle_nodes_into, Data, DataObject};
pub use environment::{
    Environment, EnvironmentBuilder, EnvironmentImpl, Execution, MutationConfig
};
pub use error::StoreError;
pub use normalizer::{
    get_data_id, incremental_key, normalize, HandleFieldPayload, IncrementalPlaceholder,
    ModuleImportPayload, NormalizationResult
};
pub use optimistic::{LayerFn, OptimisticLayers, StoreView};
pub use pagination::{
    reduce, CompletionCallback, ConnectionEvent, ConnectionState, LoadOptions, PageInfo,
    PaginationController, PaginationPhase
};
pub use proxy::{
    RecordProxy, RecordSourceMutator, RecordSourceProxy, SelectorStoreUpdater, StoreUpdater
};
pub use reader::{read, read_plural, Snapshot};
pub use record::{
    generate_client_id, is_client_id, module_component_key, module_operation_key, Record,
    RecordValue, ID_KEY, ROOT_ID, ROOT_TYPE, TYPENAME_KEY
};
pub use references::mark;
pub use selector::{
    are_equal_selectors, create_operation_descriptor, get_fragment_variables,
    get_operation_variables, get_plural_selector, get_selector, get_singular_selector,
    request_identifier, NormalizationNode, NormalizationSelector, OperationDescriptor,
    PluralReaderSelector, ReaderSelector, RequestDescriptor, SingularReaderSelector
};
pub use source::{RecordSource, RecordSourceMap, RecordState};
pub use store::{Disposable, OperationAvailability, OptimisticUpdate, Store, SubscriptionCallback};
pub use types::{GcScheduler, StoreOptions};
