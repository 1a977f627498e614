use super::{Environment, EnvironmentImpl};
use crate::{
    handlers::{DefaultHandlerProvider, HandlerProvider},
    RecordSourceMap, Store, StoreOptions
};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tessera::{Network, OperationLoader, RequestPolicy};

pub struct EnvironmentBuilder {
    network: Arc<dyn Network>,
    store: Option<Store>,
    store_options: StoreOptions,
    operation_loader: Option<Arc<dyn OperationLoader>>,
    handler_provider: Arc<dyn HandlerProvider>,
    request_policy: RequestPolicy
}

impl EnvironmentBuilder {
    pub fn new<N: Network>(network: N) -> Self {
        EnvironmentBuilder {
            network: Arc::new(network),
            store: None,
            store_options: StoreOptions::default(),
            operation_loader: None,
            handler_provider: Arc::new(DefaultHandlerProvider::new()),
            request_policy: RequestPolicy::CacheFirst
        }
    }

    /// Use an existing store. Its options take precedence over
    /// [`with_store_options`](#method.with_store_options).
    pub fn with_store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    /// Options for the store created by [`build`](#method.build).
    pub fn with_store_options(mut self, options: StoreOptions) -> Self {
        self.store_options = options;
        self
    }

    pub fn with_operation_loader<L: OperationLoader>(mut self, loader: L) -> Self {
        self.operation_loader = Some(Arc::new(loader));
        self
    }

    /// Replace the default handlers (just `connection`).
    pub fn with_handler_provider<H: HandlerProvider + 'static>(mut self, provider: H) -> Self {
        self.handler_provider = Arc::new(provider);
        self
    }

    /// The policy of [`fetch_query`](./struct.Environment.html#method.fetch_query) calls
    /// that don't specify one.
    pub fn with_request_policy(mut self, request_policy: RequestPolicy) -> Self {
        self.request_policy = request_policy;
        self
    }

    pub fn build(self) -> Environment {
        let store_options = self.store_options;
        let mut store = self
            .store
            .unwrap_or_else(|| Store::new(RecordSourceMap::new(), store_options));
        if let Some(loader) = &self.operation_loader {
            store = store.with_operation_loader(loader.clone());
        }
        let options = store.options();

        let environment = EnvironmentImpl {
            store,
            network: self.network,
            operation_loader: self.operation_loader,
            handler_provider: self.handler_provider,
            request_policy: self.request_policy,
            options,
            descriptors: Mutex::new(FnvHashMap::default()),
            active_requests: Mutex::new(FnvHashMap::default())
        };

        Environment(Arc::new(environment))
    }
}
