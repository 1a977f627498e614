//! The surface UI bindings talk to: a store plus the network, the operation loader and the
//! field handlers.

use crate::{
    create_operation_descriptor, get_operation_variables, handlers::HandlerProvider, normalize,
    request_identifier, Disposable, OperationAvailability, OperationDescriptor, OptimisticUpdate,
    RecordSourceProxy, SelectorStoreUpdater, SingularReaderSelector, Snapshot, Store,
    StoreError, StoreOptions, StoreUpdater, ROOT_TYPE
};
use fnv::FnvHashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::{Arc, Weak};
use tessera::{
    ast::ConcreteRequest, CacheConfig, Network, OperationLoader, QueryError, RequestPolicy,
    Variables
};

mod builder;
mod execute;

pub use builder::EnvironmentBuilder;
pub use execute::Execution;

use execute::{normalize_module, optimistic_layer, publish_batch, PublishBatch};

/// What to do around a mutation.
#[derive(Clone, Default)]
pub struct MutationConfig {
    /// Written to an optimistic layer until the server responds.
    pub optimistic_response: Option<Map<String, Value>>,
    /// Runs in the optimistic layer, after `optimistic_response` is written.
    pub optimistic_updater: Option<StoreUpdater>,
    /// Runs after each server payload is written, with the payload's data.
    pub updater: Option<SelectorStoreUpdater>
}

impl MutationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_optimistic_response(mut self, response: Map<String, Value>) -> Self {
        self.optimistic_response = Some(response);
        self
    }

    pub fn with_optimistic_updater<F>(mut self, updater: F) -> Self
    where
        F: Fn(&RecordSourceProxy<'_>) + Send + Sync + 'static
    {
        self.optimistic_updater = Some(Arc::new(updater));
        self
    }

    pub fn with_updater<F>(mut self, updater: F) -> Self
    where
        F: Fn(&RecordSourceProxy<'_>, &crate::Data) + Send + Sync + 'static
    {
        self.updater = Some(Arc::new(updater));
        self
    }
}

pub struct EnvironmentImpl {
    pub(crate) store: Store,
    pub(crate) network: Arc<dyn Network>,
    pub(crate) operation_loader: Option<Arc<dyn OperationLoader>>,
    pub(crate) handler_provider: Arc<dyn HandlerProvider>,
    pub(crate) request_policy: RequestPolicy,
    pub(crate) options: StoreOptions,
    descriptors: Mutex<FnvHashMap<String, Weak<OperationDescriptor>>>,
    active_requests: Mutex<FnvHashMap<String, usize>>
}

impl EnvironmentImpl {
    pub(crate) fn request_started(&self, identifier: &str) {
        *self
            .active_requests
            .lock()
            .entry(identifier.to_string())
            .or_insert(0) += 1;
    }

    pub(crate) fn request_finished(&self, identifier: &str) {
        let mut active = self.active_requests.lock();
        if let Some(count) = active.get_mut(identifier) {
            *count -= 1;
            if *count == 0 {
                active.remove(identifier);
            }
        }
    }
}

/// A cheap, cloneable handle to an environment.
#[derive(Clone)]
#[repr(transparent)]
pub struct Environment(pub Arc<EnvironmentImpl>);

impl Environment {
    pub fn builder<N: Network>(network: N) -> EnvironmentBuilder {
        EnvironmentBuilder::new(network)
    }

    pub fn get_store(&self) -> &Store {
        &self.0.store
    }

    pub fn lookup(&self, selector: &SingularReaderSelector) -> Snapshot {
        self.0.store.lookup(selector)
    }

    pub fn subscribe<F>(&self, snapshot: Snapshot, callback: F) -> Disposable
    where
        F: Fn(&Snapshot) + Send + Sync + 'static
    {
        self.0.store.subscribe(snapshot, callback)
    }

    pub fn retain(&self, operation: &OperationDescriptor) -> Disposable {
        self.0.store.retain(operation)
    }

    pub fn check(&self, operation: &OperationDescriptor) -> OperationAvailability {
        self.0.store.check(operation)
    }

    /// The descriptor of `request` with `variables`. Deep-equal variables give the same
    /// descriptor for as long as someone holds on to it.
    pub fn operation_descriptor(
        &self,
        request: Arc<ConcreteRequest>,
        variables: &Variables,
        cache_config: Option<CacheConfig>
    ) -> Arc<OperationDescriptor> {
        let operation_variables = get_operation_variables(&request.operation, variables);
        let identifier = request_identifier(&request, &operation_variables);
        let mut descriptors = self.0.descriptors.lock();
        if let Some(descriptor) = descriptors.get(&identifier).and_then(Weak::upgrade) {
            return descriptor;
        }
        descriptors.retain(|_, descriptor| descriptor.strong_count() > 0);
        let descriptor = Arc::new(create_operation_descriptor(
            request,
            &operation_variables,
            cache_config
        ));
        descriptors.insert(identifier, Arc::downgrade(&descriptor));
        descriptor
    }

    /// Whether a request for `operation` is in flight.
    pub fn is_request_active(&self, operation: &OperationDescriptor) -> bool {
        self.is_request_active_for(&operation.request.identifier)
    }

    pub(crate) fn is_request_active_for(&self, identifier: &str) -> bool {
        self.0.active_requests.lock().contains_key(identifier)
    }

    /// Write a server response for `operation` and notify.
    ///
    /// `@module` selections are only followed if the loader already has their operation.
    /// Nothing is written if any part of the payload fails to normalize.
    pub fn commit_payload(
        &self,
        operation: &OperationDescriptor,
        payload: &Map<String, Value>
    ) -> Result<(), StoreError> {
        let mut results = vec![normalize(
            &operation.root,
            ROOT_TYPE,
            payload,
            vec![],
            &self.0.options
        )?];
        let mut batches = Vec::new();
        while let Some(result) = results.pop() {
            for module in &result.module_import_payloads {
                let loaded = self
                    .0
                    .operation_loader
                    .as_ref()
                    .and_then(|loader| loader.get(&module.operation_reference));
                match loaded {
                    Some(split) => results.push(normalize_module(&self.0.options, module, split)?),
                    None => tracing::warn!(
                        reference = %module.operation_reference,
                        "skipping @module selection whose operation isn't loaded"
                    )
                }
            }
            batches.push(PublishBatch::new(result.source, result.field_payloads));
        }
        for batch in batches {
            publish_batch(&self.0, batch);
        }
        self.0.store.notify(Some(operation));
        Ok(())
    }

    /// Send `operation` to the network. The returned stream drives the request.
    pub fn execute(&self, operation: &OperationDescriptor) -> Execution {
        Execution::new(self.clone(), operation.clone(), None, None)
    }

    /// Send a mutation, with an optimistic layer that lives until the first server payload
    /// (or an error, or the stream being dropped).
    pub fn execute_mutation(
        &self,
        operation: &OperationDescriptor,
        config: MutationConfig
    ) -> Execution {
        let MutationConfig {
            optimistic_response,
            optimistic_updater,
            updater
        } = config;
        let optimistic = if optimistic_response.is_some() || optimistic_updater.is_some() {
            Some(optimistic_layer(
                &self.0,
                operation,
                optimistic_response,
                optimistic_updater
            ))
        } else {
            None
        };
        Execution::new(self.clone(), operation.clone(), optimistic, updater)
    }

    /// Run `updater` in a new optimistic layer. `updater` runs with the store locked and must
    /// not call into the environment or the store.
    pub fn apply_update<F>(&self, updater: F) -> OptimisticUpdate
    where
        F: Fn(&RecordSourceProxy<'_>) + Send + Sync + 'static
    {
        self.0.store.apply_update(Arc::new(move |source| {
            let proxy = RecordSourceProxy::new(source);
            updater(&proxy);
            proxy.into_sink()
        }))
    }

    pub fn revert_update(&self, update: &OptimisticUpdate) {
        self.0.store.revert_update(update);
    }

    /// Run `updater` against the base records, publish what it wrote and notify. Like
    /// [`apply_update`](#method.apply_update), `updater` must not call into the store.
    pub fn commit_update<F>(&self, updater: F)
    where
        F: FnOnce(&RecordSourceProxy<'_>) + Send + 'static
    {
        self.0.store.publish_with(move |base| {
            let proxy = RecordSourceProxy::new(base);
            updater(&proxy);
            proxy.into_sink()
        });
        self.0.store.notify(None);
    }

    /// Fetch `operation` according to `policy` (the environment's default if `None`) and
    /// return its snapshot.
    ///
    /// The operation is retained while the request is in flight.
    pub async fn fetch_query(
        &self,
        operation: &OperationDescriptor,
        policy: Option<RequestPolicy>
    ) -> Result<Snapshot, QueryError> {
        let fetch = match policy.unwrap_or(self.0.request_policy) {
            RequestPolicy::CacheOnly => false,
            RequestPolicy::NetworkOnly => true,
            RequestPolicy::CacheFirst => !matches!(
                self.check(operation),
                OperationAvailability::Available { .. }
            )
        };
        if !fetch {
            return Ok(self.lookup(&operation.fragment));
        }

        let retained = self.retain(operation);
        let mut execution = self.execute(operation);
        let mut result = Ok(());
        while let Some(response) = execution.next().await {
            if let Err(e) = response {
                result = Err(e);
                break;
            }
        }
        drop(execution);
        let snapshot = self.lookup(&operation.fragment);
        retained.dispose();
        result.map(|_| snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{get_singular_selector, handlers::DefaultHandlerProvider, Data};
    use futures::FutureExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tessera::{PathFragment, Response};
    use tessera_test::{
        queries::{
            defer_query, friends_fragment, friends_query, module_query, set_name_mutation,
            stream_query, user_fragment, user_query
        },
        MockNetwork, MockOperationLoader
    };

    fn vars(value: Value) -> Variables {
        value.as_object().cloned().unwrap_or_default()
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn environment(network: &MockNetwork) -> Environment {
        Environment::builder(network.clone()).build()
    }

    fn user_name(env: &Environment, id: &str) -> Option<Value> {
        env.get_store().with_source(|source| {
            source
                .get(id)
                .and_then(|record| record.get_value("name").cloned())
        })
    }

    fn alice() -> Map<String, Value> {
        object(json!({ "node": { "__typename": "User", "id": "1", "name": "Alice" } }))
    }

    #[test]
    fn committed_payloads_notify_subscribers() {
        let env = environment(&MockNetwork::new());
        let operation = env.operation_descriptor(user_query(), &vars(json!({ "id": "1" })), None);
        env.commit_payload(&operation, &alice()).unwrap();

        let root = env.lookup(&operation.fragment);
        let selector = get_singular_selector(&user_fragment(), root.data.get("node").unwrap())
            .unwrap()
            .unwrap();
        let snapshot = env.lookup(&selector);
        assert_eq!(snapshot.data.to_json(), json!({ "id": "1", "name": "Alice" }));

        let names = Arc::new(Mutex::new(Vec::new()));
        let seen = names.clone();
        let _disposable = env.subscribe(snapshot, move |snapshot| {
            seen.lock().push(snapshot.data.to_json());
        });
        env.commit_payload(
            &operation,
            &object(json!({ "node": { "__typename": "User", "id": "1", "name": "Zuck" } }))
        )
        .unwrap();
        assert_eq!(*names.lock(), vec![json!({ "id": "1", "name": "Zuck" })]);
    }

    #[test]
    fn operation_descriptors_are_memoized() {
        let env = environment(&MockNetwork::new());
        let a = env.operation_descriptor(user_query(), &vars(json!({ "id": "1" })), None);
        let b = env.operation_descriptor(
            user_query(),
            &vars(json!({ "id": "1", "unused": true })),
            None
        );
        let c = env.operation_descriptor(user_query(), &vars(json!({ "id": "2" })), None);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn execute_publishes_before_yielding() {
        let network = MockNetwork::new();
        let env = environment(&network);
        let operation = env.operation_descriptor(user_query(), &vars(json!({ "id": "1" })), None);

        let mut execution = env.execute(&operation);
        assert_eq!(network.request_count(), 0);
        assert!(execution.next().now_or_never().is_none());
        assert_eq!(network.request_count(), 1);
        assert_eq!(network.variables(0), vars(json!({ "id": "1" })));
        assert!(env.is_request_active(&operation));

        network.next(0, Response::from_data(alice()));
        let response = execution.next().await.unwrap().unwrap();
        assert_eq!(response.data, Some(alice()));
        assert_eq!(user_name(&env, "User:1"), Some(json!("Alice")));

        network.complete(0);
        assert!(execution.next().await.is_none());
        assert!(!env.is_request_active(&operation));
    }

    #[tokio::test]
    async fn error_only_responses_fail_the_execution() {
        let network = MockNetwork::new();
        let env = environment(&network);
        let operation = env.operation_descriptor(user_query(), &vars(json!({ "id": "1" })), None);
        let mut execution = env.execute(&operation);
        assert!(execution.next().now_or_never().is_none());

        network.next(
            0,
            Response {
                errors: Some(vec![tessera::Error {
                    message: "forbidden".to_string(),
                    locations: None,
                    path: None,
                    extensions: None
                }]),
                ..Response::default()
            }
        );
        let error = execution.next().await.unwrap().unwrap_err();
        let errors = error.downcast_ref::<tessera::GraphQLErrors>().unwrap();
        assert_eq!(errors.0[0].message, "forbidden");
        assert!(execution.next().await.is_none());
        assert!(!env.is_request_active(&operation));
    }

    #[tokio::test]
    async fn optimistic_mutations_are_replaced_by_the_server_response() {
        let network = MockNetwork::new();
        let env = environment(&network);
        let query = env.operation_descriptor(user_query(), &vars(json!({ "id": "1" })), None);
        env.commit_payload(&query, &alice()).unwrap();

        let mutation = env.operation_descriptor(
            set_name_mutation(),
            &vars(json!({ "id": "1", "name": "Zuck" })),
            None
        );
        let updates = Arc::new(AtomicUsize::new(0));
        let counter = updates.clone();
        let config = MutationConfig::new()
            .with_optimistic_response(object(json!({
                "setName": { "__typename": "User", "id": "1", "name": "Zuck (pending)" }
            })))
            .with_updater(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        let mut execution = env.execute_mutation(&mutation, config);
        assert!(execution.next().now_or_never().is_none());
        assert_eq!(user_name(&env, "User:1"), Some(json!("Zuck (pending)")));

        network.next(
            0,
            Response::from_data(object(json!({
                "setName": { "__typename": "User", "id": "1", "name": "Zuck" }
            })))
        );
        execution.next().await.unwrap().unwrap();
        assert_eq!(user_name(&env, "User:1"), Some(json!("Zuck")));
        assert_eq!(updates.load(Ordering::SeqCst), 1);

        network.complete(0);
        assert!(execution.next().await.is_none());
        assert_eq!(user_name(&env, "User:1"), Some(json!("Zuck")));
    }

    #[tokio::test]
    async fn failed_and_dropped_mutations_revert_their_layer() {
        let network = MockNetwork::new();
        let env = environment(&network);
        let query = env.operation_descriptor(user_query(), &vars(json!({ "id": "1" })), None);
        env.commit_payload(&query, &alice()).unwrap();
        let before = env.get_store().snapshot_source();

        let mutation = env.operation_descriptor(
            set_name_mutation(),
            &vars(json!({ "id": "1", "name": "Zuck" })),
            None
        );
        let config = MutationConfig::new().with_optimistic_updater(|store| {
            if let Some(user) = store.get("User:1") {
                user.set_value(json!("Optimistic"), "name", None);
            }
        });

        let mut failing = env.execute_mutation(&mutation, config.clone());
        assert!(failing.next().now_or_never().is_none());
        assert_eq!(user_name(&env, "User:1"), Some(json!("Optimistic")));
        network.error(0, StoreError::Cancelled.into());
        assert!(failing.next().await.unwrap().is_err());
        assert_eq!(env.get_store().snapshot_source(), before);

        let mut dropped = env.execute_mutation(&mutation, config);
        assert!(dropped.next().now_or_never().is_none());
        assert_eq!(user_name(&env, "User:1"), Some(json!("Optimistic")));
        drop(dropped);
        assert_eq!(env.get_store().snapshot_source(), before);
        assert!(network.is_cancelled(1));
    }

    #[tokio::test]
    async fn unwritable_server_payloads_notify_the_revert() {
        let network = MockNetwork::new();
        let env = environment(&network);
        let query = env.operation_descriptor(user_query(), &vars(json!({ "id": "1" })), None);
        env.commit_payload(&query, &alice()).unwrap();
        let root = env.lookup(&query.fragment);
        let selector = get_singular_selector(&user_fragment(), root.data.get("node").unwrap())
            .unwrap()
            .unwrap();
        let names = Arc::new(Mutex::new(Vec::new()));
        let seen = names.clone();
        let _disposable = env.subscribe(env.lookup(&selector), move |snapshot| {
            seen.lock().push(snapshot.data.to_json());
        });

        let mutation = env.operation_descriptor(
            set_name_mutation(),
            &vars(json!({ "id": "1", "name": "Zuck" })),
            None
        );
        let config = MutationConfig::new().with_optimistic_response(object(json!({
            "setName": { "__typename": "User", "id": "1", "name": "Optimistic" }
        })));
        let mut execution = env.execute_mutation(&mutation, config);
        assert!(execution.next().now_or_never().is_none());

        network.next(0, Response::from_data(object(json!({ "setName": 5 }))));
        assert!(execution.next().await.unwrap().is_err());
        assert_eq!(user_name(&env, "User:1"), Some(json!("Alice")));
        assert_eq!(
            *names.lock(),
            vec![
                json!({ "id": "1", "name": "Optimistic" }),
                json!({ "id": "1", "name": "Alice" })
            ]
        );
    }

    #[tokio::test]
    async fn deferred_payloads_merge_into_their_placeholder() {
        let network = MockNetwork::new();
        let env = environment(&network);
        let operation = env.operation_descriptor(defer_query(), &Variables::new(), None);
        let mut execution = env.execute(&operation);
        assert!(execution.next().now_or_never().is_none());

        network.next(
            0,
            Response::from_data(object(json!({ "node": { "__typename": "User", "id": "1" } })))
        );
        execution.next().await.unwrap().unwrap();
        assert_eq!(user_name(&env, "User:1"), None);

        network.next(
            0,
            Response {
                data: Some(object(json!({ "name": "Alice" }))),
                label: Some("DeferQuery$defer$UserName".to_string()),
                path: Some(vec![PathFragment::Key("node".to_string())]),
                has_next: Some(false),
                ..Response::default()
            }
        );
        execution.next().await.unwrap().unwrap();
        assert_eq!(user_name(&env, "User:1"), Some(json!("Alice")));
    }

    #[tokio::test]
    async fn streamed_items_are_appended_to_their_list() {
        let network = MockNetwork::new();
        let env = environment(&network);
        let operation = env.operation_descriptor(stream_query(), &Variables::new(), None);
        let mut execution = env.execute(&operation);
        assert!(execution.next().now_or_never().is_none());

        network.next(
            0,
            Response::from_data(object(json!({
                "node": {
                    "__typename": "User",
                    "id": "1",
                    "friendsList": [{ "__typename": "User", "id": "2", "name": "Bob" }]
                }
            })))
        );
        execution.next().await.unwrap().unwrap();
        network.next(
            0,
            Response {
                data: Some(object(json!({ "__typename": "User", "id": "3", "name": "Carol" }))),
                label: Some("StreamQuery$stream$friendsList".to_string()),
                path: Some(vec![
                    PathFragment::Key("node".to_string()),
                    PathFragment::Key("friendsList".to_string()),
                    PathFragment::Index(1)
                ]),
                ..Response::default()
            }
        );
        execution.next().await.unwrap().unwrap();

        let links = env.get_store().with_source(|source| {
            source
                .get("User:1")
                .and_then(|record| record.get_links("friendsList").map(<[_]>::to_vec))
        });
        assert_eq!(
            links,
            Some(vec![Some("User:2".to_string()), Some("User:3".to_string())])
        );
        assert_eq!(user_name(&env, "User:3"), Some(json!("Carol")));
    }

    fn module_payload() -> Map<String, Value> {
        object(json!({
            "node": {
                "__typename": "User",
                "id": "1",
                "nameRenderer": {
                    "__typename": "PlainUserNameRenderer",
                    "__module_component_ModuleQuery": "PlainUserNameRenderer.react",
                    "__module_operation_ModuleQuery": "PlainUserNameRenderer_name$normalization.graphql",
                    "plaintext": "Alice"
                }
            }
        }))
    }

    fn plaintext(env: &Environment) -> Option<Value> {
        env.get_store().with_source(|source| {
            source
                .get("User:1")
                .and_then(|user| user.get_link("nameRenderer"))
                .and_then(|id| source.get(id))
                .and_then(|renderer| renderer.get_value("plaintext").cloned())
        })
    }

    #[tokio::test]
    async fn modules_are_loaded_before_they_are_written() {
        let network = MockNetwork::new();
        let loader = MockOperationLoader::with_module_query();
        let env = Environment::builder(network.clone())
            .with_operation_loader(loader.clone())
            .build();
        let operation = env.operation_descriptor(module_query(), &Variables::new(), None);
        let _retained = env.retain(&operation);
        let mut execution = env.execute(&operation);
        assert!(execution.next().now_or_never().is_none());

        network.next(0, Response::from_data(module_payload()));
        execution.next().await.unwrap().unwrap();
        assert_eq!(plaintext(&env), None);
        assert_eq!(env.check(&operation), OperationAvailability::Missing);

        network.complete(0);
        assert!(execution.next().await.is_none());
        assert_eq!(plaintext(&env), Some(json!("Alice")));
        assert_eq!(loader.load_count(), 1);
        assert!(matches!(
            env.check(&operation),
            OperationAvailability::Available { .. }
        ));
    }

    #[test]
    fn commit_payload_only_follows_loaded_modules() {
        let loader = MockOperationLoader::with_module_query();
        let env = Environment::builder(MockNetwork::new())
            .with_operation_loader(loader.clone())
            .build();
        let operation = env.operation_descriptor(module_query(), &Variables::new(), None);
        env.commit_payload(&operation, &module_payload()).unwrap();
        assert_eq!(plaintext(&env), None);

        loader.preload("PlainUserNameRenderer_name$normalization.graphql");
        env.commit_payload(&operation, &module_payload()).unwrap();
        assert_eq!(plaintext(&env), Some(json!("Alice")));
    }

    #[test]
    fn commit_payload_writes_nothing_if_a_module_fails() {
        let split = serde_json::from_value(json!({
            "name": "PlainUserNameRenderer_name$normalization.graphql",
            "selections": [{
                "kind": "LinkedField",
                "name": "author",
                "concreteType": "User",
                "selections": [{ "kind": "ScalarField", "name": "id" }]
            }]
        }))
        .unwrap();
        let loader = MockOperationLoader::new().with_operation(Arc::new(split));
        loader.preload("PlainUserNameRenderer_name$normalization.graphql");
        let env = Environment::builder(MockNetwork::new())
            .with_operation_loader(loader)
            .build();
        let operation = env.operation_descriptor(module_query(), &Variables::new(), None);

        let mut payload = module_payload();
        payload["node"]["nameRenderer"]["author"] = json!(5);
        assert!(env.commit_payload(&operation, &payload).is_err());
        assert!(env
            .get_store()
            .with_source(|source| source.get("User:1").is_none()));
    }

    #[tokio::test]
    async fn fetch_query_honours_the_request_policy() {
        let network = MockNetwork::new().with_response(alice());
        let env = environment(&network);
        let operation = env.operation_descriptor(user_query(), &vars(json!({ "id": "1" })), None);

        let snapshot = env
            .fetch_query(&operation, Some(RequestPolicy::CacheOnly))
            .await
            .unwrap();
        assert!(snapshot.is_missing_data);
        assert_eq!(network.request_count(), 0);

        let _retained = env.retain(&operation);
        let snapshot = env.fetch_query(&operation, None).await.unwrap();
        assert!(!snapshot.is_missing_data);
        assert_eq!(network.request_count(), 1);

        env.fetch_query(&operation, None).await.unwrap();
        assert_eq!(network.request_count(), 1);
        env.fetch_query(&operation, Some(RequestPolicy::NetworkOnly))
            .await
            .unwrap();
        assert_eq!(network.request_count(), 2);
    }

    #[test]
    fn connection_handler_runs_on_commit() {
        let env = Environment::builder(MockNetwork::new())
            .with_handler_provider(DefaultHandlerProvider::new())
            .build();
        let operation = env.operation_descriptor(
            friends_query(),
            &vars(json!({ "id": "1", "count": 1 })),
            None
        );
        env.commit_payload(
            &operation,
            &object(json!({
                "node": {
                    "__typename": "User",
                    "id": "1",
                    "name": "Alice",
                    "friends": {
                        "edges": [{
                            "cursor": "c1",
                            "node": { "__typename": "User", "id": "2", "name": "Bob" }
                        }],
                        "pageInfo": {
                            "endCursor": "c1",
                            "hasNextPage": true,
                            "startCursor": "c1",
                            "hasPreviousPage": false
                        }
                    }
                }
            }))
        )
        .unwrap();

        let root = env.lookup(&operation.fragment);
        let selector = get_singular_selector(&friends_fragment(), root.data.get("node").unwrap())
            .unwrap()
            .unwrap();
        let snapshot = env.lookup(&selector);
        assert!(!snapshot.is_missing_data);
        let edges = snapshot.data.get_path(&["friends", "edges"]).unwrap();
        let names: Vec<Option<&str>> = edges
            .as_list()
            .unwrap()
            .iter()
            .map(|edge| edge.get_path(&["node", "name"]).and_then(Data::as_str))
            .collect();
        assert_eq!(names, vec![Some("Bob")]);
    }

    #[test]
    fn commit_update_writes_to_the_base() {
        let env = environment(&MockNetwork::new());
        env.commit_update(|store| {
            store
                .root()
                .get_or_create_linked_record("viewer", "Viewer", None)
                .set_value(json!(3), "unread", None);
        });
        let unread = env.get_store().with_source(|source| {
            source
                .get("client:root:viewer")
                .and_then(|viewer| viewer.get_value("unread").cloned())
        });
        assert_eq!(unread, Some(json!(3)));

        let update = env.apply_update(|store| {
            store.root().set_value(json!(true), "optimistic", None);
        });
        assert!(env
            .get_store()
            .with_source(|source| source.get("client:root").unwrap().get("optimistic").is_some()));
        env.revert_update(&update);
        assert!(env
            .get_store()
            .with_source(|source| source.get("client:root").unwrap().get("optimistic").is_none()));
    }
}
