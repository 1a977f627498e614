use super::{Environment, EnvironmentImpl};
use crate::{
    generate_client_id, get_data_id, handlers::HandlerProvider, incremental_key, normalize,
    HandleFieldPayload, IncrementalPlaceholder, LayerFn, ModuleImportPayload, NormalizationNode,
    NormalizationResult, NormalizationSelector, OperationDescriptor, OptimisticUpdate,
    RecordSource, RecordSourceMap, RecordSourceProxy, SelectorStoreUpdater,
    SingularReaderSelector, StoreError, StoreOptions, ROOT_TYPE
};
use fnv::FnvHashMap;
use futures::{
    future::BoxFuture,
    stream::{FuturesUnordered, Stream, StreamExt},
    task::{Context, Poll}
};
use serde_json::{Map, Value};
use std::{pin::Pin, sync::Arc};
use tessera::{
    ast::NormalizationSplitOperation, path_to_string, utils::field_storage_key, DataId,
    EventStream, GraphQLErrors, PathFragment, QueryError, Response
};

type ModuleLoad =
    Result<(ModuleImportPayload, Option<Arc<NormalizationSplitOperation>>), QueryError>;

/// A streamed list item, linked into its parent's list once normalized.
struct StreamItem {
    parent_id: DataId,
    storage_key: String,
    index: usize,
    id: DataId
}

impl StreamItem {
    fn link(&self, proxy: &RecordSourceProxy<'_>) {
        let parent = match proxy.get(&self.parent_id) {
            Some(parent) => parent,
            None => {
                tracing::warn!(id = %self.parent_id, "parent of a streamed item is gone");
                return;
            }
        };
        let mut items = parent
            .get_linked_records(&self.storage_key, None)
            .unwrap_or_default();
        if items.len() <= self.index {
            items.resize(self.index + 1, None);
        }
        items[self.index] = proxy.get(&self.id);
        parent.set_linked_records(&items, &self.storage_key, None);
    }
}

/// Records and handle payloads ready to be published in one pass.
pub(crate) struct PublishBatch {
    source: RecordSourceMap,
    field_payloads: Vec<HandleFieldPayload>,
    stream_item: Option<StreamItem>,
    updater: Option<(SingularReaderSelector, SelectorStoreUpdater)>
}

impl PublishBatch {
    pub(crate) fn new(source: RecordSourceMap, field_payloads: Vec<HandleFieldPayload>) -> Self {
        PublishBatch {
            source,
            field_payloads,
            stream_item: None,
            updater: None
        }
    }

    /// Apply the batch on top of `base` and return everything it wrote.
    pub(crate) fn apply(
        self,
        base: &dyn RecordSource,
        handlers: &dyn HandlerProvider
    ) -> RecordSourceMap {
        let proxy = RecordSourceProxy::new(base);
        proxy.publish_source(&self.source);
        for payload in &self.field_payloads {
            match handlers.get(&payload.handle) {
                Some(handler) => handler.update(&proxy, payload),
                None => tracing::warn!(handle = %payload.handle, "no handler for handle field")
            }
        }
        if let Some(item) = &self.stream_item {
            item.link(&proxy);
        }
        if let Some((fragment, updater)) = &self.updater {
            let snapshot = proxy.read(fragment);
            updater(&proxy, &snapshot.data);
        }
        proxy.into_sink()
    }
}

/// Publish a batch through the store, running handlers against the base records.
pub(crate) fn publish_batch(environment: &EnvironmentImpl, batch: PublishBatch) {
    let handlers = environment.handler_provider.clone();
    environment
        .store
        .publish_with(move |base| batch.apply(base, handlers.as_ref()));
}

/// An optimistic layer that writes `response` (if any) and then runs `updater` (if any).
pub(crate) fn optimistic_layer(
    environment: &EnvironmentImpl,
    operation: &OperationDescriptor,
    response: Option<Map<String, Value>>,
    updater: Option<crate::StoreUpdater>
) -> LayerFn {
    let handlers = environment.handler_provider.clone();
    let options = environment.options.clone();
    let root = operation.root.clone();
    Arc::new(move |source: &dyn RecordSource| {
        let batch = match &response {
            Some(response) => match normalize(&root, ROOT_TYPE, response, vec![], &options) {
                Ok(result) => PublishBatch::new(result.source, result.field_payloads),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to normalize optimistic response");
                    PublishBatch::new(RecordSourceMap::new(), Vec::new())
                }
            },
            None => PublishBatch::new(RecordSourceMap::new(), Vec::new())
        };
        let written = batch.apply(source, handlers.as_ref());
        let proxy = RecordSourceProxy::new(source);
        proxy.publish_source(&written);
        if let Some(updater) = &updater {
            updater(&proxy);
        }
        proxy.into_sink()
    })
}

pub(crate) fn normalize_module(
    options: &StoreOptions,
    payload: &ModuleImportPayload,
    operation: Arc<NormalizationSplitOperation>
) -> Result<NormalizationResult, StoreError> {
    let selector = NormalizationSelector {
        data_id: payload.data_id.clone(),
        node: NormalizationNode::Split(operation),
        variables: payload.variables.clone()
    };
    normalize(
        &selector,
        &payload.typename,
        &payload.data,
        payload.path.clone(),
        options
    )
}

enum State {
    Idle,
    Running(EventStream),
    /// The network stream completed but module loads are outstanding.
    Draining,
    Done
}

/// The payload stream of one executed operation.
///
/// Nothing happens until the stream is first polled. Then the optimistic layer (if any) is
/// applied and the request is sent. Every payload is normalized, published and notified
/// before it is yielded, so subscribers have seen it by the time the caller does.
///
/// Dropping the stream cancels the request, skips outstanding `@module` loads and reverts
/// the optimistic layer.
#[must_use = "streams do nothing unless polled"]
pub struct Execution {
    environment: Environment,
    operation: OperationDescriptor,
    optimistic: Option<LayerFn>,
    optimistic_update: Option<OptimisticUpdate>,
    updater: Option<SelectorStoreUpdater>,
    state: State,
    modules: FuturesUnordered<BoxFuture<'static, ModuleLoad>>,
    placeholders: FnvHashMap<String, IncrementalPlaceholder>,
    /// Incremental payloads that arrived before their placeholder.
    pending_payloads: Vec<Response>,
    active: bool
}

impl Execution {
    pub(crate) fn new(
        environment: Environment,
        operation: OperationDescriptor,
        optimistic: Option<LayerFn>,
        updater: Option<SelectorStoreUpdater>
    ) -> Self {
        Execution {
            environment,
            operation,
            optimistic,
            optimistic_update: None,
            updater,
            state: State::Idle,
            modules: FuturesUnordered::new(),
            placeholders: FnvHashMap::default(),
            pending_payloads: Vec::new(),
            active: false
        }
    }

    pub fn operation(&self) -> &OperationDescriptor {
        &self.operation
    }

    fn env(&self) -> &EnvironmentImpl {
        &self.environment.0
    }

    fn start(&mut self) -> EventStream {
        self.environment
            .0
            .request_started(&self.operation.request.identifier);
        self.active = true;
        if let Some(layer) = self.optimistic.take() {
            self.optimistic_update = Some(self.env().store.apply_update(layer));
        }

        let request = &self.operation.request;
        tracing::debug!(
            operation = %request.node.params.name,
            identifier = %request.identifier,
            "executing operation"
        );
        self.env()
            .network
            .execute(&request.node.params, &request.variables, &request.cache_config)
    }

    fn finish(&mut self) {
        self.state = State::Done;
        self.modules = FuturesUnordered::new();
        if self.active {
            self.active = false;
            self.environment
                .0
                .request_finished(&self.operation.request.identifier);
        }
    }

    fn revert_optimistic(&mut self) {
        if let Some(update) = self.optimistic_update.take() {
            self.env().store.revert_update(&update);
        }
    }

    fn fail(&mut self, error: QueryError) -> Poll<Option<Result<Response, QueryError>>> {
        tracing::debug!(
            operation = %self.operation.request.node.params.name,
            error = %error,
            "operation failed"
        );
        self.revert_optimistic();
        self.finish();
        Poll::Ready(Some(Err(error)))
    }

    fn handle_response(&mut self, response: &Response) -> Result<(), QueryError> {
        if response.is_error_only() {
            let errors = response.errors.clone().unwrap_or_default();
            return Err(GraphQLErrors(errors).into());
        }
        let data = match &response.data {
            Some(data) => data,
            None => {
                return Err(StoreError::InvariantViolation(
                    "expected the response to have data or errors".to_string()
                )
                .into())
            }
        };

        // Server data replaces the optimistic layer.
        if let Some(update) = self.optimistic_update.take() {
            self.env().store.remove_update(&update);
        }

        let published = if response.is_incremental() {
            self.handle_incremental(response, data)
        } else {
            self.handle_data(data)
        };
        match published {
            Ok(()) => {
                self.env().store.notify(Some(&self.operation));
                Ok(())
            }
            Err(error) => {
                // The optimistic layer is already gone.
                self.env().store.notify(None);
                Err(error)
            }
        }
    }

    fn handle_data(&mut self, data: &Map<String, Value>) -> Result<(), QueryError> {
        let result = normalize(
            &self.operation.root,
            ROOT_TYPE,
            data,
            vec![],
            &self.env().options
        )?;
        let updater = self
            .updater
            .clone()
            .map(|updater| (self.operation.fragment.clone(), updater));
        self.publish_result(result, None, updater)
    }

    fn handle_incremental(
        &mut self,
        response: &Response,
        data: &Map<String, Value>
    ) -> Result<(), QueryError> {
        let (label, path) = match (&response.label, &response.path) {
            (Some(label), Some(path)) => (label, path),
            _ => return Ok(())
        };
        match self.find_placeholder(label, path) {
            Some(placeholder) => self.handle_incremental_data(&placeholder, path, data),
            None => {
                tracing::trace!(
                    label = %label,
                    path = %path_to_string(path),
                    "buffering incremental payload"
                );
                self.pending_payloads.push(response.clone());
                Ok(())
            }
        }
    }

    /// The placeholder of an incremental payload. Deferred payloads share the path of their
    /// placeholder; streamed items are addressed by the list field and index below it.
    fn find_placeholder(
        &self,
        label: &str,
        path: &[PathFragment]
    ) -> Option<IncrementalPlaceholder> {
        if let Some(placeholder) = self.placeholders.get(&incremental_key(label, path)) {
            return Some(placeholder.clone());
        }
        match path {
            [parent @ .., PathFragment::Key(_), PathFragment::Index(_)] => self
                .placeholders
                .get(&incremental_key(label, parent))
                .filter(|placeholder| matches!(placeholder, IncrementalPlaceholder::Stream { .. }))
                .cloned(),
            _ => None
        }
    }

    fn handle_incremental_data(
        &mut self,
        placeholder: &IncrementalPlaceholder,
        path: &[PathFragment],
        data: &Map<String, Value>
    ) -> Result<(), QueryError> {
        match placeholder {
            IncrementalPlaceholder::Defer {
                selector, typename, ..
            } => {
                let result = normalize(selector, typename, data, path.to_vec(), &self.env().options)?;
                self.publish_result(result, None, None)
            }
            IncrementalPlaceholder::Stream {
                parent_id,
                field,
                variables,
                ..
            } => {
                let index = match path.last() {
                    Some(PathFragment::Index(index)) if *index >= 0 => *index as usize,
                    _ => {
                        return Err(StoreError::Normalization {
                            path: path_to_string(path),
                            message: "expected a streamed item to end in a list index".to_string()
                        }
                        .into())
                    }
                };
                let typename = match (data.get("__typename"), &field.concrete_type) {
                    (Some(Value::String(typename)), _) => typename.clone(),
                    (_, Some(typename)) => typename.clone(),
                    _ => return Err(StoreError::MissingTypename(path_to_string(path)).into())
                };
                let storage_key = field_storage_key(
                    &field.name,
                    field.storage_key.as_deref(),
                    &field.args,
                    variables
                );
                let id = get_data_id(data, &typename, &self.env().options)
                    .unwrap_or_else(|| generate_client_id(parent_id, &storage_key, Some(index)));
                let selector = NormalizationSelector {
                    data_id: id.clone(),
                    node: NormalizationNode::Selections(Arc::new(field.selections.clone())),
                    variables: variables.clone()
                };
                let result =
                    normalize(&selector, &typename, data, path.to_vec(), &self.env().options)?;
                let item = StreamItem {
                    parent_id: parent_id.clone(),
                    storage_key,
                    index,
                    id
                };
                self.publish_result(result, Some(item), None)
            }
        }
    }

    /// Publish a normalization result and everything that follows from it: synchronously
    /// available modules and buffered incremental payloads. Does not notify.
    fn publish_result(
        &mut self,
        result: NormalizationResult,
        stream_item: Option<StreamItem>,
        updater: Option<(SingularReaderSelector, SelectorStoreUpdater)>
    ) -> Result<(), QueryError> {
        let NormalizationResult {
            source,
            field_payloads,
            incremental_placeholders,
            module_import_payloads
        } = result;
        let mut batch = PublishBatch::new(source, field_payloads);
        batch.stream_item = stream_item;
        batch.updater = updater;
        publish_batch(self.env(), batch);

        for payload in module_import_payloads {
            self.handle_module(payload)?;
        }

        if incremental_placeholders.is_empty() {
            return Ok(());
        }
        for placeholder in incremental_placeholders {
            self.placeholders.insert(placeholder.key(), placeholder);
        }
        for response in std::mem::take(&mut self.pending_payloads) {
            let (label, path, data) = match (&response.label, &response.path, &response.data) {
                (Some(label), Some(path), Some(data)) => (label, path, data),
                _ => continue
            };
            match self.find_placeholder(label, path) {
                Some(placeholder) => self.handle_incremental_data(&placeholder, path, data)?,
                None => self.pending_payloads.push(response)
            }
        }
        Ok(())
    }

    fn handle_module(&mut self, payload: ModuleImportPayload) -> Result<(), QueryError> {
        let loader = match &self.env().operation_loader {
            Some(loader) => loader.clone(),
            None => {
                return Err(StoreError::OperationLoader {
                    reference: payload.operation_reference,
                    message: "no operation loader is configured".to_string()
                }
                .into())
            }
        };
        match loader.get(&payload.operation_reference) {
            Some(operation) => {
                let result = normalize_module(&self.env().options, &payload, operation)?;
                self.publish_result(result, None, None)
            }
            None => {
                self.modules.push(Box::pin(async move {
                    let operation = loader.load(&payload.operation_reference).await?;
                    Ok::<_, QueryError>((payload, operation))
                }));
                Ok(())
            }
        }
    }

    fn handle_module_load(&mut self, load: ModuleLoad) -> Result<(), QueryError> {
        let (payload, operation) = load?;
        let operation = match operation {
            Some(operation) => operation,
            None => {
                return Err(StoreError::OperationLoader {
                    reference: payload.operation_reference,
                    message: "the loader returned no operation".to_string()
                }
                .into())
            }
        };
        let result = normalize_module(&self.env().options, &payload, operation)?;
        self.publish_result(result, None, None)?;
        self.env().store.notify(Some(&self.operation));
        Ok(())
    }
}

impl Stream for Execution {
    type Item = Result<Response, QueryError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let State::Idle = this.state {
            let stream = this.start();
            this.state = State::Running(stream);
        }

        loop {
            if let Poll::Ready(Some(load)) = this.modules.poll_next_unpin(cx) {
                if let Err(e) = this.handle_module_load(load) {
                    return this.fail(e);
                }
                continue;
            }

            let stream = match &mut this.state {
                State::Running(stream) => stream,
                State::Draining => {
                    if this.modules.is_empty() {
                        this.finish();
                        return Poll::Ready(None);
                    }
                    return Poll::Pending;
                }
                State::Idle | State::Done => return Poll::Ready(None)
            };
            match stream.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(response))) => {
                    return match this.handle_response(&response) {
                        Ok(()) => Poll::Ready(Some(Ok(response))),
                        Err(e) => this.fail(e)
                    };
                }
                Poll::Ready(Some(Err(e))) => return this.fail(e),
                Poll::Ready(None) => this.state = State::Draining,
                Poll::Pending => return Poll::Pending
            }
        }
    }
}

impl Drop for Execution {
    fn drop(&mut self) {
        if let State::Running(_) | State::Draining = self.state {
            tracing::debug!(
                operation = %self.operation.request.node.params.name,
                "execution dropped before completion"
            );
        }
        self.revert_optimistic();
        self.finish();
    }
}
