use super::{reduce, ConnectionEvent, ConnectionState};
use crate::{
    create_operation_descriptor, get_singular_selector, Data, Disposable, Environment,
    OperationDescriptor, SingularReaderSelector, Snapshot, StoreError
};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    fmt,
    sync::{Arc, Weak}
};
use tessera::{
    ast::{ConcreteRequest, CursorVariables, PaginationMetadata, ReaderFragment, RefetchMetadata},
    CacheConfig, QueryError, Variables
};
use tokio::task::JoinHandle;

/// Called once the request a call started (or joined) is done.
pub type CompletionCallback = Box<dyn FnOnce(Result<(), QueryError>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationPhase {
    Idle,
    LoadingNext,
    LoadingPrevious,
    Refetching
}

#[derive(Default)]
pub struct LoadOptions {
    /// Merged into the request variables. Cursor and count variables are ignored.
    pub extra_variables: Variables,
    pub on_complete: Option<CompletionCallback>
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extra_variables(mut self, variables: Variables) -> Self {
        self.extra_variables = variables;
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Result<(), QueryError>) + Send + 'static
    {
        self.on_complete = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOptions")
            .field("extra_variables", &self.extra_variables)
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward
}

struct InFlight {
    id: u64,
    phase: PaginationPhase,
    handle: JoinHandle<()>,
    callbacks: Vec<CompletionCallback>
}

struct ControllerState {
    selector: Option<SingularReaderSelector>,
    snapshot: Option<Snapshot>,
    subscription: Option<Disposable>,
    connection: ConnectionState,
    // At most one per phase.
    requests: Vec<InFlight>,
    retained: Vec<Disposable>,
    next_request_id: u64,
    disposed: bool
}

struct ControllerInner {
    environment: Environment,
    fragment: Arc<ReaderFragment>,
    refetch_request: Arc<ConcreteRequest>,
    refetch: RefetchMetadata,
    connection: PaginationMetadata,
    state: Mutex<ControllerState>
}

/// Loads more pages of a `@connection` read by a fragment, and refetches it.
///
/// The controller reads the fragment and keeps reading it as the store changes. Pages are
/// fetched with the fragment's refetch query, on the tokio runtime, and land in the store
/// where the connection handler merges them; the controller folds the result into its
/// [`ConnectionState`](./struct.ConnectionState.html).
///
/// A page can be loaded in each direction at the same time, but at most one request runs per
/// direction. Calls made while a request for the same direction is in flight don't start
/// another one; their completion callbacks run when it finishes. A refetch cancels whatever
/// is in flight, and no pages are loaded until it is done. Disposing (or dropping) the
/// controller cancels every request and stops all further updates.
pub struct PaginationController {
    inner: Arc<ControllerInner>
}

impl fmt::Debug for PaginationController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaginationController")
            .field("fragment", &self.inner.fragment.name)
            .field("phase", &self.phase())
            .finish()
    }
}

impl PaginationController {
    /// Start reading `fragment_ref`, a reference to `fragment` as returned by the parent's
    /// read. A `null` reference is allowed; nothing can be loaded then.
    pub fn new(
        environment: Environment,
        fragment: Arc<ReaderFragment>,
        refetch_request: Arc<ConcreteRequest>,
        fragment_ref: &Data
    ) -> Result<Self, StoreError> {
        let refetch = fragment.metadata.refetch.clone().ok_or_else(|| {
            StoreError::InvariantViolation(format!(
                "fragment `{}` has no refetch metadata",
                fragment.name
            ))
        })?;
        let connection = refetch.connection.clone().ok_or_else(|| {
            StoreError::InvariantViolation(format!(
                "fragment `{}` has no @connection to paginate",
                fragment.name
            ))
        })?;
        let selector = get_singular_selector(&fragment, fragment_ref)?;

        let inner = Arc::new(ControllerInner {
            environment,
            fragment,
            refetch_request,
            refetch,
            connection,
            state: Mutex::new(ControllerState {
                selector: None,
                snapshot: None,
                subscription: None,
                connection: ConnectionState::default(),
                requests: Vec::new(),
                retained: Vec::new(),
                next_request_id: 0,
                disposed: false
            })
        });
        if let Some(selector) = selector {
            ControllerInner::subscribe(&inner, selector);
        }
        Ok(PaginationController { inner })
    }

    /// What the controller is doing. While pages are loaded in both directions this is
    /// `LoadingNext`.
    pub fn phase(&self) -> PaginationPhase {
        let state = self.inner.state.lock();
        let running = |phase| state.requests.iter().any(|request| request.phase == phase);
        if running(PaginationPhase::Refetching) {
            PaginationPhase::Refetching
        } else if running(PaginationPhase::LoadingNext) {
            PaginationPhase::LoadingNext
        } else if running(PaginationPhase::LoadingPrevious) {
            PaginationPhase::LoadingPrevious
        } else {
            PaginationPhase::Idle
        }
    }

    pub fn is_loading_next(&self) -> bool {
        self.inner.is_running(PaginationPhase::LoadingNext)
    }

    pub fn is_loading_previous(&self) -> bool {
        self.inner.is_running(PaginationPhase::LoadingPrevious)
    }

    /// The latest read of the fragment.
    pub fn data(&self) -> Data {
        self.inner
            .state
            .lock()
            .snapshot
            .as_ref()
            .map(|snapshot| snapshot.data.clone())
            .unwrap_or(Data::Null)
    }

    pub fn connection(&self) -> ConnectionState {
        self.inner.state.lock().connection.clone()
    }

    pub fn has_next(&self) -> bool {
        self.inner.state.lock().connection.page_info.has_next_page
    }

    pub fn has_previous(&self) -> bool {
        self.inner.state.lock().connection.page_info.has_previous_page
    }

    /// Fetch `count` more edges after the last one.
    pub fn load_next(&self, count: usize, options: LoadOptions) -> Disposable {
        self.load(Direction::Forward, count, options)
    }

    /// Fetch `count` more edges before the first one.
    pub fn load_previous(&self, count: usize, options: LoadOptions) -> Disposable {
        self.load(Direction::Backward, count, options)
    }

    fn load(&self, direction: Direction, count: usize, options: LoadOptions) -> Disposable {
        let inner = &self.inner;
        let LoadOptions {
            extra_variables,
            on_complete
        } = options;
        let phase = match direction {
            Direction::Forward => PaginationPhase::LoadingNext,
            Direction::Backward => PaginationPhase::LoadingPrevious
        };

        let mut state = inner.state.lock();
        if let Some(request) = state.requests.iter_mut().find(|request| request.phase == phase) {
            if let Some(callback) = on_complete {
                request.callbacks.push(callback);
            }
            return Disposable::empty();
        }
        let refetching = state
            .requests
            .iter()
            .any(|request| request.phase == PaginationPhase::Refetching);
        let skip = if state.disposed {
            Some("controller is disposed")
        } else if refetching {
            Some("refetch is in flight")
        } else {
            match &state.selector {
                None => Some("fragment reference is null"),
                Some(selector) => {
                    let page_info = &state.connection.page_info;
                    let has_more = match direction {
                        Direction::Forward => page_info.has_next_page,
                        Direction::Backward => page_info.has_previous_page
                    };
                    if inner
                        .environment
                        .is_request_active_for(&selector.owner.identifier)
                    {
                        Some("parent query is in flight")
                    } else if !has_more {
                        Some("no more edges")
                    } else {
                        None
                    }
                }
            }
        };
        if let Some(reason) = skip {
            drop(state);
            tracing::debug!(fragment = %inner.fragment.name, reason, "not loading more");
            if let Some(callback) = on_complete {
                callback(Ok(()));
            }
            return Disposable::empty();
        }

        let variables = match inner.pagination_variables(&state, direction, count, extra_variables)
        {
            Ok(variables) => variables,
            Err(e) => {
                drop(state);
                if let Some(callback) = on_complete {
                    callback(Err(e.into()));
                }
                return Disposable::empty();
            }
        };
        let id = ControllerInner::start(inner, &mut state, phase, variables, on_complete);
        drop(state);

        let weak = Arc::downgrade(inner);
        Disposable::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.cancel(id);
            }
        })
    }

    /// Fetch the fragment again with `variables` merged into its current ones, discarding
    /// every loaded page. Cancels any request in flight.
    pub fn refetch(&self, variables: Variables, options: LoadOptions) -> Disposable {
        let inner = &self.inner;
        let LoadOptions {
            extra_variables,
            on_complete
        } = options;

        let mut state = inner.state.lock();
        if state.disposed {
            drop(state);
            if let Some(callback) = on_complete {
                callback(Ok(()));
            }
            return Disposable::empty();
        }
        for request in state.requests.drain(..) {
            tracing::debug!(
                fragment = %inner.fragment.name,
                phase = ?request.phase,
                "refetch cancels request in flight"
            );
            request.handle.abort();
        }

        let mut overrides = extra_variables;
        overrides.extend(variables);
        let variables = match inner.refetch_variables(&state, overrides) {
            Ok(variables) => variables,
            Err(e) => {
                drop(state);
                if let Some(callback) = on_complete {
                    callback(Err(e.into()));
                }
                return Disposable::empty();
            }
        };
        let id = ControllerInner::start(
            inner,
            &mut state,
            PaginationPhase::Refetching,
            variables,
            on_complete
        );
        drop(state);

        let weak = Arc::downgrade(inner);
        Disposable::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.cancel(id);
            }
        })
    }

    /// Cancel the request in flight and stop reading the fragment. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl Drop for PaginationController {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl ControllerInner {
    fn is_running(&self, phase: PaginationPhase) -> bool {
        self.state
            .lock()
            .requests
            .iter()
            .any(|request| request.phase == phase)
    }

    fn subscribe(inner: &Arc<Self>, selector: SingularReaderSelector) {
        let snapshot = inner.environment.lookup(&selector);
        let connection = inner.connection_state(&snapshot.data);

        let weak: Weak<Self> = Arc::downgrade(inner);
        let subscription = inner.environment.subscribe(snapshot.clone(), move |snapshot| {
            if let Some(inner) = weak.upgrade() {
                inner.update(snapshot);
            }
        });

        let previous = {
            let mut state = inner.state.lock();
            let event = match &state.snapshot {
                None => ConnectionEvent::Initial {
                    edges: connection.edges.to_vec(),
                    page_info: connection.page_info.clone()
                },
                Some(_) => ConnectionEvent::Reset {
                    edges: connection.edges.to_vec(),
                    page_info: connection.page_info.clone()
                }
            };
            state.connection = reduce(&state.connection, event);
            state.selector = Some(selector);
            state.snapshot = Some(snapshot);
            state.subscription.replace(subscription)
        };
        if let Some(previous) = previous {
            previous.dispose();
        }
    }

    fn connection_state(&self, data: &Data) -> ConnectionState {
        data.get_path(&self.connection.path)
            .map(ConnectionState::from_data)
            .unwrap_or_default()
    }

    fn update(&self, snapshot: &Snapshot) {
        let next = self.connection_state(&snapshot.data);
        let mut state = self.state.lock();
        if state.disposed {
            return;
        }
        let event = state.connection.event_to(&next);
        state.connection = reduce(&state.connection, event);
        state.snapshot = Some(snapshot.clone());
    }

    fn cursor_variables(&self, direction: Direction) -> Result<&CursorVariables, StoreError> {
        let variables = match direction {
            Direction::Forward => self.connection.forward.as_ref(),
            Direction::Backward => self.connection.backward.as_ref()
        };
        variables.ok_or_else(|| {
            StoreError::InvariantViolation(format!(
                "fragment `{}` can't be paginated {}",
                self.fragment.name,
                match direction {
                    Direction::Forward => "forward",
                    Direction::Backward => "backward"
                }
            ))
        })
    }

    /// The parent operation's variables, then the fragment's, then `overrides`, plus the id
    /// of the fragment's record if the refetch query looks it up by id.
    fn base_variables(
        &self,
        state: &ControllerState,
        overrides: Variables
    ) -> Result<Variables, StoreError> {
        let selector = state.selector.as_ref().ok_or_else(|| {
            StoreError::InvariantViolation("fragment reference is null".to_string())
        })?;
        let mut variables = selector.owner.variables.clone();
        variables.extend(selector.variables.clone());
        variables.extend(overrides);

        if let Some(field) = &self.refetch.identifier_field {
            let id = state
                .snapshot
                .as_ref()
                .and_then(|snapshot| snapshot.data.get(field))
                .and_then(Data::as_scalar)
                .cloned()
                .ok_or_else(|| {
                    StoreError::InvariantViolation(format!(
                        "fragment `{}` read no `{}` to refetch it with",
                        self.fragment.name, field
                    ))
                })?;
            let name = self
                .refetch
                .identifier_query_variable_name
                .as_deref()
                .unwrap_or("id");
            variables.insert(name.to_string(), id);
        }
        Ok(variables)
    }

    fn pagination_variables(
        &self,
        state: &ControllerState,
        direction: Direction,
        count: usize,
        mut extra_variables: Variables
    ) -> Result<Variables, StoreError> {
        let own = self.cursor_variables(direction)?;
        let controlled: Vec<&CursorVariables> = self
            .connection
            .forward
            .iter()
            .chain(self.connection.backward.iter())
            .collect();
        for variables in &controlled {
            for name in &[&variables.cursor, &variables.count] {
                if extra_variables.remove(name.as_str()).is_some() {
                    tracing::warn!(
                        fragment = %self.fragment.name,
                        variable = %name,
                        "ignoring extra variable that is controlled by pagination"
                    );
                }
            }
        }

        let mut variables = self.base_variables(state, extra_variables)?;
        for other in &controlled {
            if other.cursor != own.cursor {
                variables.insert(other.cursor.clone(), Value::Null);
                variables.insert(other.count.clone(), Value::Null);
            }
        }
        let page_info = &state.connection.page_info;
        let cursor = match direction {
            Direction::Forward => page_info.end_cursor.clone(),
            Direction::Backward => page_info.start_cursor.clone()
        };
        variables.insert(
            own.cursor.clone(),
            cursor.map(Value::String).unwrap_or(Value::Null)
        );
        variables.insert(own.count.clone(), Value::from(count));
        Ok(variables)
    }

    fn refetch_variables(
        &self,
        state: &ControllerState,
        overrides: Variables
    ) -> Result<Variables, StoreError> {
        let mut variables = self.base_variables(state, overrides)?;
        for cursor in self
            .connection
            .forward
            .iter()
            .chain(self.connection.backward.iter())
        {
            variables.insert(cursor.cursor.clone(), Value::Null);
        }
        Ok(variables)
    }

    fn start(
        inner: &Arc<Self>,
        state: &mut ControllerState,
        phase: PaginationPhase,
        variables: Variables,
        on_complete: Option<CompletionCallback>
    ) -> u64 {
        state.next_request_id += 1;
        let id = state.next_request_id;
        let operation = create_operation_descriptor(
            inner.refetch_request.clone(),
            &variables,
            Some(CacheConfig::force())
        );
        tracing::debug!(
            fragment = %inner.fragment.name,
            phase = ?phase,
            identifier = %operation.request.identifier,
            "paginating"
        );
        state.retained.push(inner.environment.retain(&operation));

        let environment = inner.environment.clone();
        let weak = Arc::downgrade(inner);
        let handle = tokio::spawn(async move {
            let mut execution = environment.execute(&operation);
            let mut result = Ok(());
            while let Some(response) = execution.next().await {
                if let Err(e) = response {
                    result = Err(e);
                    break;
                }
            }
            drop(execution);
            if let Some(inner) = weak.upgrade() {
                inner.complete(id, &operation, result);
            }
        });

        state.requests.push(InFlight {
            id,
            phase,
            handle,
            callbacks: on_complete.into_iter().collect()
        });
        id
    }

    fn complete(
        self: &Arc<Self>,
        id: u64,
        operation: &OperationDescriptor,
        result: Result<(), QueryError>
    ) {
        let request = {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            match state.requests.iter().position(|request| request.id == id) {
                Some(index) => state.requests.remove(index),
                None => return
            }
        };

        if request.phase == PaginationPhase::Refetching && result.is_ok() {
            let root = self.environment.lookup(&operation.fragment);
            let fragment_ref = root.data.get_path(&self.refetch.fragment_path_in_result);
            match fragment_ref.map(|data| get_singular_selector(&self.fragment, data)) {
                Some(Ok(Some(selector))) => ControllerInner::subscribe(self, selector),
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "refetched fragment reference is invalid")
                }
                _ => tracing::warn!(
                    fragment = %self.fragment.name,
                    "refetch query returned no reference to the fragment"
                )
            }
        }

        tracing::debug!(
            fragment = %self.fragment.name,
            phase = ?request.phase,
            ok = result.is_ok(),
            "pagination request finished"
        );
        for callback in request.callbacks {
            callback(result.clone());
        }
    }

    fn cancel(&self, id: u64) {
        let mut state = self.state.lock();
        if let Some(index) = state.requests.iter().position(|request| request.id == id) {
            state.requests.remove(index).handle.abort();
        }
    }

    fn dispose(&self) {
        let (subscription, retained) = {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            for request in state.requests.drain(..) {
                request.handle.abort();
            }
            (
                state.subscription.take(),
                std::mem::take(&mut state.retained)
            )
        };
        if let Some(subscription) = subscription {
            subscription.dispose();
        }
        for retained in retained {
            retained.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Environment;
    use futures::FutureExt;
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tessera::Response;
    use tessera_test::{
        queries::{friends_fragment, friends_pagination_query, friends_query},
        MockNetwork
    };

    fn vars(value: Value) -> Variables {
        value.as_object().cloned().unwrap_or_default()
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn friends_payload(
        friends: &[(&str, &str)],
        start: &str,
        end: &str,
        has_next: bool,
        has_previous: bool
    ) -> Map<String, Value> {
        let edges: Vec<Value> = friends
            .iter()
            .map(|(id, name)| {
                json!({
                    "cursor": format!("cursor:{}", id),
                    "node": { "__typename": "User", "id": id, "name": name }
                })
            })
            .collect();
        object(json!({
            "node": {
                "__typename": "User",
                "id": "1",
                "name": "Alice",
                "friends": {
                    "edges": edges,
                    "pageInfo": {
                        "startCursor": start,
                        "endCursor": end,
                        "hasNextPage": has_next,
                        "hasPreviousPage": has_previous
                    }
                }
            }
        }))
    }

    struct Fixture {
        network: MockNetwork,
        env: Environment,
        parent: OperationDescriptor,
        controller: PaginationController
    }

    fn setup() -> Fixture {
        setup_with(false)
    }

    fn setup_with(has_previous: bool) -> Fixture {
        let network = MockNetwork::new();
        let env = Environment::builder(network.clone()).build();
        let parent = create_operation_descriptor(
            friends_query(),
            &vars(json!({ "id": "1", "count": 1 })),
            None
        );
        let payload =
            friends_payload(&[("2", "Bob")], "cursor:2", "cursor:2", true, has_previous);
        env.commit_payload(&parent, &payload).unwrap();
        let root = env.lookup(&parent.fragment);
        let controller = PaginationController::new(
            env.clone(),
            friends_fragment(),
            friends_pagination_query(),
            root.data.get("node").unwrap()
        )
        .unwrap();
        Fixture {
            network,
            env,
            parent,
            controller
        }
    }

    async fn until<F: Fn() -> bool>(condition: F) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition not reached");
    }

    fn names(controller: &PaginationController) -> Vec<String> {
        controller
            .connection()
            .edges
            .iter()
            .filter_map(|edge| edge.get_path(&["node", "name"]).and_then(Data::as_str))
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn load_next_appends_a_page() {
        tessera_test::init_tracing();
        let Fixture {
            network,
            controller,
            ..
        } = setup();
        assert_eq!(names(&controller), vec!["Bob".to_string()]);
        assert!(controller.has_next());
        let first_edge = controller.connection().edges[0].clone();

        let completed = Arc::new(AtomicUsize::new(0));
        let counter = completed.clone();
        let _load = controller.load_next(
            1,
            LoadOptions::new()
                .with_extra_variables(vars(json!({ "cursor": "bogus", "orderBy": "name" })))
                .on_complete(move |result| {
                    assert!(result.is_ok());
                    counter.fetch_add(1, Ordering::SeqCst);
                })
        );
        assert_eq!(controller.phase(), PaginationPhase::LoadingNext);
        until(|| network.request_count() == 1).await;
        assert_eq!(
            network.variables(0),
            vars(json!({
                "id": "1",
                "count": 1,
                "cursor": "cursor:2",
                "before": null,
                "last": null
            }))
        );

        let counter = completed.clone();
        controller.load_next(
            1,
            LoadOptions::new().on_complete(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        );
        tokio::task::yield_now().await;
        assert_eq!(network.request_count(), 1);
        assert_eq!(completed.load(Ordering::SeqCst), 0);

        network.next(
            0,
            Response::from_data(friends_payload(
                &[("3", "Carol")],
                "cursor:3",
                "cursor:3",
                false,
                false
            ))
        );
        network.complete(0);
        until(|| controller.phase() == PaginationPhase::Idle).await;

        assert_eq!(completed.load(Ordering::SeqCst), 2);
        assert_eq!(names(&controller), vec!["Bob".to_string(), "Carol".to_string()]);
        let connection = controller.connection();
        assert!(Arc::ptr_eq(
            connection.edges[0].as_object().unwrap(),
            first_edge.as_object().unwrap()
        ));
        assert!(!controller.has_next());
        assert_eq!(connection.page_info.end_cursor.as_deref(), Some("cursor:3"));
    }

    #[tokio::test]
    async fn both_directions_load_at_the_same_time() {
        let Fixture {
            network,
            controller,
            ..
        } = setup_with(true);
        assert!(controller.has_previous());

        let _next = controller.load_next(1, LoadOptions::new());
        let completed = Arc::new(AtomicUsize::new(0));
        let counter = completed.clone();
        let _previous = controller.load_previous(
            1,
            LoadOptions::new().on_complete(move |result| {
                assert!(result.is_ok());
                counter.fetch_add(1, Ordering::SeqCst);
            })
        );
        assert!(controller.is_loading_next());
        assert!(controller.is_loading_previous());
        assert_eq!(completed.load(Ordering::SeqCst), 0);
        until(|| network.request_count() == 2).await;

        let (next, previous) = if network.variables(0).get("last") == Some(&Value::Null) {
            (0, 1)
        } else {
            (1, 0)
        };
        assert_eq!(
            network.variables(previous),
            vars(json!({
                "id": "1",
                "count": null,
                "cursor": null,
                "before": "cursor:2",
                "last": 1
            }))
        );

        network.next(
            previous,
            Response::from_data(friends_payload(
                &[("0", "Zed")],
                "cursor:0",
                "cursor:0",
                true,
                false
            ))
        );
        network.complete(previous);
        until(|| !controller.is_loading_previous()).await;
        assert!(controller.is_loading_next());
        assert_eq!(completed.load(Ordering::SeqCst), 1);

        network.next(
            next,
            Response::from_data(friends_payload(
                &[("3", "Carol")],
                "cursor:3",
                "cursor:3",
                false,
                false
            ))
        );
        network.complete(next);
        until(|| controller.phase() == PaginationPhase::Idle).await;

        assert_eq!(
            names(&controller),
            vec!["Zed".to_string(), "Bob".to_string(), "Carol".to_string()]
        );
        assert!(!controller.has_next());
        assert!(!controller.has_previous());
    }

    #[tokio::test]
    async fn nothing_is_loaded_while_the_parent_query_is_in_flight() {
        let fixture = setup();
        let mut parent = fixture.env.execute(&fixture.parent);
        assert!(parent.next().now_or_never().is_none());
        assert_eq!(fixture.network.request_count(), 1);

        let completed = Arc::new(AtomicUsize::new(0));
        let counter = completed.clone();
        fixture.controller.load_next(
            1,
            LoadOptions::new().on_complete(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        );
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.controller.phase(), PaginationPhase::Idle);
        tokio::task::yield_now().await;
        assert_eq!(fixture.network.request_count(), 1);
    }

    #[tokio::test]
    async fn null_references_load_nothing() {
        let network = MockNetwork::new();
        let env = Environment::builder(network.clone()).build();
        let controller = PaginationController::new(
            env,
            friends_fragment(),
            friends_pagination_query(),
            &Data::Null
        )
        .unwrap();
        assert_eq!(controller.data(), Data::Null);

        let completed = Arc::new(AtomicUsize::new(0));
        let counter = completed.clone();
        controller.load_next(
            1,
            LoadOptions::new().on_complete(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        );
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        tokio::task::yield_now().await;
        assert_eq!(network.request_count(), 0);
    }

    #[tokio::test]
    async fn refetch_cancels_the_page_in_flight() {
        let fixture = setup();
        let network = &fixture.network;
        let controller = &fixture.controller;
        let _load = controller.load_next(1, LoadOptions::new());
        until(|| network.request_count() == 1).await;

        let _refetch = controller.refetch(vars(json!({ "count": 2 })), LoadOptions::new());
        assert_eq!(controller.phase(), PaginationPhase::Refetching);
        until(|| network.request_count() == 2 && network.is_cancelled(0)).await;
        assert_eq!(
            network.variables(1),
            vars(json!({ "id": "1", "count": 2, "cursor": null, "before": null }))
        );

        network.next(
            1,
            Response::from_data(friends_payload(
                &[("4", "Dan"), ("5", "Eve")],
                "cursor:4",
                "cursor:5",
                true,
                false
            ))
        );
        network.complete(1);
        until(|| controller.phase() == PaginationPhase::Idle).await;
        assert_eq!(names(controller), vec!["Dan".to_string(), "Eve".to_string()]);
    }

    #[tokio::test]
    async fn disposed_controllers_ignore_late_responses() {
        let fixture = setup();
        let network = &fixture.network;
        let controller = &fixture.controller;
        let _load = controller.load_next(1, LoadOptions::new());
        until(|| network.request_count() == 1).await;

        controller.dispose();
        controller.dispose();
        until(|| network.is_cancelled(0)).await;
        assert_eq!(controller.phase(), PaginationPhase::Idle);
        assert!(!network.next(
            0,
            Response::from_data(friends_payload(
                &[("3", "Carol")],
                "cursor:3",
                "cursor:3",
                false,
                false
            ))
        ));
        assert_eq!(names(controller), vec!["Bob".to_string()]);
    }

    #[test]
    fn fragments_without_a_connection_are_rejected() {
        let env = Environment::builder(MockNetwork::new()).build();
        let error = PaginationController::new(
            env,
            tessera_test::queries::user_fragment(),
            friends_pagination_query(),
            &Data::Null
        )
        .unwrap_err();
        assert!(matches!(error, StoreError::InvariantViolation(_)));
    }
}
