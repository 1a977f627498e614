use futures::{channel::mpsc, StreamExt};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;
use tessera::{
    ast::RequestParameters, CacheConfig, EventStream, Network, QueryError, Response, Variables
};

type Event = Result<Response, QueryError>;

struct MockRequest {
    name: String,
    variables: Variables,
    cache_config: CacheConfig,
    sender: mpsc::UnboundedSender<Event>,
    completed: bool
}

#[derive(Default)]
struct NetworkState {
    requests: Vec<MockRequest>,
    response: Option<Map<String, Value>>
}

/// A network whose requests are answered by the test.
///
/// Every call to `execute` is recorded and gets its own channel. Requests are addressed by
/// the order they were made in.
#[derive(Clone, Default)]
pub struct MockNetwork {
    state: Arc<Mutex<NetworkState>>
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request with `data` and complete it immediately.
    pub fn with_response(self, data: Map<String, Value>) -> Self {
        self.state.lock().response = Some(data);
        self
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn name(&self, index: usize) -> String {
        self.state.lock().requests[index].name.clone()
    }

    pub fn variables(&self, index: usize) -> Variables {
        self.state.lock().requests[index].variables.clone()
    }

    pub fn cache_config(&self, index: usize) -> CacheConfig {
        self.state.lock().requests[index].cache_config.clone()
    }

    /// Send a payload. Returns `false` if the request is no longer listening.
    pub fn next(&self, index: usize, response: Response) -> bool {
        self.send(index, Ok(response))
    }

    /// Fail the request. Returns `false` if the request is no longer listening.
    pub fn error(&self, index: usize, error: QueryError) -> bool {
        self.send(index, Err(error))
    }

    /// End the request's event stream.
    pub fn complete(&self, index: usize) {
        let mut state = self.state.lock();
        let request = &mut state.requests[index];
        request.completed = true;
        request.sender.close_channel();
    }

    /// Whether the client dropped the request before it completed.
    pub fn is_cancelled(&self, index: usize) -> bool {
        let state = self.state.lock();
        let request = &state.requests[index];
        !request.completed && request.sender.is_closed()
    }

    fn send(&self, index: usize, event: Event) -> bool {
        let state = self.state.lock();
        state.requests[index].sender.unbounded_send(event).is_ok()
    }
}

impl Network for MockNetwork {
    fn execute(
        &self,
        request: &RequestParameters,
        variables: &Variables,
        cache_config: &CacheConfig
    ) -> EventStream {
        let (sender, receiver) = mpsc::unbounded();
        let mut state = self.state.lock();
        let completed = match &state.response {
            Some(data) => {
                let _ = sender.unbounded_send(Ok(Response::from_data(data.clone())));
                sender.close_channel();
                true
            }
            None => false
        };
        state.requests.push(MockRequest {
            name: request.name.clone(),
            variables: variables.clone(),
            cache_config: cache_config.clone(),
            sender,
            completed
        });
        receiver.boxed()
    }
}
