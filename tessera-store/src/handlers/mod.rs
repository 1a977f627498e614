//! Client-side field handlers, run over handle fields after each payload is normalized.

use crate::{HandleFieldPayload, RecordSourceProxy};
use fnv::FnvHashMap;
use std::sync::Arc;

mod connection;

pub use connection::{
    create_edge, delete_node, get_connection, insert_edge_after, insert_edge_before,
    ConnectionHandler, CONNECTION_HANDLE
};

/// Writes the client field of a handle from the server field it was declared on.
pub trait Handler: Send + Sync {
    fn update(&self, store: &RecordSourceProxy<'_>, payload: &HandleFieldPayload);
}

/// Looks up the handler for a handle name.
pub trait HandlerProvider: Send + Sync {
    fn get(&self, handle: &str) -> Option<Arc<dyn Handler>>;
}

/// Provides the connection handler, plus any handlers registered with
/// [`with_handler`](#method.with_handler).
#[derive(Clone)]
pub struct DefaultHandlerProvider {
    handlers: FnvHashMap<String, Arc<dyn Handler>>
}

impl Default for DefaultHandlerProvider {
    fn default() -> Self {
        let mut handlers: FnvHashMap<String, Arc<dyn Handler>> = FnvHashMap::default();
        handlers.insert(CONNECTION_HANDLE.to_string(), Arc::new(ConnectionHandler));
        DefaultHandlerProvider { handlers }
    }
}

impl DefaultHandlerProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler<H: Handler + 'static>(mut self, handle: &str, handler: H) -> Self {
        self.handlers.insert(handle.to_string(), Arc::new(handler));
        self
    }
}

impl HandlerProvider for DefaultHandlerProvider {
    fn get(&self, handle: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(handle).cloned()
    }
}
