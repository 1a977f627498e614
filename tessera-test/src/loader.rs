use crate::queries::module_split_operation;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc
    }
};
use tessera::{ast::NormalizationSplitOperation, OperationLoader, QueryError};

#[derive(Default)]
struct LoaderState {
    available: Mutex<HashMap<String, Arc<NormalizationSplitOperation>>>,
    loaded: Mutex<HashMap<String, Arc<NormalizationSplitOperation>>>,
    loads: AtomicUsize
}

/// An operation loader over a fixed set of split operations. Nothing is loaded until it is
/// preloaded or requested through `load`.
#[derive(Clone, Default)]
pub struct MockOperationLoader {
    state: Arc<LoaderState>
}

impl MockOperationLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// A loader that knows the `@module` operation of `ModuleQuery`.
    pub fn with_module_query() -> Self {
        Self::new().with_operation(module_split_operation())
    }

    pub fn with_operation(self, operation: Arc<NormalizationSplitOperation>) -> Self {
        self.state
            .available
            .lock()
            .insert(operation.name.clone(), operation);
        self
    }

    /// Make an operation available without going through `load`.
    pub fn preload(&self, reference: &str) {
        let operation = self.state.available.lock().get(reference).cloned();
        if let Some(operation) = operation {
            self.state
                .loaded
                .lock()
                .insert(reference.to_string(), operation);
        }
    }

    pub fn load_count(&self) -> usize {
        self.state.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OperationLoader for MockOperationLoader {
    fn get(&self, reference: &str) -> Option<Arc<NormalizationSplitOperation>> {
        self.state.loaded.lock().get(reference).cloned()
    }

    async fn load(
        &self,
        reference: &str
    ) -> Result<Option<Arc<NormalizationSplitOperation>>, QueryError> {
        self.state.loads.fetch_add(1, Ordering::SeqCst);
        self.preload(reference);
        Ok(self.get(reference))
    }
}
