use std::{collections::HashMap, fmt, sync::Arc};

/// Runs a deferred garbage collection pass. The scheduler decides when to call the job.
pub type GcScheduler = Arc<dyn Fn(Box<dyn FnOnce() + Send>) + Send + Sync>;

/// Options to pass to the store.
#[derive(Default, Clone)]
pub struct StoreOptions {
    /// An optional `HashMap` of typenames to unique ID keys.
    /// The keys are the names of the fields, not the IDs themselves.
    /// So if your `User` has a unique ID called `ident`, you should
    /// set `"User" => "ident"`.
    /// The default ID keys are `id` and `_id`, so those don't need to be mapped.
    pub custom_keys: Option<HashMap<String, String>>,
    /// How many released operations stay retained until older ones are released for real.
    pub gc_release_buffer_size: usize,
    /// Schedules garbage collection. Without one, collection runs at the end of the next
    /// notification pass.
    pub gc_scheduler: Option<GcScheduler>
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_custom_key<T: Into<String>, K: Into<String>>(mut self, typename: T, key: K) -> Self {
        self.custom_keys
            .get_or_insert_with(HashMap::new)
            .insert(typename.into(), key.into());
        self
    }

    pub fn with_release_buffer_size(mut self, size: usize) -> Self {
        self.gc_release_buffer_size = size;
        self
    }

    pub fn with_gc_scheduler<F>(mut self, scheduler: F) -> Self
    where
        F: Fn(Box<dyn FnOnce() + Send>) + Send + Sync + 'static
    {
        self.gc_scheduler = Some(Arc::new(scheduler));
        self
    }

    /// The response field carrying the global id of `typename`, if it has a custom one.
    pub fn id_key(&self, typename: &str) -> Option<&str> {
        self.custom_keys
            .as_ref()
            .and_then(|keys| keys.get(typename))
            .map(String::as_str)
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("custom_keys", &self.custom_keys)
            .field("gc_release_buffer_size", &self.gc_release_buffer_size)
            .field("gc_scheduler", &self.gc_scheduler.is_some())
            .finish()
    }
}
