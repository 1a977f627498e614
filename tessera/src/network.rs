use crate::{
    ast::{NormalizationSplitOperation, RequestParameters},
    CacheConfig, QueryError, Response, Variables
};
use futures::stream::BoxStream;
use std::sync::Arc;

/// The payload stream of a single request.
///
/// Each `Ok` item is one payload (`next`), an `Err` item is a terminal error and the end of the
/// stream is `complete`. Dropping the stream cancels the request.
pub type EventStream = BoxStream<'static, Result<Response, QueryError>>;

/// The network boundary.
///
/// Implementations send the request described by `request` and `variables` and return its
/// payloads as an [`EventStream`](./type.EventStream.html). The stream is polled lazily, so no
/// work should happen before it is first polled.
pub trait Network: Send + Sync + 'static {
    fn execute(
        &self,
        request: &RequestParameters,
        variables: &Variables,
        cache_config: &CacheConfig
    ) -> EventStream;
}

impl<F> Network for F
where
    F: Fn(&RequestParameters, &Variables, &CacheConfig) -> EventStream + Send + Sync + 'static
{
    fn execute(
        &self,
        request: &RequestParameters,
        variables: &Variables,
        cache_config: &CacheConfig
    ) -> EventStream {
        self(request, variables, cache_config)
    }
}

/// Resolves the normalization selections of `@module` fragments by their reference.
#[async_trait]
pub trait OperationLoader: Send + Sync + 'static {
    /// Return the operation if it is already loaded.
    fn get(&self, reference: &str) -> Option<Arc<NormalizationSplitOperation>>;

    /// Load the operation. `Ok(None)` means the reference is unknown.
    async fn load(
        &self,
        reference: &str
    ) -> Result<Option<Arc<NormalizationSplitOperation>>, QueryError>;
}
