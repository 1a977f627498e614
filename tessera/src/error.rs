use crate::Error as GraphQLError;
use std::{error::Error, fmt, sync::Arc};

/// The error type carried by every network event stream and execution.
///
/// Any `std::error::Error` converts into it with `?`. It is cheap to clone, so one failure
/// can be handed to every listener of a deduplicated request.
#[derive(Clone, Debug)]
pub struct QueryError {
    inner: Arc<Box<dyn Error + Send + Sync>>
}

/// A `std::error::Error` view of a [`QueryError`](./struct.QueryError.html).
#[derive(Debug)]
pub struct QueryErrorCompat(QueryError);

impl Error for QueryErrorCompat {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.0.source()
    }
}

impl fmt::Display for QueryErrorCompat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl QueryError {
    pub fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source()
    }

    pub fn compat(self) -> QueryErrorCompat {
        QueryErrorCompat(self)
    }

    /// Try to view the wrapped error as a concrete type.
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        let inner: &(dyn Error + 'static) = &**self.inner;
        inner.downcast_ref::<E>()
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl<T: Error + Send + Sync + 'static> From<T> for QueryError {
    fn from(e: T) -> Self {
        QueryError {
            inner: Arc::new(Box::new(e))
        }
    }
}

/// The `errors` of a response that carried no data.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphQLErrors(pub Vec<GraphQLError>);

impl Error for GraphQLErrors {}

impl fmt::Display for GraphQLErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(|error| error.to_string()).collect();
        write!(f, "response contained errors: {}", messages.join("; "))
    }
}
