//! Core types for a normalized GraphQL data layer.
//!
//! This crate holds everything the store and the outside world agree on:
//!
//! * The precompiled selection tree artifacts in [`ast`](./ast/index.html). These are produced by
//! external compiler tooling and consumed read-only by the reader and normalizer.
//! * The GraphQL [`Response`](./struct.Response.html) shape, including incremental
//! (`@defer`/`@stream`) parts identified by `label` and `path`.
//! * The [`Network`](./trait.Network.html) and [`OperationLoader`](./trait.OperationLoader.html)
//! boundaries. The network returns an event stream of payloads; the loader resolves
//! the selection subtrees of `@module` fragments.
//! * [`QueryError`](./struct.QueryError.html), the error type flowing through every stream.
//!
//! The normalized store, reader and environment live in `tessera-store`.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use tessera::Response;
//!
//! let response: Response = serde_json::from_value(json!({
//!     "data": { "me": { "id": "1", "__typename": "User" } }
//! })).unwrap();
//!
//! assert!(response.errors.is_none());
//! assert!(!response.is_incremental());
//! ```

#[macro_use]
extern crate serde;
#[macro_use]
extern crate async_trait;

use std::{collections::HashMap, fmt, fmt::Display};

pub mod ast;
mod error;
mod network;
mod types;
pub mod utils;

pub use error::{GraphQLErrors, QueryError, QueryErrorCompat};
pub use network::{EventStream, Network, OperationLoader};
pub use types::{CacheConfig, DataId, OperationKind, RequestPolicy, Variables};

/// A single payload delivered by the network layer.
///
/// A request yields one or more of these. The first carries the initial `data`. Later ones
/// with a `label` and `path` are incremental parts of a deferred fragment or streamed list
/// and must be merged into the records written by the earlier parts.
///
/// ```
/// # use serde_json::json;
/// use tessera::{PathFragment, Response};
///
/// let part: Response = serde_json::from_value(json!({
///     "data": { "name": "Alice" },
///     "label": "UserQuery$defer$UserName",
///     "path": ["node"]
/// })).unwrap();
///
/// assert!(part.is_incremental());
/// assert_eq!(part.path, Some(vec![PathFragment::Key("node".to_string())]));
/// ```
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct Response {
    /// The absent, partial or complete response data.
    pub data: Option<serde_json::Map<String, serde_json::Value>>,
    /// The top-level errors returned by the server.
    pub errors: Option<Vec<Error>>,
    /// The label of the `@defer`/`@stream` directive this part belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// The response path of the object (or list item) this part belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathFragment>>,
    /// Whether more parts will follow.
    #[serde(default, rename = "hasNext", skip_serializing_if = "Option::is_none")]
    pub has_next: Option<bool>,
    /// Server-defined extensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<HashMap<String, serde_json::Value>>
}

impl Response {
    /// Build a plain (non-incremental) response from its `data` object.
    pub fn from_data(data: serde_json::Map<String, serde_json::Value>) -> Self {
        Response {
            data: Some(data),
            ..Response::default()
        }
    }

    /// Returns `true` for parts of a deferred fragment or streamed list.
    pub fn is_incremental(&self) -> bool {
        self.label.is_some() && self.path.is_some()
    }

    /// Returns `true` if the server reported errors and no data at all.
    pub fn is_error_only(&self) -> bool {
        self.data.is_none()
            && self
                .errors
                .as_ref()
                .map(|errors| !errors.is_empty())
                .unwrap_or(false)
    }
}

/// An element in the top-level `errors` array of a response body.
///
/// ```
/// # use serde_json::json;
/// use tessera::*;
///
/// let body: Response = serde_json::from_value(json!({
///     "data": null,
///     "errors": [
///         {
///             "message": "Seismic activity detected",
///             "path": ["underground", 20]
///         }
///     ]
/// })).unwrap();
///
/// let error = &body.errors.unwrap()[0];
/// assert_eq!(error.path, Some(vec![
///     PathFragment::Key("underground".into()),
///     PathFragment::Index(20)
/// ]));
/// assert_eq!(error.to_string(), "underground/20:0:0: Seismic activity detected");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Error {
    /// The human-readable error message. This is the only required field.
    pub message: String,
    /// Which locations in the query the error applies to.
    pub locations: Option<Vec<Location>>,
    /// Which path in the query the error applies to, e.g. `["users", 0, "email"]`.
    pub path: Option<Vec<PathFragment>>,
    /// Additional errors. Their exact format is defined by the server.
    pub extensions: Option<HashMap<String, serde_json::Value>>
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Use `/` as a separator like JSON Pointer.
        let path = self
            .path
            .as_ref()
            .map(|fragments| {
                fragments
                    .iter()
                    .map(|fragment| fragment.to_string())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_else(|| "<query>".to_string());

        let loc = self
            .locations
            .as_ref()
            .and_then(|locations| locations.iter().next())
            .cloned()
            .unwrap_or_else(Location::default);

        write!(f, "{}:{}:{}: {}", path, loc.line, loc.column, self.message)
    }
}

/// Part of a response path. It can be an object key or an array index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum PathFragment {
    /// A key inside an object
    Key(String),
    /// An index inside an array
    Index(i32)
}

/// Represents a location inside a query string. Used in errors.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Location {
    /// The line number in the query string where the error originated (starting from 1).
    pub line: i32,
    /// The column number in the query string where the error originated (starting from 1).
    pub column: i32
}

impl Display for PathFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            PathFragment::Key(ref key) => write!(f, "{}", key),
            PathFragment::Index(ref idx) => write!(f, "{}", idx)
        }
    }
}

/// Render a response path the way placeholders are keyed, e.g. `node.friends.2`.
pub fn path_to_string(path: &[PathFragment]) -> String {
    path.iter()
        .map(|fragment| fragment.to_string())
        .collect::<Vec<_>>()
        .join(".")
}
