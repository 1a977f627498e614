//! Paginating `@connection` fields read by a fragment.

mod connection;
mod controller;

pub use connection::{reduce, ConnectionEvent, ConnectionState, PageInfo};
pub use controller::{CompletionCallback, LoadOptions, PaginationController, PaginationPhase};
