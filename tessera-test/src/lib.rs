//! Artifacts and mocks shared by the tests and benchmarks of the tessera crates.

#[macro_use]
extern crate lazy_static;

mod loader;
mod network;
pub mod queries;

pub use loader::MockOperationLoader;
pub use network::MockNetwork;

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Print the crates' logs to the test output. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("tessera_store=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
