//! pipeline-core: Shared infrastructure for the billing pipeline services.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;

pub use serde;
pub use serde_json;
pub use tracing;
pub use validator;
