pub mod loader;
pub mod schema;

pub use loader::{expand_home, load_endpoint_config, validate_endpoint};
pub use schema::{EndpointConfig, MetadataOptions, MoveOptions, RetryPolicy};
