pub mod schema;

pub use schema::{Config, DEFAULT_CACHE_CAPACITY};
