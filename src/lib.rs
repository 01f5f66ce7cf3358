pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod extractor;
pub mod formats;
pub mod logging;
pub mod pool;
pub mod presets;
pub mod queue;
pub mod routes;

#[cfg(test)]
mod test_support;
