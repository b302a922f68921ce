pub mod api;
pub mod batch;
pub mod config;
pub mod event;
pub mod ingest;
pub mod normalize;
pub mod prometheus;
pub mod registry;
pub mod router;
pub mod server;
pub mod time;
pub mod validate;
