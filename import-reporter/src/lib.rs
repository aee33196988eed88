pub mod avro_schema;
pub mod cache;
pub mod config;
pub mod consumer;
pub mod dataset_api;
pub mod error;
pub mod handler;
pub mod kafka;
pub mod metrics_consts;
pub mod model;
pub mod receiver;
pub mod server;
