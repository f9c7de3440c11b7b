// Library crate for integration tests and the binary.

pub mod alerts;
pub mod analysis;
pub mod budget;
pub mod collector;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod monitor;
pub mod report;
pub mod reporter;
pub mod routes;
pub mod scoring;
pub mod server;
pub mod settings;
pub mod state;
pub mod storage;
