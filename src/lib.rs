pub mod api;
pub mod cache;
pub mod config;
pub mod messaging;
pub mod metrics;
pub mod models;
pub mod service;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
mod testing;
