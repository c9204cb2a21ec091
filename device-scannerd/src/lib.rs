pub mod api;
pub mod cache;
pub mod cache_manager;
pub mod classifier;
pub mod config;
pub mod control;
pub mod mdns;
pub mod net;
pub mod orchestrator;
pub mod registry;
pub mod service;
pub mod transport;
pub mod vendor;

#[cfg(test)]
mod test_support;
