//! Housetraining tracker core: record validation, resilient writes to the
//! remote store, change notifications and derived success statistics.

pub mod bus;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod hooks;
pub mod model;
pub mod retry;
pub mod service;
pub mod stats;
pub mod validate;
