//! Vea Watcher - Library interface
//!
//! Re-exports internal modules for use in integration tests.

pub mod bridges;
pub mod chain;
pub mod config;
pub mod epoch;
pub mod errors;
pub mod events;
pub mod finality;
pub mod hash;
pub mod metrics;
pub mod retry;
pub mod server;
pub mod startup;
pub mod state_machine;
pub mod testing;
pub mod transaction;
pub mod types;
pub mod watcher;
