pub mod config;
pub mod diff;
pub mod error;
pub mod fetcher;
pub mod guard;
pub mod health;
pub mod listing;
pub mod monitor;
pub mod notifier;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use crate::config::AppSettings;
pub use crate::listing::{Listing, Snapshot};
