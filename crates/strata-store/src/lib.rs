//! Strata Store - embedded sled-backed document and graph store.
//!
//! [`SledStore`] implements every capability the migration engine drives
//! (collections, indexes, named graphs, documents), so migrations can be
//! applied to a local data directory without an external database.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;

pub use config::StoreConfig;
pub use engine::SledStore;
pub use error::Error;
