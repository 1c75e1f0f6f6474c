//! Database module for PlaneWatch.
//!
//! Provides SQLite storage with embedded schema setup.

mod models;
mod store;

pub use models::*;
pub use store::*;
