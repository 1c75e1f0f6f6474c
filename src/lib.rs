//! PlaneWatch - notable-aircraft tracker.
//!
//! Polls an aircraft-position feed for traffic near a fixed reference point,
//! matches each sighting against an operator watch-list, persists sighting
//! history in SQLite, and emails a digest whenever a notable aircraft newly
//! appears. Polling is gated to daylight hours and the interval adapts to
//! the remaining request quota the upstream feed reports.

pub mod config;
pub mod db;
pub mod feed;
pub mod notify;
pub mod tracker;
