//! Database model types.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One persistent aircraft record, keyed by registration number.
#[derive(Debug, Clone, Serialize)]
pub struct AircraftRecord {
    pub id: i64,
    pub type_code: Option<String>,
    pub reg_num: String,
    /// Number of distinct appearances (not-current -> current transitions).
    pub count: i64,
    pub flagged: bool,
    pub current: bool,
    pub date_modified: Option<DateTime<Utc>>,
}

/// Watch-list rows as stored in the settings table.
#[derive(Debug, Clone, Default)]
pub struct WatchListEntries {
    pub type_codes: Vec<String>,
    pub reg_nums: Vec<String>,
    pub hex_codes: Vec<String>,
}

impl WatchListEntries {
    pub fn len(&self) -> usize {
        self.type_codes.len() + self.reg_nums.len() + self.hex_codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Log severity for the persisted audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}
