//! Notable-aircraft watch-list.

use std::collections::HashSet;

use crate::db::WatchListEntries;
use crate::feed::Sighting;

/// The operator's watch-list: type codes, registrations, and hex codes.
///
/// Membership tests are O(1). A refresh replaces the whole value in one
/// assignment, so classification never observes a half-applied update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchList {
    type_codes: HashSet<String>,
    reg_nums: HashSet<String>,
    hex_codes: HashSet<String>,
}

impl WatchList {
    pub fn from_entries(entries: WatchListEntries) -> Self {
        Self {
            type_codes: entries.type_codes.into_iter().collect(),
            reg_nums: entries.reg_nums.into_iter().collect(),
            hex_codes: entries.hex_codes.into_iter().collect(),
        }
    }

    /// A sighting is notable when its type code, registration, or hex code
    /// is on the list.
    pub fn classify(&self, sighting: &Sighting) -> bool {
        let type_match = sighting
            .type_code
            .as_deref()
            .is_some_and(|t| self.type_codes.contains(t));
        let reg_match = sighting
            .reg
            .as_deref()
            .is_some_and(|r| self.reg_nums.contains(r));
        let hex_match = sighting
            .hex
            .as_deref()
            .is_some_and(|h| self.hex_codes.contains(h));

        type_match || reg_match || hex_match
    }

    /// Replace the list if the new one differs in membership.
    ///
    /// Returns whether a change occurred, so the caller can skip redundant
    /// logging.
    pub fn refresh(&mut self, new: WatchList) -> bool {
        if *self == new {
            return false;
        }
        *self = new;
        true
    }

    pub fn len(&self) -> usize {
        self.type_codes.len() + self.reg_nums.len() + self.hex_codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
