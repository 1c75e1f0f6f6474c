//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::*;
use crate::feed::Sighting;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("schema setup error: {0}")]
    Setup(String),
    #[error("sighting has no registration or hex code")]
    NoIdentity,
    #[error("not found")]
    NotFound,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database schema and seed rows (embedded SQL).
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Setup(format!("schema init failed: {}", e)))?;
        conn.execute_batch(include_str!("../../migrations/000002_seed_settings.up.sql"))
            .map_err(|e| DbError::Setup(format!("settings seed failed: {}", e)))?;

        Ok(())
    }

    // --- Settings ---

    /// Read the persisted remaining-request count.
    pub fn get_request_count(&self) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        let value: Option<String> = conn
            .query_row(
                "SELECT setting_value FROM settings WHERE setting_type = 'request_count'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        value
            .and_then(|v| v.trim().parse().ok())
            .ok_or(DbError::NotFound)
    }

    /// Persist the remaining-request count reported by the feed.
    pub fn set_request_count(&self, value: i64) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE settings SET setting_value = ?1, date_modified = ?2
             WHERE setting_type = 'request_count'",
            params![value.to_string(), format_time(Utc::now())],
        )?;
        Ok(())
    }

    /// Read the operator watch-list rows.
    pub fn get_watch_list(&self) -> Result<WatchListEntries, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT setting_type, setting_value FROM settings
             WHERE setting_type IN ('type_code', 'reg_num', 'hex_code')",
        )?;

        let mut entries = WatchListEntries::default();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (kind, value) = row?;
            match kind.as_str() {
                "type_code" => entries.type_codes.push(value),
                "reg_num" => entries.reg_nums.push(value),
                "hex_code" => entries.hex_codes.push(value),
                _ => {}
            }
        }

        Ok(entries)
    }

    // --- Aircraft records ---

    /// Record one sighting.
    ///
    /// Creates the aircraft record on first-ever sighting, increments the
    /// count only on a not-current -> current transition, and always appends
    /// a history row. Returns whether this sighting is a new appearance.
    pub fn upsert_aircraft(
        &self,
        sighting: &Sighting,
        notable: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let reg = sighting.identity().ok_or(DbError::NoIdentity)?;

        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        let existing: Option<(i64, i64, bool)> = tx
            .query_row(
                "SELECT id, count, current FROM aircraft WHERE reg_num = ?1",
                params![reg],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let (aircraft_id, is_new) = match existing {
            Some((id, count, current)) => {
                let is_new = !current;
                tx.execute(
                    "UPDATE aircraft SET count = ?1, flagged = ?2, current = 1, date_modified = ?3
                     WHERE id = ?4",
                    params![
                        count + if is_new { 1 } else { 0 },
                        notable,
                        format_time(now),
                        id
                    ],
                )?;
                (id, is_new)
            }
            None => {
                tx.execute(
                    "INSERT INTO aircraft (type_code, reg_num, count, flagged, current, date_modified)
                     VALUES (?1, ?2, 1, ?3, 1, ?4)",
                    params![sighting.type_code, reg, notable, format_time(now)],
                )?;
                (tx.last_insert_rowid(), true)
            }
        };

        tx.execute(
            "INSERT INTO aircraft_history
             (aircraft_id, speed, altitude, lat, lon, track, callsign, distance, date_created)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                aircraft_id,
                sighting.speed.unwrap_or(0.0),
                sighting.altitude.unwrap_or(0.0),
                sighting.lat.unwrap_or(0.0),
                sighting.lon.unwrap_or(0.0),
                sighting.track.unwrap_or(0.0),
                sighting.callsign,
                sighting.distance.unwrap_or(0.0),
                format_time(now),
            ],
        )?;

        tx.commit()?;
        Ok(is_new)
    }

    /// Mark every record absent from `except` as not current.
    ///
    /// An empty `except` set clears the current flag on all records (the
    /// nighttime sweep).
    pub fn mark_not_current(&self, except: &[String]) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();

        if except.is_empty() {
            conn.execute("UPDATE aircraft SET current = 0 WHERE current = 1", [])?;
            return Ok(());
        }

        let placeholders = (1..=except.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE aircraft SET current = 0 WHERE current = 1 AND reg_num NOT IN ({})",
            placeholders
        );
        conn.execute(&sql, params_from_iter(except.iter()))?;
        Ok(())
    }

    /// Get one aircraft record by registration.
    pub fn get_aircraft(&self, reg: &str) -> Result<AircraftRecord, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, type_code, reg_num, count, flagged, current, date_modified
             FROM aircraft WHERE reg_num = ?1",
            params![reg],
            |row| {
                let modified: Option<String> = row.get(6)?;
                Ok(AircraftRecord {
                    id: row.get(0)?,
                    type_code: row.get(1)?,
                    reg_num: row.get(2)?,
                    count: row.get(3)?,
                    flagged: row.get(4)?,
                    current: row.get(5)?,
                    date_modified: modified.as_deref().and_then(parse_db_time),
                })
            },
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Most recent modification time across all aircraft records.
    ///
    /// Used by the health check to detect a stalled tracker.
    pub fn last_modified(&self) -> Result<Option<DateTime<Utc>>, DbError> {
        let conn = self.conn.lock().unwrap();
        let value: Option<String> = conn.query_row(
            "SELECT MAX(date_modified) FROM aircraft",
            [],
            |row| row.get(0),
        )?;
        Ok(value.as_deref().and_then(parse_db_time))
    }

    /// Delete history rows created before the cutoff. Returns rows removed.
    pub fn prune_history(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM aircraft_history WHERE date_created < ?1",
            params![format_time(cutoff)],
        )?;
        Ok(removed)
    }

    /// Count history rows for one aircraft.
    pub fn history_count(&self, aircraft_id: i64) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM aircraft_history WHERE aircraft_id = ?1",
            params![aircraft_id],
            |row| row.get(0),
        )?)
    }

    // --- Audit log ---

    /// Append one row to the persisted audit log.
    pub fn add_log(&self, level: LogLevel, category: &str, message: &str) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO log (log_type, log_value, detail) VALUES (?1, ?2, ?3)",
            params![level.as_str(), category, message],
        )?;
        Ok(())
    }
}

fn format_time(t: DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    None
}
