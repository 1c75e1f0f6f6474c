//! Configuration module for PlaneWatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;

/// Tracker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Reference latitude for the traffic search (default: 44.887988)
    pub lat: f64,
    /// Reference longitude for the traffic search (default: -93.221606)
    pub lon: f64,
    /// Search radius in nautical miles (default: 25)
    pub radius_nm: u32,
    /// Path to the SQLite database file (default: "planewatch.db")
    pub db_path: String,
    /// API key for the aircraft feed
    pub feed_api_key: String,
    /// SMTP relay host for notifications
    pub smtp_host: String,
    /// SMTP username
    pub smtp_user: String,
    /// SMTP password
    pub smtp_pass: String,
    /// From address for notification mail
    pub mail_from: String,
    /// To address for notification mail
    pub mail_to: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            lat: 44.887988,
            lon: -93.221606,
            radius_nm: 25,
            db_path: "planewatch.db".to_string(),
            feed_api_key: String::new(),
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_user: String::new(),
            smtp_pass: String::new(),
            mail_from: String::new(),
            mail_to: String::new(),
        }
    }
}

impl TrackerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PLANEWATCH_LAT` / `PLANEWATCH_LON`: reference point
    /// - `PLANEWATCH_RADIUS_NM`: search radius in nautical miles
    /// - `PLANEWATCH_DB_PATH`: database file path
    /// - `PLANEWATCH_FEED_KEY`: aircraft feed API key
    /// - `PLANEWATCH_SMTP_HOST` / `PLANEWATCH_SMTP_USER` / `PLANEWATCH_SMTP_PASS`
    /// - `PLANEWATCH_MAIL_FROM` / `PLANEWATCH_MAIL_TO`
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(lat) = env_parse("PLANEWATCH_LAT") {
            cfg.lat = lat;
        }
        if let Some(lon) = env_parse("PLANEWATCH_LON") {
            cfg.lon = lon;
        }
        if let Some(radius) = env_parse("PLANEWATCH_RADIUS_NM") {
            cfg.radius_nm = radius;
        }
        if let Ok(db_path) = env::var("PLANEWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }
        if let Ok(key) = env::var("PLANEWATCH_FEED_KEY") {
            cfg.feed_api_key = key;
        }
        if let Ok(host) = env::var("PLANEWATCH_SMTP_HOST") {
            cfg.smtp_host = host;
        }
        if let Ok(user) = env::var("PLANEWATCH_SMTP_USER") {
            cfg.smtp_user = user;
        }
        if let Ok(pass) = env::var("PLANEWATCH_SMTP_PASS") {
            cfg.smtp_pass = pass;
        }
        if let Ok(from) = env::var("PLANEWATCH_MAIL_FROM") {
            cfg.mail_from = from;
        }
        if let Ok(to) = env::var("PLANEWATCH_MAIL_TO") {
            cfg.mail_to = to;
        }

        cfg
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
