//! PlaneWatch service entry point.

use planewatch::config::TrackerConfig;
use planewatch::db::Store;
use planewatch::feed::{AdsbxFeed, SunriseSunsetApi};
use planewatch::notify::EmailNotifier;
use planewatch::tracker::Tracker;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("planewatch=info".parse()?),
        )
        .init();

    // Load configuration
    let cfg = TrackerConfig::load();
    tracing::info!("Starting PlaneWatch near ({}, {})...", cfg.lat, cfg.lon);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Store::new(&cfg.db_path)?;
    tracing::info!("Database initialized successfully");

    // Wire up collaborators
    let feed = AdsbxFeed::new(cfg.feed_api_key.clone());
    let daylight = SunriseSunsetApi::new();
    let notifier = EmailNotifier::new(&cfg)?;

    // Run the tracker until permanent failure
    let tracker = Tracker::new(cfg, store, feed, daylight, notifier);
    tracker.run().await?;

    Ok(())
}
