//! Load data script for EcoCollect
//!
//! Populates the store with the demo accounts, routes, alerts, picker
//! assignments and resident pickups. Safe to run repeatedly.
//! Run: cargo run --bin load_data

use ecocollect::auth::AuthSettings;
use ecocollect::config::Config;
use ecocollect::logging;
use ecocollect::seed::{load_demo_data, DEMO_PASSWORD};
use ecocollect::storage::Storage;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let _guard = logging::init(&config);

    let storage = Storage::open(&config.data_path)?;
    let summary = load_demo_data(&storage, &AuthSettings::from_config(&config), DEMO_PASSWORD)?;
    storage.flush().await?;

    println!(
        "✅ Loaded {} accounts, {} routes, {} alerts, {} assignments, {} pickups into {}",
        summary.accounts,
        summary.routes,
        summary.alerts,
        summary.assignments,
        summary.pickups,
        config.data_path.display()
    );
    println!("🔑 Demo accounts log in with password {DEMO_PASSWORD} (e.g. admin, maria, john)");

    Ok(())
}
