//! EcoCollect server
//!
//! Serves the resident, picker and admin dashboards' REST API over one
//! sled store.
//!
//! Usage:
//!   cargo run --bin load_data      # populate demo data
//!   cargo run --bin ecocollect     # start server on :11111

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{info, warn};

use ecocollect::auth::AuthSettings;
use ecocollect::config::Config;
use ecocollect::rest::{create_router, AppState};
use ecocollect::seed::{load_demo_data, DEMO_PASSWORD};
use ecocollect::storage::Storage;
use ecocollect::logging;

#[derive(Parser)]
#[command(name = "ecocollect")]
#[command(about = "EcoCollect waste-management API server", long_about = None)]
struct Args {
    /// Address to listen on (overrides ECOCOLLECT_BIND)
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Sled data directory (overrides ECOCOLLECT_DATA)
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Keep everything in memory
    #[arg(long)]
    temporary: bool,

    /// Load the demo data set before serving
    #[arg(long)]
    seed: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(data) = args.data {
        config.data_path = data;
    }
    config.temporary |= args.temporary;

    let _guard = logging::init(&config);

    if config.uses_default_secret() {
        warn!("ECOCOLLECT_JWT_SECRET not set, using the development secret");
    }

    let storage = if config.temporary {
        Storage::temporary()?
    } else {
        Storage::open(&config.data_path)?
    };
    info!(
        data = %config.data_path.display(),
        temporary = config.temporary,
        "storage opened"
    );

    if args.seed {
        let summary = load_demo_data(&storage, &AuthSettings::from_config(&config), DEMO_PASSWORD)?;
        info!(?summary, "seeded demo data");
    }

    let app = create_router(AppState::new(storage.clone(), &config));
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "EcoCollect API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await?;

    info!("shutting down, flushing storage");
    storage.flush().await?;
    Ok(())
}
