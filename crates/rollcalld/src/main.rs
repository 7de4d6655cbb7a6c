use anyhow::{Context, Result};
use rollcalld::config::Config;
use rollcalld::dbus_interface::{CheckinService, SessionSlot};
use rollcalld::engine::EngineAcquirer;
use rollcalld::provenance::IpApiClient;
use rollcalld::reference::HttpImageFetcher;
use rollcalld::session::CheckinFlow;
use rollcalld::store::SqliteStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let config = Config::load().context("loading configuration")?;

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = SqliteStore::open(&config.db_path)
        .await
        .context("opening attendance database")?;

    let flow = CheckinFlow {
        identities: store.clone(),
        store,
        fetcher: HttpImageFetcher::new(config.network_timeout()),
        geo: IpApiClient::new(config.geolocation_url.clone(), config.network_timeout()),
        acquirer: EngineAcquirer::from_config(&config),
    };

    let slot = Arc::new(Mutex::new(SessionSlot::new()));
    let service = CheckinService::new(flow, slot.clone());

    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _connection = builder
        .name("org.freedesktop.Rollcall1")?
        .serve_at("/org/freedesktop/Rollcall1", service)?
        .build()
        .await
        .context("connecting to D-Bus")?;

    tracing::info!("rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    // A visit may still hold the camera; give it back before leaving the bus.
    slot.lock().await.shutdown();

    Ok(())
}
