mod http;
mod mpv;

use kirtan_core::catalog::Catalog;
use kirtan_core::config::Config;
use kirtan_core::platform;
use kirtan_core::player::{PlayerCore, PlayerEvent};
use kirtan_core::resolver::DirectoryResolver;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("kirtand.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(log_file)
                .with_ansi(false),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,kirtan_daemon=debug,kirtan_core=debug")
            }),
        )
        .init();

    info!("log file: {:?}", log_path);

    let config = Config::load()?;
    info!("config loaded from {:?}", Config::config_path());

    let catalog = load_catalog(&config)?;
    info!(
        "catalog: {} streams, {} schedule entries",
        catalog.streams().len(),
        catalog.schedule().len()
    );

    // Event channel: all external inputs funnel into PlayerCore.
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<PlayerEvent>(256);

    let media = mpv::MpvBackend::new(event_tx.clone());
    let resolver = DirectoryResolver::new();
    let player = PlayerCore::new(
        catalog,
        media,
        resolver,
        config.player.auto_schedule,
        config.player.default_volume,
        event_tx.clone(),
    );
    let snapshot = player.snapshot_handle();

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            snapshot,
            event_tx.clone(),
        );
    }

    // Schedule ticker.  The first tick fires one full period after startup;
    // the startup state is already the prepared default stream.
    let tick_tx = event_tx.clone();
    let period = std::time::Duration::from_secs(config.schedule.poll_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // consume the immediate first tick
        loop {
            interval.tick().await;
            if tick_tx.send(PlayerEvent::ScheduleTick).await.is_err() {
                break;
            }
        }
    });

    info!("player initialised, running event loop");
    player.run(event_rx).await;

    Ok(())
}

/// Catalog source chain: configured path, then a repo-local streams.toml,
/// then the built-in catalog.  Relative stream urls are pinned to the
/// configured base url afterwards.
fn load_catalog(config: &Config) -> anyhow::Result<Catalog> {
    let mut catalog = read_catalog(config)?;
    catalog.resolve_urls(&config.catalog.base_url)?;
    Ok(catalog)
}

fn read_catalog(config: &Config) -> anyhow::Result<Catalog> {
    let configured = &config.catalog.streams_toml;
    if configured.exists() {
        let catalog = Catalog::load(configured)?;
        info!(
            "loaded {} streams from {:?}",
            catalog.streams().len(),
            configured
        );
        return Ok(catalog);
    }

    let local = std::path::Path::new("streams.toml");
    if local.exists() {
        let catalog = Catalog::load(local)?;
        info!(
            "loaded {} streams from local streams.toml",
            catalog.streams().len()
        );
        return Ok(catalog);
    }

    info!("no catalog file found, using built-in catalog");
    Ok(Catalog::builtin())
}
