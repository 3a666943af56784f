mod allocator;
mod api;
mod ranges;
mod service;
mod settings;
mod store;

use anyhow::{Context, Result};
use log::info;

use allocator::PortAllocator;
use service::spawn_allocator;
use settings::{Backend, Settings};
use store::{MemoryStore, SqliteStore};

/// Pending requests the allocation service will queue before callers wait.
const COMMAND_BUFFER: usize = 32;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logger.
    simplelog::SimpleLogger::init(simplelog::LevelFilter::Info, simplelog::Config::default())?;

    let settings = Settings::new().context("Failed to load settings")?;
    let ranges = settings
        .port_ranges()
        .context("Invalid allowed port ranges")?;
    info!("Allowing {} ports from {}", ranges.len_ports(), ranges);

    let (allocator_tx, allocator_handle) = match settings.store.backend {
        Backend::Sqlite => {
            let store = SqliteStore::open(&settings.store.path)
                .with_context(|| format!("Failed to open store at {}", settings.store.path))?;
            info!("Using sqlite store at {}", settings.store.path);
            spawn_allocator(PortAllocator::new(store, ranges.sequencer()), COMMAND_BUFFER)
        }
        Backend::Memory => {
            info!("Using in-memory store, allocations will not persist");
            spawn_allocator(
                PortAllocator::new(MemoryStore::new(), ranges.sequencer()),
                COMMAND_BUFFER,
            )
        }
    };

    let listen_addr = settings.server.listen_addr();
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", listen_addr))?;
    info!("Listening on {}", listen_addr);

    axum::serve(listener, api::router(allocator_tx))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    // The router held the last sender; the service drains and stops.
    allocator_handle.await?;
    Ok(())
}
