mod config;
mod error;
mod expiry;
mod reconcile;
mod routes;
mod server;

use anyhow::Context;
use std::sync::Arc;

use config::Config;
use expiry::ExpirationManager;
use reconcile::Reconciler;
use routes::controller::RouteController;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    if let Some(addr) = config.toggle {
        return toggle_once(addr);
    }

    tracing::info!("nullrouted starting...");
    if let Some(source) = &config.source {
        tracing::info!("Loaded configuration from: {}", source.display());
    }
    tracing::info!("socket: {}", config.socket.display());

    // One control socket for the whole process, shared by every collaborator
    let controller = Arc::new(RouteController::open().context("Failed to open route control socket")?);
    let reconciler = Reconciler::new(controller.clone(), config.route_table.clone());

    if config.cleanup_on_start {
        let removed = reconciler
            .cleanup_all()
            .context("Failed to remove leftover blackhole routes")?;
        if !removed.is_empty() {
            tracing::warn!("Removed {} blackhole route(s) left by a previous run", removed.len());
        }
    }

    let manager = Arc::new(ExpirationManager::new(controller.clone(), config.timeout));
    tracing::info!("timeout: {}s", manager.timeout().as_secs());
    let listener = server::bind(&config.socket, config.socket_mode)
        .with_context(|| format!("Failed to bind {}", config.socket.display()))?;

    let served = server::run(listener, manager.clone(), server::shutdown_signal()).await;
    if let Err(e) = &served {
        tracing::error!("Control socket failed: {}", e);
    }

    // Pending timers are superseded by scrubbing the table directly
    let pending = manager.active().await;
    tracing::info!("{} blackhole route(s) pending expiry at shutdown", pending.len());
    manager.shutdown().await;
    drop(manager);

    if let Err(e) = std::fs::remove_file(&config.socket) {
        tracing::debug!("Could not remove {}: {}", config.socket.display(), e);
    }

    reconciler
        .cleanup_all()
        .context("Failed to restore route table on shutdown")?;
    drop(reconciler);

    // Timer tasks and the reconciler are gone, this is the last reference
    match Arc::try_unwrap(controller) {
        Ok(controller) => controller.close()?,
        Err(_) => tracing::warn!("Route control socket still referenced; closing on exit"),
    }

    served.context("Control socket failed")?;
    tracing::info!("nullrouted stopped");
    Ok(())
}

/// Flip the blackhole route for one address without starting the daemon.
fn toggle_once(addr: std::net::Ipv4Addr) -> anyhow::Result<()> {
    let controller = RouteController::open().context("Failed to open route control socket")?;
    let added = routes::toggle(&controller, addr)
        .with_context(|| format!("Failed to toggle blackhole route to {}", addr))?;
    if added {
        tracing::info!("Blackholed {} (no expiry)", addr);
    } else {
        tracing::info!("Removed blackhole route to {}", addr);
    }
    controller.close()?;
    Ok(())
}
