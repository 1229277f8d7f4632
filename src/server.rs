// Control socket server - line-oriented commands over a Unix domain socket
//
// Each line is one command: `<ipv4>` or `add <ipv4>` blackholes an address,
// `del <ipv4>` (or `delete <ipv4>`) removes it early. Anything else is
// logged and skipped.

use std::fmt;
use std::fs::{self, Permissions};
use std::future::Future;
use std::io;
use std::net::Ipv4Addr;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::UnixListener;
use tokio::task::JoinSet;

use crate::expiry::ExpirationManager;
use crate::routes::RouteOps;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Add(Ipv4Addr),
    Delete(Ipv4Addr),
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let command = match (words.next(), words.next()) {
            (Some(addr), None) => Command::Add(addr.parse().ok()?),
            (Some("add"), Some(addr)) => Command::Add(addr.parse().ok()?),
            (Some("del" | "delete"), Some(addr)) => Command::Delete(addr.parse().ok()?),
            _ => return None,
        };
        if words.next().is_some() {
            return None;
        }
        Some(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Add(addr) => write!(f, "add {}", addr),
            Command::Delete(addr) => write!(f, "del {}", addr),
        }
    }
}

/// Bind the control socket at `path`, replacing a stale socket file.
pub fn bind(path: &Path, mode: u32) -> io::Result<UnixListener> {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!("Removed stale socket {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let listener = UnixListener::bind(path)?;
    fs::set_permissions(path, Permissions::from_mode(mode))?;
    tracing::info!("Listening on {} (mode {:o})", path.display(), mode);
    Ok(listener)
}

/// Accept sessions until `shutdown` resolves; live sessions are aborted then.
pub async fn run<T: RouteOps>(
    listener: UnixListener,
    manager: Arc<ExpirationManager<T>>,
    shutdown: impl Future<Output = ()>,
) -> io::Result<()> {
    let mut sessions = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let manager = manager.clone();
                sessions.spawn(async move {
                    if let Err(e) = serve(stream, &*manager).await {
                        tracing::warn!("Session ended with error: {}", e);
                    }
                });
                tracing::debug!("Accepted session ({} open)", sessions.len());
            }
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }

    sessions.shutdown().await;
    Ok(())
}

/// Handle one client session until it closes its end.
pub async fn serve<T: RouteOps>(
    reader: impl AsyncRead + Unpin,
    manager: &ExpirationManager<T>,
) -> io::Result<()> {
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let Some(command) = Command::parse(&line) else {
            if !line.trim().is_empty() {
                tracing::info!("Ignore: {:?}", line);
            }
            continue;
        };

        let result = match command {
            Command::Add(addr) => manager.add(addr).await.map(|_| ()),
            Command::Delete(addr) => manager.delete(addr).await,
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_expected() => tracing::info!("{}", e),
            Err(e) => tracing::warn!("{} failed: {}", command, e),
        }
    }

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
