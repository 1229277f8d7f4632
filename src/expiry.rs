// Expiration manager - schedules automatic removal of blackhole routes
//
// Every blackholed address owns at most one `AddressTimer`: a spawned task
// sleeping until the deadline, tracked by address so it can be replaced or
// aborted explicitly instead of living in a detached callback.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::{sleep_until, Instant};

use crate::error::{AppError, AppResult};
use crate::routes::RouteOps;

#[derive(Debug)]
struct AddressTimer {
    /// Generation, so a replaced timer never removes its successor's entry
    id: u64,
    deadline: Instant,
    task: AbortHandle,
}

#[derive(Default)]
struct Timers {
    by_addr: HashMap<Ipv4Addr, AddressTimer>,
    /// Every spawned expiration task, so shutdown can wait for them to drop
    tasks: JoinSet<()>,
}

type TimerMap = Arc<Mutex<Timers>>;

pub struct ExpirationManager<T: RouteOps> {
    routes: Arc<T>,
    timeout: Duration,
    timers: TimerMap,
    next_id: AtomicU64,
}

impl<T: RouteOps> ExpirationManager<T> {
    pub fn new(routes: Arc<T>, timeout: Duration) -> Self {
        ExpirationManager {
            routes,
            timeout,
            timers: Arc::new(Mutex::new(Timers::default())),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Blackhole `addr` and schedule its removal after the timeout.
    ///
    /// An address that is already blackholed yields `AlreadyExists` and its
    /// existing deadline is left as is.
    pub async fn add(&self, addr: Ipv4Addr) -> AppResult<Instant> {
        // The map lock also orders kernel edits for one address against the
        // timer bookkeeping; route edits never await.
        let mut timers = self.timers.lock().await;
        let deadline = Instant::now()
            .checked_add(self.timeout)
            .ok_or(AppError::Timeout(self.timeout))?;
        self.routes.add(addr)?;

        while timers.tasks.try_join_next().is_some() {}

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = timers.tasks.spawn(expire(
            self.routes.clone(),
            self.timers.clone(),
            addr,
            id,
            deadline,
        ));

        // Only possible when the route vanished behind our back.
        if let Some(stale) = timers
            .by_addr
            .insert(addr, AddressTimer { id, deadline, task })
        {
            stale.task.abort();
            tracing::debug!("Replaced stale expiration timer for {}", addr);
        }

        tracing::info!("Blackholed {} for {}s", addr, self.timeout.as_secs());
        Ok(deadline)
    }

    /// Remove the blackhole route for `addr` before its deadline.
    ///
    /// The pending timer is dropped when the route is gone afterwards,
    /// including when the kernel answers `NotFound`.
    pub async fn delete(&self, addr: Ipv4Addr) -> AppResult<()> {
        let mut timers = self.timers.lock().await;
        let result = self.routes.delete(addr);

        if matches!(result, Ok(()) | Err(AppError::NotFound(_))) {
            if let Some(timer) = timers.by_addr.remove(&addr) {
                timer.task.abort();
            }
        }

        if result.is_ok() {
            tracing::info!("Removed blackhole route to {}", addr);
        }
        result
    }

    /// Pending expirations, ordered by address.
    pub async fn active(&self) -> Vec<(Ipv4Addr, Instant)> {
        let timers = self.timers.lock().await;
        let mut active: Vec<_> = timers
            .by_addr
            .iter()
            .map(|(addr, timer)| (*addr, timer.deadline))
            .collect();
        active.sort();
        active
    }

    /// Abort every pending expiration and return how many there were.
    ///
    /// Returns once every expiration task has been dropped, so no task
    /// still holds a reference to the route table afterwards.
    pub async fn shutdown(&self) -> usize {
        let mut tasks = {
            let mut timers = self.timers.lock().await;
            timers.by_addr.clear();
            std::mem::take(&mut timers.tasks)
        };
        let count = tasks.len();
        tasks.shutdown().await;
        tracing::debug!("Cancelled {} pending expiration(s)", count);
        count
    }
}

async fn expire<T: RouteOps>(
    routes: Arc<T>,
    timers: TimerMap,
    addr: Ipv4Addr,
    id: u64,
    deadline: Instant,
) {
    sleep_until(deadline).await;

    let mut timers = timers.lock().await;
    match timers.by_addr.get(&addr) {
        Some(timer) if timer.id == id => {
            timers.by_addr.remove(&addr);
        }
        _ => return,
    }

    match routes.delete(addr) {
        Ok(()) => tracing::info!("Blackhole route to {} expired", addr),
        Err(AppError::NotFound(_)) => {
            tracing::debug!("Blackhole route to {} was already removed", addr)
        }
        Err(e) => tracing::warn!("Failed to expire route to {}: {}", addr, e),
    }
}
