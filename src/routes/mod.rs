// Routes module - blackhole route encoding and kernel route edits

pub mod codec;
pub mod controller;

use std::net::Ipv4Addr;

use crate::error::{AppError, AppResult};

/// Add/delete of blackhole host routes.
///
/// `RouteController` implements this against the kernel; expiration and
/// reconciliation only depend on the trait.
pub trait RouteOps: Send + Sync + 'static {
    fn add(&self, addr: Ipv4Addr) -> AppResult<()>;
    fn delete(&self, addr: Ipv4Addr) -> AppResult<()>;
}

/// Blackhole `addr`, or remove its route if it is already blackholed.
///
/// Returns `true` when the route was added. No expiration is scheduled.
pub fn toggle<T: RouteOps + ?Sized>(routes: &T, addr: Ipv4Addr) -> AppResult<bool> {
    match routes.add(addr) {
        Ok(()) => Ok(true),
        Err(AppError::AlreadyExists(_)) => {
            routes.delete(addr)?;
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
