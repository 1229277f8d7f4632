// Route control socket: submits blackhole route edits to the kernel

use std::io;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd};

use super::codec::{self, RouteEditRecord};
use super::RouteOps;
use crate::error::{AppError, AppResult};

/// Kernel route-table edit operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteRequest {
    Insert,
    Remove,
}

impl RouteRequest {
    #[cfg(target_os = "linux")]
    fn code(self) -> libc::c_ulong {
        match self {
            RouteRequest::Insert => libc::SIOCADDRT,
            RouteRequest::Remove => libc::SIOCDELRT,
        }
    }
}

/// Owns the single datagram socket through which every route edit goes.
///
/// Each edit is one self-contained ioctl, so a shared reference can be used
/// from any number of tasks without extra locking.
#[derive(Debug)]
pub struct RouteController {
    fd: OwnedFd,
}

impl RouteController {
    pub fn open() -> AppResult<Self> {
        let fd = open_control_socket().map_err(AppError::from_handle)?;
        tracing::debug!("Opened route control socket (fd {})", fd.as_raw_fd());
        Ok(RouteController { fd })
    }

    /// Close the control socket, reporting close(2) failures.
    pub fn close(self) -> AppResult<()> {
        let fd = self.fd.into_raw_fd();
        // SAFETY: fd came out of the OwnedFd above and is closed exactly once.
        if unsafe { libc::close(fd) } < 0 {
            return Err(AppError::from_handle(io::Error::last_os_error()));
        }
        tracing::debug!("Closed route control socket");
        Ok(())
    }

    /// Install the blackhole route for `addr`.
    pub fn add(&self, addr: Ipv4Addr) -> AppResult<()> {
        let mut record = codec::encode(addr);
        self.submit(RouteRequest::Insert, &mut record)
            .map_err(|e| AppError::from_kernel(addr, e))
    }

    /// Remove the blackhole route for `addr`.
    pub fn delete(&self, addr: Ipv4Addr) -> AppResult<()> {
        let mut record = codec::encode(addr);
        self.submit(RouteRequest::Remove, &mut record)
            .map_err(|e| AppError::from_kernel(addr, e))
    }

    /// Hand `record` to the kernel. The exclusive borrow keeps the buffer
    /// alive and untouched for the whole call.
    #[cfg(target_os = "linux")]
    fn submit(&self, request: RouteRequest, record: &mut RouteEditRecord) -> io::Result<()> {
        tracing::trace!(
            "{:?} route to {}: {:02x?}",
            request,
            record.destination(),
            record.as_bytes()
        );
        // SAFETY: record points to a live, correctly laid out rtentry for the
        // duration of the call and the kernel does not retain the pointer.
        let rc = unsafe {
            libc::ioctl(
                self.fd.as_raw_fd(),
                request.code() as _,
                record as *mut RouteEditRecord,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn submit(&self, _request: RouteRequest, _record: &mut RouteEditRecord) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "route ioctls are only available on Linux",
        ))
    }
}

#[cfg(target_os = "linux")]
fn open_control_socket() -> io::Result<OwnedFd> {
    // SAFETY: plain socket(2) call, the result is checked below.
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd is a freshly created descriptor owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

#[cfg(not(target_os = "linux"))]
fn open_control_socket() -> io::Result<OwnedFd> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "route ioctls are only available on Linux",
    ))
}

impl RouteOps for RouteController {
    fn add(&self, addr: Ipv4Addr) -> AppResult<()> {
        RouteController::add(self, addr)
    }

    fn delete(&self, addr: Ipv4Addr) -> AppResult<()> {
        RouteController::delete(self, addr)
    }
}
