// Reconciler - scrubs blackhole routes found in the live kernel route table
//
// The kernel keeps no owner tag on routes, so anything shaped like our
// routes (host, zero gateway, UP|HOST|REJECT) is treated as ours.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::AppResult;
use crate::routes::{codec, RouteOps};

pub const DEFAULT_ROUTE_TABLE: &str = "/proc/net/route";

pub struct Reconciler<T: RouteOps> {
    routes: Arc<T>,
    source: PathBuf,
}

impl<T: RouteOps> Reconciler<T> {
    pub fn new(routes: Arc<T>, source: impl Into<PathBuf>) -> Self {
        Reconciler {
            routes,
            source: source.into(),
        }
    }

    /// Delete every blackhole route listed in the route table source.
    ///
    /// Stops at the first read, decode or delete failure.
    pub fn cleanup_all(&self) -> AppResult<Vec<Ipv4Addr>> {
        let file = File::open(&self.source)?;
        let deleted = self.cleanup_from(BufReader::new(file))?;
        tracing::info!(
            "Reconciled {}: removed {} blackhole route(s)",
            self.source.display(),
            deleted.len()
        );
        Ok(deleted)
    }

    /// Same scan as `cleanup_all`, over an already opened dump.
    pub fn cleanup_from(&self, reader: impl BufRead) -> AppResult<Vec<Ipv4Addr>> {
        let mut deleted = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if let Some(addr) = codec::decode(&line)? {
                self.routes.delete(addr)?;
                tracing::info!("Deleted: {}", addr);
                deleted.push(addr);
            }
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::routes::testing::MemoryTable;
    use std::io::Write;

    const HEADER: &str = "Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT\t\t";
    const DEFAULT_ROUTE: &str = "eth0\t00000000\t0102A8C0\t0003\t0\t0\t100\t00000000\t0\t0\t0\t\t";
    const LAN_ROUTE: &str = "eth0\t0002A8C0\t00000000\t0001\t0\t0\t100\t00FFFFFF\t0\t0\t0\t\t";
    const BLACKHOLE_125: &str = "*\t7D7B7B7B\t00000000\t0205\t0\t0\t0\tFFFFFFFF\t0\t0\t0\t\t";
    const BLACKHOLE_5: &str = "*\t057100CB\t00000000\t0205\t0\t0\t0\tFFFFFFFF\t0\t0\t0\t\t";

    fn table(lines: &[&str]) -> String {
        let mut table = lines.join("\n");
        table.push('\n');
        table
    }

    #[test]
    fn test_cleanup_single_match() {
        let addr = Ipv4Addr::new(123, 123, 123, 125);
        let other = Ipv4Addr::new(10, 9, 8, 7);
        let routes = Arc::new(MemoryTable::with_routes(&[addr, other]));
        let reconciler = Reconciler::new(routes.clone(), DEFAULT_ROUTE_TABLE);

        let dump = table(&[HEADER, DEFAULT_ROUTE, BLACKHOLE_125, LAN_ROUTE]);
        let deleted = reconciler.cleanup_from(dump.as_bytes()).unwrap();

        assert_eq!(deleted, vec![addr]);
        assert_eq!(routes.deletes(), vec![(addr, true)]);
        assert_eq!(routes.routes(), vec![other]);
    }

    #[test]
    fn test_cleanup_without_matches() {
        let routes = Arc::new(MemoryTable::default());
        let reconciler = Reconciler::new(routes.clone(), DEFAULT_ROUTE_TABLE);

        let dump = table(&[HEADER, DEFAULT_ROUTE, LAN_ROUTE]);
        assert!(reconciler.cleanup_from(dump.as_bytes()).unwrap().is_empty());
        assert!(routes.deletes().is_empty());
    }

    #[test]
    fn test_cleanup_stops_on_failed_delete() {
        // 203.0.113.5 is listed but not present, so its delete fails.
        let addr = Ipv4Addr::new(123, 123, 123, 125);
        let routes = Arc::new(MemoryTable::with_routes(&[addr]));
        let reconciler = Reconciler::new(routes.clone(), DEFAULT_ROUTE_TABLE);

        let dump = table(&[HEADER, BLACKHOLE_5, BLACKHOLE_125]);
        let err = reconciler.cleanup_from(dump.as_bytes()).unwrap_err();

        assert!(matches!(err, AppError::NotFound(a) if a == Ipv4Addr::new(203, 0, 113, 5)));
        assert!(routes.contains(addr));
    }

    #[test]
    fn test_cleanup_stops_on_malformed_line() {
        let addr = Ipv4Addr::new(123, 123, 123, 125);
        let routes = Arc::new(MemoryTable::with_routes(&[addr]));
        let reconciler = Reconciler::new(routes.clone(), DEFAULT_ROUTE_TABLE);

        let bad = "*\tXYZ\t00000000\t0205\t0\t0\t0\tFFFFFFFF\t0\t0\t0";
        let dump = table(&[HEADER, bad, BLACKHOLE_125]);
        let err = reconciler.cleanup_from(dump.as_bytes()).unwrap_err();

        assert!(matches!(err, AppError::Format(_)));
        assert!(routes.deletes().is_empty());
    }

    #[test]
    fn test_cleanup_all_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", table(&[HEADER, BLACKHOLE_5, DEFAULT_ROUTE, BLACKHOLE_125])).unwrap();

        let first = Ipv4Addr::new(203, 0, 113, 5);
        let second = Ipv4Addr::new(123, 123, 123, 125);
        let routes = Arc::new(MemoryTable::with_routes(&[first, second]));
        let reconciler = Reconciler::new(routes.clone(), file.path());

        assert_eq!(reconciler.cleanup_all().unwrap(), vec![first, second]);
        assert!(routes.routes().is_empty());
    }

    #[test]
    fn test_cleanup_all_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let routes = Arc::new(MemoryTable::default());
        let reconciler = Reconciler::new(routes, dir.path().join("route"));

        assert!(matches!(reconciler.cleanup_all(), Err(AppError::Io(_))));
    }
}
