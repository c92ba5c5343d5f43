//! In-memory scan daemon

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::services::clamav::{DaemonError, DaemonReply, ScanDaemon};

/// How the fake answers a scan request
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    Clean,
    Infected(String),
    PermissionDenied,
    /// Connection drops while the scan is in flight
    DropConnection,
    Protocol(String),
}

/// Called with the scanned path before the fake replies
pub type ScanHook = Arc<dyn Fn(&Path) + Send + Sync>;

pub struct FakeDaemon {
    behavior: FakeBehavior,
    reachable: AtomicBool,
    delay: Duration,
    hook: Option<ScanHook>,
    pings: AtomicUsize,
    scans: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeDaemon {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self {
            behavior,
            reachable: AtomicBool::new(true),
            delay: Duration::ZERO,
            hook: None,
            pings: AtomicUsize::new(0),
            scans: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn clean() -> Self {
        Self::new(FakeBehavior::Clean)
    }

    /// Every ping and scan fails with connection refused
    pub fn unreachable(self) -> Self {
        self.reachable.store(false, Ordering::SeqCst);
        self
    }

    /// Scans take at least `delay`; pings stay instant
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_hook(mut self, hook: ScanHook) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    /// Highest number of scans observed running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn refused() -> DaemonError {
        DaemonError::from_io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        ))
    }
}

#[async_trait]
impl ScanDaemon for FakeDaemon {
    async fn ping(&self) -> Result<(), DaemonError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Self::refused())
        }
    }

    async fn scan(&self, path: &Path) -> Result<DaemonReply, DaemonError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(Self::refused());
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(hook) = &self.hook {
            hook(path);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match &self.behavior {
            FakeBehavior::Clean => Ok(DaemonReply::Clean),
            FakeBehavior::Infected(signature) => Ok(DaemonReply::Infected(signature.clone())),
            FakeBehavior::PermissionDenied => Err(DaemonError::from_io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "operation not permitted",
            ))),
            FakeBehavior::DropConnection => Err(DaemonError::from_io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ))),
            FakeBehavior::Protocol(msg) => Err(DaemonError::Protocol(msg.clone())),
        }
    }
}
