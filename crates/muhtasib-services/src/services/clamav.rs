use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use muhtasib_core::{ScanAccess, Verdict};
use tokio::sync::Semaphore;

#[cfg(feature = "clamav")]
use std::path::PathBuf;

/// What the daemon said about a scanned file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonReply {
    Clean,
    Infected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// No connection could be made (refused, reset, unreachable)
    #[error("daemon unreachable: {0}")]
    Unreachable(String),

    /// The daemon answered with something other than OK/FOUND
    #[error("daemon error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl DaemonError {
    /// Classify an IO error from a daemon call
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::BrokenPipe => DaemonError::Unreachable(err.to_string()),
            _ => DaemonError::Io(err),
        }
    }
}

/// Raw access to a malware-scanning daemon.
///
/// Implemented by [`ClamdDaemon`] for a real `clamd`, and by fakes in tests.
#[async_trait]
pub trait ScanDaemon: Send + Sync {
    /// Liveness check
    async fn ping(&self) -> Result<(), DaemonError>;

    /// Submit the file at `path` for scanning
    async fn scan(&self, path: &Path) -> Result<DaemonReply, DaemonError>;
}

/// Interpret a raw clamd reply such as `stream: OK` or `stream: Eicar-Test-Signature FOUND`
#[cfg(feature = "clamav")]
pub fn parse_reply(response: &[u8]) -> Result<DaemonReply, DaemonError> {
    match clamav_client::clean(response) {
        Ok(true) => Ok(DaemonReply::Clean),
        Ok(false) => {
            let text = String::from_utf8_lossy(response);
            let text = text.trim_end_matches('\0').trim();
            let body = text.split_once(':').map(|(_, rest)| rest).unwrap_or(text).trim();
            match body.strip_suffix("FOUND") {
                Some(signature) if !signature.trim().is_empty() => {
                    Ok(DaemonReply::Infected(signature.trim().to_string()))
                }
                Some(_) => Ok(DaemonReply::Infected("unknown".to_string())),
                None => Err(DaemonError::Protocol(text.to_string())),
            }
        }
        Err(e) => Err(DaemonError::Protocol(format!(
            "Failed to parse ClamAV response: {}",
            e
        ))),
    }
}

/// Where `clamd` listens
#[cfg(feature = "clamav")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonEndpoint {
    /// `host:port`
    Tcp(String),
    #[cfg(unix)]
    Socket(PathBuf),
}

#[cfg(feature = "clamav")]
impl std::fmt::Display for DaemonEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonEndpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
            #[cfg(unix)]
            DaemonEndpoint::Socket(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

#[cfg(feature = "clamav")]
impl DaemonEndpoint {
    fn ping_blocking(&self) -> io::Result<Vec<u8>> {
        match self {
            DaemonEndpoint::Tcp(addr) => clamav_client::ping(clamav_client::Tcp {
                host_address: addr.as_str(),
            }),
            #[cfg(unix)]
            DaemonEndpoint::Socket(path) => clamav_client::ping(clamav_client::Socket {
                socket_path: path.as_path(),
            }),
        }
    }

    fn scan_blocking(&self, file: &Path) -> io::Result<Vec<u8>> {
        match self {
            DaemonEndpoint::Tcp(addr) => clamav_client::scan_file(
                file,
                clamav_client::Tcp {
                    host_address: addr.as_str(),
                },
                None,
            ),
            #[cfg(unix)]
            DaemonEndpoint::Socket(path) => clamav_client::scan_file(
                file,
                clamav_client::Socket {
                    socket_path: path.as_path(),
                },
                None,
            ),
        }
    }
}

/// `clamd` over TCP or a Unix socket, using the blocking client inside
/// `spawn_blocking` so the returned futures stay `Send`.
#[cfg(feature = "clamav")]
#[derive(Debug, Clone)]
pub struct ClamdDaemon {
    endpoint: DaemonEndpoint,
}

#[cfg(feature = "clamav")]
impl ClamdDaemon {
    pub fn new(endpoint: DaemonEndpoint) -> Self {
        Self { endpoint }
    }

    pub fn tcp(host: &str, port: u16) -> Self {
        Self::new(DaemonEndpoint::Tcp(format!("{}:{}", host, port)))
    }

    /// Endpoint from configuration; a socket path wins over host/port on unix
    pub fn from_config(config: &muhtasib_core::Config) -> Self {
        #[cfg(unix)]
        if let Some(ref socket) = config.clamav_socket {
            return Self::new(DaemonEndpoint::Socket(socket.clone()));
        }
        Self::new(DaemonEndpoint::Tcp(config.clamav_address()))
    }

    pub fn endpoint(&self) -> &DaemonEndpoint {
        &self.endpoint
    }
}

#[cfg(feature = "clamav")]
const PONG: &[u8] = b"PONG";

#[cfg(feature = "clamav")]
#[async_trait]
impl ScanDaemon for ClamdDaemon {
    async fn ping(&self) -> Result<(), DaemonError> {
        let endpoint = self.endpoint.clone();
        let response = tokio::task::spawn_blocking(move || endpoint.ping_blocking())
            .await
            .map_err(|e| DaemonError::Protocol(format!("ClamAV ping task join error: {}", e)))?
            .map_err(DaemonError::from_io)?;

        let text = String::from_utf8_lossy(&response);
        if text.trim_end_matches('\0').trim().as_bytes() == PONG {
            Ok(())
        } else {
            Err(DaemonError::Unreachable(format!(
                "unexpected ping response: {}",
                text.trim_end_matches('\0')
            )))
        }
    }

    async fn scan(&self, path: &Path) -> Result<DaemonReply, DaemonError> {
        let endpoint = self.endpoint.clone();
        let file = path.to_path_buf();
        let response = tokio::task::spawn_blocking(move || endpoint.scan_blocking(&file))
            .await
            .map_err(|e| DaemonError::Protocol(format!("ClamAV scan task join error: {}", e)))?
            .map_err(DaemonError::from_io)?;
        parse_reply(&response)
    }
}

const SCANNER_UNAVAILABLE_LOG: &str = "ClamAV is not available for scanning";

/// Health-checked handle to a scan daemon.
///
/// Connects lazily: the first scan (or an explicit [`ScanDaemonClient::connect`])
/// pings the daemon, and a failed ping leaves the client disconnected so the next
/// scan tries again. The client never deletes the files it scans.
pub struct ScanDaemonClient {
    daemon: Arc<dyn ScanDaemon>,
    connected: AtomicBool,
    permits: Arc<Semaphore>,
    access: ScanAccess,
    timeout: Duration,
}

impl ScanDaemonClient {
    pub fn new(daemon: Arc<dyn ScanDaemon>, access: ScanAccess, timeout: Duration) -> Self {
        Self {
            daemon,
            connected: AtomicBool::new(false),
            permits: Arc::new(Semaphore::new(access.permits())),
            access,
            timeout,
        }
    }

    #[cfg(feature = "clamav")]
    pub fn from_config(config: &muhtasib_core::Config) -> Self {
        Self::new(
            Arc::new(ClamdDaemon::from_config(config)),
            config.scan_access,
            Duration::from_secs(config.clamav_timeout_secs),
        )
    }

    pub fn access(&self) -> ScanAccess {
        self.access
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Ping the daemon and record the outcome. Never errors.
    pub async fn connect(&self) -> bool {
        let ok = match tokio::time::timeout(self.timeout, self.daemon.ping()).await {
            Ok(Ok(())) => {
                tracing::info!("Connected to ClamAV daemon");
                true
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "{}", SCANNER_UNAVAILABLE_LOG);
                false
            }
            Err(_) => {
                tracing::error!(
                    timeout_secs = self.timeout.as_secs(),
                    "{} (ping timed out)",
                    SCANNER_UNAVAILABLE_LOG
                );
                false
            }
        };
        self.connected.store(ok, Ordering::Release);
        ok
    }

    /// Liveness check that also refreshes the connection state
    pub async fn ping(&self) -> bool {
        self.connect().await
    }

    async fn ensure_connected(&self) -> bool {
        if self.is_connected() {
            return true;
        }
        self.connect().await
    }

    /// Scan a staged file and return the daemon's verdict.
    ///
    /// The file's existence is checked here, independently of any earlier check,
    /// because it may have been removed or quarantined since it was staged.
    pub async fn scan_file(&self, path: &Path) -> Verdict {
        if !self.ensure_connected().await {
            return Verdict::ScannerUnavailable;
        }

        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Verdict::ScanError("Staged path is not a regular file".to_string()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::error!(path = %path.display(), "File does not exist at scan time");
                return Verdict::ScanError("File not found at scan time".to_string());
            }
            Err(e) => return Verdict::ScanError(describe_io_failure(path, &e)),
        }

        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return Verdict::ScanError("Scan queue closed".to_string()),
        };

        let start = Instant::now();
        tracing::debug!(path = %path.display(), "Starting ClamAV scan");

        match tokio::time::timeout(self.timeout, self.daemon.scan(path)).await {
            Ok(Ok(DaemonReply::Clean)) => {
                tracing::info!(
                    path = %path.display(),
                    duration_ms = start.elapsed().as_millis(),
                    "File scan completed: clean"
                );
                Verdict::Clean
            }
            Ok(Ok(DaemonReply::Infected(signature))) => {
                tracing::warn!(
                    path = %path.display(),
                    duration_ms = start.elapsed().as_millis(),
                    virus = %signature,
                    "File scan detected virus"
                );
                Verdict::Infected(signature)
            }
            Ok(Err(DaemonError::Unreachable(msg))) => {
                tracing::error!(error = %msg, "ClamAV connection lost during scan");
                self.connected.store(false, Ordering::Release);
                Verdict::ScannerUnavailable
            }
            Ok(Err(DaemonError::Io(e))) => {
                tracing::error!(path = %path.display(), error = %e, "ClamAV scan failed");
                Verdict::ScanError(describe_io_failure(path, &e))
            }
            Ok(Err(DaemonError::Protocol(msg))) => {
                tracing::error!(path = %path.display(), error = %msg, "ClamAV scan failed");
                Verdict::ScanError(format!("ClamAV scan error: {}", msg))
            }
            Err(_) => {
                let msg = format!(
                    "ClamAV scan timeout (exceeded {} seconds)",
                    self.timeout.as_secs()
                );
                tracing::error!(path = %path.display(), error = %msg, "ClamAV scan timeout");
                Verdict::ScanError(msg)
            }
        }
    }
}

/// Error text for IO failures around a scan, naming sandbox/AV interference for
/// permission problems
fn describe_io_failure(path: &Path, err: &io::Error) -> String {
    if err.kind() == io::ErrorKind::PermissionDenied {
        format!(
            "Permission denied while scanning {}: {}. The process may be running in a \
             sandbox, or an antivirus product may be blocking access to the file",
            path.display(),
            err
        )
    } else {
        format!("ClamAV scan error: {}", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FakeBehavior, FakeDaemon};

    fn client(fake: Arc<FakeDaemon>, access: ScanAccess) -> ScanDaemonClient {
        ScanDaemonClient::new(fake, access, Duration::from_secs(5))
    }

    fn staged_file(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("sample.bin");
        std::fs::write(&path, b"payload").unwrap();
        path
    }

    #[tokio::test]
    async fn connects_lazily_on_first_scan() {
        let fake = Arc::new(FakeDaemon::new(FakeBehavior::Clean));
        let client = client(fake.clone(), ScanAccess::Serialized);
        assert!(!client.is_connected());
        assert_eq!(fake.ping_count(), 0);

        let dir = tempfile::tempdir().unwrap();
        let verdict = client.scan_file(&staged_file(&dir)).await;
        assert_eq!(verdict, Verdict::Clean);
        assert!(client.is_connected());
        assert_eq!(fake.ping_count(), 1);

        // Already connected: no second ping
        client.scan_file(&staged_file(&dir)).await;
        assert_eq!(fake.ping_count(), 1);
    }

    #[tokio::test]
    async fn unreachable_daemon_is_unavailable_and_rechecked() {
        let fake = Arc::new(FakeDaemon::new(FakeBehavior::Clean).unreachable());
        let client = client(fake.clone(), ScanAccess::Concurrent(2));
        let dir = tempfile::tempdir().unwrap();
        let path = staged_file(&dir);

        assert_eq!(client.scan_file(&path).await, Verdict::ScannerUnavailable);
        assert_eq!(client.scan_file(&path).await, Verdict::ScannerUnavailable);
        assert_eq!(fake.ping_count(), 2);
        assert_eq!(fake.scan_count(), 0);
    }

    #[tokio::test]
    async fn daemon_coming_back_is_used_on_next_scan() {
        let fake = Arc::new(FakeDaemon::new(FakeBehavior::Clean).unreachable());
        let client = client(fake.clone(), ScanAccess::Serialized);
        let dir = tempfile::tempdir().unwrap();
        let path = staged_file(&dir);

        assert_eq!(client.scan_file(&path).await, Verdict::ScannerUnavailable);
        assert!(!client.is_connected());

        fake.set_reachable(true);
        assert_eq!(client.scan_file(&path).await, Verdict::Clean);
        assert!(client.is_connected());
        assert_eq!(fake.scan_count(), 1);
    }

    #[tokio::test]
    async fn malformed_daemon_reply_is_scan_error() {
        let fake = Arc::new(FakeDaemon::new(FakeBehavior::Protocol(
            "stream: INSTREAM size limit exceeded. ERROR".to_string(),
        )));
        let client = client(fake, ScanAccess::Serialized);
        let dir = tempfile::tempdir().unwrap();

        assert_eq!(
            client.scan_file(&staged_file(&dir)).await,
            Verdict::ScanError(
                "ClamAV scan error: stream: INSTREAM size limit exceeded. ERROR".to_string()
            )
        );
        // The daemon answered, so the connection stays up
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn infected_reports_signature() {
        let fake = Arc::new(FakeDaemon::new(FakeBehavior::Infected(
            "Eicar-Test-Signature".to_string(),
        )));
        let client = client(fake, ScanAccess::Serialized);
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            client.scan_file(&staged_file(&dir)).await,
            Verdict::Infected("Eicar-Test-Signature".to_string())
        );
    }

    #[tokio::test]
    async fn missing_file_is_scan_error_without_daemon_call() {
        let fake = Arc::new(FakeDaemon::new(FakeBehavior::Clean));
        let client = client(fake.clone(), ScanAccess::Serialized);
        let dir = tempfile::tempdir().unwrap();

        let verdict = client.scan_file(&dir.path().join("gone")).await;
        assert_eq!(
            verdict,
            Verdict::ScanError("File not found at scan time".to_string())
        );
        assert_eq!(fake.scan_count(), 0);
    }

    #[tokio::test]
    async fn permission_failure_names_sandbox() {
        let fake = Arc::new(FakeDaemon::new(FakeBehavior::PermissionDenied));
        let client = client(fake, ScanAccess::Serialized);
        let dir = tempfile::tempdir().unwrap();

        match client.scan_file(&staged_file(&dir)).await {
            Verdict::ScanError(msg) => {
                assert!(msg.contains("Permission denied"));
                assert!(msg.contains("sandbox"));
                assert!(msg.contains("antivirus"));
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_lost_mid_scan_marks_disconnected() {
        let fake = Arc::new(FakeDaemon::new(FakeBehavior::DropConnection));
        let client = client(fake, ScanAccess::Serialized);
        let dir = tempfile::tempdir().unwrap();

        assert_eq!(
            client.scan_file(&staged_file(&dir)).await,
            Verdict::ScannerUnavailable
        );
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn slow_scan_times_out_as_scan_error() {
        let fake = Arc::new(FakeDaemon::new(FakeBehavior::Clean).with_delay(Duration::from_millis(300)));
        let client = ScanDaemonClient::new(fake, ScanAccess::Serialized, Duration::from_millis(100));
        let dir = tempfile::tempdir().unwrap();

        // Ping is instant, the scan is not
        match client.scan_file(&staged_file(&dir)).await {
            Verdict::ScanError(msg) => assert!(msg.contains("timeout")),
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[tokio::test]
    async fn serialized_access_runs_one_scan_at_a_time() {
        let fake = Arc::new(FakeDaemon::new(FakeBehavior::Clean).with_delay(Duration::from_millis(40)));
        let client = Arc::new(client(fake.clone(), ScanAccess::Serialized));
        let dir = tempfile::tempdir().unwrap();
        let path = staged_file(&dir);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let client = client.clone();
            let path = path.clone();
            handles.push(tokio::spawn(async move { client.scan_file(&path).await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Verdict::Clean);
        }
        assert_eq!(fake.max_in_flight(), 1);
    }

    #[cfg(feature = "clamav")]
    #[test]
    fn parse_reply_variants() {
        assert_eq!(parse_reply(b"stream: OK\0").unwrap(), DaemonReply::Clean);
        assert_eq!(
            parse_reply(b"stream: Eicar-Test-Signature FOUND\0").unwrap(),
            DaemonReply::Infected("Eicar-Test-Signature".to_string())
        );
        assert_eq!(
            parse_reply(b"stream: Win.Test.EICAR_HDB-1 FOUND\0").unwrap(),
            DaemonReply::Infected("Win.Test.EICAR_HDB-1".to_string())
        );
        assert!(matches!(
            parse_reply(b"INSTREAM size limit exceeded. ERROR\0"),
            Err(DaemonError::Protocol(_))
        ));
    }

    #[cfg(feature = "clamav")]
    #[tokio::test]
    async fn clamd_wire_clean_and_infected() {
        use crate::test_helpers::FakeClamd;

        let dir = tempfile::tempdir().unwrap();
        let path = staged_file(&dir);

        let clean = FakeClamd::start(b"stream: OK\0");
        let daemon = ClamdDaemon::tcp(&clean.host(), clean.port());
        daemon.ping().await.unwrap();
        assert_eq!(daemon.scan(&path).await.unwrap(), DaemonReply::Clean);
        assert_eq!(clean.payloads(), vec![b"payload".to_vec()]);

        let infected = FakeClamd::start(b"stream: Eicar-Test-Signature FOUND\0");
        let client = ScanDaemonClient::new(
            Arc::new(ClamdDaemon::new(DaemonEndpoint::Tcp(infected.address()))),
            ScanAccess::Concurrent(4),
            Duration::from_secs(5),
        );
        assert_eq!(
            client.scan_file(&path).await,
            Verdict::Infected("Eicar-Test-Signature".to_string())
        );
    }

    #[cfg(feature = "clamav")]
    #[tokio::test]
    async fn clamd_refused_port_is_unavailable() {
        use crate::test_helpers::FakeClamd;

        let daemon = ClamdDaemon::new(DaemonEndpoint::Tcp(FakeClamd::refused_address()));
        assert!(matches!(daemon.ping().await, Err(DaemonError::Unreachable(_))));

        let client = ScanDaemonClient::new(
            Arc::new(daemon),
            ScanAccess::Serialized,
            Duration::from_secs(5),
        );
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            client.scan_file(&staged_file(&dir)).await,
            Verdict::ScannerUnavailable
        );
    }

    #[cfg(feature = "clamav")]
    #[test]
    fn endpoint_from_config() {
        let config = muhtasib_core::Config {
            clamav_host: "scanner.internal".to_string(),
            clamav_port: 3311,
            ..muhtasib_core::Config::default()
        };
        let daemon = ClamdDaemon::from_config(&config);
        assert_eq!(
            daemon.endpoint(),
            &DaemonEndpoint::Tcp("scanner.internal:3311".to_string())
        );
        assert_eq!(daemon.endpoint().to_string(), "tcp://scanner.internal:3311");
    }

    #[test]
    fn io_errors_classified() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(DaemonError::from_io(refused), DaemonError::Unreachable(_)));
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(DaemonError::from_io(denied), DaemonError::Io(_)));
    }
}
