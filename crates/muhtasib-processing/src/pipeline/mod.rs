//! Attachment intake pipeline
//!
//! Each source runs through its own [`ArtifactState`] machine; artifacts run
//! concurrently up to a configured limit and never share a staged path. Results are
//! put back in input order only once the whole batch is done.
//!
//! Cleanup: every staged file is released after the scan call returns, whatever the
//! verdict, including `ScannerUnavailable` and `ScanError`. A file that could not be
//! released after a definite verdict turns the record into a `warning` carrying that
//! verdict. The staging directory itself goes away with the [`TempStore`].
//!
//! Cancellation stops new fetch and scan calls. Calls already in flight finish (they
//! are bounded by their timeouts) and anything they staged is released.

mod state;

pub use state::ArtifactState;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use muhtasib_core::{
    ArtifactError, Config, ErrorMetadata, ScanReport, ScanResult, SourceDescriptor,
    StagedArtifact, Verdict,
};
use muhtasib_services::ScanDaemonClient;
use muhtasib_sources::{suffix_hint, Fetchers, SourceFetcher};
use muhtasib_storage::{verify_staged, TempStore, VerifyPolicy};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::PipelineError;
use state::Tracker;

const DEFAULT_MAX_CONCURRENT: usize = 4;

pub struct AttachmentPipeline {
    store: Arc<TempStore>,
    fetchers: Fetchers,
    scanner: Arc<ScanDaemonClient>,
    verify: VerifyPolicy,
    max_concurrent: usize,
}

impl AttachmentPipeline {
    pub fn new(store: TempStore, fetchers: Fetchers, scanner: Arc<ScanDaemonClient>) -> Self {
        Self {
            store: Arc::new(store),
            fetchers,
            scanner,
            verify: VerifyPolicy::default(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }

    /// Create the staging directory and wire everything from configuration.
    /// Fails fast when the staging directory cannot be created.
    pub fn from_config(
        config: &Config,
        fetchers: Fetchers,
        scanner: Arc<ScanDaemonClient>,
    ) -> Result<Self, PipelineError> {
        let store = TempStore::new(config.staging_dir.as_deref())?;
        Ok(Self::new(store, fetchers, scanner)
            .with_verify_policy(VerifyPolicy {
                attempts: config.staging_verify_attempts,
                delay: Duration::from_millis(config.staging_verify_delay_ms),
            })
            .with_max_concurrent(config.max_concurrent_artifacts))
    }

    pub fn with_verify_policy(mut self, policy: VerifyPolicy) -> Self {
        self.verify = policy;
        self
    }

    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n.max(1);
        self
    }

    pub fn store(&self) -> &TempStore {
        &self.store
    }

    /// Process every source, returning one result per source in input order.
    ///
    /// Returns `Err` only for batch setup failures (a source kind with no fetcher,
    /// a fetcher that cannot obtain credentials).
    pub async fn run(
        &self,
        sources: &[SourceDescriptor],
        cancel: &CancellationToken,
    ) -> Result<ScanReport, PipelineError> {
        self.prepare(sources).await?;

        let start = Instant::now();
        tracing::info!(count = sources.len(), "Starting attachment scan batch");

        let mut indexed: Vec<(usize, ScanResult)> = stream::iter(sources.iter().enumerate())
            .map(|(index, source)| {
                let span = tracing::info_span!("artifact", index, source = %source);
                async move { (index, self.process(source, cancel).await) }.instrument(span)
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        indexed.sort_by_key(|(index, _)| *index);
        let report = ScanReport::new(indexed.into_iter().map(|(_, r)| r).collect());

        tracing::info!(
            count = report.len(),
            clean = report.count(muhtasib_core::ScanStatus::Clean),
            infected = report.count(muhtasib_core::ScanStatus::Infected),
            errors = report.count(muhtasib_core::ScanStatus::Error),
            warnings = report.count(muhtasib_core::ScanStatus::Warning),
            duration_ms = start.elapsed().as_millis(),
            "Attachment scan batch finished"
        );
        Ok(report)
    }

    /// Every kind in the batch needs a fetcher, and every fetcher used must be ready
    async fn prepare(&self, sources: &[SourceDescriptor]) -> Result<(), PipelineError> {
        let mut seen = HashSet::new();
        for source in sources {
            let kind = source.kind_name();
            if !seen.insert(kind) {
                continue;
            }
            let fetcher = self
                .fetchers
                .for_source(source)
                .ok_or(PipelineError::MissingFetcher(kind))?;
            fetcher
                .prepare()
                .await
                .map_err(|source| PipelineError::Setup {
                    fetcher: fetcher.name(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn process(&self, source: &SourceDescriptor, cancel: &CancellationToken) -> ScanResult {
        let mut tracker = Tracker::new();

        if cancel.is_cancelled() {
            tracker.advance(ArtifactState::Cancelled);
            return ScanResult::from_error(
                source.clone(),
                None,
                &ArtifactError::Cancelled("batch cancelled before fetch".to_string()),
            );
        }

        let Some(fetcher) = self.fetchers.for_source(source) else {
            // prepare() rules this out; kept so a record is still produced
            return ScanResult::from_error(
                source.clone(),
                None,
                &ArtifactError::InvalidSource(format!(
                    "no fetcher for {} sources",
                    source.kind_name()
                )),
            );
        };

        let path = match self.store.allocate(suffix_hint(source).as_deref()) {
            Ok(path) => path,
            Err(e) => {
                let err = ArtifactError::from(e);
                log_artifact_error(source, &err);
                return ScanResult::from_error(source.clone(), None, &err);
            }
        };

        tracker.advance(ArtifactState::Fetching);
        let artifact = match self.fetch(fetcher.as_ref(), source, &path).await {
            Ok(artifact) => artifact,
            Err(err) => {
                tracker.advance(ArtifactState::FetchError);
                log_artifact_error(source, &err);
                // The write is atomic, but a verify failure leaves a file behind
                return match self.release(&path).await {
                    Ok(()) => ScanResult::from_error(source.clone(), None, &err),
                    Err(cleanup) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %cleanup,
                            "Could not remove staged entry after failed fetch"
                        );
                        let mut result = ScanResult::from_error(source.clone(), Some(path), &err);
                        result.details = format!("{}; {}", result.details, cleanup);
                        result
                    }
                };
            }
        };
        tracker.advance(ArtifactState::Fetched);

        if cancel.is_cancelled() {
            tracker.advance(ArtifactState::Cancelled);
            let err = match self.release(&artifact.path).await {
                Ok(()) => ArtifactError::Cancelled(
                    "batch cancelled before scan; staged file removed".to_string(),
                ),
                Err(cleanup) => cleanup,
            };
            return ScanResult::from_error(source.clone(), Some(artifact.path), &err);
        }

        tracker.advance(ArtifactState::Scanning);
        let verdict = self.scanner.scan_file(&artifact.path).await;
        tracker.advance(if verdict.is_definite() {
            ArtifactState::Scanned
        } else {
            ArtifactState::ScanError
        });

        let cleanup = self.release(&artifact.path).await;

        let err = match verdict {
            Verdict::Clean | Verdict::Infected(_) => {
                return match cleanup {
                    Ok(()) => {
                        tracker.advance(ArtifactState::Cleaned);
                        ScanResult::from_verdict(source.clone(), artifact.path, verdict)
                    }
                    Err(cleanup) => {
                        tracker.advance(ArtifactState::CleanupWarning);
                        tracing::warn!(
                            path = %artifact.path.display(),
                            error = %cleanup,
                            "Scan verdict kept but staged file could not be removed"
                        );
                        ScanResult::cleanup_warning(source.clone(), artifact.path, verdict, &cleanup)
                    }
                };
            }
            Verdict::ScannerUnavailable => {
                ArtifactError::ScannerUnavailable("ClamAV daemon could not be reached".to_string())
            }
            Verdict::ScanError(message) => ArtifactError::ScanFailed(message),
        };
        log_artifact_error(source, &err);

        let mut result = ScanResult::from_error(source.clone(), Some(artifact.path), &err);
        if let Err(cleanup) = cleanup {
            result.details = format!("{}; {}", result.details, cleanup);
        }
        result
    }

    /// Fetch into `path` and confirm the file is really there
    async fn fetch(
        &self,
        fetcher: &dyn SourceFetcher,
        source: &SourceDescriptor,
        path: &Path,
    ) -> Result<StagedArtifact, ArtifactError> {
        let outcome = fetcher.fetch(source, path).await?;
        let size_bytes = verify_staged(path, self.verify).await?;

        tracing::debug!(
            path = %path.display(),
            size_bytes,
            file_name = outcome.file_name.as_deref().unwrap_or(""),
            "Artifact staged"
        );

        Ok(StagedArtifact {
            path: PathBuf::from(path),
            origin: source.clone(),
            size_bytes,
            created_at: Utc::now(),
        })
    }

    async fn release(&self, path: &Path) -> Result<(), ArtifactError> {
        self.store.release(path).await.map_err(ArtifactError::from)
    }
}

fn log_artifact_error(source: &SourceDescriptor, err: &ArtifactError) {
    match err.log_level() {
        muhtasib_core::LogLevel::Debug => {
            tracing::debug!(source = %source, error_code = err.error_code(), error = %err, "Artifact failed")
        }
        muhtasib_core::LogLevel::Warn => {
            tracing::warn!(source = %source, error_code = err.error_code(), error = %err, "Artifact failed")
        }
        muhtasib_core::LogLevel::Error => {
            tracing::error!(source = %source, error_code = err.error_code(), error = %err, "Artifact failed")
        }
    }
}
