use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use muhtasib_core::{ArtifactError, Config, Provider, SourceDescriptor};

use crate::direct::DirectUrlFetcher;
use crate::error::SourceError;
use crate::gmail::{GmailClient, GmailFetcher};
use crate::outlook::{OutlookClient, OutlookFetcher};
use crate::token::StaticToken;

/// Result of a successful fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub bytes_written: u64,
    /// Original file name, when the source reveals one
    pub file_name: Option<String>,
}

/// Resolve a descriptor into bytes written at `dest`.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Batch-level setup, run once before any artifact is fetched.
    ///
    /// Errors here (e.g. no bearer token) abort the batch.
    async fn prepare(&self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn fetch(
        &self,
        source: &SourceDescriptor,
        dest: &Path,
    ) -> Result<FetchOutcome, ArtifactError>;
}

/// One fetcher per descriptor kind
#[derive(Clone, Default)]
pub struct Fetchers {
    direct: Option<Arc<dyn SourceFetcher>>,
    gmail: Option<Arc<dyn SourceFetcher>>,
    outlook: Option<Arc<dyn SourceFetcher>>,
}

impl Fetchers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_direct(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.direct = Some(fetcher);
        self
    }

    pub fn with_provider(mut self, provider: Provider, fetcher: Arc<dyn SourceFetcher>) -> Self {
        match provider {
            Provider::Gmail => self.gmail = Some(fetcher),
            Provider::Outlook => self.outlook = Some(fetcher),
        }
        self
    }

    /// Direct URLs always; a provider only when its token is configured
    pub fn from_config(config: &Config) -> Result<Self, SourceError> {
        let timeout = Duration::from_secs(config.fetch_timeout_secs);
        let mut fetchers = Self::new().with_direct(Arc::new(DirectUrlFetcher::new(timeout)?));

        if let Some(token) = &config.gmail_access_token {
            let client = GmailClient::new(
                &config.gmail_api_base_url,
                Arc::new(StaticToken::new(token.clone())),
                timeout,
            )?;
            fetchers = fetchers.with_provider(Provider::Gmail, Arc::new(GmailFetcher::new(client)));
        }

        if let Some(token) = &config.outlook_access_token {
            let client = OutlookClient::new(
                &config.graph_api_base_url,
                Arc::new(StaticToken::new(token.clone())),
                timeout,
            )?;
            fetchers =
                fetchers.with_provider(Provider::Outlook, Arc::new(OutlookFetcher::new(client)));
        }

        Ok(fetchers)
    }

    pub fn for_source(&self, source: &SourceDescriptor) -> Option<&Arc<dyn SourceFetcher>> {
        match source {
            SourceDescriptor::DirectUrl { .. } => self.direct.as_ref(),
            SourceDescriptor::Gmail { .. } => self.gmail.as_ref(),
            SourceDescriptor::Outlook { .. } => self.outlook.as_ref(),
        }
    }
}

impl std::fmt::Debug for Fetchers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetchers")
            .field("direct", &self.direct.as_ref().map(|x| x.name()))
            .field("gmail", &self.gmail.as_ref().map(|x| x.name()))
            .field("outlook", &self.outlook.as_ref().map(|x| x.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_registers_only_configured_providers() {
        let config = Config {
            outlook_access_token: Some("tok".to_string()),
            ..Config::default()
        };
        let fetchers = Fetchers::from_config(&config).unwrap();

        let direct = SourceDescriptor::direct_url("https://example.com/a.pdf");
        let gmail = SourceDescriptor::gmail("m1", None);
        let outlook = SourceDescriptor::outlook("m1", None);

        assert_eq!(fetchers.for_source(&direct).map(|f| f.name()), Some("direct_url"));
        assert!(fetchers.for_source(&gmail).is_none());
        assert_eq!(fetchers.for_source(&outlook).map(|f| f.name()), Some("outlook"));
    }
}
