use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use muhtasib_core::constants::{is_webmail_ui_host, GMAIL_UI_HOSTS};
use muhtasib_core::{ArtifactError, FetchStage, SourceDescriptor};
use muhtasib_storage::write_atomic;
use reqwest::Url;

use crate::error::SourceError;
use crate::fetcher::{FetchOutcome, SourceFetcher};
use crate::http;

/// Plain HTTP(S) download
pub struct DirectUrlFetcher {
    client: reqwest::Client,
}

impl DirectUrlFetcher {
    pub fn new(timeout: Duration) -> Result<Self, SourceError> {
        Ok(Self {
            client: http::build_client(timeout)?,
        })
    }

    /// Validate a direct URL without touching the network
    pub fn validate(url: &str) -> Result<Url, ArtifactError> {
        let trimmed = url.trim();
        let parsed = Url::parse(trimmed)
            .map_err(|e| ArtifactError::InvalidSource(format!("Invalid URL '{}': {}", trimmed, e)))?;

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ArtifactError::InvalidSource(format!(
                "Only HTTP and HTTPS URLs are supported, got '{}'",
                parsed.scheme()
            )));
        }

        let host = match parsed.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => {
                return Err(ArtifactError::InvalidSource(format!(
                    "URL '{}' has no host",
                    trimmed
                )))
            }
        };

        if is_webmail_ui_host(&host) {
            let provider = if GMAIL_UI_HOSTS
                .iter()
                .any(|ui| host.eq_ignore_ascii_case(ui) || host.ends_with(&format!(".{}", ui)))
            {
                "Gmail"
            } else {
                "Outlook"
            };
            return Err(ArtifactError::InvalidSource(format!(
                "'{}' is a {} web page, not a downloadable file; use the {} attachment \
                 source (message and attachment id) instead",
                host, provider, provider
            )));
        }

        Ok(parsed)
    }
}

/// File name from `Content-Disposition`, falling back to the last path segment
fn file_name_from(response: &reqwest::Response, url: &Url) -> Option<String> {
    let from_header = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.split(';')
                .map(str::trim)
                .find_map(|part| part.strip_prefix("filename="))
                .map(|name| name.trim_matches('"').to_string())
        })
        .filter(|name| !name.is_empty());

    from_header.or_else(|| {
        url.path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

#[async_trait]
impl SourceFetcher for DirectUrlFetcher {
    fn name(&self) -> &'static str {
        "direct_url"
    }

    async fn fetch(
        &self,
        source: &SourceDescriptor,
        dest: &Path,
    ) -> Result<FetchOutcome, ArtifactError> {
        let SourceDescriptor::DirectUrl { url } = source else {
            return Err(ArtifactError::InvalidSource(format!(
                "direct URL fetcher cannot handle {} sources",
                source.kind_name()
            )));
        };

        let parsed = Self::validate(url)?;
        let start = Instant::now();
        tracing::info!(url = %parsed, "Downloading attachment from URL");

        let response = http::send(self.client.get(parsed.clone()), FetchStage::Request, "Download")
            .await
            .map_err(|e| {
                tracing::error!(url = %parsed, error = %e, "Failed to download from URL");
                e
            })?;

        let file_name = file_name_from(&response, &parsed);
        let body = response.bytes().await.map_err(|e| {
            http::transport_error(FetchStage::Request, "Reading response body", e)
        })?;

        let bytes_written = write_atomic(dest, &body).await?;
        tracing::info!(
            url = %parsed,
            size_bytes = bytes_written,
            duration_ms = start.elapsed().as_millis(),
            "Attachment downloaded"
        );

        Ok(FetchOutcome {
            bytes_written,
            file_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> DirectUrlFetcher {
        DirectUrlFetcher::new(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn validate_accepts_plain_http_urls() {
        for url in [
            "https://example.com/file.pdf",
            "http://10.0.0.1:8080/a?b=c",
            "  https://cdn.example.org/x  ",
        ] {
            assert!(DirectUrlFetcher::validate(url).is_ok(), "{url}");
        }
    }

    #[test]
    fn validate_rejects_missing_scheme_or_host() {
        for url in ["example.com/file.pdf", "https://", "ftp://example.com/f", "file:///etc/passwd", ""] {
            assert!(
                matches!(DirectUrlFetcher::validate(url), Err(ArtifactError::InvalidSource(_))),
                "{url}"
            );
        }
    }

    #[test]
    fn validate_redirects_webmail_links_to_provider() {
        let err = DirectUrlFetcher::validate("https://mail.google.com/mail/u/0/#inbox/FMfcgz")
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Gmail attachment source"), "{msg}");

        let err = DirectUrlFetcher::validate("https://outlook.office.com/mail/id/AAQk").unwrap_err();
        assert!(err.to_string().contains("Outlook attachment source"));
    }

    #[tokio::test]
    async fn invalid_source_never_touches_the_network() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("GET", mockito::Matcher::Any).expect(0).create_async().await;
        let dir = tempfile::tempdir().unwrap();

        // Same host and port, but no scheme
        let url = server.url().replace("http://", "") + "/file.pdf";
        let err = fetcher()
            .fetch(&SourceDescriptor::direct_url(url), &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidSource(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn downloads_bytes_exactly() {
        let mut server = mockito::Server::new_async().await;
        let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let _m = server
            .mock("GET", "/files/report.pdf")
            .with_status(200)
            .with_body(payload.clone())
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("staged");
        let outcome = fetcher()
            .fetch(
                &SourceDescriptor::direct_url(format!("{}/files/report.pdf", server.url())),
                &dest,
            )
            .await
            .unwrap();

        assert_eq!(outcome.bytes_written, payload.len() as u64);
        assert_eq!(outcome.file_name.as_deref(), Some("report.pdf"));
        assert_eq!(std::fs::read(&dest).unwrap(), payload);
    }

    #[tokio::test]
    async fn content_disposition_names_the_file() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/download")
            .with_status(200)
            .with_header("content-disposition", "attachment; filename=\"invoice.docx\"")
            .with_body("doc")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let outcome = fetcher()
            .fetch(
                &SourceDescriptor::direct_url(format!("{}/download", server.url())),
                &dir.path().join("staged"),
            )
            .await
            .unwrap();
        assert_eq!(outcome.file_name.as_deref(), Some("invoice.docx"));
    }

    #[tokio::test]
    async fn http_404_is_request_stage_failure_and_leaves_nothing() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/file.pdf")
            .with_status(404)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("staged");
        let err = fetcher()
            .fetch(
                &SourceDescriptor::direct_url(format!("{}/file.pdf", server.url())),
                &dest,
            )
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(FetchStage::Request));
        assert!(err.to_string().contains("404"));
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn silent_server_times_out_as_request_failure() {
        // Accepts the connection (kernel backlog) but never answers
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/slow.bin", listener.local_addr().unwrap());

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("staged");
        let err = DirectUrlFetcher::new(Duration::from_millis(200))
            .unwrap()
            .fetch(&SourceDescriptor::direct_url(url), &dest)
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(FetchStage::Request));
        assert!(err.to_string().contains("timed out"), "{err}");
        assert!(!dest.exists());
        drop(listener);
    }

    #[tokio::test]
    async fn wrong_descriptor_kind_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = fetcher()
            .fetch(&SourceDescriptor::gmail("m", None), &dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidSource(_)));
    }
}
