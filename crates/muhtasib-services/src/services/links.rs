//! Link reputation: redirect expansion and VirusTotal URL reports

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const MAX_REDIRECTS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum LinkCheckError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("VirusTotal API key is not configured")]
    MissingApiKey,

    #[error("VirusTotal request failed with status {status}: {body}")]
    Api { status: u16, body: String },
}

/// Hops followed while expanding a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectChain {
    /// Every URL visited, starting with the input
    pub hops: Vec<String>,
    /// Last URL reached. `None` when the chain was cut off.
    pub final_url: Option<String>,
    /// More redirects than [`MAX_REDIRECTS`]; treated as suspicious
    pub too_many_redirects: bool,
}

impl RedirectChain {
    pub fn redirected(&self) -> bool {
        self.hops.len() > 1
    }
}

/// Follows redirects one HEAD request at a time so each hop is visible
pub struct RedirectResolver {
    client: reqwest::Client,
    max_redirects: usize,
}

impl RedirectResolver {
    pub fn new(timeout: Duration) -> Result<Self, LinkCheckError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            max_redirects: MAX_REDIRECTS,
        })
    }

    pub fn with_max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    pub async fn expand(&self, url: &str) -> Result<RedirectChain, LinkCheckError> {
        let mut current =
            reqwest::Url::parse(url.trim()).map_err(|e| LinkCheckError::InvalidUrl(e.to_string()))?;
        let mut hops = vec![current.to_string()];

        loop {
            let response = self.client.head(current.clone()).send().await?;
            if !response.status().is_redirection() {
                break;
            }

            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok());
            let Some(location) = location else { break };

            let next = current
                .join(location)
                .map_err(|e| LinkCheckError::InvalidUrl(format!("{}: {}", location, e)))?;

            if hops.len() > self.max_redirects {
                tracing::warn!(
                    url = %url,
                    redirects = hops.len() - 1,
                    "URL has too many redirects and could be suspicious"
                );
                return Ok(RedirectChain {
                    hops,
                    final_url: None,
                    too_many_redirects: true,
                });
            }

            hops.push(next.to_string());
            current = next;
        }

        if hops.len() > 1 {
            tracing::info!(url = %url, hops = ?hops, final_url = %current, "Redirects found");
        } else {
            tracing::info!(url = %url, "No redirections found");
        }

        Ok(RedirectChain {
            hops,
            final_url: Some(current.to_string()),
            too_many_redirects: false,
        })
    }
}

/// VirusTotal's opinion of a URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UrlReputation {
    Malicious { positives: u32, total: u32 },
    Clean { total: u32 },
    /// Not in the VirusTotal database
    Unknown,
}

impl UrlReputation {
    pub fn describe(&self) -> String {
        match self {
            UrlReputation::Malicious { positives, total } => format!(
                "Malicious URL detected! {} of {} engines flagged this URL.",
                positives, total
            ),
            UrlReputation::Clean { .. } => "URL is clean according to VirusTotal.".to_string(),
            UrlReputation::Unknown => "URL not found in VirusTotal's database.".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UrlReportResponse {
    response_code: i32,
    #[serde(default)]
    positives: u32,
    #[serde(default)]
    total: u32,
}

pub struct VirusTotalClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for VirusTotalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirusTotalClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl VirusTotalClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LinkCheckError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LinkCheckError::MissingApiKey);
        }
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(config: &muhtasib_core::Config) -> Result<Self, LinkCheckError> {
        let key = config
            .virustotal_api_key
            .clone()
            .ok_or(LinkCheckError::MissingApiKey)?;
        Self::new(
            config.virustotal_base_url.clone(),
            key,
            Duration::from_secs(config.fetch_timeout_secs),
        )
    }

    pub async fn url_report(&self, url: &str) -> Result<UrlReputation, LinkCheckError> {
        tracing::info!(url = %url, "Checking URL reputation");

        let response = self
            .http_client
            .get(format!("{}/vtapi/v2/url/report", self.base_url))
            .query(&[("apikey", self.api_key.as_str()), ("resource", url)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LinkCheckError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let report: UrlReportResponse = response.json().await?;
        tracing::debug!(
            url = %url,
            response_code = report.response_code,
            positives = report.positives,
            total = report.total,
            "VirusTotal response"
        );

        Ok(match report.response_code {
            1 if report.positives > 0 => UrlReputation::Malicious {
                positives: report.positives,
                total: report.total,
            },
            1 => UrlReputation::Clean {
                total: report.total,
            },
            _ => UrlReputation::Unknown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> RedirectResolver {
        RedirectResolver::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn expand_follows_relative_and_absolute_redirects() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();

        let _a = server
            .mock("HEAD", "/short")
            .with_status(301)
            .with_header("location", "/middle")
            .create_async()
            .await;
        let _b = server
            .mock("HEAD", "/middle")
            .with_status(302)
            .with_header("location", &format!("{}/final", base))
            .create_async()
            .await;
        let _c = server
            .mock("HEAD", "/final")
            .with_status(200)
            .create_async()
            .await;

        let chain = resolver().expand(&format!("{}/short", base)).await.unwrap();
        assert!(chain.redirected());
        assert!(!chain.too_many_redirects);
        assert_eq!(chain.hops.len(), 3);
        assert_eq!(chain.final_url.as_deref(), Some(format!("{}/final", base).as_str()));
    }

    #[tokio::test]
    async fn expand_without_redirect() {
        let mut server = mockito::Server::new_async().await;
        let _m = server.mock("HEAD", "/page").with_status(200).create_async().await;

        let chain = resolver().expand(&format!("{}/page", server.url())).await.unwrap();
        assert!(!chain.redirected());
        assert_eq!(chain.final_url, Some(format!("{}/page", server.url())));
    }

    #[tokio::test]
    async fn redirect_loop_is_flagged() {
        let mut server = mockito::Server::new_async().await;
        let _loop = server
            .mock("HEAD", "/loop")
            .with_status(302)
            .with_header("location", "/loop")
            .expect_at_least(1)
            .create_async()
            .await;

        let chain = resolver()
            .with_max_redirects(3)
            .expand(&format!("{}/loop", server.url()))
            .await
            .unwrap();
        assert!(chain.too_many_redirects);
        assert!(chain.final_url.is_none());
        assert_eq!(chain.hops.len(), 4);
    }

    #[tokio::test]
    async fn invalid_url_rejected() {
        let err = resolver().expand("not a url").await.unwrap_err();
        assert!(matches!(err, LinkCheckError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn url_report_maps_response_codes() {
        let mut server = mockito::Server::new_async().await;
        let _bad = server
            .mock("GET", "/vtapi/v2/url/report")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("apikey".into(), "k".into()),
                mockito::Matcher::UrlEncoded("resource".into(), "http://bad.test/".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"response_code":1,"positives":7,"total":90}"#)
            .create_async()
            .await;
        let _good = server
            .mock("GET", "/vtapi/v2/url/report")
            .match_query(mockito::Matcher::UrlEncoded(
                "resource".into(),
                "http://good.test/".into(),
            ))
            .with_status(200)
            .with_body(r#"{"response_code":1,"positives":0,"total":90}"#)
            .create_async()
            .await;
        let _unknown = server
            .mock("GET", "/vtapi/v2/url/report")
            .match_query(mockito::Matcher::UrlEncoded(
                "resource".into(),
                "http://new.test/".into(),
            ))
            .with_status(200)
            .with_body(r#"{"response_code":0,"verbose_msg":"not found"}"#)
            .create_async()
            .await;

        let client = VirusTotalClient::new(server.url(), "k", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.url_report("http://bad.test/").await.unwrap(),
            UrlReputation::Malicious {
                positives: 7,
                total: 90
            }
        );
        assert_eq!(
            client.url_report("http://good.test/").await.unwrap(),
            UrlReputation::Clean { total: 90 }
        );
        assert_eq!(
            client.url_report("http://new.test/").await.unwrap(),
            UrlReputation::Unknown
        );
    }

    #[tokio::test]
    async fn url_report_surfaces_api_errors() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/vtapi/v2/url/report")
            .match_query(mockito::Matcher::Any)
            .with_status(403)
            .with_body("Forbidden")
            .create_async()
            .await;

        let client = VirusTotalClient::new(server.url(), "k", Duration::from_secs(5)).unwrap();
        match client.url_report("http://x.test/").await.unwrap_err() {
            LinkCheckError::Api { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "Forbidden");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_api_key_rejected() {
        assert!(matches!(
            VirusTotalClient::new("https://vt.test", " ", Duration::from_secs(1)),
            Err(LinkCheckError::MissingApiKey)
        ));
    }
}
