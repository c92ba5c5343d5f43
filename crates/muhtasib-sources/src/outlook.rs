//! Microsoft Graph (Outlook) attachments
//!
//! Graph returns `contentBytes` as standard, padded base64.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use muhtasib_core::{ArtifactError, FetchStage, SourceDescriptor};
use muhtasib_storage::write_atomic;
use reqwest::Url;
use serde::Deserialize;

use crate::error::SourceError;
use crate::fetcher::{FetchOutcome, SourceFetcher};
use crate::http;
use crate::token::TokenProvider;

pub fn decode_payload(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(data.trim())
}

/// Graph `$search` rejects most punctuation; keep word characters and whitespace
pub fn sanitize_query(query: &str) -> String {
    query
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlookMessage {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub has_attachments: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    value: Vec<OutlookMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlookAttachment {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct MessageWithAttachments {
    #[serde(default)]
    attachments: Vec<OutlookAttachment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentContent {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    content_bytes: Option<String>,
}

pub struct OutlookClient {
    http: reqwest::Client,
    base: Url,
    tokens: Arc<dyn TokenProvider>,
}

impl OutlookClient {
    pub fn new(
        base_url: &str,
        tokens: Arc<dyn TokenProvider>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            http: http::build_client(timeout)?,
            base: http::parse_base_url(base_url)?,
            tokens,
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut all = vec!["v1.0", "me", "messages"];
        all.extend_from_slice(segments);
        http::api_url(&self.base, &all)
    }

    async fn token(&self, stage: FetchStage) -> Result<String, ArtifactError> {
        self.tokens
            .bearer_token()
            .await
            .map_err(|e| ArtifactError::fetch(stage, e.to_string()))
    }

    /// Messages matching a free-text search (sanitized first); all recent
    /// messages when `search` is empty
    pub async fn list_messages(&self, search: &str) -> Result<Vec<OutlookMessage>, ArtifactError> {
        let token = self.token(FetchStage::MessageLookup).await?;
        let mut request = self.http.get(self.url(&[])).bearer_auth(&token);

        let sanitized = sanitize_query(search);
        let sanitized = sanitized.trim();
        if !sanitized.is_empty() {
            request = request.query(&[("$search", format!("\"{}\"", sanitized))]);
        }

        let list: MessageList =
            http::get_json(request, FetchStage::MessageLookup, "Outlook message search").await?;

        for message in &list.value {
            tracing::debug!(
                message_id = %message.id,
                subject = message.subject.as_deref().unwrap_or(""),
                "Outlook message found"
            );
        }
        if list.value.is_empty() {
            tracing::info!(search = %sanitized, "No Outlook messages found");
        }
        Ok(list.value)
    }

    pub async fn attachments(&self, message_id: &str) -> Result<Vec<OutlookAttachment>, ArtifactError> {
        let token = self.token(FetchStage::MessageLookup).await?;
        let request = self
            .http
            .get(self.url(&[message_id]))
            .bearer_auth(&token)
            .query(&[("$expand", "attachments")]);
        let message: MessageWithAttachments =
            http::get_json(request, FetchStage::MessageLookup, "Outlook message lookup").await?;
        Ok(message.attachments)
    }

    /// Download and decode one attachment, returning its bytes and name
    pub async fn download(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<(Vec<u8>, Option<String>), ArtifactError> {
        let token = self.token(FetchStage::PayloadRetrieval).await?;
        let request = self
            .http
            .get(self.url(&[message_id, "attachments", attachment_id]))
            .bearer_auth(&token);
        let content: AttachmentContent =
            http::get_json(request, FetchStage::PayloadRetrieval, "Outlook attachment download")
                .await?;

        // Item and reference attachments carry no contentBytes
        let data = content.content_bytes.filter(|d| !d.is_empty()).ok_or_else(|| {
            ArtifactError::fetch(FetchStage::PayloadRetrieval, "No attachment data found")
        })?;

        let bytes = decode_payload(&data).map_err(|e| {
            ArtifactError::fetch(FetchStage::Decode, format!("Invalid base64 payload: {}", e))
        })?;
        Ok((bytes, content.name))
    }

    pub async fn discover(&self, search: &str) -> Result<Vec<SourceDescriptor>, ArtifactError> {
        let mut found = Vec::new();
        for message in self.list_messages(search).await? {
            if message.has_attachments == Some(false) {
                continue;
            }
            for attachment in self.attachments(&message.id).await? {
                tracing::info!(
                    message_id = %message.id,
                    file_name = attachment.name.as_deref().unwrap_or(""),
                    "Found attachment"
                );
                found.push(SourceDescriptor::outlook(
                    message.id.clone(),
                    Some(attachment.id),
                ));
            }
        }
        Ok(found)
    }
}

pub struct OutlookFetcher {
    client: OutlookClient,
}

impl OutlookFetcher {
    pub fn new(client: OutlookClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &OutlookClient {
        &self.client
    }

    async fn resolve(&self, message_id: &str) -> Result<OutlookAttachment, ArtifactError> {
        self.client
            .attachments(message_id)
            .await?
            .into_iter()
            .find(|a| !a.id.is_empty() && a.name.as_deref().is_some_and(|n| !n.is_empty()))
            .ok_or_else(|| {
                ArtifactError::fetch(
                    FetchStage::AttachmentResolution,
                    format!("Message {} has no attachments", message_id),
                )
            })
    }
}

#[async_trait]
impl SourceFetcher for OutlookFetcher {
    fn name(&self) -> &'static str {
        "outlook"
    }

    async fn prepare(&self) -> Result<(), SourceError> {
        self.client.tokens.bearer_token().await.map(|_| ())
    }

    async fn fetch(
        &self,
        source: &SourceDescriptor,
        dest: &Path,
    ) -> Result<FetchOutcome, ArtifactError> {
        let SourceDescriptor::Outlook {
            message_id,
            attachment_id,
        } = source
        else {
            return Err(ArtifactError::InvalidSource(format!(
                "Outlook fetcher cannot handle {} sources",
                source.kind_name()
            )));
        };

        let start = Instant::now();
        let (attachment_id, listed_name) = match attachment_id {
            Some(id) if !id.is_empty() => (id.clone(), None),
            _ => {
                let attachment = self.resolve(message_id).await?;
                (attachment.id, attachment.name)
            }
        };

        let (bytes, name) = self.client.download(message_id, &attachment_id).await?;
        let bytes_written = write_atomic(dest, &bytes).await?;

        tracing::info!(
            message_id = %message_id,
            size_bytes = bytes_written,
            duration_ms = start.elapsed().as_millis(),
            "Outlook attachment downloaded"
        );

        Ok(FetchOutcome {
            bytes_written,
            file_name: name.or(listed_name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::StaticToken;
    use mockito::Matcher;

    fn client(server: &mockito::Server) -> OutlookClient {
        OutlookClient::new(
            &server.url(),
            Arc::new(StaticToken::new("graph-token")),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn sanitize_strips_punctuation() {
        assert_eq!(sanitize_query("Invoice #42 (urgent)!"), "Invoice 42 urgent");
        assert_eq!(sanitize_query("from:bob@example.com"), "frombobexamplecom");
    }

    #[test]
    fn decode_is_standard_alphabet() {
        let bytes = vec![0xfb, 0xff, 0xbf, 0x00];
        assert_eq!(decode_payload(&STANDARD.encode(&bytes)).unwrap(), bytes);
        assert!(decode_payload("-_-_").is_err());
    }

    #[tokio::test]
    async fn resolves_first_attachment_and_round_trips_bytes() {
        let mut server = mockito::Server::new_async().await;
        let payload: Vec<u8> = (0..=255u8).cycle().take(777).collect();

        let _msg = server
            .mock("GET", "/v1.0/me/messages/AAMk1")
            .match_query(Matcher::UrlEncoded("$expand".into(), "attachments".into()))
            .match_header("authorization", "Bearer graph-token")
            .with_status(200)
            .with_body(
                r#"{"id": "AAMk1", "attachments": [
                    {"id": "", "name": "broken"},
                    {"id": "ATT1", "name": "payload.exe", "size": 777}
                ]}"#,
            )
            .create_async()
            .await;
        let _att = server
            .mock("GET", "/v1.0/me/messages/AAMk1/attachments/ATT1")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "@odata.type": "#microsoft.graph.fileAttachment",
                    "name": "payload.exe",
                    "contentBytes": STANDARD.encode(&payload),
                })
                .to_string(),
            )
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("staged");
        let outcome = OutlookFetcher::new(client(&server))
            .fetch(&SourceDescriptor::outlook("AAMk1", None), &dest)
            .await
            .unwrap();

        assert_eq!(outcome.bytes_written, 777);
        assert_eq!(outcome.file_name.as_deref(), Some("payload.exe"));
        assert_eq!(std::fs::read(&dest).unwrap(), payload);
    }

    #[tokio::test]
    async fn failures_report_their_stage() {
        let mut server = mockito::Server::new_async().await;
        let _none = server
            .mock("GET", "/v1.0/me/messages/EMPTY")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"id": "EMPTY", "attachments": []}"#)
            .create_async()
            .await;
        let _item = server
            .mock("GET", "/v1.0/me/messages/M/attachments/ITEM")
            .with_status(200)
            .with_body(r##"{"@odata.type": "#microsoft.graph.itemAttachment", "name": "fwd"}"##)
            .create_async()
            .await;
        let _bad = server
            .mock("GET", "/v1.0/me/messages/M/attachments/BAD")
            .with_status(200)
            .with_body(r#"{"name": "x", "contentBytes": "***"}"#)
            .create_async()
            .await;
        let _unauth = server
            .mock("GET", "/v1.0/me/messages/DENIED")
            .match_query(Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let fetcher = OutlookFetcher::new(client(&server));
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("s");
        let stage = |r: Result<FetchOutcome, ArtifactError>| r.unwrap_err().stage();

        assert_eq!(
            stage(fetcher.fetch(&SourceDescriptor::outlook("EMPTY", None), &dest).await),
            Some(FetchStage::AttachmentResolution)
        );
        assert_eq!(
            stage(fetcher.fetch(&SourceDescriptor::outlook("M", Some("ITEM".into())), &dest).await),
            Some(FetchStage::PayloadRetrieval)
        );
        assert_eq!(
            stage(fetcher.fetch(&SourceDescriptor::outlook("M", Some("BAD".into())), &dest).await),
            Some(FetchStage::Decode)
        );
        assert_eq!(
            stage(fetcher.fetch(&SourceDescriptor::outlook("DENIED", None), &dest).await),
            Some(FetchStage::MessageLookup)
        );
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn discover_sanitizes_search_and_skips_messages_without_attachments() {
        let mut server = mockito::Server::new_async().await;
        let _list = server
            .mock("GET", "/v1.0/me/messages")
            .match_query(Matcher::UrlEncoded("$search".into(), "\"Invoice 42\"".into()))
            .with_status(200)
            .with_body(
                r#"{"value": [
                    {"id": "A", "subject": "Invoice #42", "hasAttachments": true},
                    {"id": "B", "subject": "Re: Invoice #42", "hasAttachments": false}
                ]}"#,
            )
            .create_async()
            .await;
        let _a = server
            .mock("GET", "/v1.0/me/messages/A")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"attachments": [{"id": "A1", "name": "inv.pdf"}]}"#)
            .create_async()
            .await;

        let found = client(&server).discover("Invoice #42").await.unwrap();
        assert_eq!(
            found,
            vec![SourceDescriptor::outlook("A", Some("A1".to_string()))]
        );
    }
}
