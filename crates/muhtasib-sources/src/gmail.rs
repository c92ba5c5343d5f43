//! Gmail API attachments
//!
//! Message lookup and part listing go through `users/me/messages`; the attachment
//! body comes back as URL-safe base64, with or without padding.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use muhtasib_core::{ArtifactError, FetchStage, SourceDescriptor};
use muhtasib_storage::write_atomic;
use reqwest::Url;
use serde::Deserialize;

use crate::error::SourceError;
use crate::fetcher::{FetchOutcome, SourceFetcher};
use crate::http;
use crate::token::TokenProvider;

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &base64::alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Upper bound on result pages followed by [`GmailClient::list_messages`]
const MAX_LIST_PAGES: usize = 10;

pub fn decode_payload(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_LENIENT.decode(data.trim())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    payload: Option<MessagePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    part_id: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    body: PartBody,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartBody {
    attachment_id: Option<String>,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct AttachmentBody {
    data: Option<String>,
}

/// An attachment-bearing part of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GmailAttachment {
    pub message_id: String,
    pub attachment_id: String,
    pub part_id: String,
    pub file_name: String,
    pub size: u64,
}

fn collect_attachments(message_id: &str, part: &MessagePart, out: &mut Vec<GmailAttachment>) {
    if let Some(attachment_id) = &part.body.attachment_id {
        if !part.filename.is_empty() {
            out.push(GmailAttachment {
                message_id: message_id.to_string(),
                attachment_id: attachment_id.clone(),
                part_id: part.part_id.clone(),
                file_name: part.filename.clone(),
                size: part.body.size,
            });
        }
    }
    for child in &part.parts {
        collect_attachments(message_id, child, out);
    }
}

/// Part ids look like `0.1` or `2`; attachment ids are long opaque tokens
fn is_part_id(hint: &str) -> bool {
    !hint.is_empty() && hint.chars().all(|c| c.is_ascii_digit() || c == '.')
}

/// Gmail's web UI numbers attachments `0.1`, `0.2`, ... in display order, which is
/// not the API `partId`. Returns the zero-based position among attachment parts.
fn ui_attachment_index(hint: &str) -> Option<usize> {
    hint.strip_prefix("0.")?.parse::<usize>().ok()?.checked_sub(1)
}

pub struct GmailClient {
    http: reqwest::Client,
    base: Url,
    tokens: Arc<dyn TokenProvider>,
}

impl GmailClient {
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
        let mut all = vec!["gmail", "v1", "users", "me", "messages"];
        all.extend_from_slice(segments);
        http::api_url(&self.base, &all)
    }

    async fn token(&self, stage: FetchStage) -> Result<String, ArtifactError> {
        self.tokens
            .bearer_token()
            .await
            .map_err(|e| ArtifactError::fetch(stage, e.to_string()))
    }

    /// Ids of messages matching a Gmail search query (e.g. `has:attachment`)
    pub async fn list_messages(&self, query: &str) -> Result<Vec<String>, ArtifactError> {
        let token = self.token(FetchStage::MessageLookup).await?;
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let mut request = self
                .http
                .get(self.url(&[]))
                .bearer_auth(&token)
                .query(&[("q", query)]);
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page.as_str())]);
            }

            let list: MessageList =
                http::get_json(request, FetchStage::MessageLookup, "Gmail message search").await?;
            ids.extend(list.messages.into_iter().map(|m| m.id));

            match list.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        if ids.is_empty() {
            tracing::info!(query = %query, "No Gmail messages found with the given query");
        }
        Ok(ids)
    }

    /// Attachment parts of a message in part order
    pub async fn attachments(&self, message_id: &str) -> Result<Vec<GmailAttachment>, ArtifactError> {
        let token = self.token(FetchStage::MessageLookup).await?;
        let request = self.http.get(self.url(&[message_id])).bearer_auth(&token);
        let message: Message =
            http::get_json(request, FetchStage::MessageLookup, "Gmail message lookup").await?;

        let mut out = Vec::new();
        if let Some(payload) = &message.payload {
            collect_attachments(message_id, payload, &mut out);
        }
        Ok(out)
    }

    /// Download and decode one attachment
    pub async fn download(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>, ArtifactError> {
        let token = self.token(FetchStage::PayloadRetrieval).await?;
        let request = self
            .http
            .get(self.url(&[message_id, "attachments", attachment_id]))
            .bearer_auth(&token);
        let body: AttachmentBody =
            http::get_json(request, FetchStage::PayloadRetrieval, "Gmail attachment download").await?;

        let data = body.data.filter(|d| !d.is_empty()).ok_or_else(|| {
            ArtifactError::fetch(FetchStage::PayloadRetrieval, "Attachment has no data")
        })?;

        decode_payload(&data).map_err(|e| {
            ArtifactError::fetch(FetchStage::Decode, format!("Invalid URL-safe base64 payload: {}", e))
        })
    }

    /// One descriptor per attachment in every message matching `query`
    pub async fn discover(&self, query: &str) -> Result<Vec<SourceDescriptor>, ArtifactError> {
        let mut found = Vec::new();
        for message_id in self.list_messages(query).await? {
            for attachment in self.attachments(&message_id).await? {
                tracing::info!(
                    message_id = %message_id,
                    file_name = %attachment.file_name,
                    "Found attachment"
                );
                found.push(SourceDescriptor::gmail(
                    attachment.message_id,
                    Some(attachment.attachment_id),
                ));
            }
        }
        Ok(found)
    }
}

pub struct GmailFetcher {
    client: GmailClient,
}

impl GmailFetcher {
    pub fn new(client: GmailClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &GmailClient {
        &self.client
    }

    /// Attachment id and file name for a message, given an optional hint.
    ///
    /// An opaque attachment id is used as-is without a message lookup. A numeric hint
    /// is resolved against the message's part list: an exact `partId` match wins,
    /// otherwise a web UI `attid` of `0.N` picks the N-th attachment part. No hint
    /// takes the first attachment.
    async fn resolve(
        &self,
        message_id: &str,
        hint: Option<&str>,
    ) -> Result<(String, Option<String>), ArtifactError> {
        if let Some(id) = hint.filter(|h| !is_part_id(h)) {
            return Ok((id.to_string(), None));
        }

        let attachments = self.client.attachments(message_id).await?;
        let chosen = match hint {
            Some(part) => attachments
                .iter()
                .find(|a| a.part_id == part)
                .or_else(|| ui_attachment_index(part).and_then(|i| attachments.get(i)))
                .cloned(),
            None => attachments.into_iter().next(),
        };

        match chosen {
            Some(a) => Ok((a.attachment_id, Some(a.file_name))),
            None => Err(ArtifactError::fetch(
                FetchStage::AttachmentResolution,
                match hint {
                    Some(part) => format!("Message {} has no attachment part {}", message_id, part),
                    None => format!("Message {} has no attachments", message_id),
                },
            )),
        }
    }
}

#[async_trait]
impl SourceFetcher for GmailFetcher {
    fn name(&self) -> &'static str {
        "gmail"
    }

    async fn prepare(&self) -> Result<(), SourceError> {
        self.client.tokens.bearer_token().await.map(|_| ())
    }

    async fn fetch(
        &self,
        source: &SourceDescriptor,
        dest: &Path,
    ) -> Result<FetchOutcome, ArtifactError> {
        let SourceDescriptor::Gmail {
            message_id,
            attachment_id,
        } = source
        else {
            return Err(ArtifactError::InvalidSource(format!(
                "Gmail fetcher cannot handle {} sources",
                source.kind_name()
            )));
        };

        let start = Instant::now();
        let (attachment_id, file_name) = self.resolve(message_id, attachment_id.as_deref()).await?;
        let bytes = self.client.download(message_id, &attachment_id).await?;
        let bytes_written = write_atomic(dest, &bytes).await?;

        tracing::info!(
            message_id = %message_id,
            size_bytes = bytes_written,
            duration_ms = start.elapsed().as_millis(),
            "Gmail attachment downloaded"
        );

        Ok(FetchOutcome {
            bytes_written,
            file_name,
        })
    }
}
