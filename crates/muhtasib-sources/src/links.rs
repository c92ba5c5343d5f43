//! Turning raw user input into source descriptors.
//!
//! Webmail links carry the message reference in provider-specific places:
//!
//! - Gmail: `th` (hex message/thread id) or `permmsgid=msg-f:<decimal>`, plus an
//!   optional `attid` part id
//! - Outlook: `ItemID` query parameter or an `/id/<token>` path segment, plus an
//!   optional `AttachmentId`
//!
//! Anything else is a direct URL. A webmail link without a usable message token also
//! stays a direct URL so the direct fetcher rejects it with a pointer to the provider
//! path instead of silently dropping it.

use muhtasib_core::constants::{GMAIL_UI_HOSTS, OUTLOOK_UI_HOSTS};
use muhtasib_core::SourceDescriptor;
use reqwest::Url;

fn host_matches(host: &str, hosts: &[&str]) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    hosts
        .iter()
        .any(|h| host == *h || host.ends_with(&format!(".{}", h)))
}

fn query_value(url: &Url, keys: &[&str]) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| keys.iter().any(|key| k.eq_ignore_ascii_case(key)))
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `msg-f:1780000000000000000` → Gmail API id (lowercase hex)
fn permmsgid_to_message_id(raw: &str) -> Option<String> {
    let token = raw
        .strip_prefix("msg-f:")
        .or_else(|| raw.strip_prefix("msg-a:"))
        .unwrap_or(raw)
        .trim();
    if token.is_empty() {
        return None;
    }
    match token.parse::<u64>() {
        Ok(decimal) => Some(format!("{:x}", decimal)),
        Err(_) => Some(token.to_string()),
    }
}

fn parse_gmail(url: &Url) -> Option<SourceDescriptor> {
    let message_id = query_value(url, &["th"])
        .or_else(|| query_value(url, &["permmsgid"]).and_then(|p| permmsgid_to_message_id(&p)))?;
    Some(SourceDescriptor::gmail(message_id, query_value(url, &["attid"])))
}

fn parse_outlook(url: &Url) -> Option<SourceDescriptor> {
    let from_path = || {
        let segments: Vec<&str> = url.path_segments()?.collect();
        let pos = segments.iter().position(|s| s.eq_ignore_ascii_case("id"))?;
        let token = segments.get(pos + 1)?;
        urlencoding::decode(token)
            .ok()
            .map(|t| t.into_owned())
            .filter(|t| !t.is_empty())
    };

    let message_id = query_value(url, &["ItemID"]).or_else(from_path)?;
    Some(SourceDescriptor::outlook(
        message_id,
        query_value(url, &["AttachmentId"]),
    ))
}

/// Classify one user-supplied link
pub fn parse_source(input: &str) -> SourceDescriptor {
    let input = input.trim();
    let Ok(url) = Url::parse(input) else {
        return SourceDescriptor::direct_url(input);
    };

    let parsed = match url.host_str() {
        Some(host) if host_matches(host, GMAIL_UI_HOSTS) => parse_gmail(&url),
        Some(host) if host_matches(host, OUTLOOK_UI_HOSTS) => parse_outlook(&url),
        _ => None,
    };

    parsed.unwrap_or_else(|| SourceDescriptor::direct_url(input))
}

/// Split comma- or newline-separated input, dropping empty entries
pub fn split_inputs(text: &str) -> Vec<String> {
    text.split(|c: char| c == ',' || c == '\n' || c == '\r')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// File-name hint for staging, taken from a direct URL's last path segment
pub fn suffix_hint(source: &SourceDescriptor) -> Option<String> {
    match source {
        SourceDescriptor::DirectUrl { url } => Url::parse(url.trim())
            .ok()?
            .path_segments()?
            .last()
            .filter(|s| !s.is_empty())
            .map(|s| {
                urlencoding::decode(s)
                    .map(|d| d.into_owned())
                    .unwrap_or_else(|_| s.to_string())
            }),
        SourceDescriptor::Gmail { .. } | SourceDescriptor::Outlook { .. } => None,
    }
}
