//! Request plumbing shared by the fetchers

use std::time::Duration;

use muhtasib_core::{ArtifactError, FetchStage};
use reqwest::{RequestBuilder, Url};
use serde::de::DeserializeOwned;

use crate::error::SourceError;

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, SourceError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// `base` with `segments` appended, each percent-encoded as one path segment
pub(crate) fn api_url(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

pub(crate) fn parse_base_url(raw: &str) -> Result<Url, SourceError> {
    let url = Url::parse(raw.trim_end_matches('/'))
        .map_err(|_| SourceError::InvalidBaseUrl(raw.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(SourceError::InvalidBaseUrl(raw.to_string()));
    }
    Ok(url)
}

pub(crate) fn transport_error(stage: FetchStage, what: &str, err: reqwest::Error) -> ArtifactError {
    let reason = if err.is_timeout() {
        format!("{} timed out", what)
    } else if err.is_connect() {
        format!("{} could not connect: {}", what, err)
    } else {
        format!("{} failed: {}", what, err)
    };
    ArtifactError::fetch(stage, reason)
}

/// Send `request` and return the response, mapping transport errors and non-2xx
/// statuses to a fetch failure at `stage`
pub(crate) async fn send(
    request: RequestBuilder,
    stage: FetchStage,
    what: &str,
) -> Result<reqwest::Response, ArtifactError> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(stage, what, e))?;

    let status = response.status();
    if !status.is_success() {
        let reason = if status == reqwest::StatusCode::NOT_FOUND {
            format!("{} not found (HTTP {})", what, status.as_u16())
        } else {
            format!("{} returned HTTP {}", what, status.as_u16())
        };
        return Err(ArtifactError::fetch(stage, reason));
    }
    Ok(response)
}

pub(crate) async fn get_json<T: DeserializeOwned>(
    request: RequestBuilder,
    stage: FetchStage,
    what: &str,
) -> Result<T, ArtifactError> {
    let response = send(request, stage, what).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| ArtifactError::fetch(stage, format!("{} returned an invalid response: {}", what, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_encodes_segments() {
        let base = parse_base_url("https://graph.example.com/").unwrap();
        let url = api_url(&base, &["v1.0", "me", "messages", "AAMk/abc+="]);
        assert_eq!(
            url.as_str(),
            "https://graph.example.com/v1.0/me/messages/AAMk%2Fabc+="
        );
    }

    #[test]
    fn api_url_keeps_base_path() {
        let base = parse_base_url("http://127.0.0.1:9000/proxy").unwrap();
        let url = api_url(&base, &["gmail", "v1"]);
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/proxy/gmail/v1");
    }

    #[test]
    fn bad_base_url_rejected() {
        assert!(parse_base_url("not a url").is_err());
        assert!(parse_base_url("mailto:x@y.z").is_err());
    }
}
