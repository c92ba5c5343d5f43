//! Muhtasib Sources Library
//!
//! Turns a [`SourceDescriptor`](muhtasib_core::SourceDescriptor) into bytes on disk.
//! One [`SourceFetcher`] capability, three implementations selected by the
//! descriptor's tag:
//!
//! - [`DirectUrlFetcher`]: plain HTTP(S) GET
//! - [`GmailFetcher`]: Gmail API, URL-safe base64 payloads
//! - [`OutlookFetcher`]: Microsoft Graph, standard base64 payloads
//!
//! Fetchers write with [`muhtasib_storage::write_atomic`], so a failed fetch never
//! leaves a partial file at the destination path.

pub mod direct;
pub mod error;
pub mod fetcher;
pub mod gmail;
mod http;
pub mod links;
pub mod outlook;
pub mod token;

pub use direct::DirectUrlFetcher;
pub use error::SourceError;
pub use fetcher::{FetchOutcome, Fetchers, SourceFetcher};
pub use gmail::{GmailClient, GmailFetcher};
pub use links::{parse_source, split_inputs, suffix_hint};
pub use outlook::{OutlookClient, OutlookFetcher};
pub use token::{EnvToken, StaticToken, TokenProvider};
