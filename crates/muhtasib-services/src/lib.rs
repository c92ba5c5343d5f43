//! Muhtasib Services Library
//!
//! Clients for the external services the analyzer depends on:
//! - ClamAV scan daemon (`clamd`) behind the [`ScanDaemon`] trait
//! - Link reputation: redirect expansion and VirusTotal URL reports

pub mod services;

#[cfg(any(test, feature = "test-util"))]
pub mod test_helpers;

pub use services::clamav::{DaemonError, DaemonReply, ScanDaemon, ScanDaemonClient};

#[cfg(feature = "clamav")]
pub use services::clamav::{ClamdDaemon, DaemonEndpoint};

#[cfg(feature = "link-check")]
pub use services::links::{LinkCheckError, RedirectChain, RedirectResolver, UrlReputation, VirusTotalClient};
