//! Muhtasib Processing Library
//!
//! - [`AttachmentPipeline`]: fetch → verify → scan → release for a batch of sources,
//!   one [`ScanResult`](muhtasib_core::ScanResult) per input, in input order
//! - [`headers`]: DKIM/SPF inspection of pasted mail headers

pub mod error;
pub mod headers;
pub mod pipeline;

pub use error::PipelineError;
pub use headers::{analyze_headers, DkimVerdict, HeaderReport, HeaderSet, SpfResult, SpfVerdict};
pub use pipeline::{AttachmentPipeline, ArtifactState};
