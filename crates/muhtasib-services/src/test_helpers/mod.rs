//! Test helpers for scanner tests
//!
//! [`FakeDaemon`] stands in for the whole daemon behind the [`crate::ScanDaemon`] trait;
//! [`FakeClamd`] is a real TCP listener speaking enough of the clamd protocol to
//! exercise the wire client.

pub mod fake_clamd;
pub mod mock_daemon;

pub use fake_clamd::FakeClamd;
pub use mock_daemon::{FakeBehavior, FakeDaemon, ScanHook};
