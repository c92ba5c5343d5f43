//! Muhtasib Storage Library
//!
//! Local staging for fetched attachments. A [`TempStore`] owns one randomly named
//! directory per pipeline instance; every staged path is allocated inside it and the
//! whole directory is removed when the store is dropped or closed.
//!
//! # Naming
//!
//! Staged file names are random UUIDs (plus a sanitized suffix hint), so concurrent
//! fetches into the same directory never need a shared counter or lock. The chance of
//! two allocations colliding is negligible, and `allocate` still refuses a name that
//! already exists on disk.

pub mod atomic;
pub mod error;
pub mod temp_store;
pub mod verify;

pub use atomic::write_atomic;
pub use error::{StagingError, StagingResult};
pub use temp_store::TempStore;
pub use verify::{verify_staged, VerifyPolicy};
