//! Offline-first emergency contact sync core.
//!
//! Models, merge rules and the sync orchestrator. Storage and the remote
//! contact service are injected through the traits in [`contacts`].

pub mod contacts;
pub mod errors;
pub mod secrets;
pub mod sync;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use errors::{Error, Result};
