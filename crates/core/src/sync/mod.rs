//! Contact sync orchestration, scheduling and status.

mod contact_sync_scheduler;
mod contact_sync_service;
mod retry_policy;
mod status_publisher;
mod sync_state_model;
mod write_coalescer;

pub use contact_sync_scheduler::*;
pub use contact_sync_service::*;
pub use retry_policy::*;
pub use status_publisher::*;
pub use sync_state_model::*;
pub use write_coalescer::*;
