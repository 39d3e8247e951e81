//! # FHIRGuard Common Library
//!
//! Shared code for the FHIRGuard services:
//! - Error type shared by storage and configuration code
//! - Event types (`FhgEvent`) and the broadcast `EventBus`
//! - Task vocabulary (stages, outcomes, statuses, pipeline states)
//! - Bootstrap configuration loading
//! - SSE helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
