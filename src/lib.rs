//! decoyd regression harness
//!
//! Drives the decoyd network decoy daemon through recorded scenarios:
//! install routes for the reserved test networks, capture the daemon's
//! link-layer traffic, inject crafted packets, and verify the capture
//! against golden trace fixtures.

pub mod capture;
pub mod common;
pub mod harness;
pub mod inject;
pub mod packet;
pub mod route;
pub mod scenario;
pub mod supervisor;
pub mod trace;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use scenario::Scenario;
