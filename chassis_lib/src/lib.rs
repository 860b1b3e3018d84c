//! # Chassis Library
//!
//! Shared types and utilities for the wheeled chassis control system.
//! Used by the web bridge and by anything else that speaks the chassis
//! broker protocol.

pub mod types;
pub mod utils;

// Re-export everything for convenience
pub use types::*;
pub use utils::*;
