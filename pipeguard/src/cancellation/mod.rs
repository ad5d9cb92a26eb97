//! Cooperative cancellation and always-run cleanup.
//!
//! This module provides:
//! - CancellationToken for awaitable, cooperative cancellation
//! - CleanupRegistry for LIFO async cleanup during finalization

mod cleanup;
mod token;

pub use cleanup::CleanupRegistry;
pub use token::CancellationToken;
