//! Core types for the agent SDK
//!
//! This module provides the fundamental types used throughout the crate:
//! - `SdkConfig` - Explicit configuration passed to constructors
//! - `RunState` - State machine of a runner invocation
//! - `SdkError` - Error types

pub mod config;
pub mod error;
pub mod state;

pub use config::SdkConfig;
pub use error::{SdkError, SdkResult};
pub use state::RunState;
