//! Core application layer
//!
//! Shared building blocks used by every other module:
//! - Error handling and type system
//! - Consumer identities
//! - Configuration management and CLI arguments
//! - Structured logging system
//! - User notifications

pub mod config;
pub mod consumer;
pub mod error;
pub mod logging;
pub mod notify;

pub use config::{CliArgs, Command, Config};
pub use consumer::ConsumerId;
pub use error::{ErrorContext, FetchFailure, PatchworkError, Result};
pub use logging::Logger;
pub use notify::{LogNotifier, Notifier};
