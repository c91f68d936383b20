//! Shared types, traits and error hierarchy for mcpilot.

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;
pub mod util;

pub use error::{ApiError, ConfigError};
pub use message::*;
pub use tool::*;
pub use util::{strip_reasoning, truncate_str};
