pub mod command;
pub mod error;
pub mod sanitize;

pub use crate::command::{CommandGenerator, CommandGeneratorConfig, GenerationRequest};
pub use crate::error::AgentError;
pub use crate::sanitize::{parse_changes, sanitize_response};
