pub mod backoff;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod fsutil;
pub mod gates;
pub mod metrics;
pub mod pr;
pub mod sandbox;
pub mod services;
pub mod state;
pub mod workflow;

pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use crate::config::Config;
pub use crate::coordinator::Coordinator;
pub use crate::error::{ClassifiedError, ErrorClass, ResultExt};
pub use crate::metrics::RunMetrics;
pub use crate::state::ProcessedSet;
