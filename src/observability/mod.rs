//! # Observability
//!
//! Structured logging for strongbox. Library code only emits `tracing`
//! events and spans; installing a subscriber is left to the embedding
//! process, which can use [`init_logging`] for a ready-made one.

pub mod logging;

pub use logging::{init_logging, log_config_info};
