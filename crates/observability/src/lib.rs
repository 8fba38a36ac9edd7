//! # keyhub-observability
//!
//! Gemeinsames Logging-Setup fuer Relay und Chat-Client.

pub mod logging;

pub use logging::{log_level_gueltig, logging_initialisieren, ENV_LOG_FORMAT, ENV_LOG_LEVEL};
