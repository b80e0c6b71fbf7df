//! Configuration for the ESA load shield.
//!
//! The configuration is a small JSON document, loaded once at startup and
//! then handed by reference to everything that needs it.

#![warn(missing_docs)]
mod shield_config;

pub use shield_config::{
    Config, ConfigError, DEFAULT_ENDPOINT, DEFAULT_RECORD_FILE, DEFAULT_REQUEST_TIMEOUT_SECONDS,
    DEFAULT_WINDOW_MINUTES, REQUIRED_FIELDS,
};
