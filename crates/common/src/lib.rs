//! Common utilities and types shared across the CAS crates.

#![warn(clippy::pedantic)]

/// Module for shared backend and logging configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for masking ticket ids and secret values in log output
pub mod sanitize;
