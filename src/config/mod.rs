//! Configuration model for leasepool.
//!
//! This module defines the Config struct that represents `<store>/config.yaml`
//! (or the file given with `--config`). It supports forward-compatible YAML
//! parsing (unknown fields are ignored), sensible defaults for optional
//! fields, and validation of config values.

mod model;
mod operations;
pub mod types;


pub use model::Config;
pub use types::{
    BackoffConfig, FulfillmentPolicy, MAX_LOCK_TIMEOUT_SECONDS, MAX_WAIT_SECONDS, StoreRetryConfig,
};
