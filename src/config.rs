//! Configuration types for Vellum.
//!
//! The [`Config`] struct controls engine-level behavior of an open
//! database. All fields have sensible defaults; use struct update syntax
//! to override specific settings:
//!
//! ```rust
//! use std::time::Duration;
//! use vellum::Config;
//!
//! let config = Config {
//!     busy_timeout: Duration::from_secs(30),
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use crate::error::VellumError;

/// Default bound on waits for the engine's internal lock.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Database configuration options.
#[derive(Clone, Debug)]
pub struct Config {
    /// How long a statement may busy-wait on the engine's internal lock
    /// before reporting an error. There are no implicit retries above
    /// this bound.
    ///
    /// Default: 10 seconds.
    pub busy_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl Config {
    /// Creates a new Config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the configuration.
    ///
    /// Called automatically by `Vellum::open()`.
    ///
    /// # Errors
    /// Returns a bad-request error if `busy_timeout` is zero.
    pub fn validate(&self) -> Result<(), VellumError> {
        if self.busy_timeout.is_zero() {
            return Err(VellumError::bad_request(
                "busy_timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}
