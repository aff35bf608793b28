//! Configuration for the enrollment simulation.
//!
//! Loads configuration from environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

/// Why a configuration was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value that must be positive was zero
    #[error("{name} must be greater than zero")]
    Zero {
        /// Environment variable name
        name: &'static str,
    },
}

/// Simulation configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Capacity of the simulated event
    pub capacity: u32,
    /// Number of simulated users
    pub users: usize,
    /// Number of concurrent worker tasks
    pub workers: usize,
    /// Transitions attempted by each worker
    pub rounds: usize,
    /// Log filter directive (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            capacity: 3,
            users: 12,
            workers: 4,
            rounds: 50,
            log_level: "info".to_string(),
        }
    }
}

impl SimulationConfig {
    /// Load configuration from environment variables.
    ///
    /// Missing or unparsable values fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            capacity: env::var("ENROLLMENT_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.capacity),
            users: env::var("ENROLLMENT_USERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.users),
            workers: env::var("ENROLLMENT_WORKERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.workers),
            rounds: env::var("ENROLLMENT_ROUNDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.rounds),
            log_level: env::var("RUST_LOG").unwrap_or(defaults.log_level),
        }
    }

    /// Check that the configuration can drive a simulation
    ///
    /// # Errors
    ///
    /// [`ConfigError::Zero`] for a zero capacity, user count or worker count.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Zero {
                name: "ENROLLMENT_CAPACITY",
            });
        }
        if self.users == 0 {
            return Err(ConfigError::Zero {
                name: "ENROLLMENT_USERS",
            });
        }
        if self.workers == 0 {
            return Err(ConfigError::Zero {
                name: "ENROLLMENT_WORKERS",
            });
        }
        Ok(())
    }
}
