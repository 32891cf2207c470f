//! Configuration loading and management
//!
//! Handles parsing of `libres.toml` configuration files.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::clock::{parse_duration, parse_std_duration};
use crate::error::{Error, Result};
use crate::expiry::{ClaimMode, ClaimPolicy};
use crate::reservation::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};

/// Default configuration file name
pub const CONFIG_FILE: &str = "libres.toml";

/// Longest reservation window accepted, in hours
pub const MAX_WINDOW_HOURS: i64 = 24 * 7;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Reservation subsystem
    #[serde(default)]
    pub reservations: ReservationConfig,

    /// Catalog bootstrap data
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Reservation-related configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationConfig {
    /// Number of reservation workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Requests that may wait in the queue before callers block
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long a reservation holds the book
    #[serde(default = "default_window")]
    pub window: String,

    /// Simulated claim by the reservation holder
    #[serde(default)]
    pub claim: ClaimConfig,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_window() -> String {
    "5s".to_string()
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            window: default_window(),
            claim: ClaimConfig::default(),
        }
    }
}

/// Claim simulation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimConfig {
    /// never | after | random
    #[serde(default = "default_claim_mode")]
    pub mode: String,

    /// Fixed delay used by `after`
    #[serde(default = "default_claim_after")]
    pub after: String,

    /// Upper bound used by `random`
    #[serde(default = "default_claim_max")]
    pub max: String,
}

fn default_claim_mode() -> String {
    "random".to_string()
}

fn default_claim_after() -> String {
    "2s".to_string()
}

fn default_claim_max() -> String {
    "8s".to_string()
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            mode: default_claim_mode(),
            after: default_claim_after(),
            max: default_claim_max(),
        }
    }
}

/// Books and members loaded into a fresh catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_books")]
    pub books: Vec<BookSeed>,

    #[serde(default = "default_members")]
    pub members: Vec<String>,
}

/// One seeded book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSeed {
    pub title: String,
    pub author: String,
}

impl BookSeed {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
        }
    }
}

fn default_books() -> Vec<BookSeed> {
    vec![
        BookSeed::new("Concurrency in Go", "K. Author"),
        BookSeed::new("The Go Programming Language", "A. Donovan"),
    ]
}

fn default_members() -> Vec<String> {
    vec!["Alice".to_string(), "Bob".to_string(), "Carol".to_string()]
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            books: default_books(),
            members: default_members(),
        }
    }
}

impl Config {
    /// Load configuration from a `libres.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, or return defaults
    ///
    /// A file that exists but fails to parse or validate is an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.reservations.validate()?;
        self.catalog.validate()?;
        Ok(())
    }
}

impl ReservationConfig {
    /// Reservation window as a chrono duration
    pub fn window(&self) -> Result<chrono::Duration> {
        parse_duration(&self.window)
            .map_err(|err| Error::InvalidConfig(format!("reservations.window: {err}")))
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig(
                "reservations.workers must be >= 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "reservations.queue_capacity must be >= 1".to_string(),
            ));
        }
        let window = self.window()?;
        if window <= chrono::Duration::zero() {
            return Err(Error::InvalidConfig(
                "reservations.window must be > 0".to_string(),
            ));
        }
        if window > chrono::Duration::hours(MAX_WINDOW_HOURS) {
            return Err(Error::InvalidConfig(format!(
                "reservations.window must be <= {MAX_WINDOW_HOURS}h"
            )));
        }
        self.claim.policy()?;
        Ok(())
    }
}

impl ClaimConfig {
    /// Build the claim policy this configuration describes
    pub fn policy(&self) -> Result<ClaimPolicy> {
        let mode = ClaimMode::from_str(&self.mode)
            .map_err(|err| Error::InvalidConfig(format!("reservations.claim.mode: {err}")))?;
        let policy = match mode {
            ClaimMode::Never => ClaimPolicy::Never,
            ClaimMode::After => ClaimPolicy::After(
                parse_std_duration(&self.after).map_err(|err| {
                    Error::InvalidConfig(format!("reservations.claim.after: {err}"))
                })?,
            ),
            ClaimMode::Random => ClaimPolicy::Random {
                max: parse_std_duration(&self.max).map_err(|err| {
                    Error::InvalidConfig(format!("reservations.claim.max: {err}"))
                })?,
            },
        };
        Ok(policy)
    }
}

impl CatalogConfig {
    fn validate(&self) -> Result<()> {
        for book in &self.books {
            if book.title.trim().is_empty() {
                return Err(Error::InvalidConfig(
                    "catalog.books: title cannot be empty".to_string(),
                ));
            }
        }
        if self.members.iter().any(|name| name.trim().is_empty()) {
            return Err(Error::InvalidConfig(
                "catalog.members cannot include empty names".to_string(),
            ));
        }
        Ok(())
    }
}
