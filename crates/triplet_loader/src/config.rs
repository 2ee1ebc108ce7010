//! src/config.rs
//!
//! Configuration for a single triplet source.
//!
//! Example:
//! ```ignore
//! let config = SourceConfig::builder()
//!     .data_dir("/data/gpds")
//!     .batch_count(1000)
//!     .triplets_per_batch(32)
//!     .skilled_ratio(0.5)
//!     .personas((1..=300).collect())
//!     .seed(42)
//!     .build();
//! ```
//!
//! # Performance considerations:
//! - `triplets_per_batch`: each batch decodes `3 * triplets_per_batch` images
//! - `poll_interval`: a producer blocked on a full queue wakes up this often to
//!                    check whether its source was closed

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{LoaderError, Result};
use crate::layout::{Persona, SignatureLayout, DEFAULT_FORGERY_PREFIX, DEFAULT_GENUINE_PREFIX};

/// Capacity of every source queue, in batches.
pub const QUEUE_CAPACITY: usize = 4;

/// Placement hint attached to produced batches.
///
/// The loader itself only computes on the CPU; the hint tells the consumer
/// where the training side expects the batch to end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(id) => write!(f, "cuda:{}", id),
        }
    }
}

/// Configuration for one named source.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Root of the signature corpus
    pub data_dir: PathBuf,
    /// Number of batches the producer generates before terminating
    pub batch_count: usize,
    /// Triplets per batch (N); a batch holds 3 * N images
    pub triplets_per_batch: usize,
    /// Share of skilled-forgery triplets in `[0, 1]` (defaults to 0.5)
    pub skilled_ratio: f64,
    /// Personas triplets are drawn from
    pub personas: Vec<Persona>,
    /// Seed for the producer's RNG; random when `None`
    pub seed: Option<u64>,
    /// Placement hint; falls back to the registry's bound device when `None`
    pub device: Option<Device>,
    /// How often a producer blocked on a full queue checks for shutdown.
    /// Not an error timeout. Default: 100ms.
    pub poll_interval: Duration,
    /// File name prefix of genuine signatures (defaults to `c`)
    pub genuine_prefix: String,
    /// File name prefix of skilled forgeries (defaults to `cf`)
    pub forgery_prefix: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            batch_count: 0,
            triplets_per_batch: 0,
            skilled_ratio: 0.5,
            personas: Vec::new(),
            seed: None,
            device: None,
            poll_interval: Duration::from_millis(100),
            genuine_prefix: DEFAULT_GENUINE_PREFIX.to_string(),
            forgery_prefix: DEFAULT_FORGERY_PREFIX.to_string(),
        }
    }
}

impl SourceConfig {
    pub fn builder() -> SourceConfigBuilder {
        SourceConfigBuilder::default()
    }

    /// Number of easy and skilled triplets per batch.
    ///
    /// `num_easy = floor(N * (1 - skilled_ratio))`, the rest are skilled.
    pub fn split(&self) -> (usize, usize) {
        split_triplets(self.triplets_per_batch, self.skilled_ratio)
    }

    pub fn layout(&self) -> SignatureLayout {
        SignatureLayout::with_prefixes(
            self.data_dir.clone(),
            self.genuine_prefix.clone(),
            self.forgery_prefix.clone(),
        )
    }

    /// Checks every constraint that can be decided before a producer starts.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.skilled_ratio) {
            return Err(LoaderError::InvalidConfiguration(format!(
                "skilled_ratio must lie in [0, 1], got {}",
                self.skilled_ratio
            )));
        }

        if self.triplets_per_batch == 0 {
            return Err(LoaderError::InvalidConfiguration(
                "triplets_per_batch must be greater than 0".to_string(),
            ));
        }

        if self.personas.is_empty() {
            return Err(LoaderError::InvalidConfiguration(
                "at least one persona is required".to_string(),
            ));
        }

        let distinct: HashSet<Persona> = self.personas.iter().copied().collect();
        if distinct.len() != self.personas.len() {
            return Err(LoaderError::InvalidConfiguration(format!(
                "persona ids must be unique, {} of {} are repeats",
                self.personas.len() - distinct.len(),
                self.personas.len()
            )));
        }

        let (num_easy, _) = self.split();
        if num_easy > 0 && distinct.len() < 2 {
            return Err(LoaderError::InvalidConfiguration(format!(
                "easy triplets need two distinct personas, got {}",
                distinct.len()
            )));
        }

        if self.poll_interval.is_zero() {
            return Err(LoaderError::InvalidConfiguration(
                "poll_interval must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Splits `n` triplets into `(num_easy, num_skilled)`.
pub fn split_triplets(n: usize, skilled_ratio: f64) -> (usize, usize) {
    let num_easy = ((n as f64) * (1.0 - skilled_ratio)).floor() as usize;
    let num_easy = num_easy.min(n);
    (num_easy, n - num_easy)
}

/// Builder for SourceConfig with method chaining
#[derive(Default)]
pub struct SourceConfigBuilder {
    config: SourceConfig,
}

impl SourceConfigBuilder {
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn batch_count(mut self, count: usize) -> Self {
        self.config.batch_count = count;
        self
    }

    /// Set the number of triplets per batch (must be > 0)
    pub fn triplets_per_batch(mut self, n: usize) -> Self {
        self.config.triplets_per_batch = n;
        self
    }

    /// Set the share of skilled-forgery triplets (must lie in [0, 1])
    pub fn skilled_ratio(mut self, ratio: f64) -> Self {
        self.config.skilled_ratio = ratio;
        self
    }

    pub fn personas(mut self, personas: Vec<Persona>) -> Self {
        self.config.personas = personas;
        self
    }

    /// Set the seed of the producer's RNG.
    ///
    /// Two sources built from the same seed and personas produce the same
    /// sequence of triplets.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.config.device = Some(device);
        self
    }

    /// Set the shutdown polling interval
    ///
    /// - Too low: More responsive shutdown, higher CPU usage.
    /// - Too high: Less CPU overhead, slower shutdown response
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn prefixes(mut self, genuine: impl Into<String>, forgery: impl Into<String>) -> Self {
        self.config.genuine_prefix = genuine.into();
        self.config.forgery_prefix = forgery.into();
        self
    }

    /// Build the final configuration. Validation happens at `create_source`.
    pub fn build(self) -> SourceConfig {
        self.config
    }
}
