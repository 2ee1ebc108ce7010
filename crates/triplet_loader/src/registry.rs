//! src/registry.rs
//!
//! Named triplet sources.
//!
//! A source is a bounded queue (capacity [`QUEUE_CAPACITY`]) fed by one
//! dedicated producer thread. The registry creates sources, hands out their
//! batches in FIFO order, and tears them down again.
//!
//! ```text
//!   create_source("train")          get_batch("train")
//!          │                                ▲
//!          ▼                                │
//!   ┌──────────────┐  Result<Batch>  ┌──────────────┐
//!   │   Producer   │ ──────────────► │ bounded(4)   │
//!   │ (own thread) │   blocks when   │    queue     │
//!   └──────────────┘      full       └──────────────┘
//! ```
//!
//! # Thread safety
//! All operations take `&self`; share the registry behind an `Arc` to consume
//! from other threads. `get_batch` does not hold the registry lock while it
//! waits, so a slow source never blocks lookups of other sources.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

use crate::assembler::BatchAssembler;
use crate::batch::Batch;
use crate::config::{Device, SourceConfig, QUEUE_CAPACITY};
use crate::decoder::{GrayImageDecoder, ImageDecoder};
use crate::error::{LoaderError, Result};
use crate::producer::{BatchResult, Producer, ProducerState};

/// One registered source. Field order matters: the receiver is dropped
/// before the producer is joined, which releases a producer blocked on send.
struct Source {
    receiver: Receiver<BatchResult>,
    producer: Producer,
}

pub struct SourceRegistry {
    decoder: Arc<dyn ImageDecoder>,
    default_device: Mutex<Device>,
    sources: Mutex<HashMap<String, Source>>,
}

impl Default for SourceRegistry {
    /// Registry decoding images from disk with [`GrayImageDecoder`].
    fn default() -> Self {
        Self::new(Arc::new(GrayImageDecoder::new()))
    }
}

impl SourceRegistry {
    pub fn new(decoder: Arc<dyn ImageDecoder>) -> Self {
        Self {
            decoder,
            default_device: Mutex::new(Device::Cpu),
            sources: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the device hint for sources created from now on.
    ///
    /// Existing sources keep the device they were created with. A source whose
    /// config names a device ignores this default.
    pub fn bind_device(&self, device: Device) {
        *lock(&self.default_device) = device;
    }

    pub fn bound_device(&self) -> Device {
        *lock(&self.default_device)
    }

    /// Creates source `name` and starts its producer.
    ///
    /// If `name` is already registered, the previous source is closed (its
    /// producer stopped and joined) after the new one is in place.
    ///
    /// # Errors
    /// - `InvalidConfiguration` if `config` fails validation; nothing is spawned
    /// - `Spawn` if the producer thread cannot be created
    pub fn create_source(&self, name: impl Into<String>, config: SourceConfig) -> Result<()> {
        let name = name.into();
        let device = config.device.unwrap_or_else(|| self.bound_device());
        let assembler = BatchAssembler::new(&config, self.decoder.clone(), device)?;

        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        let (tx, rx) = bounded(QUEUE_CAPACITY);
        let producer = Producer::spawn(
            &name,
            assembler,
            config.batch_count,
            StdRng::seed_from_u64(seed),
            tx,
            config.poll_interval,
        )?;

        let (num_easy, num_skilled) = config.split();
        info!(
            source = %name,
            batch_count = config.batch_count,
            triplets_per_batch = config.triplets_per_batch,
            num_easy,
            num_skilled,
            personas = config.personas.len(),
            seed,
            device = %device,
            "Created source"
        );

        let previous = lock(&self.sources).insert(
            name.clone(),
            Source {
                receiver: rx,
                producer,
            },
        );
        if let Some(previous) = previous {
            warn!(source = %name, "Source re-registered, closing the previous producer");
            drop(previous);
        }
        Ok(())
    }

    /// Takes the next batch of `name`, blocking until one is available.
    ///
    /// Batches come out in the order they were produced.
    ///
    /// # Errors
    /// - `SourceNotFound` if `name` is not registered
    /// - the producer's own error (e.g. `Decode`) for the iteration that failed
    /// - `SourceExhausted` once the producer has terminated and the queue is empty
    pub fn get_batch(&self, name: &str) -> Result<Batch> {
        let receiver = self.receiver(name)?;
        match receiver.recv() {
            Ok(result) => result,
            Err(_) => Err(LoaderError::SourceExhausted(name.to_string())),
        }
    }

    /// Like [`get_batch`](Self::get_batch), but gives up after `timeout`.
    pub fn get_batch_timeout(&self, name: &str, timeout: Duration) -> Result<Batch> {
        let receiver = self.receiver(name)?;
        match receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(LoaderError::Timeout {
                name: name.to_string(),
                timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(LoaderError::SourceExhausted(name.to_string()))
            }
        }
    }

    /// Stops the producer of `name`, waits for it, and unregisters the source.
    ///
    /// Batches still queued are discarded. Consumers blocked in `get_batch`
    /// on this source return `SourceExhausted`.
    pub fn close_source(&self, name: &str) -> Result<()> {
        let source = lock(&self.sources)
            .remove(name)
            .ok_or_else(|| LoaderError::SourceNotFound(name.to_string()))?;

        let discarded = source.receiver.len();
        drop(source);
        info!(source = %name, discarded, "Closed source");
        Ok(())
    }

    pub fn producer_state(&self, name: &str) -> Result<ProducerState> {
        lock(&self.sources)
            .get(name)
            .map(|source| source.producer.state())
            .ok_or_else(|| LoaderError::SourceNotFound(name.to_string()))
    }

    /// Number of batches currently waiting in the queue of `name`.
    pub fn queued_batches(&self, name: &str) -> Result<usize> {
        lock(&self.sources)
            .get(name)
            .map(|source| source.receiver.len())
            .ok_or_else(|| LoaderError::SourceNotFound(name.to_string()))
    }

    /// Registered source names, sorted.
    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.sources).keys().cloned().collect();
        names.sort();
        names
    }

    fn receiver(&self, name: &str) -> Result<Receiver<BatchResult>> {
        lock(&self.sources)
            .get(name)
            .map(|source| source.receiver.clone())
            .ok_or_else(|| LoaderError::SourceNotFound(name.to_string()))
    }
}

/// Locks `mutex`, recovering the data if a panicking thread poisoned it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
