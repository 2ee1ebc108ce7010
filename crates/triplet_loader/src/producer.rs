//! src/producer.rs
//!
//! Background producer bound to one source queue.
//!
//! Each source owns exactly one producer thread. The thread runs the assembler
//! `batch_count` times and pushes every result into the source's bounded
//! queue, blocking while the queue is full.
//!
//! # Lifecycle
//! `Idle -> Running -> Terminated`, with no way back. A producer terminates when
//! - all `batch_count` batches have been enqueued,
//! - an iteration fails (the error is enqueued first, then the thread stops),
//! - its source is closed (shutdown flag set or queue receiver dropped).
//!
//! Dropping the sender on exit disconnects the queue, which is how consumers
//! tell a finished source from a slow one.

use crossbeam_channel::{SendTimeoutError, Sender};
use rand::rngs::StdRng;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, info_span};

use crate::assembler::BatchAssembler;
use crate::batch::Batch;
use crate::error::{LoaderError, Result};

/// What travels through a source queue.
pub(crate) type BatchResult = Result<Batch>;

/// Observable lifecycle of a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    /// Spawned, first iteration not started yet
    Idle,
    /// Producing or blocked on a full queue
    Running,
    /// Finished, failed or closed; never restarts
    Terminated,
}

impl ProducerState {
    fn as_u8(self) -> u8 {
        match self {
            ProducerState::Idle => 0,
            ProducerState::Running => 1,
            ProducerState::Terminated => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ProducerState::Idle,
            1 => ProducerState::Running,
            _ => ProducerState::Terminated,
        }
    }
}

/// Handle to a running producer thread.
///
/// Dropping the handle signals shutdown and joins the thread.
pub(crate) struct Producer {
    name: String,
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
}

impl Producer {
    /// Spawns the producer thread for source `name`.
    pub(crate) fn spawn(
        name: &str,
        assembler: BatchAssembler,
        batch_count: usize,
        rng: StdRng,
        output_tx: Sender<BatchResult>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let state = Arc::new(AtomicU8::new(ProducerState::Idle.as_u8()));

        let producer_loop = ProducerLoop {
            name: name.to_string(),
            assembler,
            batch_count,
            rng,
            output_tx,
            poll_interval,
            shutdown: shutdown.clone(),
            state: state.clone(),
        };

        let handle = thread::Builder::new()
            .name(format!("triplet-producer-{}", name))
            .spawn(move || producer_loop.run())
            .map_err(|source| LoaderError::Spawn {
                name: name.to_string(),
                source,
            })?;

        Ok(Self {
            name: name.to_string(),
            handle: Some(handle),
            shutdown,
            state,
        })
    }

    pub(crate) fn state(&self) -> ProducerState {
        ProducerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Signals shutdown and waits for the thread to exit.
    ///
    /// A producer in the middle of assembling a batch finishes that batch
    /// first; one blocked on a full queue notices within one poll interval.
    pub(crate) fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(source = %self.name, "Producer thread panicked");
            }
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State moved into the producer thread.
struct ProducerLoop {
    name: String,
    assembler: BatchAssembler,
    batch_count: usize,
    rng: StdRng,
    output_tx: Sender<BatchResult>,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
}

/// Marks the producer terminated however the thread exits, panics included.
struct TerminateOnExit(Arc<AtomicU8>);

impl Drop for TerminateOnExit {
    fn drop(&mut self) {
        self.0
            .store(ProducerState::Terminated.as_u8(), Ordering::Release);
    }
}

impl ProducerLoop {
    fn run(mut self) {
        let _terminated = TerminateOnExit(self.state.clone());
        let _span = info_span!("producer", source = %self.name).entered();
        self.state
            .store(ProducerState::Running.as_u8(), Ordering::Release);

        let mut produced = 0;
        for iteration in 0..self.batch_count {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            let result = self.assembler.load_batch(&mut self.rng);
            let failed = result.is_err();
            match &result {
                Ok(batch) => debug!(
                    batch = iteration,
                    num_skilled = batch.num_skilled(),
                    device = %batch.device(),
                    "Assembled batch"
                ),
                Err(e) => error!(batch = iteration, error = %e, "Batch assembly failed, stopping producer"),
            }

            if !self.send(result) {
                break;
            }
            if failed {
                break;
            }
            produced += 1;
        }

        info!(
            produced,
            scheduled = self.batch_count,
            "Producer terminated"
        );
    }

    /// Blocking enqueue that still honours shutdown.
    ///
    /// Returns `false` when the source was closed before the item got in.
    fn send(&self, mut item: BatchResult) -> bool {
        if self.shutdown.load(Ordering::Acquire) {
            return false;
        }
        loop {
            match self.output_tx.send_timeout(item, self.poll_interval) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(returned)) => {
                    if self.shutdown.load(Ordering::Acquire) {
                        return false;
                    }
                    item = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}
