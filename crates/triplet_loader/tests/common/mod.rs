#![allow(dead_code)]

use anyhow::{anyhow, Result};
use ndarray::Array2;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use triplet_loader::{ImageDecoder, SourceConfig};

pub const HEIGHT: usize = 5;
pub const WIDTH: usize = 7;

/// Returns the same mid-grey image for every path.
pub struct ConstantDecoder;

impl ImageDecoder for ConstantDecoder {
    fn decode(&self, _path: &Path) -> Result<Array2<u8>> {
        Ok(Array2::from_elem((HEIGHT, WIDTH), 128))
    }
}

/// Counts decode calls and fills each image with `calls / images_per_batch`,
/// i.e. the index of the batch it belongs to (single producer only).
pub struct SequenceDecoder {
    pub calls: Arc<AtomicUsize>,
    pub images_per_batch: usize,
}

impl ImageDecoder for SequenceDecoder {
    fn decode(&self, _path: &Path) -> Result<Array2<u8>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let batch_index = (call / self.images_per_batch) as u8;
        Ok(Array2::from_elem((HEIGHT, WIDTH), batch_index))
    }
}

/// Succeeds `fail_after` times, then fails on every call.
pub struct FailingDecoder {
    pub fail_after: usize,
    pub calls: AtomicUsize,
}

impl ImageDecoder for FailingDecoder {
    fn decode(&self, path: &Path) -> Result<Array2<u8>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.fail_after {
            return Err(anyhow!("unreadable image {}", path.display()));
        }
        Ok(Array2::zeros((HEIGHT, WIDTH)))
    }
}

/// Sleeps before every decode.
pub struct SlowDecoder {
    pub delay: Duration,
}

impl ImageDecoder for SlowDecoder {
    fn decode(&self, _path: &Path) -> Result<Array2<u8>> {
        thread::sleep(self.delay);
        Ok(Array2::zeros((HEIGHT, WIDTH)))
    }
}

pub fn config(batch_count: usize, triplets_per_batch: usize, skilled_ratio: f64) -> SourceConfig {
    SourceConfig::builder()
        .data_dir("/data/gpds")
        .batch_count(batch_count)
        .triplets_per_batch(triplets_per_batch)
        .skilled_ratio(skilled_ratio)
        .personas(vec![1, 2, 3])
        .poll_interval(Duration::from_millis(10))
        .build()
}

/// Polls `condition` until it holds or five seconds pass.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
