use ndarray::{s, Array4, ArrayView4};

use crate::config::Device;
use crate::sampler::{Triplet, TripletKind};

/// The `Batch` struct holds one role-ordered block of triplet images.
///
/// `data` has shape `[3 * N, 1, H, W]` with values in `[0.0, 1.0]`, where
/// `N` is the number of triplets:
/// - rows `0..N` are the anchors,
/// - rows `N..2N` the positives,
/// - rows `2N..3N` the negatives.
///
/// Row `j` of each block belongs to `triplets[j]`.
///
/// # Examples
/// With 4 triplets of 155x220 signatures:
/// - `data` -> shape `[12, 1, 155, 220]`
/// - `anchors()` -> shape `[4, 1, 155, 220]`
#[derive(Debug, Clone)]
pub struct Batch {
    data: Array4<f32>,
    triplets: Vec<Triplet>,
    device: Device,
}

impl Batch {
    pub(crate) fn new(data: Array4<f32>, triplets: Vec<Triplet>, device: Device) -> Self {
        debug_assert_eq!(data.shape()[0], 3 * triplets.len());
        Self {
            data,
            triplets,
            device,
        }
    }

    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    pub fn into_data(self) -> Array4<f32> {
        self.data
    }

    /// `[3 * N, 1, H, W]`
    pub fn shape(&self) -> [usize; 4] {
        let (n, c, h, w) = self.data.dim();
        [n, c, h, w]
    }

    /// Number of images in the batch (`3 * N`).
    pub fn len(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn triplets_per_batch(&self) -> usize {
        self.triplets.len()
    }

    /// The triplets in batch order.
    pub fn triplets(&self) -> &[Triplet] {
        &self.triplets
    }

    pub fn num_skilled(&self) -> usize {
        self.triplets
            .iter()
            .filter(|t| t.kind == TripletKind::Skilled)
            .count()
    }

    pub fn anchors(&self) -> ArrayView4<'_, f32> {
        self.block(0)
    }

    pub fn positives(&self) -> ArrayView4<'_, f32> {
        self.block(1)
    }

    pub fn negatives(&self) -> ArrayView4<'_, f32> {
        self.block(2)
    }

    /// Placement hint of the source that produced this batch.
    pub fn device(&self) -> Device {
        self.device
    }

    fn block(&self, role: usize) -> ArrayView4<'_, f32> {
        let n = self.triplets.len();
        self.data.slice(s![role * n..(role + 1) * n, .., .., ..])
    }
}
