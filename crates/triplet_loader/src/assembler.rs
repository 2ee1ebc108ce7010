//! src/assembler.rs
//!
//! Composes full batches out of sampled triplets.
//!
//! For every batch the assembler:
//! 1. splits `N` into `num_easy = floor(N * (1 - skilled_ratio))` easy and
//!    `num_skilled = N - num_easy` skilled triplets,
//! 2. samples the easy triplets (genuine-only anchor/positive whenever the
//!    batch also holds skilled triplets), then the skilled ones,
//! 3. shuffles the combined list, but only if it contains skilled triplets,
//! 4. flattens it role-major (all anchors, all positives, all negatives),
//! 5. decodes every path and stacks the images into a `[3N, 1, H, W]` array
//!    scaled to `[0, 1]`.
//!
//! A decode failure abandons the whole batch; nothing is partially delivered.

use ndarray::{s, Array2, Array4};
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::batch::Batch;
use crate::config::{split_triplets, Device, SourceConfig};
use crate::decoder::ImageDecoder;
use crate::error::{LoaderError, Result};
use crate::layout::SignatureLayout;
use crate::sampler::{Triplet, TripletSampler};

pub struct BatchAssembler {
    sampler: TripletSampler,
    layout: SignatureLayout,
    decoder: Arc<dyn ImageDecoder>,
    triplets_per_batch: usize,
    skilled_ratio: f64,
    device: Device,
}

impl BatchAssembler {
    /// Builds an assembler for `config`, which is validated first.
    pub fn new(config: &SourceConfig, decoder: Arc<dyn ImageDecoder>, device: Device) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            sampler: TripletSampler::new(config.personas.clone())?,
            layout: config.layout(),
            decoder,
            triplets_per_batch: config.triplets_per_batch,
            skilled_ratio: config.skilled_ratio,
            device,
        })
    }

    pub fn triplets_per_batch(&self) -> usize {
        self.triplets_per_batch
    }

    /// `(num_easy, num_skilled)` for every batch of this assembler.
    pub fn split(&self) -> (usize, usize) {
        split_triplets(self.triplets_per_batch, self.skilled_ratio)
    }

    /// Samples the triplets of one batch, in batch order.
    pub fn sample_triplets<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<Triplet>> {
        let (num_easy, num_skilled) = self.split();

        // Anchor/positive forgeries are only excluded when skilled triplets
        // are present; with a ratio of 0 they may still show up as positives.
        let exclude_forgery = num_skilled > 0;

        let mut triplets = Vec::with_capacity(self.triplets_per_batch);
        for _ in 0..num_easy {
            triplets.push(self.sampler.sample_easy(rng, exclude_forgery)?);
        }
        for _ in 0..num_skilled {
            triplets.push(self.sampler.sample_skilled(rng)?);
        }

        if num_skilled > 0 {
            triplets.shuffle(rng);
        }
        Ok(triplets)
    }

    /// Samples, decodes and stacks one complete batch.
    pub fn load_batch<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Batch> {
        let triplets = self.sample_triplets(rng)?;
        let paths = role_major_paths(&triplets, &self.layout);
        let data = stack_images(&paths, self.decoder.as_ref())?;
        Ok(Batch::new(data, triplets, self.device))
    }
}

/// Flattens triplets as `[a_0..a_n, p_0..p_n, n_0..n_n]`.
pub(crate) fn role_major_paths(triplets: &[Triplet], layout: &SignatureLayout) -> Vec<PathBuf> {
    let mut paths = Vec::with_capacity(3 * triplets.len());
    for role in 0..3 {
        for triplet in triplets {
            if let Some(signature) = triplet.role(role) {
                paths.push(layout.path(signature));
            }
        }
    }
    paths
}

/// Decodes every path and stacks the images into `[len, 1, H, W]`, scaled by 1/255.
pub(crate) fn stack_images(paths: &[PathBuf], decoder: &dyn ImageDecoder) -> Result<Array4<f32>> {
    let Some((first_path, rest)) = paths.split_first() else {
        return Err(LoaderError::Sampling("cannot stack an empty batch".to_string()));
    };

    let first = decode(decoder, first_path)?;
    let (height, width) = first.dim();
    let mut data = Array4::<f32>::zeros((paths.len(), 1, height, width));
    write_scaled(&mut data, 0, &first);

    for (offset, path) in rest.iter().enumerate() {
        let pixels = decode(decoder, path)?;
        if pixels.dim() != (height, width) {
            return Err(LoaderError::ShapeMismatch {
                path: path.clone(),
                expected: (height, width),
                found: pixels.dim(),
            });
        }
        write_scaled(&mut data, offset + 1, &pixels);
    }
    Ok(data)
}

fn decode(decoder: &dyn ImageDecoder, path: &Path) -> Result<Array2<u8>> {
    decoder.decode(path).map_err(|source| LoaderError::Decode {
        path: path.to_path_buf(),
        source: source.into(),
    })
}

fn write_scaled(data: &mut Array4<f32>, row: usize, pixels: &Array2<u8>) {
    data.slice_mut(s![row, 0, .., ..])
        .assign(&pixels.mapv(|v| f32::from(v) / 255.0));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::TripletKind;
    use anyhow::anyhow;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Encodes (persona, sign, variation) into the pixels so tests can tell
    /// which file landed in which row.
    struct TaggingDecoder;

    impl ImageDecoder for TaggingDecoder {
        fn decode(&self, path: &Path) -> anyhow::Result<Array2<u8>> {
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| anyhow!("bad path {}", path.display()))?;
            let parts: Vec<u8> = name
                .rsplit('-')
                .take(3)
                .map(|p| p.parse::<u8>())
                .collect::<std::result::Result<_, _>>()?;
            // rsplit yields variation, sign, persona
            Ok(Array2::from_shape_fn((2, 3), |(_, x)| parts[x]))
        }
    }

    struct FailingDecoder {
        fail_after: usize,
        calls: AtomicUsize,
    }

    impl ImageDecoder for FailingDecoder {
        fn decode(&self, path: &Path) -> anyhow::Result<Array2<u8>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.fail_after {
                return Err(anyhow!("corrupt file {}", path.display()));
            }
            Ok(Array2::from_elem((2, 2), 255))
        }
    }

    struct ShapeShiftingDecoder {
        calls: AtomicUsize,
    }

    impl ImageDecoder for ShapeShiftingDecoder {
        fn decode(&self, _path: &Path) -> anyhow::Result<Array2<u8>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Array2::zeros((4, 4 + call)))
        }
    }

    fn config(n: usize, ratio: f64) -> SourceConfig {
        SourceConfig::builder()
            .data_dir("data")
            .batch_count(1)
            .triplets_per_batch(n)
            .skilled_ratio(ratio)
            .personas(vec![1, 2, 3, 4])
            .build()
    }

    fn assembler(n: usize, ratio: f64, decoder: Arc<dyn ImageDecoder>) -> BatchAssembler {
        BatchAssembler::new(&config(n, ratio), decoder, Device::Cpu).unwrap()
    }

    #[test]
    fn test_batch_shape_and_range() -> anyhow::Result<()> {
        let assembler = assembler(4, 0.5, Arc::new(TaggingDecoder));
        let mut rng = StdRng::seed_from_u64(1);

        let batch = assembler.load_batch(&mut rng)?;
        assert_eq!(batch.shape(), [12, 1, 2, 3]);
        assert_eq!(batch.len(), 12);
        assert_eq!(batch.triplets_per_batch(), 4);
        assert!(batch.data().iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert_eq!(batch.device(), Device::Cpu);
        Ok(())
    }

    #[test]
    fn test_rows_are_role_major_and_aligned() -> anyhow::Result<()> {
        let assembler = assembler(5, 0.4, Arc::new(TaggingDecoder));
        let mut rng = StdRng::seed_from_u64(2);
        let batch = assembler.load_batch(&mut rng)?;
        let n = batch.triplets_per_batch();

        for (j, triplet) in batch.triplets().iter().enumerate() {
            for (role, block) in [batch.anchors(), batch.positives(), batch.negatives()]
                .iter()
                .enumerate()
            {
                let signature = triplet.role(role).unwrap();
                let row = block.slice(s![j, 0, 0, ..]);
                // Pixel columns hold (variation, file sign, persona) / 255
                let decoded: Vec<u32> = row.iter().map(|v| (v * 255.0).round() as u32).collect();
                assert_eq!(
                    decoded,
                    vec![signature.variation, signature.file_sign(), signature.persona],
                    "row {} of role {} does not match triplet {}",
                    j,
                    role,
                    j
                );
            }
        }
        assert_eq!(batch.anchors().shape()[0], n);
        Ok(())
    }

    #[test]
    fn test_split_is_respected() -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(3);
        for (n, ratio, skilled) in [(4, 0.0, 0), (4, 1.0, 4), (5, 0.3, 2), (3, 0.5, 2)] {
            let assembler = assembler(n, ratio, Arc::new(TaggingDecoder));
            let triplets = assembler.sample_triplets(&mut rng)?;
            assert_eq!(triplets.len(), n);
            let num_skilled = triplets
                .iter()
                .filter(|t| t.kind == TripletKind::Skilled)
                .count();
            assert_eq!(num_skilled, skilled, "n={} ratio={}", n, ratio);
        }
        Ok(())
    }

    #[test]
    fn test_mixed_batches_exclude_forged_anchors() -> anyhow::Result<()> {
        let assembler = assembler(8, 0.5, Arc::new(TaggingDecoder));
        let mut rng = StdRng::seed_from_u64(4);

        for _ in 0..200 {
            for t in assembler.sample_triplets(&mut rng)? {
                if t.kind == TripletKind::Easy {
                    assert!(!t.anchor.is_forgery());
                    assert!(!t.positive.is_forgery());
                    assert_ne!(t.anchor.persona, t.negative.persona);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_easy_only_batches_keep_generation_order() -> anyhow::Result<()> {
        // With no skilled triplets nothing is shuffled, so the same seed fed
        // straight into the sampler reproduces the batch order exactly.
        let assembler = assembler(6, 0.0, Arc::new(TaggingDecoder));
        let sampler = TripletSampler::new(vec![1, 2, 3, 4])?;

        let batch_triplets = assembler.sample_triplets(&mut StdRng::seed_from_u64(5))?;
        let mut rng = StdRng::seed_from_u64(5);
        let expected = (0..6)
            .map(|_| sampler.sample_easy(&mut rng, false))
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(batch_triplets, expected);
        Ok(())
    }

    #[test]
    fn test_ratio_zero_may_use_forged_positives() -> anyhow::Result<()> {
        let assembler = assembler(16, 0.0, Arc::new(TaggingDecoder));
        let mut rng = StdRng::seed_from_u64(6);

        let forged = (0..50)
            .map(|_| assembler.sample_triplets(&mut rng))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .any(|t| t.anchor.is_forgery() || t.positive.is_forgery());
        assert!(forged);
        Ok(())
    }

    #[test]
    fn test_decode_error_abandons_batch() {
        let decoder = FailingDecoder {
            fail_after: 5,
            calls: AtomicUsize::new(0),
        };
        let assembler = assembler(2, 0.5, Arc::new(decoder));
        let mut rng = StdRng::seed_from_u64(7);

        match assembler.load_batch(&mut rng) {
            Err(LoaderError::Decode { path, .. }) => {
                assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));
            }
            other => panic!("expected decode error, got {:?}", other.map(|b| b.shape())),
        }
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let decoder = ShapeShiftingDecoder {
            calls: AtomicUsize::new(0),
        };
        let assembler = assembler(1, 1.0, Arc::new(decoder));
        let mut rng = StdRng::seed_from_u64(8);

        assert!(matches!(
            assembler.load_batch(&mut rng),
            Err(LoaderError::ShapeMismatch {
                expected: (4, 4),
                found: (4, 5),
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = BatchAssembler::new(&config(4, 1.5), Arc::new(TaggingDecoder), Device::Cpu);
        assert!(matches!(result, Err(LoaderError::InvalidConfiguration(_))));
    }
}
