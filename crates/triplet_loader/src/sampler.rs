use rand::seq::{index, IndexedRandom};
use rand::Rng;
use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::{LoaderError, Result};
use crate::layout::{Persona, SignatureLayout, SignatureRef, GENUINE_SIGNS, TOTAL_SIGNS, VARIATIONS};

/// How the negative of a triplet was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripletKind {
    /// Negative is a signature of a different persona.
    Easy,
    /// Negative is a skilled forgery of the anchor's persona.
    Skilled,
}

/// An (anchor, positive, negative) grouping for metric learning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triplet {
    pub anchor: SignatureRef,
    pub positive: SignatureRef,
    pub negative: SignatureRef,
    pub kind: TripletKind,
}

impl Triplet {
    /// Member of the triplet by role index: 0 = anchor, 1 = positive, 2 = negative.
    pub fn role(&self, role: usize) -> Option<&SignatureRef> {
        match role {
            0 => Some(&self.anchor),
            1 => Some(&self.positive),
            2 => Some(&self.negative),
            _ => None,
        }
    }

    pub fn paths(&self, layout: &SignatureLayout) -> [PathBuf; 3] {
        [
            layout.path(&self.anchor),
            layout.path(&self.positive),
            layout.path(&self.negative),
        ]
    }
}

/// ============================================================================
/// Draws single triplets from a fixed persona list.
///
/// Two strategies are supported:
/// - **Easy** (`sample_easy`): anchor and positive come from one persona, the
///   negative from another. Any sign index may be drawn, forgeries included,
///   unless `exclude_forgery` restricts anchor and positive to genuine ones.
/// - **Skilled** (`sample_skilled`): all three come from one persona; anchor and
///   positive are two distinct genuine signatures, the negative is one of that
///   persona's skilled forgeries.
///
/// The sampler holds no RNG. Callers pass their own so that each producer
/// thread keeps an independent, seedable stream.
///
/// # Example
/// ```ignore
/// let sampler = TripletSampler::new(vec![1, 2, 3])?;
/// let mut rng = StdRng::seed_from_u64(42);
/// let easy = sampler.sample_easy(&mut rng, true)?;
/// let skilled = sampler.sample_skilled(&mut rng)?;
/// ```
#[derive(Debug, Clone)]
pub struct TripletSampler {
    personas: Vec<Persona>,
}

impl TripletSampler {
    pub fn new(personas: Vec<Persona>) -> Result<Self> {
        if personas.is_empty() {
            return Err(LoaderError::InvalidConfiguration(
                "TripletSampler needs at least one persona".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(personas.len());
        if let Some(repeated) = personas.iter().find(|&&p| !seen.insert(p)) {
            return Err(LoaderError::InvalidConfiguration(format!(
                "persona {} is listed more than once",
                repeated
            )));
        }
        Ok(Self { personas })
    }

    pub fn personas(&self) -> &[Persona] {
        &self.personas
    }

    /// Draws a random signature of `persona`.
    ///
    /// The sign index is uniform over `1..=24` when `exclude_forgery` is set,
    /// otherwise over `1..=54`; the variation is uniform over `1..=20`.
    pub fn random_signature<R: Rng + ?Sized>(
        rng: &mut R,
        persona: Persona,
        exclude_forgery: bool,
    ) -> SignatureRef {
        let max_sign = if exclude_forgery {
            GENUINE_SIGNS
        } else {
            TOTAL_SIGNS
        };
        let sign = rng.random_range(1..=max_sign);
        Self::with_random_variation(rng, persona, sign)
    }

    /// Anchor and positive from one persona, negative from another.
    pub fn sample_easy<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        exclude_forgery: bool,
    ) -> Result<Triplet> {
        if self.personas.len() < 2 {
            return Err(LoaderError::Sampling(format!(
                "easy triplets need two distinct personas, have {}",
                self.personas.len()
            )));
        }

        // Ids are unique, so two distinct positions are two distinct personas.
        let picked = index::sample(rng, self.personas.len(), 2);
        let anchor_persona = self.personas[picked.index(0)];
        let negative_persona = self.personas[picked.index(1)];

        let anchor = Self::random_signature(rng, anchor_persona, exclude_forgery);
        let positive = Self::random_signature(rng, anchor_persona, exclude_forgery);
        let negative = Self::random_signature(rng, negative_persona, false);

        Ok(Triplet {
            anchor,
            positive,
            negative,
            kind: TripletKind::Easy,
        })
    }

    /// Anchor, positive and a skilled forgery as negative, all from one persona.
    pub fn sample_skilled<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Triplet> {
        let persona = *self
            .personas
            .choose(rng)
            .ok_or_else(|| LoaderError::Sampling("no personas to sample from".to_string()))?;

        let genuine = index::sample(rng, GENUINE_SIGNS as usize, 2);
        let anchor_sign = genuine.index(0) as u32 + 1;
        let positive_sign = genuine.index(1) as u32 + 1;
        let negative_sign = rng.random_range(GENUINE_SIGNS + 1..=TOTAL_SIGNS);

        Ok(Triplet {
            anchor: Self::with_random_variation(rng, persona, anchor_sign),
            positive: Self::with_random_variation(rng, persona, positive_sign),
            negative: Self::with_random_variation(rng, persona, negative_sign),
            kind: TripletKind::Skilled,
        })
    }

    fn with_random_variation<R: Rng + ?Sized>(
        rng: &mut R,
        persona: Persona,
        sign: u32,
    ) -> SignatureRef {
        let variation = rng.random_range(1..=VARIATIONS);
        SignatureRef::new(persona, sign, variation)
    }
}
