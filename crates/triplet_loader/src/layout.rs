//! src/layout.rs
//!
//! On-disk layout of the signature corpus.
//!
//! Every persona owns one directory named after its zero-padded id. Inside,
//! genuine signatures and skilled forgeries share one naming scheme and differ
//! only by prefix:
//!
//! ```text
//! data_dir/
//! ├── 001/
//! │   ├── c-001-01-01.png     # genuine, sign 1, variation 1
//! │   ├── ...
//! │   └── cf-001-24-20.png    # forgery, sign 24 (sampled as 48), variation 20
//! └── 002/
//! ```
//!
//! Samplers address signatures with a single sign index in `1..=54`: indices
//! above 24 are forgeries and map back to `1..=24` on disk.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Integer identity owning a directory of signature images.
pub type Persona = u32;

/// Number of genuine signature indices per persona (`1..=24`).
pub const GENUINE_SIGNS: u32 = 24;
/// Total sign indices per persona, forgeries included (`1..=54`).
pub const TOTAL_SIGNS: u32 = 54;
/// Number of stored variations per signature (`1..=20`).
pub const VARIATIONS: u32 = 20;

pub const DEFAULT_GENUINE_PREFIX: &str = "c";
pub const DEFAULT_FORGERY_PREFIX: &str = "cf";

/// One concrete signature sample: `(persona, sign index, variation)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureRef {
    pub persona: Persona,
    /// Sign index in `1..=54`; values above 24 are skilled forgeries.
    pub sign: u32,
    /// Variation in `1..=20`.
    pub variation: u32,
}

impl SignatureRef {
    pub fn new(persona: Persona, sign: u32, variation: u32) -> Self {
        Self {
            persona,
            sign,
            variation,
        }
    }

    pub fn is_forgery(&self) -> bool {
        self.sign > GENUINE_SIGNS
    }

    /// Sign index as stored on disk (forgeries normalized to `1..=24`).
    pub fn file_sign(&self) -> u32 {
        if self.is_forgery() {
            self.sign - GENUINE_SIGNS
        } else {
            self.sign
        }
    }
}

/// Resolves [`SignatureRef`]s to image paths below a data directory.
#[derive(Debug, Clone)]
pub struct SignatureLayout {
    data_dir: PathBuf,
    genuine_prefix: String,
    forgery_prefix: String,
}

impl SignatureLayout {
    /// Layout with the default `c` / `cf` prefixes.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self::with_prefixes(data_dir, DEFAULT_GENUINE_PREFIX, DEFAULT_FORGERY_PREFIX)
    }

    pub fn with_prefixes(
        data_dir: impl Into<PathBuf>,
        genuine_prefix: impl Into<String>,
        forgery_prefix: impl Into<String>,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            genuine_prefix: genuine_prefix.into(),
            forgery_prefix: forgery_prefix.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn path(&self, signature: &SignatureRef) -> PathBuf {
        let prefix = if signature.is_forgery() {
            &self.forgery_prefix
        } else {
            &self.genuine_prefix
        };
        let file_name = format!(
            "{}-{:03}-{:02}-{:02}.png",
            prefix,
            signature.persona,
            signature.file_sign(),
            signature.variation
        );
        self.data_dir
            .join(format!("{:03}", signature.persona))
            .join(file_name)
    }
}

/// Lists the personas present under `data_dir`, sorted ascending.
///
/// A persona directory is any direct child directory whose name is a
/// three-digit number. Everything else is ignored.
pub fn discover_personas(data_dir: impl AsRef<Path>) -> Result<Vec<Persona>> {
    let data_dir = data_dir.as_ref();
    let mut personas = Vec::new();

    for entry in WalkDir::new(data_dir).min_depth(1).max_depth(1) {
        let entry = entry
            .with_context(|| format!("Failed to read data directory: {}", data_dir.display()))?;
        if !entry.file_type().is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if name.len() == 3 && name.bytes().all(|b| b.is_ascii_digit()) {
            // Three ASCII digits always parse.
            if let Ok(persona) = name.parse::<Persona>() {
                personas.push(persona);
            }
        }
    }

    personas.sort_unstable();
    Ok(personas)
}
