use anyhow::{Context, Result};
use image::ImageReader;
use ndarray::Array2;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;

// ============================================================================
// ImageDecoder - decoding seam
// ============================================================================

/// Turns an image path into a 2D array of raw pixel intensities (`[H, W]`).
///
/// Implementations must be `Send + Sync`: one decoder instance is shared by
/// every producer thread of a registry.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<Array2<u8>>;
}

// ============================================================================
// GrayImageDecoder
// ============================================================================

/// Decodes image files from disk into single-channel 8-bit arrays.
///
/// Any format the `image` crate recognizes is accepted; colour images are
/// converted to luma. Files are read through a buffered reader and the format
/// is guessed from content, not extension.
///
/// # Example
/// ```ignore
/// let decoder = GrayImageDecoder::new();
/// let pixels = decoder.decode(Path::new("001/c-001-01-01.png"))?;
/// println!("Image size: {:?}", pixels.dim());
/// ```
#[derive(Debug, Clone)]
pub struct GrayImageDecoder {
    buffer_size: usize,
}

impl GrayImageDecoder {
    /// Creates a new decoder with an 8KB read buffer.
    pub fn new() -> Self {
        Self { buffer_size: 8192 }
    }
}

impl Default for GrayImageDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageDecoder for GrayImageDecoder {
    fn decode(&self, path: &Path) -> Result<Array2<u8>> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open image: {}", path.display()))?;

        let file_size = file.metadata()?.len() as usize;
        let mut reader = BufReader::with_capacity(self.buffer_size, file);
        let mut buffer = Vec::with_capacity(file_size);
        reader
            .read_to_end(&mut buffer)
            .with_context(|| format!("Failed to read image: {}", path.display()))?;

        let image = ImageReader::new(Cursor::new(buffer))
            .with_guessed_format()?
            .decode()
            .with_context(|| format!("Failed to decode image: {}", path.display()))?;

        let luma = image.to_luma8();
        let (width, height) = luma.dimensions();
        Array2::from_shape_vec((height as usize, width as usize), luma.into_raw())
            .with_context(|| format!("Unexpected pixel buffer size for {}", path.display()))
    }
}

// ============================================================================
// Tests
// ============================================================================
