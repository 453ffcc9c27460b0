use std::path::{Path, PathBuf};

use chrono::Local;
use image::{ColorType, ImageFormat};
use line_stitch_common::config::NamingScheme;
use line_stitch_common::frame::{CompositeImage, PixelFormat};
use tracing::{debug, info};

use super::naming::composite_file_name;

/// Destination for finished composites.
pub trait CompositeSink {
    /// Persist `composite` and return where it went.
    fn write(&mut self, composite: &CompositeImage) -> Result<PathBuf, EncodeError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("failed to create output directory {0}: {1}")]
    CreateDir(String, std::io::Error),
    #[error("failed to encode {path}: {source}")]
    Image {
        path: String,
        source: image::ImageError,
    },
}

/// Writes composites as PNG files into one directory.
pub struct PngWriter {
    directory: PathBuf,
    scheme: NamingScheme,
    written: u64,
}

impl PngWriter {
    pub fn new(directory: impl Into<PathBuf>, scheme: NamingScheme) -> Self {
        Self {
            directory: directory.into(),
            scheme,
            written: 0,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Number of composites written so far.
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl CompositeSink for PngWriter {
    fn write(&mut self, composite: &CompositeImage) -> Result<PathBuf, EncodeError> {
        std::fs::create_dir_all(&self.directory)
            .map_err(|e| EncodeError::CreateDir(self.directory.display().to_string(), e))?;

        let seq = self.written + 1;
        let name = composite_file_name(self.scheme, &Local::now().naive_local(), seq);
        let path = self.directory.join(name);

        if self.scheme == NamingScheme::Legacy && path.exists() {
            debug!(path = %path.display(), "legacy name already taken, overwriting");
        }

        encode_png(composite, &path)?;
        self.written = seq;

        info!(
            path = %path.display(),
            width = composite.width(),
            height = composite.height(),
            frames = composite.frames(),
            "composite written"
        );
        Ok(path)
    }
}

/// Encode `composite` to a PNG file at `path`.
pub fn encode_png(composite: &CompositeImage, path: &Path) -> Result<(), EncodeError> {
    let result = match composite.format() {
        PixelFormat::Mono8 => image::save_buffer_with_format(
            path,
            composite.data(),
            composite.width(),
            composite.height(),
            ColorType::L8,
            ImageFormat::Png,
        ),
        PixelFormat::Rgb8 => image::save_buffer_with_format(
            path,
            composite.data(),
            composite.width(),
            composite.height(),
            ColorType::Rgb8,
            ImageFormat::Png,
        ),
        PixelFormat::Bgr8 => {
            let rgb = bgr_to_rgb(composite.data());
            image::save_buffer_with_format(
                path,
                &rgb,
                composite.width(),
                composite.height(),
                ColorType::Rgb8,
                ImageFormat::Png,
            )
        }
    };
    result.map_err(|source| EncodeError::Image {
        path: path.display().to_string(),
        source,
    })
}

fn bgr_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len());
    for px in data.chunks_exact(3) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    rgb
}

/// Keeps composites in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub composites: Vec<CompositeImage>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CompositeSink for MemorySink {
    fn write(&mut self, composite: &CompositeImage) -> Result<PathBuf, EncodeError> {
        self.composites.push(composite.clone());
        Ok(PathBuf::from(format!(
            "memory/composite_{:04}.png",
            self.composites.len()
        )))
    }
}
