use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use line_stitch_common::config::CameraConfig;
use line_stitch_common::frame::{PixelFormat, RawFrame};
use tracing::{debug, info, warn};

use super::{
    Device, DeviceError, DeviceInfo, OperationStatus, Retrieved, RetrieveError, Stream,
    StreamBuffer, Transport, TransportKind,
};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "pgm", "ppm"];
const REPLAY_QUEUED_BUFFER_MAXIMUM: usize = 64;

/// Serves the images of a directory, in file-name order, as camera payloads.
///
/// Useful for re-stitching a capture that was saved frame by frame.
pub struct ReplayTransport {
    config: CameraConfig,
    files: Vec<PathBuf>,
    streaming: Arc<AtomicBool>,
}

impl ReplayTransport {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            config: config.clone(),
            files: Vec::new(),
            streaming: Arc::new(AtomicBool::new(false)),
        }
    }

    fn connection_id(&self) -> String {
        self.config.connection_id.clone().unwrap_or_else(|| {
            self.config
                .replay_dir
                .as_ref()
                .map(|d| d.display().to_string())
                .unwrap_or_else(|| "replay".into())
        })
    }
}

impl Transport for ReplayTransport {
    fn connect(&mut self) -> Result<Box<dyn Device>, DeviceError> {
        let id = self.connection_id();
        let dir = self
            .config
            .replay_dir
            .clone()
            .ok_or_else(|| DeviceError::Connect(id.clone(), "no replay directory".into()))?;

        let files = list_images(&dir).map_err(|e| DeviceError::Connect(id.clone(), e))?;
        let Some(first) = files.first() else {
            return Err(DeviceError::Connect(
                id,
                format!("no images in {}", dir.display()),
            ));
        };

        let (width, height) = image::image_dimensions(first)
            .map_err(|e| DeviceError::Connect(id.clone(), e.to_string()))?;
        let payload_size =
            width as usize * height as usize * self.config.pixel_format.bytes_per_pixel();

        info!(
            dir = %dir.display(),
            images = files.len(),
            width,
            height,
            "replay source opened"
        );
        self.files = files;

        Ok(Box::new(ReplayDevice {
            info: DeviceInfo {
                connection_id: id,
                model: "Directory replay".into(),
                transport: TransportKind::Virtual,
            },
            payload_size,
            streaming: Arc::clone(&self.streaming),
        }))
    }

    fn open_stream(&mut self) -> Result<Box<dyn Stream>, DeviceError> {
        if self.files.is_empty() {
            return Err(DeviceError::StreamOpen(
                self.connection_id(),
                "device not connected".into(),
            ));
        }
        Ok(Box::new(ReplayStream {
            files: self.files.clone(),
            next: 0,
            looping: self.config.replay_loop,
            format: self.config.pixel_format,
            frame_interval: Duration::from_millis(self.config.frame_interval_ms),
            streaming: Arc::clone(&self.streaming),
            queue: VecDeque::new(),
            block_id: 0,
            open: true,
        }))
    }
}

/// Image files directly inside `dir`, sorted by name.
fn list_images(dir: &Path) -> Result<Vec<PathBuf>, String> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| format!("cannot read {}: {e}", dir.display()))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && has_image_extension(path))
        .collect();
    files.sort();
    Ok(files)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Decode `path` into a frame of the requested layout.
fn load_frame(path: &Path, format: PixelFormat) -> Result<RawFrame, String> {
    let img = image::open(path).map_err(|e| e.to_string())?;
    let (width, height, data) = match format {
        PixelFormat::Mono8 => {
            let buf = img.to_luma8();
            let (w, h) = buf.dimensions();
            (w, h, buf.into_raw())
        }
        PixelFormat::Rgb8 => {
            let buf = img.to_rgb8();
            let (w, h) = buf.dimensions();
            (w, h, buf.into_raw())
        }
        PixelFormat::Bgr8 => {
            let buf = img.to_rgb8();
            let (w, h) = buf.dimensions();
            let mut data = buf.into_raw();
            for px in data.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            (w, h, data)
        }
    };
    RawFrame::new(width, height, format, data).map_err(|e| e.to_string())
}

pub struct ReplayDevice {
    info: DeviceInfo,
    payload_size: usize,
    streaming: Arc<AtomicBool>,
}

impl Device for ReplayDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn payload_size(&self) -> usize {
        self.payload_size
    }

    fn start_acquisition(&mut self) -> Result<(), DeviceError> {
        self.streaming.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_acquisition(&mut self) -> Result<(), DeviceError> {
        self.streaming.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.streaming.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub struct ReplayStream {
    files: Vec<PathBuf>,
    next: usize,
    looping: bool,
    format: PixelFormat,
    frame_interval: Duration,
    streaming: Arc<AtomicBool>,
    queue: VecDeque<StreamBuffer>,
    block_id: u64,
    open: bool,
}

impl Stream for ReplayStream {
    fn queued_buffer_maximum(&self) -> usize {
        REPLAY_QUEUED_BUFFER_MAXIMUM
    }

    fn queue_buffer(&mut self, mut buffer: StreamBuffer) -> Result<(), DeviceError> {
        if !self.open {
            return Err(DeviceError::Queue(buffer.id(), "stream closed".into()));
        }
        buffer.clear();
        self.queue.push_back(buffer);
        Ok(())
    }

    fn retrieve_buffer(&mut self, timeout: Duration) -> Result<Retrieved, RetrieveError> {
        if !self.frame_interval.is_zero() {
            std::thread::sleep(self.frame_interval.min(timeout));
        }
        if !self.open || !self.streaming.load(Ordering::SeqCst) {
            return Err(RetrieveError::Timeout(timeout));
        }
        if self.next >= self.files.len() {
            if !self.looping {
                return Err(RetrieveError::EndOfStream);
            }
            debug!("replay wrapped around");
            self.next = 0;
        }
        let path = &self.files[self.next];
        if !path.is_file() {
            self.next += 1;
            return Err(RetrieveError::Failed(format!(
                "{} is no longer readable",
                path.display()
            )));
        }
        let Some(mut buffer) = self.queue.pop_front() else {
            return Err(RetrieveError::Timeout(timeout));
        };
        self.next += 1;
        self.block_id += 1;

        let frame = match load_frame(path, self.format) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to decode replay image");
                return Ok(Retrieved {
                    buffer,
                    status: OperationStatus::Failed("DECODE_ERROR".into()),
                });
            }
        };
        if frame.data().len() > buffer.capacity() {
            return Ok(Retrieved {
                buffer,
                status: OperationStatus::Failed("BUFFER_TOO_SMALL".into()),
            });
        }

        buffer.set_frame(
            frame
                .with_block_id(self.block_id)
                .with_timestamp_ms(Utc::now().timestamp_millis()),
        );
        Ok(Retrieved {
            buffer,
            status: OperationStatus::Ok,
        })
    }

    fn queued_buffer_count(&self) -> usize {
        self.queue.len()
    }

    fn abort_queued_buffers(&mut self) -> Vec<StreamBuffer> {
        self.queue.drain(..).collect()
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.open = false;
        Ok(())
    }
}
