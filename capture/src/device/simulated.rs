use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use line_stitch_common::config::{CameraConfig, SimulatedTransport};
use line_stitch_common::frame::{PixelFormat, RawFrame};
use tracing::{debug, info};

use super::{
    Device, DeviceError, DeviceInfo, GigeControl, OperationStatus, Retrieved, RetrieveError,
    Stream, StreamBuffer, Transport, TransportKind,
};

pub const SIM_QUEUED_BUFFER_MAXIMUM: usize = 32;
pub const SIM_PACKET_SIZE: u32 = 8164;
const SIM_STREAM_PORT: u16 = 20202;
const DEFAULT_CONNECTION_ID: &str = "sim-0";

/// State shared between the simulated control channel and its stream.
#[derive(Debug, Default)]
struct SimLink {
    streaming: AtomicBool,
    destination_set: AtomicBool,
}

/// Synthetic line-scan camera.
///
/// After AcquisitionStart it emits `warmup_blank_frames` all-black frames, then patterned
/// frames whose pixels are never zero. A GigE simulation only delivers once the stream
/// destination has been configured, like a real GigE device streaming to nowhere.
pub struct SimulatedCamera {
    config: CameraConfig,
    link: Arc<SimLink>,
}

impl SimulatedCamera {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            config: config.clone(),
            link: Arc::new(SimLink::default()),
        }
    }

    fn connection_id(&self) -> String {
        self.config
            .connection_id
            .clone()
            .unwrap_or_else(|| DEFAULT_CONNECTION_ID.into())
    }

    fn transport_kind(&self) -> TransportKind {
        match self.config.transport {
            SimulatedTransport::Gige => TransportKind::GigeVision,
            SimulatedTransport::Usb3 => TransportKind::Usb3Vision,
        }
    }
}

impl Transport for SimulatedCamera {
    fn connect(&mut self) -> Result<Box<dyn Device>, DeviceError> {
        let info = DeviceInfo {
            connection_id: self.connection_id(),
            model: format!("Simulated LineScan {}px", self.config.width),
            transport: self.transport_kind(),
        };
        info!(
            connection_id = info.connection_id,
            transport = ?info.transport,
            "connected to simulated device"
        );
        Ok(Box::new(SimulatedDevice {
            info,
            payload_size: payload_size(&self.config),
            link: Arc::clone(&self.link),
            packet_size: None,
            destination: None,
            connected: true,
        }))
    }

    fn open_stream(&mut self) -> Result<Box<dyn Stream>, DeviceError> {
        let endpoint = match self.transport_kind() {
            TransportKind::GigeVision => Some(SocketAddr::from(([127, 0, 0, 1], SIM_STREAM_PORT))),
            _ => None,
        };
        Ok(Box::new(SimulatedStream {
            width: self.config.width,
            lines: self.config.lines_per_frame,
            format: self.config.pixel_format,
            warmup_blank_frames: self.config.warmup_blank_frames as u64,
            fail_every: self.config.fail_every as u64,
            frame_interval: Duration::from_millis(self.config.frame_interval_ms),
            needs_destination: endpoint.is_some(),
            endpoint,
            link: Arc::clone(&self.link),
            queue: VecDeque::new(),
            block_id: 0,
            open: true,
        }))
    }
}

fn payload_size(config: &CameraConfig) -> usize {
    config.width as usize * config.lines_per_frame as usize * config.pixel_format.bytes_per_pixel()
}

pub struct SimulatedDevice {
    info: DeviceInfo,
    payload_size: usize,
    link: Arc<SimLink>,
    packet_size: Option<u32>,
    destination: Option<SocketAddr>,
    connected: bool,
}

impl SimulatedDevice {
    fn ensure_connected(&self, command: &'static str) -> Result<(), DeviceError> {
        if self.connected {
            Ok(())
        } else {
            Err(DeviceError::Command {
                command,
                reason: "device disconnected".into(),
            })
        }
    }
}

impl Device for SimulatedDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn payload_size(&self) -> usize {
        self.payload_size
    }

    fn gige(&mut self) -> Option<&mut dyn GigeControl> {
        match self.info.transport {
            TransportKind::GigeVision => Some(self as &mut dyn GigeControl),
            _ => None,
        }
    }

    fn start_acquisition(&mut self) -> Result<(), DeviceError> {
        self.ensure_connected("AcquisitionStart")?;
        self.link.streaming.store(true, Ordering::SeqCst);
        debug!(
            packet_size = ?self.packet_size,
            destination = ?self.destination,
            "simulated AcquisitionStart"
        );
        Ok(())
    }

    fn stop_acquisition(&mut self) -> Result<(), DeviceError> {
        self.ensure_connected("AcquisitionStop")?;
        self.link.streaming.store(false, Ordering::SeqCst);
        debug!("simulated AcquisitionStop");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.link.streaming.store(false, Ordering::SeqCst);
        self.connected = false;
        Ok(())
    }
}

impl GigeControl for SimulatedDevice {
    fn negotiate_packet_size(&mut self) -> Result<u32, DeviceError> {
        self.ensure_connected("NegotiatePacketSize")?;
        self.packet_size = Some(SIM_PACKET_SIZE);
        Ok(SIM_PACKET_SIZE)
    }

    fn set_stream_destination(&mut self, destination: SocketAddr) -> Result<(), DeviceError> {
        self.ensure_connected("SetStreamDestination")?;
        self.destination = Some(destination);
        self.link.destination_set.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct SimulatedStream {
    width: u32,
    lines: u32,
    format: PixelFormat,
    warmup_blank_frames: u64,
    fail_every: u64,
    frame_interval: Duration,
    needs_destination: bool,
    endpoint: Option<SocketAddr>,
    link: Arc<SimLink>,
    queue: VecDeque<StreamBuffer>,
    block_id: u64,
    open: bool,
}

impl SimulatedStream {
    fn delivering(&self) -> bool {
        self.open
            && self.link.streaming.load(Ordering::SeqCst)
            && (!self.needs_destination || self.link.destination_set.load(Ordering::SeqCst))
    }

    fn render(&self, block_id: u64) -> RawFrame {
        if block_id <= self.warmup_blank_frames {
            return RawFrame::blank(self.width, self.lines, self.format);
        }
        let mut frame = RawFrame::blank(self.width, self.lines, self.format);
        let bpp = self.format.bytes_per_pixel();
        let stride = self.width as usize * bpp;
        for (i, sample) in frame.data_mut().iter_mut().enumerate() {
            let y = (i / stride) as u64;
            let x = ((i % stride) / bpp) as u64;
            let channel = (i % bpp) as u64;
            // 1..=251, never zero
            *sample = ((x + y + block_id * 3 + channel * 64) % 251 + 1) as u8;
        }
        frame
    }
}

impl Stream for SimulatedStream {
    fn local_endpoint(&self) -> Option<SocketAddr> {
        self.endpoint
    }

    fn queued_buffer_maximum(&self) -> usize {
        SIM_QUEUED_BUFFER_MAXIMUM
    }

    fn queue_buffer(&mut self, mut buffer: StreamBuffer) -> Result<(), DeviceError> {
        if !self.open {
            return Err(DeviceError::Queue(buffer.id(), "stream closed".into()));
        }
        if self.queue.len() >= SIM_QUEUED_BUFFER_MAXIMUM {
            return Err(DeviceError::Queue(buffer.id(), "queue full".into()));
        }
        buffer.clear();
        self.queue.push_back(buffer);
        Ok(())
    }

    fn retrieve_buffer(&mut self, timeout: Duration) -> Result<Retrieved, RetrieveError> {
        if !self.frame_interval.is_zero() {
            std::thread::sleep(self.frame_interval.min(timeout));
        }
        if !self.delivering() {
            return Err(RetrieveError::Timeout(timeout));
        }
        let Some(mut buffer) = self.queue.pop_front() else {
            return Err(RetrieveError::Timeout(timeout));
        };

        self.block_id += 1;
        let block_id = self.block_id;

        if self.fail_every > 0 && block_id % self.fail_every == 0 {
            return Ok(Retrieved {
                buffer,
                status: OperationStatus::Failed("MISSING_PACKETS".into()),
            });
        }

        let frame = self.render(block_id);
        if frame.data().len() > buffer.capacity() {
            return Ok(Retrieved {
                buffer,
                status: OperationStatus::Failed("BUFFER_TOO_SMALL".into()),
            });
        }
        buffer.set_frame(
            frame
                .with_block_id(block_id)
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

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(5);

    fn config(transport: SimulatedTransport) -> CameraConfig {
        CameraConfig {
            width: 16,
            lines_per_frame: 2,
            warmup_blank_frames: 2,
            transport,
            ..CameraConfig::default()
        }
    }

    fn queue_buffers(stream: &mut dyn Stream, n: u32, capacity: usize) {
        for id in 0..n {
            stream.queue_buffer(StreamBuffer::new(id, capacity)).unwrap();
        }
    }

    #[test]
    fn no_frames_before_acquisition_start() {
        let mut transport = SimulatedCamera::new(&config(SimulatedTransport::Usb3));
        let _device = transport.connect().unwrap();
        let mut stream = transport.open_stream().unwrap();
        queue_buffers(stream.as_mut(), 2, 32);

        assert!(matches!(
            stream.retrieve_buffer(TIMEOUT),
            Err(RetrieveError::Timeout(_))
        ));
    }

    #[test]
    fn warmup_frames_are_black_then_lit() {
        let mut transport = SimulatedCamera::new(&config(SimulatedTransport::Usb3));
        let mut device = transport.connect().unwrap();
        let mut stream = transport.open_stream().unwrap();
        queue_buffers(stream.as_mut(), 4, device.payload_size());
        device.start_acquisition().unwrap();

        let mut blanks = Vec::new();
        for _ in 0..4 {
            let retrieved = stream.retrieve_buffer(TIMEOUT).unwrap();
            assert!(retrieved.status.is_ok());
            let frame = retrieved.buffer.frame().unwrap();
            assert_eq!((frame.width(), frame.height()), (16, 2));
            blanks.push(frame.is_all_zero());
            stream.queue_buffer(retrieved.buffer).unwrap();
        }
        assert_eq!(blanks, vec![true, true, false, false]);
    }

    #[test]
    fn gige_waits_for_stream_destination() {
        let mut transport = SimulatedCamera::new(&config(SimulatedTransport::Gige));
        let mut device = transport.connect().unwrap();
        let mut stream = transport.open_stream().unwrap();
        queue_buffers(stream.as_mut(), 1, device.payload_size());
        device.start_acquisition().unwrap();
        assert!(stream.retrieve_buffer(TIMEOUT).is_err());

        let endpoint = stream.local_endpoint().unwrap();
        let gige = device.gige().unwrap();
        assert_eq!(gige.negotiate_packet_size().unwrap(), SIM_PACKET_SIZE);
        gige.set_stream_destination(endpoint).unwrap();

        assert!(stream.retrieve_buffer(TIMEOUT).is_ok());
    }

    #[test]
    fn usb3_has_no_gige_controls() {
        let mut transport = SimulatedCamera::new(&config(SimulatedTransport::Usb3));
        let mut device = transport.connect().unwrap();
        let stream = transport.open_stream().unwrap();
        assert!(device.gige().is_none());
        assert!(stream.local_endpoint().is_none());
    }

    #[test]
    fn fail_every_marks_status() {
        let mut cfg = config(SimulatedTransport::Usb3);
        cfg.fail_every = 2;
        let mut transport = SimulatedCamera::new(&cfg);
        let mut device = transport.connect().unwrap();
        let mut stream = transport.open_stream().unwrap();
        queue_buffers(stream.as_mut(), 2, device.payload_size());
        device.start_acquisition().unwrap();

        let first = stream.retrieve_buffer(TIMEOUT).unwrap();
        let second = stream.retrieve_buffer(TIMEOUT).unwrap();
        assert!(first.status.is_ok());
        assert_eq!(second.status, OperationStatus::Failed("MISSING_PACKETS".into()));
    }

    #[test]
    fn abort_returns_every_queued_buffer() {
        let mut transport = SimulatedCamera::new(&config(SimulatedTransport::Usb3));
        let _device = transport.connect().unwrap();
        let mut stream = transport.open_stream().unwrap();
        queue_buffers(stream.as_mut(), 5, 32);

        assert_eq!(stream.queued_buffer_count(), 5);
        assert_eq!(stream.abort_queued_buffers().len(), 5);
        assert_eq!(stream.queued_buffer_count(), 0);
    }

    #[test]
    fn undersized_buffer_fails_operation() {
        let mut transport = SimulatedCamera::new(&config(SimulatedTransport::Usb3));
        let mut device = transport.connect().unwrap();
        let mut stream = transport.open_stream().unwrap();
        queue_buffers(stream.as_mut(), 3, 4);
        device.start_acquisition().unwrap();

        // Warm-up frames also need full-size buffers.
        let retrieved = stream.retrieve_buffer(TIMEOUT).unwrap();
        assert_eq!(
            retrieved.status,
            OperationStatus::Failed("BUFFER_TOO_SMALL".into())
        );
    }
}
