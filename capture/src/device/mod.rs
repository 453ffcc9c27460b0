//! Acquisition collaborator: camera control and buffer streaming.
//!
//! A backend provides a [`Transport`] that connects to one device and opens its stream.
//! Device control and the stream are separate objects, mirroring GigE Vision / USB3 Vision
//! where the control channel and the streaming channel are independent.

pub mod replay;
pub mod simulated;

use std::net::SocketAddr;
use std::time::Duration;

use line_stitch_common::config::{Backend, CameraConfig};
use line_stitch_common::frame::RawFrame;

/// Device family. Decides which optional configuration steps apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    GigeVision,
    Usb3Vision,
    /// Backends with no physical transport, e.g. file replay.
    Virtual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub connection_id: String,
    pub model: String,
    pub transport: TransportKind,
}

/// A payload buffer owned either by the stream (queued) or by whoever retrieved it.
#[derive(Debug)]
pub struct StreamBuffer {
    id: u32,
    capacity: usize,
    frame: Option<RawFrame>,
}

impl StreamBuffer {
    pub fn new(id: u32, capacity: usize) -> Self {
        Self {
            id,
            capacity,
            frame: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Payload bytes this buffer was allocated for.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The image carried by the buffer, if the last payload was an image.
    pub fn frame(&self) -> Option<&RawFrame> {
        self.frame.as_ref()
    }

    pub fn set_frame(&mut self, frame: RawFrame) {
        self.frame = Some(frame);
    }

    pub fn clear(&mut self) {
        self.frame = None;
    }
}

/// Result of the operation that filled a retrieved buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Ok,
    /// The buffer came back but its payload is unusable, e.g. missing packets.
    Failed(String),
}

impl OperationStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, OperationStatus::Ok)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationStatus::Ok => f.write_str("OK"),
            OperationStatus::Failed(code) => f.write_str(code),
        }
    }
}

/// A buffer handed back by the stream. It must be queued again once inspected.
#[derive(Debug)]
pub struct Retrieved {
    pub buffer: StreamBuffer,
    pub status: OperationStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("unable to connect to device {0}: {1}")]
    Connect(String, String),
    #[error("unable to stream from device {0}: {1}")]
    StreamOpen(String, String),
    #[error("{command} failed: {reason}")]
    Command {
        command: &'static str,
        reason: String,
    },
    #[error("failed to queue buffer {0}: {1}")]
    Queue(u32, String),
}

#[derive(Debug, thiserror::Error)]
pub enum RetrieveError {
    #[error("no buffer within {0:?}")]
    Timeout(Duration),
    #[error("retrieve failed: {0}")]
    Failed(String),
    /// The source has no more payloads and never will.
    #[error("end of stream")]
    EndOfStream,
}

/// Camera control channel.
pub trait Device {
    fn info(&self) -> &DeviceInfo;

    /// Bytes needed to hold one payload.
    fn payload_size(&self) -> usize;

    /// GigE Vision specific controls, present only on GigE devices.
    fn gige(&mut self) -> Option<&mut dyn GigeControl> {
        None
    }

    /// Enable streaming and execute AcquisitionStart.
    fn start_acquisition(&mut self) -> Result<(), DeviceError>;

    /// Execute AcquisitionStop and disable streaming.
    fn stop_acquisition(&mut self) -> Result<(), DeviceError>;

    fn disconnect(&mut self) -> Result<(), DeviceError>;
}

pub trait GigeControl {
    /// Find the largest packet size the path to the host supports and apply it.
    fn negotiate_packet_size(&mut self) -> Result<u32, DeviceError>;

    /// Point the device's stream channel at the host's receiving socket.
    fn set_stream_destination(&mut self, destination: SocketAddr) -> Result<(), DeviceError>;
}

/// Buffer streaming channel.
pub trait Stream {
    /// Host socket receiving the stream, for transports that have one.
    fn local_endpoint(&self) -> Option<SocketAddr> {
        None
    }

    /// Upper bound on buffers the stream can hold queued at once.
    fn queued_buffer_maximum(&self) -> usize;

    fn queue_buffer(&mut self, buffer: StreamBuffer) -> Result<(), DeviceError>;

    /// Block up to `timeout` for the next filled buffer.
    fn retrieve_buffer(&mut self, timeout: Duration) -> Result<Retrieved, RetrieveError>;

    fn queued_buffer_count(&self) -> usize;

    /// Cancel pending payloads and hand every queued buffer back.
    fn abort_queued_buffers(&mut self) -> Vec<StreamBuffer>;

    fn close(&mut self) -> Result<(), DeviceError>;
}

/// Backend entry point: connects the device and opens its stream.
pub trait Transport {
    fn connect(&mut self) -> Result<Box<dyn Device>, DeviceError>;

    fn open_stream(&mut self) -> Result<Box<dyn Stream>, DeviceError>;
}

/// Build the transport selected by `config.backend`.
pub fn transport(config: &CameraConfig) -> Box<dyn Transport> {
    match config.backend {
        Backend::Simulated => Box::new(simulated::SimulatedCamera::new(config)),
        Backend::Replay => Box::new(replay::ReplayTransport::new(config)),
    }
}
