use line_stitch_common::frame::RawFrame;
use tracing::{debug, info, warn};

use crate::device::{Device, DeviceError, Stream, StreamBuffer};

/// Buffers handed to a stream by [`create_stream_buffers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSet {
    pub allocated: usize,
    pub payload_size: usize,
}

/// Allocate up to `requested` payload buffers and queue every one of them.
///
/// The count is capped by what the stream can hold queued at once.
pub fn create_stream_buffers(
    device: &dyn Device,
    stream: &mut dyn Stream,
    requested: usize,
) -> Result<BufferSet, DeviceError> {
    let maximum = stream.queued_buffer_maximum();
    let count = requested.min(maximum);
    if count == 0 {
        return Err(DeviceError::Queue(0, "stream accepts no buffers".into()));
    }
    if count < requested {
        warn!(requested, maximum, "buffer count capped by stream");
    }

    let payload_size = device.payload_size();
    for id in 0..count {
        stream.queue_buffer(StreamBuffer::new(id as u32, payload_size))?;
    }

    info!(count, payload_size, "stream buffers queued");
    Ok(BufferSet {
        allocated: count,
        payload_size,
    })
}

/// A retrieved buffer on loan from its stream.
///
/// Dropping the lease queues the buffer again, so every exit path returns it.
pub struct BufferLease<'a> {
    stream: &'a mut dyn Stream,
    buffer: Option<StreamBuffer>,
}

impl<'a> BufferLease<'a> {
    pub fn new(stream: &'a mut dyn Stream, buffer: StreamBuffer) -> Self {
        Self {
            stream,
            buffer: Some(buffer),
        }
    }

    pub fn buffer(&self) -> Option<&StreamBuffer> {
        self.buffer.as_ref()
    }

    /// The image payload, if the buffer holds one.
    pub fn frame(&self) -> Option<&RawFrame> {
        self.buffer.as_ref().and_then(StreamBuffer::frame)
    }
}

impl Drop for BufferLease<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            let id = buffer.id();
            if let Err(e) = self.stream.queue_buffer(buffer) {
                warn!(buffer = id, error = %e, "failed to re-queue buffer");
            }
        }
    }
}

/// Cancel pending payloads and take every queued buffer back for release.
///
/// Returns the number of buffers recovered.
pub fn drain_stream(stream: &mut dyn Stream, buffers: &BufferSet) -> usize {
    let queued = stream.queued_buffer_count();
    let recovered = stream.abort_queued_buffers();
    let released = recovered.len();
    if released != buffers.allocated {
        warn!(
            queued,
            released,
            allocated = buffers.allocated,
            "not every buffer came back from the stream"
        );
    } else {
        debug!(released, "stream buffers released");
    }
    released
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::simulated::{SimulatedCamera, SIM_QUEUED_BUFFER_MAXIMUM};
    use crate::device::Transport;
    use line_stitch_common::config::{CameraConfig, SimulatedTransport};
    use std::time::Duration;

    fn usb3_camera() -> (Box<dyn Device>, Box<dyn Stream>) {
        let config = CameraConfig {
            transport: SimulatedTransport::Usb3,
            width: 8,
            warmup_blank_frames: 0,
            ..CameraConfig::default()
        };
        let mut camera = SimulatedCamera::new(&config);
        let device = camera.connect().unwrap();
        let stream = camera.open_stream().unwrap();
        (device, stream)
    }

    #[test]
    fn queues_requested_buffers() {
        let (device, mut stream) = usb3_camera();
        let set = create_stream_buffers(device.as_ref(), stream.as_mut(), 16).unwrap();

        assert_eq!(set.allocated, 16);
        assert_eq!(set.payload_size, 8);
        assert_eq!(stream.queued_buffer_count(), 16);
    }

    #[test]
    fn caps_at_stream_maximum() {
        let (device, mut stream) = usb3_camera();
        let set = create_stream_buffers(device.as_ref(), stream.as_mut(), 1000).unwrap();
        assert_eq!(set.allocated, SIM_QUEUED_BUFFER_MAXIMUM);
    }

    #[test]
    fn zero_buffers_is_an_error() {
        let (device, mut stream) = usb3_camera();
        assert!(create_stream_buffers(device.as_ref(), stream.as_mut(), 0).is_err());
    }

    #[test]
    fn dropping_lease_requeues_buffer() {
        let (mut device, mut stream) = usb3_camera();
        create_stream_buffers(device.as_ref(), stream.as_mut(), 4).unwrap();
        device.start_acquisition().unwrap();

        let retrieved = stream.retrieve_buffer(Duration::from_millis(5)).unwrap();
        assert_eq!(stream.queued_buffer_count(), 3);

        {
            let lease = BufferLease::new(stream.as_mut(), retrieved.buffer);
            assert_eq!(lease.frame().unwrap().width(), 8);
            assert_eq!(lease.buffer().unwrap().id(), 0);
        }
        assert_eq!(stream.queued_buffer_count(), 4);
    }

    #[test]
    fn drain_recovers_all_buffers() {
        let (device, mut stream) = usb3_camera();
        let set = create_stream_buffers(device.as_ref(), stream.as_mut(), 5).unwrap();

        assert_eq!(drain_stream(stream.as_mut(), &set), 5);
        assert_eq!(stream.queued_buffer_count(), 0);
    }

    #[test]
    fn drain_reports_buffers_still_out() {
        let (mut device, mut stream) = usb3_camera();
        let set = create_stream_buffers(device.as_ref(), stream.as_mut(), 5).unwrap();
        device.start_acquisition().unwrap();

        let _held = stream.retrieve_buffer(Duration::from_millis(5)).unwrap();
        assert_eq!(drain_stream(stream.as_mut(), &set), 4);
    }
}
