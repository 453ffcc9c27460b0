//! One capture run: connect, configure, stream, stitch, and tear everything down again.

use line_stitch_common::config::Config;
use line_stitch_stitcher::{CompositeSink, FrameAccumulator, PngWriter};
use tracing::{debug, info, warn};

use crate::acquisition::{acquire_images, AcquisitionOptions, AcquisitionStats, CancelToken};
use crate::buffers::{create_stream_buffers, drain_stream, BufferSet};
use crate::device::{self, Device, DeviceError, DeviceInfo, Stream, Transport};
use crate::CaptureError;

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub device: DeviceInfo,
    /// Negotiated GigE packet size. `None` for other transports.
    pub packet_size: Option<u32>,
    pub buffers: BufferSet,
    /// Buffers recovered from the stream during teardown.
    pub released: usize,
    pub stats: AcquisitionStats,
}

/// Run a capture session writing PNG composites to the configured output directory.
pub fn run(config: &Config, cancel: &CancelToken) -> Result<SessionSummary, CaptureError> {
    let mut sink = PngWriter::new(&config.output.directory, config.output.naming);
    run_with_sink(config, &mut sink, cancel)
}

pub fn run_with_sink(
    config: &Config,
    sink: &mut dyn CompositeSink,
    cancel: &CancelToken,
) -> Result<SessionSummary, CaptureError> {
    let mut transport = device::transport(&config.camera);
    run_on(transport.as_mut(), config, sink, cancel)
}

/// Drive a full session over `transport`.
///
/// Once the stream is open, teardown always runs. A loop failure is returned after it.
pub fn run_on(
    transport: &mut dyn Transport,
    config: &Config,
    sink: &mut dyn CompositeSink,
    cancel: &CancelToken,
) -> Result<SessionSummary, CaptureError> {
    let mut device = transport.connect()?;
    let info = device.info().clone();
    info!(
        connection_id = info.connection_id,
        model = info.model,
        transport = ?info.transport,
        "device connected"
    );

    let mut stream = match transport.open_stream() {
        Ok(s) => s,
        Err(e) => {
            if let Err(de) = device.disconnect() {
                warn!(error = %de, "disconnect failed");
            }
            return Err(e.into());
        }
    };

    let (packet_size, buffers) = match prepare(
        device.as_mut(),
        stream.as_mut(),
        config.acquisition.buffer_count,
    ) {
        Ok(prepared) => prepared,
        Err(e) => {
            teardown(device.as_mut(), stream.as_mut(), None);
            return Err(e.into());
        }
    };

    let mut accumulator = FrameAccumulator::from_config(&config.stitch);
    let options = AcquisitionOptions::from_config(config);
    let outcome = acquire_images(stream.as_mut(), &mut accumulator, sink, &options, cancel);

    accumulator.reset();
    let released = teardown(device.as_mut(), stream.as_mut(), Some(&buffers));
    let stats = outcome?;

    info!(
        composites = stats.composites,
        retrieved = stats.retrieved,
        released,
        "session finished"
    );
    Ok(SessionSummary {
        device: info,
        packet_size,
        buffers,
        released,
        stats,
    })
}

/// Configure the stream channel, queue buffers and start acquisition.
fn prepare(
    device: &mut dyn Device,
    stream: &mut dyn Stream,
    buffer_count: usize,
) -> Result<(Option<u32>, BufferSet), DeviceError> {
    let packet_size = configure_stream(device, stream)?;
    let buffers = create_stream_buffers(device, stream, buffer_count)?;
    device.start_acquisition()?;
    info!("acquisition started");
    Ok((packet_size, buffers))
}

/// Apply GigE Vision stream settings. Devices without GigE controls are left as they are.
pub fn configure_stream(
    device: &mut dyn Device,
    stream: &dyn Stream,
) -> Result<Option<u32>, DeviceError> {
    let Some(gige) = device.gige() else {
        debug!("no GigE controls, stream configuration skipped");
        return Ok(None);
    };

    let packet_size = gige.negotiate_packet_size()?;
    let destination = stream
        .local_endpoint()
        .ok_or_else(|| DeviceError::Command {
            command: "SetStreamDestination",
            reason: "stream has no local endpoint".into(),
        })?;
    gige.set_stream_destination(destination)?;

    info!(packet_size, %destination, "GigE stream configured");
    Ok(Some(packet_size))
}

/// Stop, drain, close, disconnect. Failures are logged and do not stop later steps.
fn teardown(
    device: &mut dyn Device,
    stream: &mut dyn Stream,
    buffers: Option<&BufferSet>,
) -> usize {
    if let Err(e) = device.stop_acquisition() {
        warn!(error = %e, "AcquisitionStop failed");
    }
    let released = match buffers {
        Some(set) => drain_stream(stream, set),
        None => stream.abort_queued_buffers().len(),
    };
    if let Err(e) = stream.close() {
        warn!(error = %e, "stream close failed");
    }
    if let Err(e) = device.disconnect() {
        warn!(error = %e, "disconnect failed");
    }
    released
}
