use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use line_stitch_common::config::{Config, MismatchPolicy};
use line_stitch_stitcher::{Action, CompositeSink, FrameAccumulator, StitchError};
use tracing::{debug, error, info, warn};

use crate::buffers::BufferLease;
use crate::device::{RetrieveError, Stream, StreamBuffer};
use crate::CaptureError;

/// Cooperative stop signal, checked between retrieve calls.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters for one acquisition run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    pub retrieved: u64,
    pub timeouts: u64,
    pub retrieve_errors: u64,
    pub bad_status: u64,
    /// Buffers that carried a non-image payload.
    pub non_image: u64,
    pub dropped: u64,
    pub started: u64,
    pub appended: u64,
    pub composites: u64,
    pub encode_failures: u64,
    pub mismatches_skipped: u64,
    pub written: Vec<PathBuf>,
}

impl AcquisitionStats {
    /// Flushes that reached the sink, including those it failed to write.
    pub fn flush_attempts(&self) -> u64 {
        self.composites + self.encode_failures
    }
}

#[derive(Debug, Clone)]
pub struct AcquisitionOptions {
    pub retrieve_timeout: Duration,
    /// Stop once this many composites were flushed, written or not. 0 runs until cancelled.
    pub stop_after_composites: u64,
    pub on_width_mismatch: MismatchPolicy,
}

impl AcquisitionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retrieve_timeout: Duration::from_millis(config.acquisition.retrieve_timeout_ms),
            stop_after_composites: u64::from(config.acquisition.stop_after_composites),
            on_width_mismatch: config.stitch.on_width_mismatch,
        }
    }

    fn done(&self, stats: &AcquisitionStats) -> bool {
        self.stop_after_composites > 0 && stats.flush_attempts() >= self.stop_after_composites
    }
}

/// Retrieve buffers and feed their frames to `accumulator` until cancelled, the composite
/// quota is met, or the stream runs dry.
///
/// Every retrieved buffer is queued again before the next retrieve, whatever happened to it.
pub fn acquire_images(
    stream: &mut dyn Stream,
    accumulator: &mut FrameAccumulator,
    sink: &mut dyn CompositeSink,
    options: &AcquisitionOptions,
    cancel: &CancelToken,
) -> Result<AcquisitionStats, CaptureError> {
    let mut stats = AcquisitionStats::default();

    info!(
        target_frames = accumulator.target(),
        stop_after = options.stop_after_composites,
        timeout_ms = options.retrieve_timeout.as_millis() as u64,
        "acquisition loop started"
    );

    loop {
        if cancel.is_cancelled() {
            info!("acquisition cancelled");
            break;
        }
        if options.done(&stats) {
            info!(
                composites = stats.composites,
                encode_failures = stats.encode_failures,
                "composite quota reached"
            );
            break;
        }

        let retrieved = match stream.retrieve_buffer(options.retrieve_timeout) {
            Ok(r) => r,
            Err(RetrieveError::Timeout(timeout)) => {
                stats.timeouts += 1;
                warn!(timeout_ms = timeout.as_millis() as u64, "no buffer retrieved");
                continue;
            }
            Err(RetrieveError::Failed(reason)) => {
                stats.retrieve_errors += 1;
                warn!(%reason, "buffer retrieve failed");
                continue;
            }
            Err(RetrieveError::EndOfStream) => {
                info!("stream exhausted");
                break;
            }
        };
        stats.retrieved += 1;

        let status = retrieved.status;
        let lease = BufferLease::new(&mut *stream, retrieved.buffer);

        if !status.is_ok() {
            stats.bad_status += 1;
            warn!(
                buffer = ?lease.buffer().map(StreamBuffer::id),
                %status,
                "buffer operation failed"
            );
            continue;
        }
        let Some(frame) = lease.frame() else {
            stats.non_image += 1;
            debug!("payload is not an image");
            continue;
        };

        match accumulator.ingest(frame, sink) {
            Ok(Action::Dropped) => stats.dropped += 1,
            Ok(Action::Started) => stats.started += 1,
            Ok(Action::Appended) => stats.appended += 1,
            Ok(Action::Flushed(report)) => {
                stats.composites += 1;
                stats.written.push(report.path);
            }
            Err(StitchError::Encode(_)) => {
                stats.encode_failures += 1;
            }
            Err(e) if e.is_mismatch() => match options.on_width_mismatch {
                MismatchPolicy::Skip => {
                    stats.mismatches_skipped += 1;
                    warn!(error = %e, "frame does not fit composite, skipped");
                }
                MismatchPolicy::Abort => {
                    error!(error = %e, "frame does not fit composite, aborting");
                    drop(lease);
                    return Err(e.into());
                }
            },
            Err(e) => return Err(e.into()),
        }
    }

    info!(
        retrieved = stats.retrieved,
        dropped = stats.dropped,
        composites = stats.composites,
        timeouts = stats.timeouts,
        bad_status = stats.bad_status,
        "acquisition loop finished"
    );
    Ok(stats)
}
