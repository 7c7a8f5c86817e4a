//! Capture state machine: queue, stream on, wait, dequeue, stream off.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::buffer::MappedBuffer;
use crate::traits::{CaptureDevice, CaptureError, DequeuedBuffer, FrameMemory, Readiness, Result};

/// How long to wait for the driver to fill the buffer.
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(2);

/// Protocol state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Nothing handed to the driver yet.
    Idle,
    /// The buffer is queued.
    Queued,
    /// Stream-on succeeded.
    Streaming,
    /// The filled buffer was dequeued.
    FrameAvailable,
    /// Stream-off issued (or nothing was ever started).
    Stopped,
}

impl CaptureState {
    const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::Streaming => "streaming",
            Self::FrameAvailable => "frame available",
            Self::Stopped => "stopped",
        }
    }
}

/// A filled buffer handed back by the driver, with its descriptor.
#[derive(Debug)]
pub struct CapturedFrame<M> {
    buffer: MappedBuffer<M>,
    dequeued: DequeuedBuffer,
}

impl<M: FrameMemory> CapturedFrame<M> {
    /// The whole mapped buffer.
    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_bytes()
    }

    /// Mapped buffer length.
    pub const fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the mapping is empty.
    pub const fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Bytes the driver reported as filled.
    pub const fn bytes_used(&self) -> u32 {
        self.dequeued.bytes_used
    }

    /// Driver frame sequence number.
    pub const fn sequence(&self) -> u32 {
        self.dequeued.sequence
    }

    /// Give the mapping back, e.g. to unmap it explicitly.
    pub fn into_buffer(self) -> MappedBuffer<M> {
        self.buffer
    }
}

/// Drives the single-buffer capture protocol against a device.
///
/// Dropping the machine while the stream is on issues stream-off.
pub struct CaptureStateMachine<'d, D: CaptureDevice> {
    device: &'d mut D,
    state: CaptureState,
    queued: Option<u32>,
}

impl<'d, D: CaptureDevice> CaptureStateMachine<'d, D> {
    /// Start in [`CaptureState::Idle`].
    pub fn new(device: &'d mut D) -> Self {
        Self {
            device,
            state: CaptureState::Idle,
            queued: None,
        }
    }

    /// Current protocol state.
    pub const fn state(&self) -> CaptureState {
        self.state
    }

    fn expect_state(&self, operation: &'static str, allowed: &[CaptureState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CaptureError::InvalidState {
                operation,
                state: self.state.name(),
            })
        }
    }

    /// Enqueue buffer `index` for the driver to fill.
    pub fn queue(&mut self, index: u32) -> Result<()> {
        self.expect_state("queue", &[CaptureState::Idle])?;
        self.device.queue(index)?;
        self.queued = Some(index);
        self.state = CaptureState::Queued;
        debug!(index, "queued buffer");
        Ok(())
    }

    /// Issue stream-on.
    pub fn start_stream(&mut self) -> Result<()> {
        self.expect_state("stream on", &[CaptureState::Queued])?;
        self.device.stream_on()?;
        self.state = CaptureState::Streaming;
        debug!("stream on");
        Ok(())
    }

    /// Block until the driver has a filled buffer or `timeout` elapses.
    pub fn wait_for_frame(&mut self, timeout: Duration) -> Result<Readiness> {
        self.expect_state("wait for frame", &[CaptureState::Streaming])?;
        let readiness = self.device.wait_readable(timeout)?;
        debug!(?readiness, ?timeout, "frame wait finished");
        Ok(readiness)
    }

    /// Retrieve the filled buffer. The index must match the queued one.
    pub fn dequeue(&mut self) -> Result<DequeuedBuffer> {
        self.expect_state("dequeue", &[CaptureState::Streaming])?;
        let dequeued = self.device.dequeue()?;
        let queued = self.queued.unwrap_or_default();
        if dequeued.index != queued {
            return Err(CaptureError::IndexMismatch {
                queued,
                dequeued: dequeued.index,
            });
        }
        self.state = CaptureState::FrameAvailable;
        Ok(dequeued)
    }

    /// Issue stream-off. A no-op once stopped or if nothing was queued.
    pub fn stop_stream(&mut self) -> Result<()> {
        match self.state {
            CaptureState::Stopped => return Ok(()),
            CaptureState::Idle => {}
            CaptureState::Queued | CaptureState::Streaming | CaptureState::FrameAvailable => {
                // Marked stopped first so a failed stream-off is not retried on drop.
                self.state = CaptureState::Stopped;
                self.device.stream_off()?;
                debug!("stream off");
            }
        }
        self.state = CaptureState::Stopped;
        Ok(())
    }

    /// Run the whole protocol for `buffer` and hand it back filled.
    ///
    /// A timeout aborts with [`CaptureError::FrameTimeout`]; there is no retry.
    pub fn capture<M: FrameMemory>(
        self,
        buffer: MappedBuffer<M>,
        timeout: Duration,
    ) -> Result<CapturedFrame<M>> {
        self.capture_with(buffer, timeout, |_| Ok(()))
    }

    /// Like [`capture`](Self::capture), reporting every state reached to
    /// `observe`. An error from `observe` aborts the capture.
    ///
    /// A stream-off failure after the frame was dequeued is fatal: the
    /// frame is dropped and [`CaptureError::StreamStop`] returned.
    pub fn capture_with<M, F>(
        mut self,
        buffer: MappedBuffer<M>,
        timeout: Duration,
        mut observe: F,
    ) -> Result<CapturedFrame<M>>
    where
        M: FrameMemory,
        F: FnMut(CaptureState) -> Result<()>,
    {
        self.queue(buffer.index())?;
        observe(self.state)?;
        self.start_stream()?;
        observe(self.state)?;

        if self.wait_for_frame(timeout)? == Readiness::TimedOut {
            return Err(CaptureError::FrameTimeout(timeout));
        }

        let dequeued = self.dequeue()?;
        observe(self.state)?;
        self.stop_stream()?;
        observe(self.state)?;
        info!(
            bytes_used = dequeued.bytes_used,
            sequence = dequeued.sequence,
            "image captured"
        );

        Ok(CapturedFrame { buffer, dequeued })
    }
}

impl<D: CaptureDevice> Drop for CaptureStateMachine<'_, D> {
    fn drop(&mut self) {
        if let Err(err) = self.stop_stream() {
            warn!(%err, "stream off during teardown failed");
        }
    }
}
