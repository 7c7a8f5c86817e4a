//! End-to-end single-frame capture.
//!
//! Stages run strictly in order: open, capability query, format negotiation,
//! buffer setup, capture, unpack, write. Any failure aborts the run. Resources
//! are released in reverse order of acquisition on every path: stream-off,
//! unmap, close.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};

use crate::buffer;
use crate::capture::{CaptureState, CaptureStateMachine, DEFAULT_FRAME_TIMEOUT};
use crate::device::{device_path, V4L2Device};
use crate::session::DeviceSession;
use crate::traits::{CaptureDevice, CaptureError, FourCC, PixelFormat, Result};
use crate::unpack::{BitShift, PixelUnpacker};
use crate::writer::{output_parts, FrameWriter, OutputLayout, DEFAULT_OUTPUT};

/// Lifecycle of one capture session.
///
/// States are ordered; a session only ever moves forward through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Nothing open yet.
    Closed,
    /// Device node open.
    Opened,
    /// Driver applied a capture format.
    FormatNegotiated,
    /// Capture buffer mapped.
    BufferReady,
    /// Buffer queued and stream on.
    Streaming,
    /// Filled buffer dequeued.
    FrameAvailable,
    /// Stream off. Terminal.
    Stopped,
}

impl SessionState {
    /// Lower-case name used in logs and errors.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Opened => "opened",
            Self::FormatNegotiated => "format negotiated",
            Self::BufferReady => "buffer ready",
            Self::Streaming => "streaming",
            Self::FrameAvailable => "frame available",
            Self::Stopped => "stopped",
        }
    }
}

/// States a session has passed through, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTrace {
    states: Vec<SessionState>,
}

impl SessionTrace {
    /// Trace of a session whose device was just opened.
    fn opened() -> Self {
        Self {
            states: vec![SessionState::Closed, SessionState::Opened],
        }
    }

    /// Most recent state.
    pub fn current(&self) -> SessionState {
        self.states
            .last()
            .copied()
            .unwrap_or(SessionState::Closed)
    }

    /// Every state recorded so far.
    pub fn states(&self) -> &[SessionState] {
        &self.states
    }

    /// Record `next`, which must lie strictly after the current state.
    pub fn advance(&mut self, next: SessionState) -> Result<()> {
        let current = self.current();
        if next <= current {
            return Err(CaptureError::InvalidState {
                operation: next.name(),
                state: current.name(),
            });
        }
        debug!(from = current.name(), to = next.name(), "session state");
        self.states.push(next);
        Ok(())
    }

    fn follow(&mut self, state: CaptureState) -> Result<()> {
        match state {
            CaptureState::Idle | CaptureState::Queued => Ok(()),
            CaptureState::Streaming => self.advance(SessionState::Streaming),
            CaptureState::FrameAvailable => self.advance(SessionState::FrameAvailable),
            CaptureState::Stopped => self.advance(SessionState::Stopped),
        }
    }
}

/// Everything a run needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Device node to open.
    pub device: PathBuf,
    /// Downshift applied to the captured samples.
    pub shift: BitShift,
    /// Pixel format to request. `None` takes the last one the driver lists.
    pub pixel_format: Option<FourCC>,
    /// Frame readiness deadline.
    pub timeout: Duration,
    /// Output file.
    pub output: PathBuf,
    /// Output file contents.
    pub layout: OutputLayout,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: device_path(0),
            shift: BitShift::default(),
            pixel_format: None,
            timeout: DEFAULT_FRAME_TIMEOUT,
            output: PathBuf::from(DEFAULT_OUTPUT),
            layout: OutputLayout::default(),
        }
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureReport {
    /// Format the driver applied.
    pub format: PixelFormat,
    /// Mapped buffer length.
    pub buffer_length: usize,
    /// Bytes the driver filled.
    pub bytes_used: u32,
    /// Driver frame sequence number.
    pub sequence: u32,
    /// Bytes written to `output`.
    pub bytes_written: usize,
    /// Where the frame went.
    pub output: PathBuf,
    /// Downshift applied.
    pub shift: BitShift,
    /// Session states in the order they were reached.
    pub states: Vec<SessionState>,
}

/// One capture session over an opened device.
pub struct Pipeline<D> {
    session: DeviceSession<D>,
    config: CaptureConfig,
    trace: SessionTrace,
}

impl Pipeline<V4L2Device> {
    /// Open the configured device node.
    pub fn open(config: CaptureConfig) -> Result<Self> {
        let session = DeviceSession::open(&config.device)?;
        Ok(Self::with_session(session, config))
    }
}

/// Open the configured device, capture one frame and close the device.
pub fn run(config: CaptureConfig) -> Result<CaptureReport> {
    let mut pipeline = Pipeline::open(config)?;
    let report = pipeline.run();
    pipeline.close();
    report
}

impl<D: CaptureDevice> Pipeline<D> {
    /// Pipeline over an already opened device.
    pub fn new(device: D, config: CaptureConfig) -> Self {
        Self::with_session(DeviceSession::new(device), config)
    }

    fn with_session(session: DeviceSession<D>, config: CaptureConfig) -> Self {
        Self {
            session,
            config,
            trace: SessionTrace::opened(),
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.trace.current()
    }

    /// States reached so far.
    pub const fn trace(&self) -> &SessionTrace {
        &self.trace
    }

    /// Run configuration.
    pub const fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Capture, convert and save one frame.
    ///
    /// A session captures once: calling this outside the `Opened` state is
    /// [`CaptureError::InvalidState`]. If the run fails after the stream was
    /// started, the session still ends `Stopped` because stream-off was
    /// issued while unwinding.
    pub fn run(&mut self) -> Result<CaptureReport> {
        let state = self.state();
        if state != SessionState::Opened {
            return Err(CaptureError::InvalidState {
                operation: "run",
                state: state.name(),
            });
        }

        let result = self.run_stages();
        if result.is_err()
            && matches!(
                self.state(),
                SessionState::Streaming | SessionState::FrameAvailable
            )
        {
            self.trace.advance(SessionState::Stopped)?;
        }
        result
    }

    /// Release the device.
    pub fn close(self) {
        info!(state = self.state().name(), "closing device");
        drop(self.session);
    }

    fn run_stages(&mut self) -> Result<CaptureReport> {
        self.session.query_capabilities()?;
        let format = self.session.negotiate_format(self.config.pixel_format)?;
        self.trace.advance(SessionState::FormatNegotiated)?;

        let mapped = buffer::allocate(self.session.device_mut())?;
        self.trace.advance(SessionState::BufferReady)?;

        let trace = &mut self.trace;
        let frame = CaptureStateMachine::new(self.session.device_mut()).capture_with(
            mapped,
            self.config.timeout,
            |state| trace.follow(state),
        )?;

        let unpacked = if self.config.shift.is_passthrough() {
            None
        } else {
            let unpacker = PixelUnpacker::new(&format, self.config.shift);
            let out = unpacker.unpack(frame.as_bytes())?;
            debug!(samples = out.len(), shift = %self.config.shift, "unpacked frame");
            Some(out)
        };

        let bytes_used = frame.bytes_used();
        let parts = output_parts(
            self.config.layout,
            frame.as_bytes(),
            unpacked.as_deref(),
            bytes_used as usize,
        );
        let bytes_written = FrameWriter::new(&self.config.output).write_parts(&parts)?;

        let report = CaptureReport {
            format,
            buffer_length: frame.len(),
            bytes_used,
            sequence: frame.sequence(),
            bytes_written,
            output: self.config.output.clone(),
            shift: self.config.shift,
            states: self.trace.states().to_vec(),
        };

        buffer::unmap(frame.into_buffer());
        Ok(report)
    }
}
