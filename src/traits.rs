//! Core traits and types for single-frame V4L2 capture.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Pixel format representation (e.g., Y16, BG10, GREY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// 8-bit greyscale.
    pub const GREY: Self = Self::new(b"GREY");
    /// 16-bit little-endian greyscale.
    pub const Y16: Self = Self::new(b"Y16 ");
    /// 10-bit GRBG Bayer, one sample per 16-bit word.
    pub const SGRBG10: Self = Self::new(b"BA10");
    /// 10-bit BGGR Bayer, one sample per 16-bit word.
    pub const SBGGR10: Self = Self::new(b"BG10");
    /// 12-bit BGGR Bayer, one sample per 16-bit word.
    pub const SBGGR12: Self = Self::new(b"BG12");
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{}", char::from(byte))?;
        }
        Ok(())
    }
}

impl FromStr for FourCC {
    type Err = CaptureError;

    /// Parses one to four ASCII characters, padding short codes with spaces
    /// the way V4L2 spells them (`"Y16"` becomes `"Y16 "`).
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || s.len() > 4 || !s.is_ascii() {
            return Err(CaptureError::Usage(format!(
                "invalid pixel format {s:?}, expected one to four ASCII characters"
            )));
        }
        let mut code = [b' '; 4];
        for (slot, byte) in code.iter_mut().zip(s.bytes()) {
            *slot = byte;
        }
        Ok(Self(code))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Field ordering of a negotiated format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Driver may pick any ordering.
    Any,
    /// Whole frames, no interlacing.
    Progressive,
    /// Any interlaced or alternating ordering.
    Interlaced,
}

/// Negotiated capture format. Immutable once returned by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFormat {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Field ordering.
    pub field: Field,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total image size in bytes.
    pub size: u32,
}

impl PixelFormat {
    /// Create a progressive format with 16-bit samples and a tight stride.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let stride = width * 2;
        Self {
            width,
            height,
            fourcc,
            field: Field::Progressive,
            stride,
            size: stride * height,
        }
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Driver version as (major, minor, patch).
    pub version: (u8, u8, u8),
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Cropping bounds reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBounds {
    /// Left offset.
    pub left: i32,
    /// Top offset.
    pub top: i32,
    /// Width of the capturable area.
    pub width: u32,
    /// Height of the capturable area.
    pub height: u32,
}

/// One entry of the driver's format enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescriptor {
    /// Enumeration index.
    pub index: u32,
    /// Pixel format code.
    pub fourcc: FourCC,
    /// Human readable description.
    pub description: String,
    /// Compressed format flag.
    pub compressed: bool,
    /// Format emulated in software.
    pub emulated: bool,
}

/// Kernel buffer location as resolved by a buffer query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Buffer index.
    pub index: u32,
    /// Buffer length in bytes.
    pub length: u32,
    /// Offset to pass to the mapping call.
    pub offset: u32,
}

/// Outcome of waiting for the device to become readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// A filled buffer can be dequeued.
    Ready,
    /// The timeout elapsed first.
    TimedOut,
}

/// Filled buffer descriptor returned by a dequeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    /// Buffer index.
    pub index: u32,
    /// Bytes the driver wrote.
    pub bytes_used: u32,
    /// Frame sequence number.
    pub sequence: u32,
}

/// Error type for capture operations.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// Failed to open the device node.
    #[error("opening video device {}: {source}", .path.display())]
    DeviceOpen {
        /// Device node path.
        path: PathBuf,
        /// Underlying OS error.
        source: io::Error,
    },
    /// A device query was rejected or reported an unusable device.
    #[error("{operation}: {source}")]
    DeviceQuery {
        /// Query that failed.
        operation: &'static str,
        /// Underlying OS error.
        source: io::Error,
    },
    /// Setting the pixel format was rejected.
    #[error("setting pixel format: {0}")]
    FormatNegotiation(#[source] io::Error),
    /// The requested pixel format is not offered by the driver.
    #[error("pixel format {0} is not offered by the device")]
    FormatUnavailable(FourCC),
    /// The driver could not allocate the capture buffer.
    #[error("requesting buffer: {0}")]
    BufferRequest(#[source] io::Error),
    /// Mapping the capture buffer failed.
    #[error("mapping device memory: {0}")]
    BufferMap(#[source] io::Error),
    /// Queueing the buffer was rejected.
    #[error("queueing buffer: {0}")]
    Queue(#[source] io::Error),
    /// Stream-on was rejected.
    #[error("starting capture: {0}")]
    StreamStart(#[source] io::Error),
    /// Stream-off was rejected.
    #[error("stopping capture: {0}")]
    StreamStop(#[source] io::Error),
    /// The readiness wait itself failed.
    #[error("waiting for frame: {0}")]
    Wait(#[source] io::Error),
    /// No frame arrived before the deadline.
    #[error("no frame within {0:?}")]
    FrameTimeout(Duration),
    /// Dequeueing the filled buffer failed.
    #[error("retrieving frame: {0}")]
    Dequeue(#[source] io::Error),
    /// The driver returned a different buffer than the one queued.
    #[error("dequeued buffer {dequeued} but buffer {queued} was queued")]
    IndexMismatch {
        /// Index handed to the driver.
        queued: u32,
        /// Index handed back.
        dequeued: u32,
    },
    /// The captured buffer cannot hold the negotiated frame.
    #[error("frame needs {needed} bytes but buffer holds {available}")]
    FrameTooShort {
        /// Bytes required by the negotiated format.
        needed: usize,
        /// Bytes available in the mapping.
        available: usize,
    },
    /// A capture operation was invoked out of order.
    #[error("{operation} is not valid while {state}")]
    InvalidState {
        /// Operation attempted.
        operation: &'static str,
        /// State at the time of the call.
        state: &'static str,
    },
    /// Writing the output file failed.
    #[error("writing {}: {source}", .path.display())]
    Io {
        /// Destination path.
        path: PathBuf,
        /// Underlying OS error.
        source: io::Error,
    },
    /// Invalid command line input.
    #[error("{0}")]
    Usage(String),
    /// Captured or written data does not have the expected content.
    #[error("validation failed: {0}")]
    Validation(String),
}

/// Result type for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// A mapped capture buffer region. Dropping it releases the mapping.
pub trait FrameMemory {
    /// The mapped bytes.
    fn as_bytes(&self) -> &[u8];
}

/// Abstraction over the kernel interactions of a streaming capture device.
pub trait CaptureDevice {
    /// Mapped memory type returned by [`CaptureDevice::map`].
    type Memory: FrameMemory;

    /// Query driver capabilities.
    fn capabilities(&self) -> Result<DeviceCapabilities>;

    /// Query the cropping bounds of the capture type.
    fn crop_bounds(&self) -> Result<CropBounds>;

    /// Enumerate supported pixel formats, in driver order.
    fn formats(&self) -> Result<Vec<FormatDescriptor>>;

    /// Set the capture format. Returns the format as adjusted by the driver.
    fn set_format(&mut self, format: &PixelFormat) -> Result<PixelFormat>;

    /// Request `count` memory-mapped buffers. Returns the number granted.
    fn request_buffers(&mut self, count: u32) -> Result<u32>;

    /// Resolve length and offset of a requested buffer.
    fn query_buffer(&self, index: u32) -> Result<BufferDescriptor>;

    /// Map a queried buffer read/write, shared with the kernel.
    fn map(&self, buffer: &BufferDescriptor) -> Result<Self::Memory>;

    /// Hand a buffer to the driver for filling.
    fn queue(&mut self, index: u32) -> Result<()>;

    /// Start streaming.
    fn stream_on(&mut self) -> Result<()>;

    /// Block until the device is readable or `timeout` elapses.
    fn wait_readable(&self, timeout: Duration) -> Result<Readiness>;

    /// Take a filled buffer back from the driver.
    fn dequeue(&mut self) -> Result<DequeuedBuffer>;

    /// Stop streaming.
    fn stream_off(&mut self) -> Result<()>;
}
