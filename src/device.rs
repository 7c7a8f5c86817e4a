//! V4L2 device implementation using the v4l crate.

use std::os::raw::c_int;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;
use v4l::format::description::Flags as FormatFlags;
use v4l::format::FieldOrder;
use v4l::video::Capture;
use v4l::Device;

use crate::sys::{self, MmapRegion};
use crate::traits::{
    BufferDescriptor, CaptureDevice, CaptureError, CropBounds, DequeuedBuffer, DeviceCapabilities,
    Field, FormatDescriptor, FourCC, PixelFormat, Readiness, Result,
};

/// V4L2 device implementation wrapping the v4l crate.
///
/// The device node is closed when this value is dropped.
pub struct V4L2Device {
    device: Device,
    path: PathBuf,
}

impl V4L2Device {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    pub fn open_index(index: u32) -> Result<Self> {
        Self::open(device_path(index))
    }

    /// Open a V4L2 device node by path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let device = Device::with_path(&path).map_err(|source| CaptureError::DeviceOpen {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "opened video device");

        Ok(Self { device, path })
    }

    /// Path of the opened device node.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> c_int {
        self.device.handle().fd()
    }
}

/// Device node for a device index.
pub fn device_path(index: u32) -> PathBuf {
    PathBuf::from(format!("/dev/video{index}"))
}

const fn field_from_v4l(order: FieldOrder) -> Field {
    match order {
        FieldOrder::Any => Field::Any,
        FieldOrder::Progressive => Field::Progressive,
        _ => Field::Interlaced,
    }
}

const fn field_to_v4l(field: Field) -> FieldOrder {
    match field {
        Field::Any => FieldOrder::Any,
        Field::Progressive => FieldOrder::Progressive,
        Field::Interlaced => FieldOrder::Interlaced,
    }
}

fn format_from_v4l(fmt: &v4l::Format) -> PixelFormat {
    PixelFormat {
        width: fmt.width,
        height: fmt.height,
        fourcc: FourCC::from(fmt.fourcc),
        field: field_from_v4l(fmt.field_order),
        stride: fmt.stride,
        size: fmt.size,
    }
}

impl CaptureDevice for V4L2Device {
    type Memory = MmapRegion;

    fn capabilities(&self) -> Result<DeviceCapabilities> {
        let caps = self
            .device
            .query_caps()
            .map_err(|source| CaptureError::DeviceQuery {
                operation: "querying capabilities",
                source,
            })?;

        Ok(DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            version: caps.version,
            can_capture: caps
                .capabilities
                .contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        })
    }

    fn crop_bounds(&self) -> Result<CropBounds> {
        sys::crop_bounds(self.fd()).map_err(|source| CaptureError::DeviceQuery {
            operation: "querying cropping capabilities",
            source,
        })
    }

    fn formats(&self) -> Result<Vec<FormatDescriptor>> {
        let formats = self
            .device
            .enum_formats()
            .map_err(|source| CaptureError::DeviceQuery {
                operation: "enumerating formats",
                source,
            })?;

        Ok(formats
            .into_iter()
            .map(|desc| FormatDescriptor {
                index: desc.index,
                fourcc: FourCC::from(desc.fourcc),
                description: desc.description,
                compressed: desc.flags.contains(FormatFlags::COMPRESSED),
                emulated: desc.flags.contains(FormatFlags::EMULATED),
            })
            .collect())
    }

    fn set_format(&mut self, format: &PixelFormat) -> Result<PixelFormat> {
        let mut fmt = self
            .device
            .format()
            .map_err(CaptureError::FormatNegotiation)?;

        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();
        fmt.field_order = field_to_v4l(format.field);

        let fmt = self
            .device
            .set_format(&fmt)
            .map_err(CaptureError::FormatNegotiation)?;

        Ok(format_from_v4l(&fmt))
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32> {
        sys::request_buffers(self.fd(), count).map_err(CaptureError::BufferRequest)
    }

    fn query_buffer(&self, index: u32) -> Result<BufferDescriptor> {
        sys::query_buffer(self.fd(), index).map_err(CaptureError::BufferRequest)
    }

    fn map(&self, buffer: &BufferDescriptor) -> Result<Self::Memory> {
        MmapRegion::map(self.fd(), buffer).map_err(CaptureError::BufferMap)
    }

    fn queue(&mut self, index: u32) -> Result<()> {
        sys::queue(self.fd(), index).map_err(CaptureError::Queue)
    }

    fn stream_on(&mut self) -> Result<()> {
        sys::stream_on(self.fd()).map_err(CaptureError::StreamStart)
    }

    fn wait_readable(&self, timeout: Duration) -> Result<Readiness> {
        sys::wait_readable(self.fd(), timeout).map_err(CaptureError::Wait)
    }

    fn dequeue(&mut self) -> Result<DequeuedBuffer> {
        sys::dequeue(self.fd()).map_err(CaptureError::Dequeue)
    }

    fn stream_off(&mut self) -> Result<()> {
        sys::stream_off(self.fd()).map_err(CaptureError::StreamStop)
    }
}
