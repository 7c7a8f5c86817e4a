//! Device session: open, capability query and pixel format negotiation.

use std::io;
use std::path::Path;

use tracing::{debug, info};

use crate::device::V4L2Device;
use crate::traits::{
    CaptureDevice, CaptureError, DeviceCapabilities, Field, FormatDescriptor, FourCC, PixelFormat,
    Result,
};

/// Exclusive owner of an opened capture device.
///
/// Dropping the session closes the device.
pub struct DeviceSession<D> {
    device: D,
}

impl DeviceSession<V4L2Device> {
    /// Open the device node at `path`. Fails before anything else happens.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let device = V4L2Device::open(path)?;
        info!(path = %device.path().display(), "opened device");
        Ok(Self::new(device))
    }
}

impl<D: CaptureDevice> DeviceSession<D> {
    /// Wrap an already opened device.
    pub const fn new(device: D) -> Self {
        Self { device }
    }

    /// Shared access to the device.
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// Exclusive access to the device.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Query capabilities and require video capture with streaming I/O.
    pub fn query_capabilities(&self) -> Result<DeviceCapabilities> {
        let caps = self.device.capabilities()?;
        info!(
            driver = %caps.driver,
            card = %caps.card,
            bus = %caps.bus_info,
            version = %format_args!("{}.{}.{}", caps.version.0, caps.version.1, caps.version.2),
            "driver capabilities"
        );

        if !caps.can_capture || !caps.can_stream {
            return Err(CaptureError::DeviceQuery {
                operation: "querying capabilities",
                source: io::Error::new(
                    io::ErrorKind::Unsupported,
                    "device lacks video capture or streaming I/O",
                ),
            });
        }

        Ok(caps)
    }

    /// Negotiate the capture format.
    ///
    /// Width and height come from the driver's crop bounds, the field order is
    /// progressive. With no `candidate`, the last format the driver enumerates
    /// is used. The returned format is the one the driver actually applied.
    pub fn negotiate_format(&mut self, candidate: Option<FourCC>) -> Result<PixelFormat> {
        let bounds = self.device.crop_bounds()?;
        debug!(
            width = bounds.width,
            height = bounds.height,
            left = bounds.left,
            top = bounds.top,
            "crop bounds"
        );

        let formats = self.device.formats()?;
        for desc in &formats {
            debug!(
                index = desc.index,
                fourcc = %desc.fourcc,
                compressed = desc.compressed,
                emulated = desc.emulated,
                description = %desc.description,
                "supported format"
            );
        }
        let fourcc = select_format(&formats, candidate)?;

        let requested = PixelFormat {
            width: bounds.width,
            height: bounds.height,
            fourcc,
            field: Field::Progressive,
            stride: 0,
            size: 0,
        };
        let format = self.device.set_format(&requested)?;
        info!(
            width = format.width,
            height = format.height,
            fourcc = %format.fourcc,
            field = ?format.field,
            stride = format.stride,
            "selected camera mode"
        );

        Ok(format)
    }
}

/// Pick the format to request from the enumerated list.
pub fn select_format(formats: &[FormatDescriptor], candidate: Option<FourCC>) -> Result<FourCC> {
    match candidate {
        Some(fourcc) => formats
            .iter()
            .any(|desc| desc.fourcc == fourcc)
            .then_some(fourcc)
            .ok_or(CaptureError::FormatUnavailable(fourcc)),
        None => formats.last().map(|desc| desc.fourcc).ok_or_else(|| {
            CaptureError::FormatNegotiation(io::Error::new(
                io::ErrorKind::NotFound,
                "driver enumerates no formats",
            ))
        }),
    }
}
