//! Mock device implementation for testing without hardware.

use std::cell::{Cell, RefCell};
use std::io;
use std::rc::Rc;
use std::time::Duration;

use crate::traits::{
    BufferDescriptor, CaptureDevice, CaptureError, CropBounds, DequeuedBuffer, DeviceCapabilities,
    FormatDescriptor, FourCC, FrameMemory, PixelFormat, Readiness, Result,
};

/// A device call, as recorded in the [`Journal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// Capability query.
    Capabilities,
    /// Crop bounds query.
    CropBounds,
    /// Format enumeration.
    Formats,
    /// Set format.
    SetFormat,
    /// Buffer request with count.
    RequestBuffers(u32),
    /// Buffer query with index.
    QueryBuffer(u32),
    /// Map with index.
    Map(u32),
    /// Queue with index.
    Queue(u32),
    /// Stream on.
    StreamOn,
    /// Readiness wait with timeout.
    Wait(Duration),
    /// Dequeue.
    Dequeue,
    /// Stream off.
    StreamOff,
}

/// Device operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Capability query.
    Capabilities,
    /// Crop bounds query.
    CropBounds,
    /// Format enumeration.
    Formats,
    /// Set format.
    SetFormat,
    /// Buffer request.
    RequestBuffers,
    /// Buffer query.
    QueryBuffer,
    /// Mapping.
    Map,
    /// Queue.
    Queue,
    /// Stream on.
    StreamOn,
    /// Readiness wait.
    Wait,
    /// Dequeue.
    Dequeue,
    /// Stream off.
    StreamOff,
}

impl Stage {
    fn error(self) -> CaptureError {
        let source = io::Error::from_raw_os_error(libc::EINVAL);
        match self {
            Self::Capabilities => CaptureError::DeviceQuery {
                operation: "querying capabilities",
                source,
            },
            Self::CropBounds => CaptureError::DeviceQuery {
                operation: "querying cropping capabilities",
                source,
            },
            Self::Formats => CaptureError::DeviceQuery {
                operation: "enumerating formats",
                source,
            },
            Self::SetFormat => CaptureError::FormatNegotiation(source),
            Self::RequestBuffers | Self::QueryBuffer => CaptureError::BufferRequest(source),
            Self::Map => CaptureError::BufferMap(source),
            Self::Queue => CaptureError::Queue(source),
            Self::StreamOn => CaptureError::StreamStart(source),
            Self::Wait => CaptureError::Wait(source),
            Self::Dequeue => CaptureError::Dequeue(source),
            Self::StreamOff => CaptureError::StreamStop(source),
        }
    }
}

/// Shared record of device calls and released mappings.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    calls: Rc<RefCell<Vec<Call>>>,
    unmapped: Rc<Cell<usize>>,
}

impl Journal {
    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    /// Calls recorded so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    /// Forget recorded calls.
    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }

    /// Number of mappings released.
    pub fn unmapped(&self) -> usize {
        self.unmapped.get()
    }
}

/// Sample pattern written into mapped buffers.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// Every sample has the same value.
    Solid(u16),
    /// Sample `i` has value `i` modulo 2^16.
    Ramp,
}

/// When the mock frame becomes readable after stream-on.
#[derive(Debug, Clone, Copy)]
pub enum Arrival {
    /// After the given delay.
    After(Duration),
    /// Never.
    Never,
}

/// Mapped memory of the mock device.
#[derive(Debug)]
pub struct MockMemory {
    data: Vec<u8>,
    unmapped: Rc<Cell<usize>>,
}

impl FrameMemory for MockMemory {
    fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for MockMemory {
    fn drop(&mut self) {
        self.unmapped.set(self.unmapped.get() + 1);
    }
}

/// Mock device for testing without hardware.
pub struct MockDevice {
    capabilities: DeviceCapabilities,
    crop: CropBounds,
    formats: Vec<FormatDescriptor>,
    format: PixelFormat,
    pattern: TestPattern,
    padding: usize,
    granted: Option<u32>,
    arrival: Arrival,
    dequeue_index: Option<u32>,
    fail_at: Option<Stage>,
    queued: Option<u32>,
    journal: Journal,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a new mock device with default settings.
    #[must_use]
    pub fn new() -> Self {
        let formats = [FourCC::GREY, FourCC::Y16, FourCC::SGRBG10]
            .into_iter()
            .zip(0..)
            .map(|(fourcc, index)| FormatDescriptor {
                index,
                fourcc,
                description: fourcc.to_string(),
                compressed: false,
                emulated: false,
            })
            .collect();

        Self {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                version: (6, 1, 0),
                can_capture: true,
                can_stream: true,
            },
            crop: CropBounds {
                left: 0,
                top: 0,
                width: 640,
                height: 480,
            },
            formats,
            format: PixelFormat::new(640, 480, FourCC::SGRBG10),
            pattern: TestPattern::Solid(0x0100),
            padding: 0,
            granted: None,
            arrival: Arrival::After(Duration::ZERO),
            dequeue_index: None,
            fail_at: None,
            queued: None,
            journal: Journal::default(),
        }
    }

    /// Set the capabilities for this mock device.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the crop bounds, and the current format to match.
    #[must_use]
    pub fn with_crop(mut self, width: u32, height: u32) -> Self {
        self.crop.width = width;
        self.crop.height = height;
        self.format = PixelFormat::new(width, height, self.format.fourcc);
        self
    }

    /// Set the sample pattern of captured frames.
    #[must_use]
    pub fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Extra bytes past the image in the mapped buffer.
    #[must_use]
    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    /// Grant `count` buffers regardless of the request.
    #[must_use]
    pub fn granting(mut self, count: u32) -> Self {
        self.granted = Some(count);
        self
    }

    /// Frame becomes readable after `delay`.
    #[must_use]
    pub fn ready_after(mut self, delay: Duration) -> Self {
        self.arrival = Arrival::After(delay);
        self
    }

    /// Frame never becomes readable.
    #[must_use]
    pub fn never_ready(mut self) -> Self {
        self.arrival = Arrival::Never;
        self
    }

    /// Dequeue reports buffer `index` instead of the queued one.
    #[must_use]
    pub fn dequeuing_index(mut self, index: u32) -> Self {
        self.dequeue_index = Some(index);
        self
    }

    /// Make `stage` fail with `EINVAL`.
    #[must_use]
    pub fn failing_at(mut self, stage: Stage) -> Self {
        self.fail_at = Some(stage);
        self
    }

    /// Handle on the call journal.
    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    /// Length of the mapped buffer for the current format.
    pub const fn buffer_length(&self) -> usize {
        self.format.size as usize + self.padding
    }

    fn enter(&self, call: Call, stage: Stage) -> Result<()> {
        self.journal.record(call);
        match self.fail_at {
            Some(failing) if failing == stage => Err(stage.error()),
            _ => Ok(()),
        }
    }

    fn frame_bytes(&self) -> Vec<u8> {
        let samples = self.format.size as usize / 2;
        let mut data: Vec<u8> = (0..samples)
            .flat_map(|i| {
                let sample = match self.pattern {
                    TestPattern::Solid(value) => value,
                    #[allow(clippy::cast_possible_truncation)]
                    TestPattern::Ramp => i as u16,
                };
                sample.to_le_bytes()
            })
            .collect();
        data.resize(self.buffer_length(), 0xEE);
        data
    }
}

impl CaptureDevice for MockDevice {
    type Memory = MockMemory;

    fn capabilities(&self) -> Result<DeviceCapabilities> {
        self.enter(Call::Capabilities, Stage::Capabilities)?;
        Ok(self.capabilities.clone())
    }

    fn crop_bounds(&self) -> Result<CropBounds> {
        self.enter(Call::CropBounds, Stage::CropBounds)?;
        Ok(self.crop)
    }

    fn formats(&self) -> Result<Vec<FormatDescriptor>> {
        self.enter(Call::Formats, Stage::Formats)?;
        Ok(self.formats.clone())
    }

    fn set_format(&mut self, format: &PixelFormat) -> Result<PixelFormat> {
        self.enter(Call::SetFormat, Stage::SetFormat)?;
        let mut applied = PixelFormat::new(format.width, format.height, format.fourcc);
        applied.field = format.field;
        self.format = applied.clone();
        Ok(applied)
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32> {
        self.enter(Call::RequestBuffers(count), Stage::RequestBuffers)?;
        Ok(self.granted.unwrap_or(count))
    }

    fn query_buffer(&self, index: u32) -> Result<BufferDescriptor> {
        self.enter(Call::QueryBuffer(index), Stage::QueryBuffer)?;
        #[allow(clippy::cast_possible_truncation)]
        let length = self.buffer_length() as u32;
        Ok(BufferDescriptor {
            index,
            length,
            offset: 0,
        })
    }

    fn map(&self, buffer: &BufferDescriptor) -> Result<Self::Memory> {
        self.enter(Call::Map(buffer.index), Stage::Map)?;
        Ok(MockMemory {
            data: self.frame_bytes(),
            unmapped: Rc::clone(&self.journal.unmapped),
        })
    }

    fn queue(&mut self, index: u32) -> Result<()> {
        self.enter(Call::Queue(index), Stage::Queue)?;
        self.queued = Some(index);
        Ok(())
    }

    fn stream_on(&mut self) -> Result<()> {
        self.enter(Call::StreamOn, Stage::StreamOn)
    }

    fn wait_readable(&self, timeout: Duration) -> Result<Readiness> {
        self.enter(Call::Wait(timeout), Stage::Wait)?;
        Ok(match self.arrival {
            Arrival::After(delay) if delay <= timeout => Readiness::Ready,
            Arrival::After(_) | Arrival::Never => Readiness::TimedOut,
        })
    }

    fn dequeue(&mut self) -> Result<DequeuedBuffer> {
        self.enter(Call::Dequeue, Stage::Dequeue)?;
        Ok(DequeuedBuffer {
            index: self.dequeue_index.or(self.queued).unwrap_or_default(),
            bytes_used: self.format.size,
            sequence: 0,
        })
    }

    fn stream_off(&mut self) -> Result<()> {
        self.enter(Call::StreamOff, Stage::StreamOff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let device = MockDevice::new();
        let caps = device.capabilities().expect("capabilities should succeed");
        assert_eq!(caps.driver, "mock");
        assert!(caps.can_capture);
        assert!(caps.can_stream);
    }

    #[test]
    fn test_mock_set_format() {
        let mut device = MockDevice::new();
        let requested = PixelFormat::new(1280, 720, FourCC::Y16);
        let actual = device
            .set_format(&requested)
            .expect("set_format should succeed");
        assert_eq!(actual.width, 1280);
        assert_eq!(actual.height, 720);
        assert_eq!(device.buffer_length(), 1280 * 720 * 2);
    }

    #[test]
    fn test_solid_pattern() {
        let device = MockDevice::new()
            .with_crop(4, 2)
            .with_pattern(TestPattern::Solid(0x0ABC));
        let data = device.frame_bytes();
        assert_eq!(data.len(), 16);
        assert!(data.chunks_exact(2).all(|pair| pair == [0xBC, 0x0A]));
    }

    #[test]
    fn test_ramp_pattern_with_padding() {
        let device = MockDevice::new()
            .with_crop(2, 2)
            .with_pattern(TestPattern::Ramp)
            .with_padding(3);
        let data = device.frame_bytes();
        assert_eq!(data, vec![0, 0, 1, 0, 2, 0, 3, 0, 0xEE, 0xEE, 0xEE]);
    }

    #[test]
    fn test_failure_injection_records_call() {
        let mut device = MockDevice::new().failing_at(Stage::StreamOn);
        let journal = device.journal();
        assert!(matches!(device.stream_on(), Err(CaptureError::StreamStart(_))));
        assert_eq!(journal.calls(), vec![Call::StreamOn]);
    }

    #[test]
    fn test_memory_drop_counts_unmap() {
        let device = MockDevice::new();
        let journal = device.journal();
        let desc = device.query_buffer(0).expect("query should succeed");
        let memory = device.map(&desc).expect("map should succeed");
        assert_eq!(memory.as_bytes().len(), device.buffer_length());
        drop(memory);
        assert_eq!(journal.unmapped(), 1);
    }
}
