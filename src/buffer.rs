//! Buffer manager: request, query and map the single capture buffer.

use std::io;

use tracing::{debug, info};

use crate::traits::{BufferDescriptor, CaptureDevice, CaptureError, FrameMemory, Result};

/// Number of buffers requested from the driver. Single-buffering only.
pub const BUFFER_COUNT: u32 = 1;

/// A kernel capture buffer mapped into process memory.
///
/// Owns the mapping; dropping it unmaps, on success and error paths alike.
#[derive(Debug)]
pub struct MappedBuffer<M> {
    index: u32,
    length: usize,
    memory: M,
}

impl<M: FrameMemory> MappedBuffer<M> {
    /// Buffer index known to the driver.
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Mapped length in bytes.
    pub const fn len(&self) -> usize {
        self.length
    }

    /// Whether the mapping is empty.
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The mapped bytes.
    pub fn as_bytes(&self) -> &[u8] {
        let bytes = self.memory.as_bytes();
        bytes.get(..self.length).unwrap_or(bytes)
    }
}

/// Request `count` buffers and fail if the driver grants none.
pub fn request_buffers<D: CaptureDevice>(device: &mut D, count: u32) -> Result<u32> {
    let granted = device.request_buffers(count)?;
    if granted == 0 {
        return Err(CaptureError::BufferRequest(io::Error::new(
            io::ErrorKind::OutOfMemory,
            "driver granted no buffers",
        )));
    }
    if granted != count {
        debug!(requested = count, granted, "driver adjusted buffer count");
    }
    Ok(granted)
}

/// Resolve the offset and length of buffer `index`.
pub fn query_buffer<D: CaptureDevice>(device: &D, index: u32) -> Result<BufferDescriptor> {
    let descriptor = device.query_buffer(index)?;
    debug!(
        index = descriptor.index,
        length = descriptor.length,
        offset = descriptor.offset,
        "queried buffer"
    );
    Ok(descriptor)
}

/// Map a queried buffer into process memory.
pub fn map<D: CaptureDevice>(
    device: &D,
    descriptor: &BufferDescriptor,
) -> Result<MappedBuffer<D::Memory>> {
    let memory = device.map(descriptor)?;
    let length = descriptor.length as usize;
    if memory.as_bytes().len() < length {
        return Err(CaptureError::BufferMap(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "mapping shorter than the queried buffer",
        )));
    }

    Ok(MappedBuffer {
        index: descriptor.index,
        length,
        memory,
    })
}

/// Unmap a buffer explicitly. Equivalent to dropping it.
pub fn unmap<M>(buffer: MappedBuffer<M>) {
    debug!(index = buffer.index, "unmapping buffer");
    drop(buffer);
}

/// Request, query and map the single capture buffer.
pub fn allocate<D: CaptureDevice>(device: &mut D) -> Result<MappedBuffer<D::Memory>> {
    request_buffers(device, BUFFER_COUNT)?;
    let descriptor = query_buffer(device, 0)?;
    let buffer = map(device, &descriptor)?;
    info!(index = buffer.index, length = buffer.length, "mapped capture buffer");
    Ok(buffer)
}
