//! Raw V4L2 ioctls for the single-buffer capture protocol.
//!
//! Format and capability calls go through the safe `v4l` API. The buffer
//! lifecycle (request, query, map, queue, stream, dequeue) and the crop query
//! are not exposed there at the granularity the capture state machine needs,
//! so they are issued here directly through `v4l::v4l2`.
#![allow(unsafe_code)]

use std::os::raw::{c_int, c_void};
use std::ptr::{self, NonNull};
use std::time::{Duration, Instant};
use std::{io, mem, slice};

use tracing::error;
use v4l::v4l2;
use v4l::v4l2::vidioc;
use v4l::v4l_sys::{
    v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE, v4l2_buffer, v4l2_cropcap,
    v4l2_memory_V4L2_MEMORY_MMAP, v4l2_requestbuffers,
};

use crate::traits::{BufferDescriptor, CropBounds, DequeuedBuffer, FrameMemory, Readiness};

const CAPTURE: u32 = v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE;
const MMAP: u32 = v4l2_memory_V4L2_MEMORY_MMAP;

/// Issue an ioctl, restarting it when interrupted by a signal.
///
/// # Safety
///
/// `argp` must point to the argument structure `request` expects.
unsafe fn xioctl(fd: c_int, request: vidioc::_IOC_TYPE, argp: *mut c_void) -> io::Result<()> {
    loop {
        match v4l2::ioctl(fd, request, argp) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            result => return result,
        }
    }
}

fn buffer_desc(index: u32) -> v4l2_buffer {
    // SAFETY: v4l2_buffer is a plain C struct, all-zero is a valid value.
    let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
    buf.type_ = CAPTURE;
    buf.memory = MMAP;
    buf.index = index;
    buf
}

/// VIDIOC_CROPCAP for the capture type.
pub fn crop_bounds(fd: c_int) -> io::Result<CropBounds> {
    // SAFETY: zeroed C struct, passed to the matching ioctl.
    let mut cropcap: v4l2_cropcap = unsafe { mem::zeroed() };
    cropcap.type_ = CAPTURE;
    unsafe {
        xioctl(
            fd,
            vidioc::VIDIOC_CROPCAP,
            ptr::addr_of_mut!(cropcap).cast::<c_void>(),
        )?;
    }

    Ok(CropBounds {
        left: cropcap.bounds.left,
        top: cropcap.bounds.top,
        width: cropcap.bounds.width,
        height: cropcap.bounds.height,
    })
}

/// VIDIOC_REQBUFS with memory-mapped buffers. Returns the granted count.
pub fn request_buffers(fd: c_int, count: u32) -> io::Result<u32> {
    // SAFETY: zeroed C struct, passed to the matching ioctl.
    let mut req: v4l2_requestbuffers = unsafe { mem::zeroed() };
    req.count = count;
    req.type_ = CAPTURE;
    req.memory = MMAP;
    unsafe {
        xioctl(
            fd,
            vidioc::VIDIOC_REQBUFS,
            ptr::addr_of_mut!(req).cast::<c_void>(),
        )?;
    }
    Ok(req.count)
}

/// VIDIOC_QUERYBUF for one buffer index.
pub fn query_buffer(fd: c_int, index: u32) -> io::Result<BufferDescriptor> {
    let mut buf = buffer_desc(index);
    unsafe {
        xioctl(
            fd,
            vidioc::VIDIOC_QUERYBUF,
            ptr::addr_of_mut!(buf).cast::<c_void>(),
        )?;
    }

    Ok(BufferDescriptor {
        index: buf.index,
        length: buf.length,
        // SAFETY: for MMAP buffers the driver fills the `offset` member.
        offset: unsafe { buf.m.offset },
    })
}

/// VIDIOC_QBUF.
pub fn queue(fd: c_int, index: u32) -> io::Result<()> {
    let mut buf = buffer_desc(index);
    unsafe { xioctl(fd, vidioc::VIDIOC_QBUF, ptr::addr_of_mut!(buf).cast::<c_void>()) }
}

/// VIDIOC_DQBUF.
pub fn dequeue(fd: c_int) -> io::Result<DequeuedBuffer> {
    let mut buf = buffer_desc(0);
    unsafe {
        xioctl(
            fd,
            vidioc::VIDIOC_DQBUF,
            ptr::addr_of_mut!(buf).cast::<c_void>(),
        )?;
    }

    Ok(DequeuedBuffer {
        index: buf.index,
        bytes_used: buf.bytesused,
        sequence: buf.sequence,
    })
}

/// VIDIOC_STREAMON for the capture type.
pub fn stream_on(fd: c_int) -> io::Result<()> {
    let mut typ = CAPTURE;
    unsafe {
        xioctl(
            fd,
            vidioc::VIDIOC_STREAMON,
            ptr::addr_of_mut!(typ).cast::<c_void>(),
        )
    }
}

/// VIDIOC_STREAMOFF for the capture type.
pub fn stream_off(fd: c_int) -> io::Result<()> {
    let mut typ = CAPTURE;
    unsafe {
        xioctl(
            fd,
            vidioc::VIDIOC_STREAMOFF,
            ptr::addr_of_mut!(typ).cast::<c_void>(),
        )
    }
}

/// `poll` timeout for `remaining`, rounded up to whole milliseconds so a
/// sub-millisecond remainder still waits instead of spinning.
fn poll_timeout_ms(remaining: Duration) -> c_int {
    c_int::try_from(remaining.as_micros().div_ceil(1000)).unwrap_or(c_int::MAX)
}

/// Poll `fd` for readability until `timeout` elapses.
///
/// Signal interruptions resume the wait with the remaining time.
pub fn wait_readable(fd: c_int, timeout: Duration) -> io::Result<Readiness> {
    let deadline = Instant::now() + timeout;
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        // SAFETY: one valid pollfd, count matches.
        let ret = unsafe { libc::poll(&mut pfd, 1, poll_timeout_ms(remaining)) };
        match ret {
            -1 => {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err);
                }
            }
            0 => return Ok(Readiness::TimedOut),
            _ => return Ok(Readiness::Ready),
        }
    }
}

/// A buffer mapped into process memory. Unmapped on drop.
#[derive(Debug)]
pub struct MmapRegion {
    start: NonNull<c_void>,
    len: usize,
}

impl MmapRegion {
    /// Map `buffer` read/write and shared with the kernel.
    pub fn map(fd: c_int, buffer: &BufferDescriptor) -> io::Result<Self> {
        let len = buffer.length as usize;
        #[allow(clippy::cast_possible_wrap, clippy::cast_lossless)]
        let offset = buffer.offset as libc::off_t;

        // SAFETY: a fresh mapping chosen by the kernel, not aliasing anything.
        let start = unsafe {
            v4l2::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset,
            )?
        };
        let start = NonNull::new(start)
            .ok_or_else(|| io::Error::other("mmap returned null"))?;

        Ok(Self { start, len })
    }
}

impl FrameMemory for MmapRegion {
    fn as_bytes(&self) -> &[u8] {
        // SAFETY: the region is mapped for `len` bytes until drop.
        unsafe { slice::from_raw_parts(self.start.as_ptr().cast::<u8>(), self.len) }
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: start/len are exactly what mmap returned.
        if let Err(err) = unsafe { v4l2::munmap(self.start.as_ptr(), self.len) } {
            error!(len = self.len, %err, "unmapping capture buffer failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_poll_timeout_rounds_up() {
        assert_eq!(poll_timeout_ms(Duration::ZERO), 0);
        assert_eq!(poll_timeout_ms(Duration::from_micros(1)), 1);
        assert_eq!(poll_timeout_ms(Duration::from_micros(500)), 1);
        assert_eq!(poll_timeout_ms(Duration::from_millis(1)), 1);
        assert_eq!(poll_timeout_ms(Duration::from_micros(1001)), 2);
        assert_eq!(poll_timeout_ms(Duration::from_secs(2)), 2000);
        assert_eq!(poll_timeout_ms(Duration::MAX), c_int::MAX);
    }

    #[test]
    fn test_wait_readable_ready() {
        let (mut tx, rx) = UnixStream::pair().expect("socket pair failed");
        tx.write_all(b"x").expect("write failed");

        let readiness =
            wait_readable(rx.as_raw_fd(), Duration::from_secs(2)).expect("poll failed");
        assert_eq!(readiness, Readiness::Ready);
    }

    #[test]
    fn test_wait_readable_times_out() {
        let (_tx, rx) = UnixStream::pair().expect("socket pair failed");

        let started = Instant::now();
        let readiness =
            wait_readable(rx.as_raw_fd(), Duration::from_millis(50)).expect("poll failed");
        assert_eq!(readiness, Readiness::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn test_wait_readable_ready_before_deadline() {
        let (mut tx, rx) = UnixStream::pair().expect("socket pair failed");
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            tx.write_all(b"x").expect("write failed");
            tx
        });

        let readiness =
            wait_readable(rx.as_raw_fd(), Duration::from_secs(2)).expect("poll failed");
        assert_eq!(readiness, Readiness::Ready);
        drop(writer.join().expect("writer thread panicked"));
    }

    #[test]
    fn test_map_regular_file() {
        let mut file = tempfile::tempfile().expect("tempfile failed");
        file.write_all(&[1, 2, 3, 4, 5, 6, 7, 8]).expect("write failed");

        let desc = BufferDescriptor {
            index: 0,
            length: 8,
            offset: 0,
        };
        let region = MmapRegion::map(file.as_raw_fd(), &desc).expect("map failed");
        assert_eq!(region.as_bytes(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_ioctls_rejected_on_non_video_fd() {
        let file = tempfile::tempfile().expect("tempfile failed");
        let fd = file.as_raw_fd();

        assert!(request_buffers(fd, 1).is_err());
        assert!(query_buffer(fd, 0).is_err());
        assert!(queue(fd, 0).is_err());
        assert!(stream_on(fd).is_err());
        assert!(crop_bounds(fd).is_err());
    }
}
