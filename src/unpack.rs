//! Bit-depth downshift of packed 16-bit samples to 8-bit samples.
//!
//! Each source sample is a little-endian 16-bit word holding a 10- or 12-bit
//! value. The output sample is `(sample >> shift) as u8`, i.e. the low eight
//! bits of the shifted word. Output is written to a separate buffer of
//! `width * height` bytes, so no unread sample is ever overwritten.
//!
//! Rows are independent and are processed on the rayon pool. Output order is
//! row-major regardless of scheduling.

use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;

use crate::traits::{CaptureError, PixelFormat, Result};

/// Source sample depth, expressed as the right shift that maps it to 8 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitShift {
    /// Already 8-bit, no transform.
    #[default]
    Raw8,
    /// 10-bit samples, shift by 2.
    Raw10,
    /// 12-bit samples, shift by 4.
    Raw12,
}

impl BitShift {
    /// Number of bits discarded.
    pub const fn bits(self) -> u32 {
        match self {
            Self::Raw8 => 0,
            Self::Raw10 => 2,
            Self::Raw12 => 4,
        }
    }

    /// Format name as accepted on the command line.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Raw8 => "RAW8",
            Self::Raw10 => "RAW10",
            Self::Raw12 => "RAW12",
        }
    }

    /// Whether the transform is skipped.
    pub const fn is_passthrough(self) -> bool {
        matches!(self, Self::Raw8)
    }
}

impl fmt::Display for BitShift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BitShift {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RAW8" => Ok(Self::Raw8),
            "RAW10" => Ok(Self::Raw10),
            "RAW12" => Ok(Self::Raw12),
            other => Err(CaptureError::Usage(format!(
                "wrong image format {other:?}, you can choose RAW8, RAW10 or RAW12"
            ))),
        }
    }
}

/// Downshift one sample, keeping the low eight bits.
#[inline]
#[allow(clippy::cast_possible_truncation)]
pub const fn downshift(sample: u16, shift: BitShift) -> u8 {
    (sample >> shift.bits()) as u8
}

/// Row geometry of a packed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    /// Samples per row.
    pub width: usize,
    /// Number of rows.
    pub height: usize,
    /// Bytes from one row start to the next.
    pub stride: usize,
}

impl FrameLayout {
    /// Geometry of a negotiated format. A stride smaller than two bytes per
    /// sample is treated as tightly packed.
    pub fn from_format(format: &PixelFormat) -> Self {
        let width = format.width as usize;
        let tight = width * 2;
        Self {
            width,
            height: format.height as usize,
            stride: (format.stride as usize).max(tight),
        }
    }

    /// Number of 8-bit output samples.
    pub const fn samples(&self) -> usize {
        self.width * self.height
    }

    /// Packed bytes the frame occupies.
    pub const fn packed_len(&self) -> usize {
        self.stride * self.height
    }
}

/// Converts a packed wide-sample frame into 8-bit samples.
#[derive(Debug, Clone, Copy)]
pub struct PixelUnpacker {
    shift: BitShift,
    layout: FrameLayout,
}

impl PixelUnpacker {
    /// Unpacker for the negotiated `format`.
    pub fn new(format: &PixelFormat, shift: BitShift) -> Self {
        Self {
            shift,
            layout: FrameLayout::from_format(format),
        }
    }

    /// Unpacker for an explicit geometry.
    pub const fn with_layout(layout: FrameLayout, shift: BitShift) -> Self {
        Self { shift, layout }
    }

    /// Configured shift.
    pub const fn shift(&self) -> BitShift {
        self.shift
    }

    /// Frame geometry.
    pub const fn layout(&self) -> FrameLayout {
        self.layout
    }

    /// Unpack `packed` into a new `width * height` buffer.
    pub fn unpack(&self, packed: &[u8]) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.layout.samples()];
        self.unpack_into(packed, &mut out)?;
        Ok(out)
    }

    /// Unpack `packed` into the first `width * height` bytes of `out`.
    pub fn unpack_into(&self, packed: &[u8], out: &mut [u8]) -> Result<()> {
        let FrameLayout {
            width,
            stride,
            ..
        } = self.layout;
        let needed = self.layout.packed_len();
        if packed.len() < needed {
            return Err(CaptureError::FrameTooShort {
                needed,
                available: packed.len(),
            });
        }
        let samples = self.layout.samples();
        if out.len() < samples {
            return Err(CaptureError::FrameTooShort {
                needed: samples,
                available: out.len(),
            });
        }
        if samples == 0 {
            return Ok(());
        }

        let shift = self.shift;
        let rows = out.get_mut(..samples).unwrap_or_default();
        rows.par_chunks_mut(width)
            .zip(packed.par_chunks(stride))
            .for_each(|(dst_row, src_row)| unpack_row(src_row, dst_row, shift));

        Ok(())
    }
}

fn unpack_row(src: &[u8], dst: &mut [u8], shift: BitShift) {
    for (out, pair) in dst.iter_mut().zip(src.chunks_exact(2)) {
        if let &[lo, hi] = pair {
            *out = downshift(u16::from_le_bytes([lo, hi]), shift);
        }
    }
}
