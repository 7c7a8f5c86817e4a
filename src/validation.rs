//! Frame validation utilities for captured and written frames.
//!
//! These helpers check that unpacked output matches the packed source it was
//! derived from, and that saved files have the expected size. Useful for
//! integration testing with virtual cameras.

use std::fs;
use std::path::Path;

use crate::traits::{CaptureError, Result};
use crate::unpack::{downshift, BitShift, FrameLayout};

/// Validates that `unpacked` is the downshift of `packed`.
///
/// Every output sample at `(x, y)` is compared to the little-endian 16-bit
/// sample at the same position in `packed`, shifted by `shift`.
///
/// # Errors
///
/// Returns `Validation` if:
/// - Either buffer is too short for `layout`
/// - Any output sample differs from the expected value
pub fn validate_downshift(
    packed: &[u8],
    unpacked: &[u8],
    layout: &FrameLayout,
    shift: BitShift,
) -> Result<()> {
    if packed.len() < layout.packed_len() {
        return Err(CaptureError::Validation(format!(
            "packed buffer holds {} bytes, layout needs {}",
            packed.len(),
            layout.packed_len()
        )));
    }
    if unpacked.len() < layout.samples() {
        return Err(CaptureError::Validation(format!(
            "unpacked buffer holds {} samples, layout needs {}",
            unpacked.len(),
            layout.samples()
        )));
    }

    for y in 0..layout.height {
        for x in 0..layout.width {
            let offset = y * layout.stride + x * 2;
            let sample = packed
                .get(offset..offset + 2)
                .and_then(|pair| <[u8; 2]>::try_from(pair).ok())
                .map(u16::from_le_bytes)
                .ok_or_else(|| {
                    CaptureError::Validation(format!("no packed sample at ({x}, {y})"))
                })?;
            let actual = unpacked.get(y * layout.width + x).copied().ok_or_else(|| {
                CaptureError::Validation(format!("no unpacked sample at ({x}, {y})"))
            })?;

            let expected = downshift(sample, shift);
            if actual != expected {
                return Err(CaptureError::Validation(format!(
                    "sample mismatch at ({x}, {y}): {sample:#06x} >> {} should be \
                     {expected:#04x}, got {actual:#04x}",
                    shift.bits()
                )));
            }
        }
    }

    Ok(())
}

/// Validates that every byte of `bytes` equals `expected`.
///
/// # Errors
///
/// Returns `Validation` with the offset of the first differing byte.
pub fn validate_uniform(bytes: &[u8], expected: u8) -> Result<()> {
    match bytes.iter().position(|&byte| byte != expected) {
        None => Ok(()),
        Some(offset) => Err(CaptureError::Validation(format!(
            "byte {offset} is {:#04x}, expected {expected:#04x}",
            bytes.get(offset).copied().unwrap_or_default()
        ))),
    }
}

/// Validates that the file at `path` is exactly `expected` bytes long.
///
/// # Errors
///
/// Returns `Io` if the file cannot be inspected, `Validation` on a size mismatch.
pub fn validate_file_length(path: &Path, expected: u64) -> Result<()> {
    let metadata = fs::metadata(path).map_err(|source| CaptureError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    if metadata.len() == expected {
        Ok(())
    } else {
        Err(CaptureError::Validation(format!(
            "{} is {} bytes, expected {expected}",
            path.display(),
            metadata.len()
        )))
    }
}
