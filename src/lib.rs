//! raw-still: single-frame V4L2 capture with bit-depth downshift.
//!
//! The library drives the memory-mapped, single-buffer capture protocol step
//! by step behind the [`CaptureDevice`] trait, so every stage can be exercised
//! against a mock as well as a real camera. Captured 10- and 12-bit samples
//! are reduced to 8 bits and written to a raw file.

pub mod buffer;
pub mod capture;
pub mod cli;
pub mod device;
pub mod pipeline;
pub mod session;
pub mod sys;
pub mod traits;
pub mod unpack;
pub mod validation;
pub mod writer;

#[cfg(test)]
pub mod mock;

pub use capture::{CaptureState, CaptureStateMachine, CapturedFrame};
pub use device::V4L2Device;
pub use pipeline::{CaptureConfig, CaptureReport, Pipeline, SessionState, SessionTrace};
pub use session::DeviceSession;
pub use traits::{
    CaptureDevice, CaptureError, DeviceCapabilities, FourCC, FrameMemory, PixelFormat, Result,
};
pub use unpack::{BitShift, PixelUnpacker};
pub use writer::{FrameWriter, OutputLayout};
