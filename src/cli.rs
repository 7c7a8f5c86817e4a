//! Command line interface.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::device::device_path;
use crate::pipeline::CaptureConfig;
use crate::traits::FourCC;
use crate::unpack::BitShift;
use crate::writer::{OutputLayout, DEFAULT_OUTPUT};

/// Capture one frame from a V4L2 camera, downshift it to 8 bits and save it.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Device index, opened as /dev/video<DEVICE>
    pub device: u32,

    /// Sample depth of the sensor: RAW8, RAW10 or RAW12
    #[arg(default_value_t = BitShift::Raw8)]
    pub format: BitShift,

    /// Open this device node instead of the one derived from DEVICE
    #[arg(long, value_name = "PATH")]
    pub device_path: Option<PathBuf>,

    /// Request this four-character pixel format instead of the driver's last one
    #[arg(long, value_name = "FOURCC")]
    pub pixel_format: Option<FourCC>,

    /// How long to wait for the frame, in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub timeout_ms: u64,

    /// Output file
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Output file contents
    #[arg(long, value_enum, default_value_t = OutputLayout::Full)]
    pub layout: OutputLayout,

    /// Worker threads for unpacking (defaults to one per core)
    #[arg(long)]
    pub threads: Option<usize>,

    /// Log filter written to stderr, e.g. `debug` or `raw_still=trace`
    #[arg(long, value_name = "FILTER", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,
}

/// Log filter used when `--log-level` is not given.
pub const DEFAULT_LOG_LEVEL: &str = "info";

impl Cli {
    /// Capture settings for this invocation.
    pub fn to_config(&self) -> CaptureConfig {
        CaptureConfig {
            device: self
                .device_path
                .clone()
                .unwrap_or_else(|| device_path(self.device)),
            shift: self.format,
            pixel_format: self.pixel_format,
            timeout: Duration::from_millis(self.timeout_ms),
            output: self.output.clone(),
            layout: self.layout,
        }
    }
}
