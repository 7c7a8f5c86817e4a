//! Raw frame output.

use std::fs::{self, Permissions};
use std::io::{self, BufWriter, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::info;

use crate::traits::{CaptureError, Result};

/// Default output file, relative to the working directory.
pub const DEFAULT_OUTPUT: &str = "image.raw";

/// What the output file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputLayout {
    /// Exactly the mapped buffer length: unpacked samples followed by the
    /// untouched tail of the packed buffer.
    #[default]
    Full,
    /// Only the unpacked samples.
    Unpacked,
}

/// Writes frames to a destination file, replacing existing content.
///
/// Data is staged in a temporary file next to the destination and renamed
/// over it only once fully written and synced. A failed write leaves the
/// destination as it was.
#[derive(Debug, Clone)]
pub struct FrameWriter {
    destination: PathBuf,
}

impl FrameWriter {
    /// Writer targeting `destination`.
    pub fn new<P: Into<PathBuf>>(destination: P) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    /// Destination path.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Write `buffer` as-is.
    pub fn write(&self, buffer: &[u8]) -> Result<usize> {
        self.write_parts(&[buffer])
    }

    /// Write the concatenation of `parts`. Returns the bytes written.
    pub fn write_parts(&self, parts: &[&[u8]]) -> Result<usize> {
        self.write_with(|out| {
            let mut written = 0;
            for part in parts {
                out.write_all(part)?;
                written += part.len();
            }
            Ok(written)
        })
    }

    fn write_with<F>(&self, fill: F) -> Result<usize>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<usize>,
    {
        let io_err = |source: io::Error| CaptureError::Io {
            path: self.destination.clone(),
            source,
        };

        let parent = match self.destination.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let staged = NamedTempFile::new_in(parent).map_err(io_err)?;
        fs::set_permissions(staged.path(), Permissions::from_mode(0o644)).map_err(io_err)?;

        let mut out = BufWriter::new(staged);
        let written = fill(&mut out).map_err(io_err)?;
        let staged = out.into_inner().map_err(|err| io_err(err.into_error()))?;
        staged.as_file().sync_all().map_err(io_err)?;
        staged
            .persist(&self.destination)
            .map_err(|err| io_err(err.error))?;

        info!(path = %self.destination.display(), bytes = written, "raw image saved");
        Ok(written)
    }
}

/// Byte ranges making up the output for one frame.
///
/// `packed` is the whole mapped buffer, `unpacked` the downshifted samples
/// (absent when the transform was skipped), `bytes_used` what the driver filled.
pub fn output_parts<'a>(
    layout: OutputLayout,
    packed: &'a [u8],
    unpacked: Option<&'a [u8]>,
    bytes_used: usize,
) -> Vec<&'a [u8]> {
    match (layout, unpacked) {
        (OutputLayout::Full, None) => vec![packed],
        (OutputLayout::Unpacked, None) => vec![packed.get(..bytes_used).unwrap_or(packed)],
        (OutputLayout::Full, Some(unpacked)) => {
            let tail = packed.get(unpacked.len()..).unwrap_or_default();
            vec![unpacked, tail]
        }
        (OutputLayout::Unpacked, Some(unpacked)) => vec![unpacked],
    }
}
