//! Filesystem errors and their errno mapping

use std::io;

use libc::c_int;
use nix::errno::Errno;

/// Result type for pifs-fs operations
pub type Result<T> = std::result::Result<T, FsError>;

/// Errors raised by the passthrough layer
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// A host syscall failed; the errno goes back to the kernel unchanged.
    #[error("host I/O error: {0}")]
    Host(#[from] Errno),

    /// The backing file holds an index the codec does not know.
    #[error("corrupt backing file: {0}")]
    Codec(#[from] pifs_core::Error),
}

impl FsError {
    /// Errno reported to the FUSE bridge.
    pub fn errno(&self) -> c_int {
        match self {
            Self::Host(errno) => *errno as c_int,
            Self::Codec(_) => libc::EIO,
        }
    }
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        Self::Host(Errno::from_raw(err.raw_os_error().unwrap_or(libc::EIO)))
    }
}
