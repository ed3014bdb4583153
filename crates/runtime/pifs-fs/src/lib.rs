//! # pifs filesystem
//!
//! A passthrough filesystem whose files hold π offsets instead of bytes.
//!
//! ```text
//!   kernel ──FUSE──► PiFs (inodes, handles)
//!                      │
//!                      ▼
//!                 Passthrough ──► <rootdir>/path    (metadata untouched)
//!                      │
//!                      └── PiCodec                  (content only)
//! ```
//!
//! [`Passthrough`] is usable on its own, which is how the tests drive it;
//! [`mount`] wires it to the kernel through `fuser`.

pub mod error;
pub mod fuse;
pub mod inode;
pub mod passthrough;
mod xattr;

pub use error::{FsError, Result};
pub use fuse::PiFs;
pub use inode::{InodeTable, ROOT_INODE};
pub use passthrough::{Attr, DirEntry, LockRange, Passthrough};

use std::path::Path;

use pifs_config::MountOption;
use tracing::info;

/// Kernel mount options for the configured ones. `fsname` defaults to the
/// root directory so `mount` output shows where the data lives.
pub fn bridge_options(options: &[MountOption], rootdir: &Path) -> Vec<fuser::MountOption> {
    let mut bridged = vec![fuser::MountOption::Subtype("pifs".to_string())];
    if !options.iter().any(|o| matches!(o, MountOption::FsName(_))) {
        bridged.push(fuser::MountOption::FSName(rootdir.display().to_string()));
    }
    for option in options {
        bridged.push(match option {
            MountOption::AllowOther => fuser::MountOption::AllowOther,
            MountOption::AllowRoot => fuser::MountOption::AllowRoot,
            MountOption::AutoUnmount => fuser::MountOption::AutoUnmount,
            MountOption::DefaultPermissions => fuser::MountOption::DefaultPermissions,
            MountOption::ReadOnly => fuser::MountOption::RO,
            MountOption::ReadWrite => fuser::MountOption::RW,
            MountOption::FsName(name) => fuser::MountOption::FSName(name.clone()),
            MountOption::Custom(raw) => fuser::MountOption::CUSTOM(raw.clone()),
            // consumed by the config layer
            MountOption::RootDir(_) => continue,
        });
    }
    bridged
}

/// Mount `fs` at `mountpoint` and serve requests until unmounted.
pub fn mount(fs: Passthrough, mountpoint: &Path, options: &[MountOption]) -> std::io::Result<()> {
    let bridged = bridge_options(options, fs.root());
    info!(
        mountpoint = %mountpoint.display(),
        rootdir = %fs.root().display(),
        "mounting pifs"
    );
    fuser::mount2(PiFs::new(fs), mountpoint, &bridged)
}
