//! # pifs config
//!
//! Mount configuration. Options arrive the way `mount(8)` passes them, as
//! comma separated `-o` lists, and may be seeded from a YAML file:
//!
//! ```yaml
//! rootdir: /srv/pifs-backing
//! options: [allow_other, fsname=pifs]
//! log_level: debug
//! ```
//!
//! Only `rootdir` is required. Command-line options win over the file.

pub mod options;

pub use options::{parse_option_list, MountOption};

use std::path::{Path, PathBuf};

use nix::unistd::AccessFlags;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Result type for pifs-config operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while assembling a mount configuration
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("metadata directory must be specified with -o rootdir=<directory>")]
    MissingRootDir,

    #[error("cannot access metadata directory '{path}': {source}")]
    RootDirInaccessible {
        path: PathBuf,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("metadata directory '{0}' is not a directory")]
    RootDirNotDirectory(PathBuf),

    #[error("mount point '{0}' is not an existing directory")]
    BadMountPoint(PathBuf),

    #[error("invalid mount option '{0}'")]
    InvalidOption(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("config file error: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// On-disk shape of the optional config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Directory holding the backing files
    pub rootdir: Option<PathBuf>,

    /// Extra mount options in `-o` syntax, one per entry
    pub options: Vec<String>,

    /// Log filter directive, e.g. `debug` or `pifs_fs=trace`
    pub log_level: Option<String>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

/// Everything needed to mount, after options have been merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountConfig {
    /// Directory holding the backing files
    pub rootdir: Option<PathBuf>,

    /// Options forwarded to the FUSE bridge
    pub options: Vec<MountOption>,

    /// Log filter from the config file, if any
    pub log_level: Option<String>,
}

impl MountConfig {
    /// Start from a config file's contents.
    pub fn from_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self {
            rootdir: file.rootdir,
            options: Vec::new(),
            log_level: file.log_level,
        };
        for entry in &file.options {
            config.apply_option_list(entry)?;
        }
        Ok(config)
    }

    /// Fold one `-o` list into the configuration. Later values replace
    /// earlier ones for `rootdir`; everything else accumulates.
    pub fn apply_option_list(&mut self, list: &str) -> Result<()> {
        for option in parse_option_list(list)? {
            match option {
                MountOption::RootDir(path) => self.rootdir = Some(path),
                other => {
                    if !self.options.contains(&other) {
                        self.options.push(other);
                    }
                }
            }
        }
        Ok(())
    }

    /// The backing directory, checked for read, write, and search access.
    pub fn validated_rootdir(&self) -> Result<PathBuf> {
        let rootdir = self.rootdir.as_ref().ok_or(Error::MissingRootDir)?;

        nix::unistd::access(
            rootdir.as_path(),
            AccessFlags::R_OK | AccessFlags::W_OK | AccessFlags::X_OK,
        )
        .map_err(|source| Error::RootDirInaccessible {
            path: rootdir.clone(),
            source,
        })?;

        if !rootdir.is_dir() {
            return Err(Error::RootDirNotDirectory(rootdir.clone()));
        }

        let canonical = rootdir.canonicalize()?;
        debug!(rootdir = %canonical.display(), "root directory accepted");
        Ok(canonical)
    }

    /// Mount points must already exist as directories.
    pub fn validate_mountpoint(mountpoint: &Path) -> Result<()> {
        if mountpoint.is_dir() {
            Ok(())
        } else {
            Err(Error::BadMountPoint(mountpoint.to_path_buf()))
        }
    }
}
