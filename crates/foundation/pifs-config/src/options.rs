//! `-o` option parsing

use std::path::PathBuf;

use crate::{Error, Result};

/// One recognised mount option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountOption {
    /// `rootdir=<path>`: where backing files live
    RootDir(PathBuf),
    AllowOther,
    AllowRoot,
    AutoUnmount,
    DefaultPermissions,
    ReadOnly,
    ReadWrite,
    /// `fsname=<name>`
    FsName(String),
    /// Anything else, handed to the kernel untouched
    Custom(String),
}

impl MountOption {
    fn parse(raw: &str) -> Result<Self> {
        let (key, value) = match raw.split_once('=') {
            Some((key, value)) => (key, Some(value)),
            None => (raw, None),
        };

        let option = match (key, value) {
            ("rootdir", Some("")) | ("rootdir", None) => {
                return Err(Error::InvalidOption(raw.to_string()))
            }
            ("rootdir", Some(path)) => Self::RootDir(PathBuf::from(path)),
            ("fsname", Some(name)) if !name.is_empty() => Self::FsName(name.to_string()),
            ("fsname", _) => return Err(Error::InvalidOption(raw.to_string())),
            ("allow_other", None) => Self::AllowOther,
            ("allow_root", None) => Self::AllowRoot,
            ("auto_unmount", None) => Self::AutoUnmount,
            ("default_permissions", None) => Self::DefaultPermissions,
            ("ro", None) => Self::ReadOnly,
            ("rw", None) => Self::ReadWrite,
            _ => Self::Custom(raw.to_string()),
        };
        Ok(option)
    }
}

/// Split a comma separated list such as `rootdir=/srv/pi,allow_other`.
/// Empty entries are skipped.
pub fn parse_option_list(list: &str) -> Result<Vec<MountOption>> {
    list.split(',')
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(MountOption::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        let options = parse_option_list("rootdir=/srv/pi, allow_other,,fsname=pifs,noatime").unwrap();
        assert_eq!(
            options,
            vec![
                MountOption::RootDir(PathBuf::from("/srv/pi")),
                MountOption::AllowOther,
                MountOption::FsName("pifs".to_string()),
                MountOption::Custom("noatime".to_string()),
            ]
        );
    }

    #[test]
    fn test_rootdir_needs_value() {
        assert!(matches!(
            parse_option_list("rootdir="),
            Err(Error::InvalidOption(_))
        ));
        assert!(matches!(
            parse_option_list("rootdir"),
            Err(Error::InvalidOption(_))
        ));
    }

    #[test]
    fn test_rootdir_keeps_equals_in_path() {
        let options = parse_option_list("rootdir=/a=b").unwrap();
        assert_eq!(options, vec![MountOption::RootDir(PathBuf::from("/a=b"))]);
    }
}
