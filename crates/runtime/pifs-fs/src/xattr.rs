//! Extended attribute syscalls
//!
//! nix does not wrap the xattr family, so these call libc directly. Every
//! buffer handed to the kernel is sized by the caller-visible slice.

use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::errno::Errno;

use crate::error::Result;

fn c_path(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| Errno::EINVAL.into())
}

fn c_name(name: &OsStr) -> Result<CString> {
    CString::new(name.as_bytes()).map_err(|_| Errno::EINVAL.into())
}

/// Turn a `ssize_t` syscall result into a length.
fn check(ret: libc::ssize_t) -> Result<usize> {
    if ret < 0 {
        Err(Errno::last().into())
    } else {
        Ok(ret as usize)
    }
}

pub fn set(path: &Path, name: &OsStr, value: &[u8], flags: i32) -> Result<()> {
    let path = c_path(path)?;
    let name = c_name(name)?;
    // SAFETY: both strings are NUL terminated and value is a live slice of
    // value.len() bytes.
    let ret = unsafe {
        libc::setxattr(
            path.as_ptr(),
            name.as_ptr(),
            value.as_ptr().cast(),
            value.len(),
            flags,
        )
    };
    check(ret as libc::ssize_t).map(|_| ())
}

pub fn get(path: &Path, name: &OsStr) -> Result<Vec<u8>> {
    let path = c_path(path)?;
    let name = c_name(name)?;
    loop {
        // SAFETY: a null buffer with size 0 only queries the length.
        let len = check(unsafe {
            libc::getxattr(path.as_ptr(), name.as_ptr(), std::ptr::null_mut(), 0)
        })?;
        let mut buf = vec![0u8; len];
        // SAFETY: buf owns len writable bytes.
        let ret = unsafe {
            libc::getxattr(path.as_ptr(), name.as_ptr(), buf.as_mut_ptr().cast(), len)
        };
        match check(ret) {
            Ok(n) => {
                buf.truncate(n);
                return Ok(buf);
            }
            // value grew between the two calls
            Err(err) if err.errno() == libc::ERANGE => continue,
            Err(err) => return Err(err),
        }
    }
}

/// NUL separated attribute names, as `listxattr(2)` returns them.
pub fn list(path: &Path) -> Result<Vec<u8>> {
    let path = c_path(path)?;
    loop {
        // SAFETY: a null buffer with size 0 only queries the length.
        let len = check(unsafe { libc::listxattr(path.as_ptr(), std::ptr::null_mut(), 0) })?;
        let mut buf = vec![0u8; len];
        // SAFETY: buf owns len writable bytes.
        let ret = unsafe { libc::listxattr(path.as_ptr(), buf.as_mut_ptr().cast(), len) };
        match check(ret) {
            Ok(n) => {
                buf.truncate(n);
                return Ok(buf);
            }
            Err(err) if err.errno() == libc::ERANGE => continue,
            Err(err) => return Err(err),
        }
    }
}

pub fn remove(path: &Path, name: &OsStr) -> Result<()> {
    let path = c_path(path)?;
    let name = c_name(name)?;
    // SAFETY: both strings are NUL terminated.
    let ret = unsafe { libc::removexattr(path.as_ptr(), name.as_ptr()) };
    check(ret as libc::ssize_t).map(|_| ())
}
