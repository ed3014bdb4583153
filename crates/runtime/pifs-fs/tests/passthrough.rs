//! End-to-end behaviour of the passthrough layer against a scratch root.

use std::path::Path;
use std::sync::Arc;

use pifs_core::PiCodec;
use pifs_fs::{FsError, LockRange, Passthrough};
use proptest::prelude::*;
use tempfile::{tempdir, TempDir};

fn setup() -> (TempDir, Passthrough) {
    let dir = tempdir().unwrap();
    let codec = Arc::new(PiCodec::precomputed().unwrap());
    let fs = Passthrough::new(dir.path(), codec);
    (dir, fs)
}

fn backing_len(dir: &TempDir, name: &str) -> u64 {
    std::fs::metadata(dir.path().join(name)).unwrap().len()
}

const RDWR: i32 = libc::O_RDWR;

#[test]
fn test_single_zero_byte() {
    let (dir, fs) = setup();
    let file = fs.create(Path::new("/a"), 0o644, RDWR).unwrap();
    assert_eq!(fs.write(&file, 0, &[0x00]).unwrap(), 1);

    assert_eq!(backing_len(&dir, "a"), 2);
    assert_eq!(fs.getattr(Path::new("/a")).unwrap().size, 1);
    assert_eq!(fs.read(&file, 0, 16).unwrap(), vec![0x00]);
}

#[test]
fn test_full_byte_range() {
    let (dir, fs) = setup();
    let all: Vec<u8> = (0..=255u8).collect();
    let file = fs.create(Path::new("/b"), 0o644, RDWR).unwrap();
    fs.write(&file, 0, &all).unwrap();

    assert_eq!(backing_len(&dir, "b"), 512);
    assert_eq!(fs.getattr(Path::new("/b")).unwrap().size, 256);
    assert_eq!(fs.read(&file, 0, 256).unwrap(), all);
}

#[test]
fn test_overwrite_in_place() {
    let (dir, fs) = setup();
    let file = fs.create(Path::new("/c"), 0o644, RDWR).unwrap();
    fs.write(&file, 0, b"Hello, pi!\n").unwrap();
    fs.write(&file, 7, b"PI").unwrap();

    assert_eq!(fs.read(&file, 0, 64).unwrap(), b"Hello, PI!\n");
    assert_eq!(fs.getattr(Path::new("/c")).unwrap().size, 11);
    assert_eq!(backing_len(&dir, "c"), 22);
}

#[test]
fn test_truncate_scales_length() {
    let (dir, fs) = setup();
    let all: Vec<u8> = (0..=255u8).collect();
    let file = fs.create(Path::new("/b"), 0o644, RDWR).unwrap();
    fs.write(&file, 0, &all).unwrap();

    fs.truncate(Path::new("/b"), 4).unwrap();
    assert_eq!(backing_len(&dir, "b"), 8);
    assert_eq!(fs.read(&file, 0, 256).unwrap(), vec![0x00, 0x01, 0x02, 0x03]);

    fs.ftruncate(&file, 2).unwrap();
    assert_eq!(backing_len(&dir, "b"), 4);
    assert_eq!(fs.fgetattr(&file).unwrap().size, 2);
}

#[test]
fn test_rename_keeps_size() {
    let (_dir, fs) = setup();
    let file = fs.create(Path::new("/c"), 0o644, RDWR).unwrap();
    fs.write(&file, 0, b"Hello, PI!").unwrap();

    fs.rename(Path::new("/c"), Path::new("/d")).unwrap();
    assert_eq!(fs.getattr(Path::new("/d")).unwrap().size, 10);
    let err = fs.getattr(Path::new("/c")).unwrap_err();
    assert_eq!(err.errno(), libc::ENOENT);
}

#[test]
fn test_read_past_end_is_short() {
    let (_dir, fs) = setup();
    let file = fs.create(Path::new("/e"), 0o644, RDWR).unwrap();
    fs.write(&file, 0, b"abc").unwrap();
    assert_eq!(fs.read(&file, 1, 10).unwrap(), b"bc");
    assert!(fs.read(&file, 3, 10).unwrap().is_empty());
    assert!(fs.read(&file, 100, 10).unwrap().is_empty());
}

#[test]
fn test_write_past_end_leaves_hole_that_reads_as_corrupt() {
    let (_dir, fs) = setup();
    let file = fs.create(Path::new("/h"), 0o644, RDWR).unwrap();
    fs.write(&file, 2, b"x").unwrap();
    assert_eq!(fs.fgetattr(&file).unwrap().size, 3);
    // zero bytes decode to index 0, which is the offset of 0x42
    assert_eq!(fs.read(&file, 0, 3).unwrap(), vec![0x42, 0x42, b'x']);
}

#[test]
fn test_half_index_is_end_of_file() {
    let (dir, fs) = setup();
    let codec = PiCodec::precomputed().unwrap();
    let mut raw = codec.encode(b"ok");
    raw.push(0x01);
    std::fs::write(dir.path().join("odd"), &raw).unwrap();

    assert_eq!(fs.getattr(Path::new("/odd")).unwrap().size, 2);
    let file = fs.open(Path::new("/odd"), libc::O_RDONLY).unwrap();
    assert_eq!(fs.read(&file, 0, 10).unwrap(), b"ok");
}

#[test]
fn test_unknown_index_is_eio() {
    let (dir, fs) = setup();
    std::fs::write(dir.path().join("bad"), [0xFF, 0xFF]).unwrap();
    let file = fs.open(Path::new("/bad"), libc::O_RDONLY).unwrap();
    let err = fs.read(&file, 0, 1).unwrap_err();
    assert!(matches!(err, FsError::Codec(_)));
    assert_eq!(err.errno(), libc::EIO);
}

#[test]
fn test_directories_and_links_keep_host_size() {
    let (dir, fs) = setup();
    fs.mkdir(Path::new("/sub"), 0o755).unwrap();
    fs.symlink(Path::new("a-long-target-name"), Path::new("/sub/link"))
        .unwrap();

    let link = fs.getattr(Path::new("/sub/link")).unwrap();
    assert!(link.metadata.file_type().is_symlink());
    assert_eq!(link.size, "a-long-target-name".len() as u64);

    let host = std::fs::metadata(dir.path().join("sub")).unwrap().len();
    assert_eq!(fs.getattr(Path::new("/sub")).unwrap().size, host);

    assert_eq!(
        fs.readlink(Path::new("/sub/link")).unwrap(),
        Path::new("a-long-target-name")
    );
}

#[test]
fn test_namespace_operations() {
    let (dir, fs) = setup();
    fs.mkdir(Path::new("/d"), 0o755).unwrap();
    let file = fs.create(Path::new("/d/f"), 0o600, RDWR).unwrap();
    fs.write(&file, 0, b"data").unwrap();

    fs.link(Path::new("/d/f"), Path::new("/d/g")).unwrap();
    assert_eq!(fs.getattr(Path::new("/d/g")).unwrap().metadata.len(), 8);

    let mut names: Vec<_> = fs
        .read_dir(Path::new("/d"))
        .unwrap()
        .into_iter()
        .map(|entry| entry.name.into_string().unwrap())
        .collect();
    names.sort();
    assert_eq!(names, vec!["f", "g"]);

    fs.unlink(Path::new("/d/f")).unwrap();
    fs.unlink(Path::new("/d/g")).unwrap();
    fs.rmdir(Path::new("/d")).unwrap();
    assert!(!dir.path().join("d").exists());
}

#[test]
fn test_mknod_fifo() {
    let (_dir, fs) = setup();
    fs.mknod(Path::new("/pipe"), libc::S_IFIFO | 0o644, 0).unwrap();
    let attr = fs.getattr(Path::new("/pipe")).unwrap();
    use std::os::unix::fs::FileTypeExt;
    assert!(attr.metadata.file_type().is_fifo());
}

#[test]
fn test_permissions_and_times() {
    use nix::sys::time::TimeSpec;
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    let (_dir, fs) = setup();
    fs.create(Path::new("/t"), 0o644, RDWR).unwrap();

    fs.chmod(Path::new("/t"), 0o600).unwrap();
    let attr = fs.getattr(Path::new("/t")).unwrap();
    assert_eq!(attr.metadata.permissions().mode() & 0o777, 0o600);

    fs.utimens(
        Path::new("/t"),
        Some(TimeSpec::new(1_000, 0)),
        Some(TimeSpec::new(2_000, 0)),
    )
    .unwrap();
    let attr = fs.getattr(Path::new("/t")).unwrap();
    assert_eq!(attr.metadata.atime(), 1_000);
    assert_eq!(attr.metadata.mtime(), 2_000);

    // owner unchanged is always permitted
    fs.chown(Path::new("/t"), Some(attr.metadata.uid()), None)
        .unwrap();

    fs.access(Path::new("/t"), libc::F_OK).unwrap();
    assert_eq!(
        fs.access(Path::new("/missing"), libc::F_OK).unwrap_err().errno(),
        libc::ENOENT
    );
}

#[test]
fn test_statfs_and_fsync() {
    let (_dir, fs) = setup();
    let st = fs.statfs(Path::new("/")).unwrap();
    assert!(st.block_size() > 0);

    let file = fs.create(Path::new("/s"), 0o644, RDWR).unwrap();
    fs.write(&file, 0, b"sync").unwrap();
    fs.fsync(&file, true).unwrap();
    fs.fsync(&file, false).unwrap();
    fs.fsyncdir(Path::new("/"), false).unwrap();
}

#[test]
fn test_lock_probe_on_free_range() {
    let (_dir, fs) = setup();
    let file = fs.create(Path::new("/l"), 0o644, RDWR).unwrap();
    let range = LockRange {
        typ: libc::F_WRLCK,
        start: 0,
        end: 9,
        pid: 0,
    };
    fs.setlk(&file, range).unwrap();

    // a second description conflicts with the first
    let other = fs.open(Path::new("/l"), RDWR).unwrap();
    let probe = fs.getlk(&other, range).unwrap();
    assert_eq!(probe.typ, libc::F_WRLCK);
    assert_eq!(fs.setlk(&other, range).unwrap_err().errno(), libc::EAGAIN);

    fs.setlk(
        &file,
        LockRange {
            typ: libc::F_UNLCK,
            ..range
        },
    )
    .unwrap();
    assert_eq!(fs.getlk(&other, range).unwrap().typ, libc::F_UNLCK);
}

#[test]
fn test_xattr_passthrough() {
    let (_dir, fs) = setup();
    fs.create(Path::new("/x"), 0o644, RDWR).unwrap();
    let name = std::ffi::OsStr::new("user.pifs");
    match fs.setxattr(Path::new("/x"), name, b"3.14", 0) {
        Ok(()) => {}
        // scratch filesystems without user xattrs
        Err(err) if err.errno() == libc::ENOTSUP => return,
        Err(err) => panic!("setxattr failed: {err}"),
    }
    assert_eq!(fs.getxattr(Path::new("/x"), name).unwrap(), b"3.14");
    let list = fs.listxattr(Path::new("/x")).unwrap();
    assert!(list.split(|&b| b == 0).any(|entry| entry == b"user.pifs"));
    fs.removexattr(Path::new("/x"), name).unwrap();
    assert_eq!(
        fs.getxattr(Path::new("/x"), name).unwrap_err().errno(),
        libc::ENODATA
    );
}

#[test]
fn test_create_read_only() {
    let (dir, fs) = setup();
    let file = fs
        .create(Path::new("/ro"), 0o644, libc::O_RDONLY | libc::O_CREAT)
        .unwrap();
    assert!(dir.path().join("ro").is_file());
    assert!(fs.read(&file, 0, 8).unwrap().is_empty());
    // the handle really is read only
    assert_eq!(fs.write(&file, 0, b"x").unwrap_err().errno(), libc::EBADF);
}

#[test]
fn test_create_exclusive_reports_host_errno() {
    let (_dir, fs) = setup();
    fs.create(Path::new("/x"), 0o644, RDWR).unwrap();
    let err = fs
        .create(Path::new("/x"), 0o644, RDWR | libc::O_EXCL)
        .unwrap_err();
    assert_eq!(err.errno(), libc::EEXIST);
}

#[test]
fn test_release_closes_handle() {
    let (_dir, fs) = setup();
    let file = fs.create(Path::new("/r"), 0o644, RDWR).unwrap();
    fs.write(&file, 0, b"bye").unwrap();
    fs.release(file).unwrap();

    let file = fs.open(Path::new("/r"), libc::O_RDONLY).unwrap();
    assert_eq!(fs.read(&file, 0, 8).unwrap(), b"bye");
}

#[test]
fn test_blocks_scale_with_size() {
    use std::os::unix::fs::MetadataExt;

    let (_dir, fs) = setup();
    let file = fs.create(Path::new("/big"), 0o644, RDWR).unwrap();
    fs.write(&file, 0, &[0x5A; 64 * 1024]).unwrap();
    fs.fsync(&file, false).unwrap();

    let attr = fs.getattr(Path::new("/big")).unwrap();
    assert_eq!(attr.size, 64 * 1024);
    assert_eq!(attr.blocks, attr.metadata.blocks().div_ceil(2));

    fs.mkdir(Path::new("/dir"), 0o755).unwrap();
    let dir_attr = fs.getattr(Path::new("/dir")).unwrap();
    assert_eq!(dir_attr.blocks, dir_attr.metadata.blocks());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_content_round_trips_across_chunking(
        data in proptest::collection::vec(any::<u8>(), 0..600),
        chunk in 1usize..64,
        read_chunk in 1usize..97,
    ) {
        let (dir, fs) = setup();
        let file = fs.create(Path::new("/p"), 0o644, RDWR).unwrap();

        // write back to front so every chunk lands through a seek
        let chunks: Vec<(usize, &[u8])> = data
            .chunks(chunk)
            .enumerate()
            .map(|(i, c)| (i * chunk, c))
            .collect();
        for (offset, bytes) in chunks.iter().rev() {
            prop_assert_eq!(fs.write(&file, *offset as u64, bytes).unwrap(), bytes.len());
        }

        let mut read_back = Vec::new();
        loop {
            let got = fs.read(&file, read_back.len() as u64, read_chunk).unwrap();
            if got.is_empty() {
                break;
            }
            read_back.extend_from_slice(&got);
        }

        prop_assert_eq!(&read_back, &data);
        prop_assert_eq!(fs.getattr(Path::new("/p")).unwrap().size, data.len() as u64);
        prop_assert_eq!(backing_len(&dir, "p"), 2 * data.len() as u64);
    }
}
