//! File-level behaviour of the POSIX driver.

use h5core_io::{FileSpace, IoMode, OpenFlags, Sec2Driver, Vfd, VfdError, MAX_ADDR};

fn create(path: &std::path::Path) -> Sec2Driver {
    Sec2Driver::open(path, OpenFlags::RDWR | OpenFlags::CREAT | OpenFlags::TRUNC, MAX_ADDR)
        .unwrap()
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[test]
fn symlinked_paths_share_identity() {
    let dir = tempfile::tempdir().unwrap();
    let real = dir.path().join("data.h5");
    let link = dir.path().join("alias.h5");
    let a = create(&real);
    std::os::unix::fs::symlink(&real, &link).unwrap();
    let b = Sec2Driver::open(&link, OpenFlags::RDONLY, MAX_ADDR).unwrap();
    assert_eq!(a.identity(), b.identity());
    assert_eq!(a.cmp(&b), std::cmp::Ordering::Equal);

    let other = create(&dir.path().join("other.h5"));
    assert_ne!(a.cmp(&other), std::cmp::Ordering::Equal);
}

// ---------------------------------------------------------------------------
// Read / write / EOA
// ---------------------------------------------------------------------------

#[test]
fn requests_are_checked_against_eoa() {
    let dir = tempfile::tempdir().unwrap();
    let mut d = create(&dir.path().join("f.h5"));
    assert!(matches!(d.write(0, b"x"), Err(VfdError::BadRange { .. })));
    d.set_eoa(16).unwrap();
    d.write(0, b"0123456789").unwrap();
    assert_eq!(d.get_eof(), 10);

    let mut buf = [0xAAu8; 16];
    d.read(0, &mut buf).unwrap();
    assert_eq!(&buf[..10], b"0123456789");
    assert!(buf[10..].iter().all(|&b| b == 0));
    assert!(matches!(d.set_eoa(MAX_ADDR + 1), Err(VfdError::BadRange { .. })));
}

#[test]
fn truncate_tracks_eoa_and_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f.h5");
    let mut d = create(&path).with_io_mode(IoMode::Seek);
    d.set_eoa(4096).unwrap();
    d.write(0, &[1u8; 100]).unwrap();
    d.truncate(false).unwrap();
    assert_eq!(d.get_eof(), 4096);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);

    d.set_eoa(200).unwrap();
    d.truncate(false).unwrap();
    d.truncate(true).unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 200);

    let mut buf = [0u8; 4];
    d.read(96, &mut buf).unwrap();
    assert_eq!(buf, [1, 1, 1, 1]);
    Box::new(d).close().unwrap();
}

#[test]
fn flush_syncs_written_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f.h5");
    let mut d = create(&path);
    d.set_eoa(64).unwrap();
    d.write(8, b"durable").unwrap();
    d.flush().unwrap();
    d.flush().unwrap();

    let on_disk = std::fs::read(&path).unwrap();
    assert_eq!(&on_disk[8..15], b"durable");
    assert_eq!(d.get_eof(), 15);
    Box::new(d).close().unwrap();
}

// ---------------------------------------------------------------------------
// Locking
// ---------------------------------------------------------------------------

#[test]
fn exclusive_lock_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f.h5");
    let mut a = create(&path);
    let mut b = Sec2Driver::open(&path, OpenFlags::RDONLY, MAX_ADDR).unwrap();
    a.lock(true).unwrap();
    assert!(matches!(b.lock(false), Err(VfdError::LockUnavailable(_))));
    a.unlock().unwrap();
    b.lock(false).unwrap();
}

// ---------------------------------------------------------------------------
// Space allocation driving the EOA
// ---------------------------------------------------------------------------

#[test]
fn allocator_and_driver_agree_on_eoa() {
    let dir = tempfile::tempdir().unwrap();
    let mut d = create(&dir.path().join("f.h5"));
    let mut space = FileSpace::new(0, d.maxaddr());
    let a = space.alloc(64).unwrap();
    let b = space.alloc(64).unwrap();
    d.set_eoa(space.eoa()).unwrap();
    d.write(a, &[1; 64]).unwrap();
    d.write(b, &[2; 64]).unwrap();

    space.free(b, 64).unwrap();
    d.set_eoa(space.eoa()).unwrap();
    d.truncate(true).unwrap();
    assert_eq!(d.get_eof(), 64);
    assert!(matches!(
        d.read(b, &mut [0u8; 8]),
        Err(VfdError::BadRange { .. })
    ));
}
