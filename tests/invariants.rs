//! Block-accounting scenarios: whatever an operation allocates, its
//! inverse gives back.

use flatfs::{Cred, FileDisk, FileSystem, MemDisk, BSIZE, NBLOCK};

fn mount() -> FileSystem<MemDisk> {
    FileSystem::format(MemDisk::new(NBLOCK)).unwrap()
}

fn cred() -> Cred {
    Cred { uid: 500, gid: 500 }
}

#[test]
fn create_write_unlink_restores_bfree() {
    let mut fs = mount();
    // The first insertion into a directory allocates its entry block,
    // which only goes away with the directory itself; pin it down
    // before taking the baseline.
    fs.create("/seed", 0o100644, &cred()).unwrap();
    let before = fs.statfs().bfree;

    fs.create("/a", 0o100644, &cred()).unwrap();
    assert_eq!(fs.write("/a", b"HELLO", 0).unwrap(), 5);
    assert!(fs.statfs().bfree < before);

    fs.unlink("/a").unwrap();
    assert_eq!(fs.statfs().bfree, before);
}

#[test]
fn truncate_frees_one_block_per_4096_bytes() {
    let mut fs = mount();
    fs.create("/t", 0o100644, &cred()).unwrap();
    let empty = fs.statfs().bfree;

    // 9000 bytes occupy ceil(9000 / 4096) = 3 blocks.
    fs.write("/t", &vec![7u8; 9000], 0).unwrap();
    assert_eq!(fs.statfs().bfree, empty - 3);

    fs.truncate("/t", 0).unwrap();
    assert_eq!(fs.statfs().bfree, empty);
}

#[test]
fn large_file_blocks_come_back() {
    let mut fs = mount();
    fs.create("/seed", 0o100644, &cred()).unwrap();
    let before = fs.statfs().bfree;

    let size = 20 * 1024;
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    fs.create("/largefile", 0o100644, &cred()).unwrap();
    for off in (0..size).step_by(BSIZE) {
        let end = std::cmp::min(off + BSIZE, size);
        assert_eq!(
            fs.write("/largefile", &data[off..end], off as u64).unwrap(),
            end - off
        );
    }
    assert_eq!(fs.getattr("/largefile").unwrap().size, size as u64);
    assert!(fs.statfs().bfree < before);

    let mut back = vec![0u8; size];
    assert_eq!(fs.read("/largefile", &mut back, 0).unwrap(), size);
    assert_eq!(back, data);

    fs.unlink("/largefile").unwrap();
    assert_eq!(fs.statfs().bfree, before);
}

#[test]
fn mkdir_rmdir_restores_bfree() {
    let mut fs = mount();
    fs.create("/seed", 0o100644, &cred()).unwrap();
    let before = fs.statfs().bfree;

    fs.mkdir("/d", 0o755, &cred()).unwrap();
    fs.create("/d/child", 0o100644, &cred()).unwrap();
    // Inode, lazily allocated directory block, child inode.
    assert_eq!(fs.statfs().bfree, before - 3);

    // Emptying the directory does not give its block back; only
    // destroying the directory does.
    fs.unlink("/d/child").unwrap();
    assert_eq!(fs.statfs().bfree, before - 2);

    fs.rmdir("/d").unwrap();
    assert_eq!(fs.statfs().bfree, before);
}

#[test]
fn statfs_shape() {
    let fs = mount();
    let st = fs.statfs();
    assert_eq!(st.bsize, 4096);
    assert_eq!(st.frsize, 4096);
    assert_eq!(st.blocks, 400);
    assert_eq!(st.bfree, st.bavail);
    assert_eq!(st.namemax, 27);
    assert_eq!((st.files, st.ffree, st.favail), (0, 0, 0));
}

#[test]
fn image_file_survives_remount() {
    let path = std::env::temp_dir().join(format!("flatfs-image-{}.img", std::process::id()));
    {
        let disk = FileDisk::create(&path, NBLOCK).unwrap();
        let mut fs = FileSystem::format(disk).unwrap();
        fs.mkdir("/dir3", 0o777, &cred()).unwrap();
        fs.create("/dir3/file.12k-", 0o100777, &cred()).unwrap();
        fs.write("/dir3/file.12k-", &vec![b'z'; 12287], 0).unwrap();
    }
    {
        let disk = FileDisk::open(&path).unwrap();
        let mut fs = FileSystem::mount(disk).unwrap();
        let st = fs.getattr("/dir3/file.12k-").unwrap();
        assert_eq!(st.size, 12287);
        assert_eq!(st.uid, 500);
        let mut buf = vec![0u8; 12287];
        assert_eq!(fs.read("/dir3/file.12k-", &mut buf, 0).unwrap(), 12287);
        assert!(buf.iter().all(|&b| b == b'z'));
    }
    std::fs::remove_file(&path).unwrap();
}
