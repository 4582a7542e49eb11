use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::sync::mpsc;
use std::time::Duration;

use aio_bridge::{
    is_uring_supported, submit_block_io, AioDriver, BioDone, BioOp, BridgeBuilder, Driver,
    UringDriver,
};

const WAIT: Duration = Duration::from_secs(10);

fn aio_available() -> bool {
    match AioDriver::setup(1) {
        Ok(driver) => driver.destroy().is_ok(),
        Err(e) => {
            eprintln!("native aio unavailable, skipping: {e}");
            false
        }
    }
}

fn patterned_file(len: usize) -> (File, Vec<u8>) {
    let data: Vec<u8> = (0..len).map(|i| (i * 7 % 251) as u8).collect();
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&data).unwrap();
    file.flush().unwrap();
    (file, data)
}

fn wait(rx: &mpsc::Receiver<BioDone>) -> BioDone {
    rx.recv_timeout(WAIT).expect("completion callback never ran")
}

#[test]
fn read_first_page_of_known_file() {
    if !aio_available() {
        return;
    }
    let (file, data) = patterned_file(8192);

    let (tx, rx) = mpsc::channel();
    submit_block_io(file.as_raw_fd(), BioOp::Read, vec![0; 4096], 0, move |done| {
        tx.send(done).unwrap();
    });

    let done = wait(&rx);
    assert_eq!(done.error, 0);
    assert_eq!(done.transferred, 4096);
    assert_eq!(done.buf, data[..4096]);
}

#[test]
fn read_past_end_is_short() {
    if !aio_available() {
        return;
    }
    let (file, data) = patterned_file(1000);

    let (tx, rx) = mpsc::channel();
    submit_block_io(file.as_raw_fd(), BioOp::Read, vec![0; 512], 800, move |done| {
        tx.send(done).unwrap();
    });

    let done = wait(&rx);
    assert_eq!(done.result().unwrap(), 200);
    assert_eq!(done.buf[..200], data[800..]);
}

#[test]
fn sync_write_lands_in_file() {
    if !aio_available() {
        return;
    }
    let mut file = tempfile::tempfile().unwrap();

    let (tx, rx) = mpsc::channel();
    submit_block_io(
        file.as_raw_fd(),
        BioOp::WriteSync,
        b"durable block".to_vec(),
        512,
        move |done| tx.send(done).unwrap(),
    );
    assert_eq!(wait(&rx).result().unwrap(), 13);

    let mut back = Vec::new();
    file.seek(SeekFrom::Start(512)).unwrap();
    file.read_to_end(&mut back).unwrap();
    assert_eq!(back, b"durable block");
}

#[test]
fn many_reads_through_global_bridge() {
    if !aio_available() {
        return;
    }
    let (file, data) = patterned_file(64 * 512);

    let (tx, rx) = mpsc::channel();
    for i in 0..64 {
        let tx = tx.clone();
        submit_block_io(file.as_raw_fd(), BioOp::Read, vec![0; 512], i * 512, move |done| {
            tx.send((i, done)).unwrap();
        });
    }
    for _ in 0..64 {
        let (i, done) = rx.recv_timeout(WAIT).unwrap();
        let start = i as usize * 512;
        assert_eq!(done.transferred, 512);
        assert_eq!(done.buf, data[start..start + 512]);
    }
}

#[test]
fn uring_backed_bridge_reads() {
    if !is_uring_supported() {
        eprintln!("io_uring unavailable, skipping");
        return;
    }
    let (file, data) = patterned_file(4096);
    let bridge = BridgeBuilder::<AioDriver>::new()
        .with_capacity(8)
        .driver::<UringDriver>()
        .build()
        .unwrap();
    assert_eq!(bridge.capacity(), 8);

    let (tx, rx) = mpsc::channel();
    bridge.submit(file.as_raw_fd(), BioOp::Read, vec![0; 100], 100, move |done| {
        tx.send(done).unwrap();
    });

    let done = wait(&rx);
    assert_eq!(done.transferred, 100);
    assert_eq!(done.buf, data[100..200]);
}

#[test]
fn negative_offset_fails_on_both_drivers() {
    if !aio_available() || !is_uring_supported() {
        return;
    }
    let (file, _) = patterned_file(8);
    let fd = file.as_raw_fd();

    let aio = BridgeBuilder::<AioDriver>::new().with_capacity(4).build().unwrap();
    let uring = BridgeBuilder::<UringDriver>::new()
        .with_capacity(4)
        .build()
        .unwrap();

    let (tx, rx) = mpsc::channel();
    let tx2 = tx.clone();
    aio.submit(fd, BioOp::Write, b"xy".to_vec(), -1, move |done| {
        tx.send(done).unwrap();
    });
    let from_aio = wait(&rx);
    uring.submit(fd, BioOp::Write, b"xy".to_vec(), -1, move |done| {
        tx2.send(done).unwrap();
    });
    let from_uring = wait(&rx);

    for done in [from_aio, from_uring] {
        assert_eq!(done.transferred, 0);
        assert_eq!(done.error, libc::EINVAL);
    }
    assert_eq!(file.metadata().unwrap().len(), 8);
}
