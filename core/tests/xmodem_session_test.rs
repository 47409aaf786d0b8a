mod common;

use std::fs;
use std::thread;
use std::time::Duration;

use calclink_core::hpobj::txt_to_hpbin;
use calclink_core::xmodem::{self, Xmodem};
use calclink_core::{Interrupt, Transport};

use common::{pipe, Scripted};

fn fast<T: Transport>(xm: &mut Xmodem<T>) {
    let config = xm.config_mut();
    config.pause = 0.005;
    config.cpause = 0.01;
    config.npoll = 200;
}

#[test]
fn test_receive_single_block_from_device() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("VAR");
    let object = b"HPHP48-E\x2c\x2a\x11\x00\x00\x00\x41";
    let block = xmodem::construct_blocks(object, 0).remove(0);

    let mut xm = Xmodem::new(
        Scripted::new(&[&block, &[xmodem::END_TRANS], &[]]),
        Interrupt::new(),
    );
    fast(&mut xm);
    assert!(xm.receive_file(&path).expect("Receive failed"));

    let mut expected = object.to_vec();
    expected.push(0);
    assert_eq!(fs::read(&path).expect("Failed to read"), expected);
    assert_eq!(
        xm.transport().written,
        vec![vec![xmodem::NAK], vec![xmodem::ACK], vec![xmodem::ACK]]
    );
}

#[test]
fn test_device_cancel_aborts_receive() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("VAR");
    let mut xm = Xmodem::new(Scripted::new(&[&[0x18, 0x18, 0x18]]), Interrupt::new());
    fast(&mut xm);
    assert!(!xm.receive_file(&path).expect("Receive failed"));
    assert!(!path.exists());
}

#[test]
fn test_transfer_over_pipe() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let src = dir.path().join("big.bin");
    let dst = dir.path().join("copy.bin");
    // ends in a non-zero byte so no padding is mistaken for data
    let mut data: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 251) as u8).collect();
    data.push(0x42);
    fs::write(&src, &data).expect("Failed to write file");

    let (a, b) = pipe();
    let mut sender = Xmodem::new(a, Interrupt::new());
    let mut receiver = Xmodem::new(b, Interrupt::new());
    fast(&mut sender);
    fast(&mut receiver);

    let sending = thread::spawn(move || sender.send_file(&src));
    thread::sleep(Duration::from_millis(50));
    assert!(receiver.receive_file(&dst).expect("Receive failed"));
    assert!(sending
        .join()
        .expect("Sender panicked")
        .expect("Send failed"));

    let mut expected = data.clone();
    expected.push(0);
    assert_eq!(fs::read(&dst).expect("Failed to read"), expected);
}

#[test]
fn test_text_sent_as_string_object() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let dst = dir.path().join("STR");

    let (a, b) = pipe();
    let mut sender = Xmodem::new(a, Interrupt::new());
    let mut receiver = Xmodem::new(b, Interrupt::new());
    fast(&mut sender);
    fast(&mut receiver);

    let sending = thread::spawn(move || sender.send_text(b"  hello calc\n"));
    thread::sleep(Duration::from_millis(50));
    assert!(receiver.receive_file(&dst).expect("Receive failed"));
    assert!(sending
        .join()
        .expect("Sender panicked")
        .expect("Send failed"));

    // the object's own NUL terminator survives the padding strip
    assert_eq!(
        fs::read(&dst).expect("Failed to read"),
        txt_to_hpbin(b"hello calc")
    );
}
