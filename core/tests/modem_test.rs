// The pulse modem on its own and as the transport under a Kermit transfer.

mod common;

use std::fs;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use calclink_core::calibrate::compute_sensitivity;
use calclink_core::wav::{read_wav, write_wav};
use calclink_core::{
    Interrupt, KermitProtocol, ModemTransport, PulseEncoder, StreamDecoder, Transport,
    DEFAULT_FRAMERATE, DEFAULT_SENSITIVITY,
};

use common::{wait_for_bytes, Wire};

fn add_noise(samples: &[i16], std_dev: f64, seed: u64) -> Vec<i16> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, std_dev).expect("Failed to create distribution");
    samples
        .iter()
        .map(|&s| (s as f64 + normal.sample(&mut rng)).clamp(i16::MIN as f64, i16::MAX as f64) as i16)
        .collect()
}

#[test]
fn test_round_trip_through_wav_file() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("line.wav");
    let message = b"\x01+ S~* @-#N3X\r binary \x00\xff\x80";

    let encoder = PulseEncoder::new(DEFAULT_FRAMERATE);
    write_wav(&path, &encoder.encode_padded(message), DEFAULT_FRAMERATE)
        .expect("Failed to write wav");

    let wav = read_wav(&path).expect("Failed to read wav");
    assert_eq!(wav.framerate, DEFAULT_FRAMERATE);
    let decoder = StreamDecoder::new(wav.framerate, DEFAULT_SENSITIVITY);
    assert_eq!(decoder.decode_samples(&wav.samples), message.to_vec());
}

#[test]
fn test_decode_with_background_noise() {
    let message = b"noisy line";
    let encoder = PulseEncoder::new(DEFAULT_FRAMERATE);
    let mut samples = vec![0i16; 4000];
    samples.extend(encoder.encode_padded(message));
    let noisy = add_noise(&samples, 250.0, 7);

    let decoder = StreamDecoder::new(DEFAULT_FRAMERATE, DEFAULT_SENSITIVITY);
    assert_eq!(decoder.decode_samples(&noisy), message.to_vec());
}

#[test]
fn test_streamed_chunks_match_whole_buffer() {
    let message: Vec<u8> = (0..=255u8).collect();
    let samples = PulseEncoder::new(DEFAULT_FRAMERATE).encode_padded(&message);

    let mut decoder = StreamDecoder::new(DEFAULT_FRAMERATE, DEFAULT_SENSITIVITY);
    let mut out = Vec::new();
    for chunk in samples.chunks(333) {
        decoder.push(chunk, &mut out);
    }
    assert_eq!(out, message);
}

#[test]
fn test_calibrated_sensitivity_decodes_recording() {
    let encoder = PulseEncoder::new(DEFAULT_FRAMERATE);
    let mut samples = vec![0i16; 2 * DEFAULT_FRAMERATE as usize];
    samples.extend(encoder.encode_padded(b"calibration run"));
    let noisy = add_noise(&samples, 100.0, 11);

    let sensitivity =
        compute_sensitivity(&noisy, DEFAULT_FRAMERATE).expect("Failed to calibrate");
    assert!(sensitivity > 0.0 && sensitivity < 1.0, "got {}", sensitivity);
    let decoder = StreamDecoder::new(DEFAULT_FRAMERATE, sensitivity);
    assert_eq!(decoder.decode_samples(&noisy), b"calibration run".to_vec());
}

fn modem_pair() -> (ModemTransport<Wire>, ModemTransport<Wire>) {
    let to_b = Wire::default();
    let to_a = Wire::default();
    let mut a = ModemTransport::new(to_b.clone(), DEFAULT_FRAMERATE, DEFAULT_SENSITIVITY, None);
    let mut b = ModemTransport::new(to_a.clone(), DEFAULT_FRAMERATE, DEFAULT_SENSITIVITY, None);
    to_b.connect(b.sample_sender());
    to_a.connect(a.sample_sender());
    a.start().expect("Failed to start modem");
    b.start().expect("Failed to start modem");
    (a, b)
}

#[test]
fn test_modems_carry_bytes_both_ways() {
    let (mut a, mut b) = modem_pair();
    a.write_bytes(b"hello").expect("Failed to write");
    b.write_bytes(b"world!").expect("Failed to write");
    assert!(wait_for_bytes(&b, 5, Duration::from_secs(5)));
    assert!(wait_for_bytes(&a, 6, Duration::from_secs(5)));
    assert_eq!(b.read(), b"hello".to_vec());
    assert_eq!(a.read(), b"world!".to_vec());
    a.stop().expect("Failed to stop");
    b.stop().expect("Failed to stop");
}

#[test]
fn test_kermit_file_transfer_over_modems() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let inbox = tempfile::tempdir().expect("Failed to create temp dir");
    let src = dir.path().join("prog");
    let data: Vec<u8> = (0..300u32).map(|i| (i * 13 % 256) as u8).collect();
    fs::write(&src, &data).expect("Failed to write file");

    let (a, b) = modem_pair();
    let mut client = KermitProtocol::new(a, Interrupt::new());
    let mut server = KermitProtocol::new(b, Interrupt::new());
    for kp in [&mut client, &mut server] {
        kp.config_mut().poll_retries = 200;
        kp.config_mut().poll_delay = 0.02;
    }
    server.set_work_dir(inbox.path());

    let receiving = thread::spawn(move || {
        let result = server.receive();
        (server, result)
    });
    assert!(client.send_files(&[src], None).expect("Send failed"));
    let (server, result) = receiving.join().expect("Receiver panicked");
    assert!(result.expect("Receive failed"));

    assert_eq!(
        fs::read(inbox.path().join("PROG")).expect("Failed to read saved file"),
        data
    );
    client.into_transport().stop().expect("Failed to stop");
    server.into_transport().stop().expect("Failed to stop");
}
