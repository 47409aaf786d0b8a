use std::path::PathBuf;

use crate::decoder::{Receiver, SampleSender};
use crate::encoder::{AudioSink, Transmitter};
use crate::error::{LinkError, Result};

/// Duplex byte channel the protocol engines run over
pub trait Transport {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()>;

    /// Up to `n` buffered bytes, left in place
    fn peek_bytes(&self, n: usize) -> Vec<u8>;

    /// Up to `n` buffered bytes, removed from the buffer
    fn read_bytes(&mut self, n: usize) -> Vec<u8>;

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.write_bytes(&[byte])
    }

    fn peek_byte(&self) -> Option<u8> {
        self.peek_bytes(1).first().copied()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.read_bytes(1).first().copied()
    }

    fn peek(&self) -> Vec<u8> {
        self.peek_bytes(usize::MAX)
    }

    fn read(&mut self) -> Vec<u8> {
        self.read_bytes(usize::MAX)
    }

    fn clear_buffer(&mut self) {
        let dropped = self.read();
        if !dropped.is_empty() {
            log::debug!("Cleared {} buffered bytes", dropped.len());
        }
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write_bytes(bytes)
    }

    fn peek_bytes(&self, n: usize) -> Vec<u8> {
        (**self).peek_bytes(n)
    }

    fn read_bytes(&mut self, n: usize) -> Vec<u8> {
        (**self).read_bytes(n)
    }
}

/// `None` or `"none"` (any case, surrounding blanks ignored) disable
/// recording
fn check_prefix(prefix: Option<&str>) -> Option<&str> {
    prefix
        .map(str::trim)
        .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case("none"))
}

fn wav_path(prefix: &str, suffix: &str) -> PathBuf {
    let safe: String = prefix
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    PathBuf::from(format!("{}{}", safe, suffix))
}

/// Session recording paths for a WAV prefix: `(rx, tx)`
pub fn wav_paths(prefix: Option<&str>) -> (Option<PathBuf>, Option<PathBuf>) {
    match check_prefix(prefix) {
        Some(p) => (Some(wav_path(p, "_rx.wav")), Some(wav_path(p, "_tx.wav"))),
        None => (None, None),
    }
}

/// Transport over the audio modem: writes are encoded and played, reads
/// come from the receive decoder's buffer
pub struct ModemTransport<S: AudioSink> {
    tx: Transmitter<S>,
    rx: Receiver,
}

impl<S: AudioSink> ModemTransport<S> {
    pub fn new(sink: S, framerate: u32, sensitivity: f64, wav_prefix: Option<&str>) -> Self {
        let (rx_file, tx_file) = wav_paths(wav_prefix);
        Self {
            tx: Transmitter::new(sink, framerate, tx_file),
            rx: Receiver::new(framerate, sensitivity, rx_file),
        }
    }

    /// Where the audio input callback pushes its samples
    pub fn sample_sender(&self) -> SampleSender {
        self.rx.sample_sender()
    }

    pub fn start(&mut self) -> Result<()> {
        self.rx.start()
    }

    pub fn stop(&mut self) -> Result<()> {
        let tx_result = self.tx.close();
        self.rx.shutdown()?;
        tx_result
    }

    pub fn set_wav_prefix(&mut self, prefix: Option<&str>) -> Result<()> {
        let (rx_file, tx_file) = wav_paths(prefix);
        self.rx.set_wav_file(rx_file)?;
        self.tx.set_wav_file(tx_file)
    }
}

impl<S: AudioSink> Transport for ModemTransport<S> {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if self.tx.encode_and_transmit(bytes)? {
            Ok(())
        } else {
            Err(LinkError::TransmitterClosed)
        }
    }

    fn peek_bytes(&self, n: usize) -> Vec<u8> {
        self.rx.peek(n)
    }

    fn read_bytes(&mut self, n: usize) -> Vec<u8> {
        self.rx.read(n)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;

    /// In-memory transport that releases one canned reply per write.
    /// `after_clear` arrives once, right after the first buffer clear.
    #[derive(Default)]
    pub struct Canned {
        replies: VecDeque<Vec<u8>>,
        buffer: VecDeque<u8>,
        pub after_clear: Vec<u8>,
        pub written: Vec<Vec<u8>>,
    }

    impl Canned {
        pub fn new(replies: &[&[u8]]) -> Self {
            Self {
                replies: replies.iter().map(|r| r.to_vec()).collect(),
                ..Default::default()
            }
        }

        pub fn push_incoming(&mut self, bytes: &[u8]) {
            self.buffer.extend(bytes.iter().copied());
        }
    }

    impl Transport for Canned {
        fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
            self.written.push(bytes.to_vec());
            if let Some(reply) = self.replies.pop_front() {
                self.buffer.extend(reply);
            }
            Ok(())
        }

        fn peek_bytes(&self, n: usize) -> Vec<u8> {
            self.buffer.iter().take(n).copied().collect()
        }

        fn read_bytes(&mut self, n: usize) -> Vec<u8> {
            let n = n.min(self.buffer.len());
            self.buffer.drain(..n).collect()
        }

        fn clear_buffer(&mut self) {
            self.buffer.clear();
            self.buffer.extend(self.after_clear.drain(..));
        }
    }
}
