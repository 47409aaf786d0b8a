use std::path::PathBuf;
use std::time::Instant;

use crate::error::{LinkError, Result};
use crate::wav::Recording;
use crate::{BITS_PER_SEC, CHUNK_SAMPLES, MAX_SHORT, TAIL_SAMPLES};

const STOP_BITS: usize = 2;

/// Output side of the audio device
pub trait AudioSink {
    /// Play the samples, returning once they have been played out
    fn play(&mut self, samples: &[i16]) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Pulse-per-bit encoder: a `0` bit is a single full-scale pulse followed by
/// silence, a `1` bit is silence
#[derive(Debug, Clone)]
pub struct PulseEncoder {
    zero_bit: Vec<i16>,
    one_bit: Vec<i16>,
}

impl PulseEncoder {
    pub fn new(framerate: u32) -> Self {
        let samples_per_bit = ((framerate as f64 / BITS_PER_SEC as f64).round() as usize).max(1);

        let mut zero_bit = vec![0; samples_per_bit];
        zero_bit[0] = MAX_SHORT;

        Self {
            zero_bit,
            one_bit: vec![0; samples_per_bit],
        }
    }

    pub fn samples_per_bit(&self) -> usize {
        self.one_bit.len()
    }

    fn push_bit(&self, bit: u8, out: &mut Vec<i16>) {
        if bit == 1 {
            out.extend_from_slice(&self.one_bit);
        } else {
            out.extend_from_slice(&self.zero_bit);
        }
    }

    /// Lead-in one bit, start bit, 8 data bits LSB first, two stop bits
    pub fn encode_byte(&self, byte: u8, out: &mut Vec<i16>) {
        self.push_bit(1, out);
        self.push_bit(0, out);
        for i in 0..8 {
            self.push_bit((byte >> i) & 0x01, out);
        }
        for _ in 0..STOP_BITS {
            self.push_bit(1, out);
        }
    }

    pub fn encode(&self, bytes: &[u8]) -> Vec<i16> {
        let mut samples = Vec::with_capacity(bytes.len() * 12 * self.samples_per_bit());
        for &byte in bytes {
            self.encode_byte(byte, &mut samples);
        }
        samples
    }

    /// Encode and pad with silence to whole playback chunks plus a tail
    pub fn encode_padded(&self, bytes: &[u8]) -> Vec<i16> {
        let mut samples = self.encode(bytes);
        let pad = CHUNK_SAMPLES - samples.len() % CHUNK_SAMPLES;
        samples.resize(samples.len() + pad + TAIL_SAMPLES, 0);
        samples
    }
}

/// Encodes bytes and plays them through an [`AudioSink`], optionally
/// recording the session with the gaps between transmissions
pub struct Transmitter<S: AudioSink> {
    sink: S,
    encoder: PulseEncoder,
    framerate: u32,
    recording: Option<Recording>,
    idle_since: Instant,
    closed: bool,
}

impl<S: AudioSink> Transmitter<S> {
    pub fn new(sink: S, framerate: u32, wav_file: Option<PathBuf>) -> Self {
        Self {
            sink,
            encoder: PulseEncoder::new(framerate),
            framerate,
            recording: wav_file.map(|path| Recording::new(path, framerate)),
            idle_since: Instant::now(),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns `Ok(false)` without playing anything once closed
    pub fn encode_and_transmit(&mut self, bytes: &[u8]) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        let samples = self.encoder.encode_padded(bytes);

        if let Some(recording) = self.recording.as_mut() {
            let gap = self.idle_since.elapsed().as_secs_f64() * self.framerate as f64;
            recording.extend_silence(gap as usize);
            recording.extend(&samples);
        }

        self.sink.play(&samples)?;
        self.idle_since = Instant::now();
        Ok(true)
    }

    /// Flush the current recording and record to `wav_file` from now on
    pub fn set_wav_file(&mut self, wav_file: Option<PathBuf>) -> Result<()> {
        let previous = self.recording.take();
        self.recording = wav_file.map(|path| Recording::new(path, self.framerate));
        if let Some(recording) = previous {
            recording.finish()?;
        }
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink.close()?;
        if let Some(recording) = self.recording.take() {
            recording.finish()?;
        }
        Ok(())
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(LinkError::TransmitterClosed)
        } else {
            Ok(())
        }
    }
}

impl<S: AudioSink> Drop for Transmitter<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("Failed to close transmitter: {}", e);
        }
    }
}
