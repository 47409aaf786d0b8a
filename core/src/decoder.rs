use crossbeam_channel::{Receiver as ChunkReceiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{LinkError, Result};
use crate::wav::Recording;
use crate::{BITS_PER_FRAME, BITS_PER_SEC, MAX_CHAR_BUFFER, MAX_SHORT, TRIGGER_VALUE};

/// Producer side of the sample queue, fed by the audio input callback
pub type SampleSender = Sender<Vec<i16>>;

const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Falling-edge detector: element `k` is [`TRIGGER_VALUE`] when the drop
/// from `s[k]` to `s[k+1]` exceeds `sensitivity` of full scale
pub fn filtered(samples: &[i16], sensitivity: f64) -> Vec<i16> {
    samples
        .windows(2)
        .map(|pair| {
            let diff = pair[0] as i32 - pair[1] as i32;
            if diff > 0 && diff as f64 / MAX_SHORT as f64 > sensitivity {
                TRIGGER_VALUE
            } else {
                0
            }
        })
        .collect()
}

/// Edge-triggered frame decoder over an accumulating sample buffer
#[derive(Debug, Clone)]
pub struct StreamDecoder {
    samples_per_bit: usize,
    samples_per_frame: usize,
    sensitivity: f64,
    pending: Vec<i16>,
}

impl StreamDecoder {
    pub fn new(framerate: u32, sensitivity: f64) -> Self {
        let samples_per_bit = (framerate as usize / BITS_PER_SEC).max(1);
        Self {
            samples_per_bit,
            samples_per_frame: BITS_PER_FRAME * samples_per_bit,
            sensitivity,
            pending: Vec::new(),
        }
    }

    pub fn samples_per_bit(&self) -> usize {
        self.samples_per_bit
    }

    pub fn samples_per_frame(&self) -> usize {
        self.samples_per_frame
    }

    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }

    /// Append a chunk of samples and decode every complete frame; the
    /// unconsumed tail is kept for the next chunk
    pub fn push(&mut self, chunk: &[i16], out: &mut Vec<u8>) {
        self.pending.extend_from_slice(chunk);
        let filt = filtered(&self.pending, self.sensitivity);
        let consumed = self.decode_buffer(&filt, out);
        self.pending.drain(..consumed);
    }

    /// Decode a whole recording at once
    pub fn decode_samples(&self, samples: &[i16]) -> Vec<u8> {
        let mut out = Vec::new();
        self.decode_buffer(&filtered(samples, self.sensitivity), &mut out);
        out
    }

    /// Returns the index of the first sample not yet examined
    pub fn decode_buffer(&self, filt: &[i16], out: &mut Vec<u8>) -> usize {
        let mut i = 0;
        while i + self.samples_per_frame < filt.len() {
            if filt[i] == TRIGGER_VALUE {
                out.push(self.decode_frame(&filt[i..i + self.samples_per_frame]));
                i += self.samples_per_frame;
            } else {
                i += 1;
            }
        }
        i
    }

    fn edge_triggers(&self, frame: &[i16]) -> Vec<usize> {
        let skip = (self.samples_per_bit / 2).max(1);
        let mut edges = Vec::new();
        let mut i = 0;
        while i < frame.len() {
            if frame[i] == TRIGGER_VALUE {
                edges.push(i);
                i += skip;
            } else {
                i += 1;
            }
        }
        edges
    }

    /// Decode one filtered frame that starts at its start-bit edge.
    /// Every pulse after the start bit clears the data bit it falls on.
    pub fn decode_frame(&self, frame: &[i16]) -> u8 {
        let mut byte = 0xFFu8;
        for &edge in self.edge_triggers(frame).iter().skip(1) {
            let pos = edge as f64 / self.samples_per_bit as f64;
            // bit n is centred on position n + 1
            if let Some(bit) = (0..8).find(|&bit| pos < bit as f64 + 1.5) {
                byte &= !(1 << bit);
            }
        }
        byte
    }
}

/// Shared FIFO of decoded bytes
#[derive(Debug, Clone, Default)]
pub struct CharBuffer(Arc<Mutex<VecDeque<u8>>>);

impl CharBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&self, bytes: &[u8]) {
        let mut chars = self.0.lock();
        chars.extend(bytes.iter().copied());
        let excess = chars.len().saturating_sub(MAX_CHAR_BUFFER);
        if excess > 0 {
            chars.drain(..excess);
            log::warn!("Receive buffer full, dropped {} bytes", excess);
        }
    }

    pub fn peek(&self, n: usize) -> Vec<u8> {
        self.0.lock().iter().take(n).copied().collect()
    }

    pub fn read(&self, n: usize) -> Vec<u8> {
        let mut chars = self.0.lock();
        let n = n.min(chars.len());
        chars.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// Receive side of the modem. A background thread drains the sample queue
/// through a [`StreamDecoder`] into a [`CharBuffer`].
pub struct Receiver {
    framerate: u32,
    sensitivity: f64,
    sender: SampleSender,
    chunks: ChunkReceiver<Vec<i16>>,
    chars: CharBuffer,
    recording: Arc<Mutex<Option<Recording>>>,
    done: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    started: bool,
}

impl Receiver {
    pub fn new(framerate: u32, sensitivity: f64, wav_file: Option<PathBuf>) -> Self {
        let (sender, chunks) = crossbeam_channel::unbounded();
        Self {
            framerate,
            sensitivity,
            sender,
            chunks,
            chars: CharBuffer::new(),
            recording: Arc::new(Mutex::new(
                wav_file.map(|path| Recording::new(path, framerate)),
            )),
            done: Arc::new(AtomicBool::new(false)),
            handle: None,
            started: false,
        }
    }

    pub fn sample_sender(&self) -> SampleSender {
        self.sender.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawn the decode thread; calling it again is a no-op
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        let mut decoder = StreamDecoder::new(self.framerate, self.sensitivity);
        let chunks = self.chunks.clone();
        let chars = self.chars.clone();
        let recording = Arc::clone(&self.recording);
        let done = Arc::clone(&self.done);

        let handle = std::thread::Builder::new()
            .name("rx-decode".to_string())
            .spawn(move || {
                let mut decoded = Vec::new();
                while !done.load(Ordering::SeqCst) {
                    let chunk = match chunks.recv_timeout(RECV_TIMEOUT) {
                        Ok(chunk) => chunk,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    };
                    if let Some(rec) = recording.lock().as_mut() {
                        rec.extend(&chunk);
                    }
                    decoder.push(&chunk, &mut decoded);
                    if !decoded.is_empty() {
                        log::trace!("Decoded {} bytes", decoded.len());
                        chars.extend(&decoded);
                        decoded.clear();
                    }
                }
            })
            .map_err(LinkError::Io)?;

        self.handle = Some(handle);
        self.started = true;
        Ok(())
    }

    pub fn peek(&self, n: usize) -> Vec<u8> {
        self.chars.peek(n)
    }

    pub fn read(&self, n: usize) -> Vec<u8> {
        self.chars.read(n)
    }

    pub fn buffered(&self) -> usize {
        self.chars.len()
    }

    /// Flush the current recording and record to `wav_file` from now on
    pub fn set_wav_file(&self, wav_file: Option<PathBuf>) -> Result<()> {
        let previous = {
            let mut recording = self.recording.lock();
            std::mem::replace(
                &mut *recording,
                wav_file.map(|path| Recording::new(path, self.framerate)),
            )
        };
        if let Some(rec) = previous {
            rec.finish()?;
        }
        Ok(())
    }

    /// Stop the decode thread and flush the recording. Only the first call
    /// after `start` has any effect.
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.done.store(true, Ordering::SeqCst);
        if handle.join().is_err() {
            log::error!("Receive thread panicked");
        }
        if let Some(rec) = self.recording.lock().take() {
            rec.finish()?;
        }
        Ok(())
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Failed to shut down receiver: {}", e);
        }
    }
}
