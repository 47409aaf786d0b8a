#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use calclink_core::{AudioSink, LinkError, Result, SampleSender, Transport};

/// Releases one scripted reply after each write, like a device answering
#[derive(Default)]
pub struct Scripted {
    replies: VecDeque<Vec<u8>>,
    buffer: VecDeque<u8>,
    pub written: Vec<Vec<u8>>,
}

impl Scripted {
    pub fn new(replies: &[&[u8]]) -> Self {
        Self {
            replies: replies.iter().map(|r| r.to_vec()).collect(),
            ..Default::default()
        }
    }
}

impl Transport for Scripted {
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
}

type Queue = Arc<Mutex<VecDeque<u8>>>;

/// One end of an in-memory duplex byte pipe
pub struct PipeEnd {
    incoming: Queue,
    outgoing: Queue,
}

pub fn pipe() -> (PipeEnd, PipeEnd) {
    let a: Queue = Arc::default();
    let b: Queue = Arc::default();
    (
        PipeEnd {
            incoming: a.clone(),
            outgoing: b.clone(),
        },
        PipeEnd {
            incoming: b,
            outgoing: a,
        },
    )
}

impl Transport for PipeEnd {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.outgoing.lock().extend(bytes.iter().copied());
        Ok(())
    }

    fn peek_bytes(&self, n: usize) -> Vec<u8> {
        self.incoming.lock().iter().take(n).copied().collect()
    }

    fn read_bytes(&mut self, n: usize) -> Vec<u8> {
        let mut queue = self.incoming.lock();
        let n = n.min(queue.len());
        queue.drain(..n).collect()
    }
}

/// Audio sink feeding another modem's receiver, connected after both
/// modems exist
#[derive(Clone, Default)]
pub struct Wire(Arc<OnceLock<SampleSender>>);

impl Wire {
    pub fn connect(&self, sender: SampleSender) {
        let _ = self.0.set(sender);
    }
}

impl AudioSink for Wire {
    fn play(&mut self, samples: &[i16]) -> Result<()> {
        let sender = self
            .0
            .get()
            .ok_or_else(|| LinkError::Device("wire not connected".to_string()))?;
        sender
            .send(samples.to_vec())
            .map_err(|e| LinkError::Device(e.to_string()))
    }
}

/// Wait until `transport` holds at least `n` bytes
pub fn wait_for_bytes<T: Transport>(transport: &T, n: usize, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while transport.peek().len() < n {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    true
}
