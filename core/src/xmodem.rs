//! 128-byte XMODEM with the arithmetic checksum
//!
//! The calculator does no CRC checking and pads the last block with NULs.
//! A block is 132 bytes, 0.44 s on the line at 2400 bit/s.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::config::{ConfigError, ConfigTable, ConfigValue as V, Configurable};
use crate::error::{LinkError, Result};
use crate::hpobj::txt_to_hpbin;
use crate::interrupt::Interrupt;
use crate::transport::Transport;

pub const HEADER: u8 = 0x01;
pub const END_TRANS: u8 = 0x04;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
pub const CANCEL: u8 = 0x18;

pub const PACKET_LEN: usize = 128;
/// Header, sequence, complement, payload, checksum
pub const BLOCK_LEN: usize = PACKET_LEN + 4;

/// The calculator sends three CANCELs when ON is pressed
const CCC: [u8; 3] = [CANCEL; 3];

/// Sequence numbers run 1..=255 and wrap back to 1
pub fn next_seq(n: u8) -> u8 {
    (n % 255) + 1
}

pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// Cut `data` into payloads, padding the last one with `pad`
pub fn split_data(data: &[u8], pad: u8) -> Vec<[u8; PACKET_LEN]> {
    data.chunks(PACKET_LEN)
        .map(|chunk| {
            let mut payload = [pad; PACKET_LEN];
            payload[..chunk.len()].copy_from_slice(chunk);
            payload
        })
        .collect()
}

pub fn construct_block(seq: u8, payload: &[u8; PACKET_LEN]) -> Vec<u8> {
    let mut block = Vec::with_capacity(BLOCK_LEN);
    block.extend_from_slice(&[HEADER, seq, 255 - seq]);
    block.extend_from_slice(payload);
    block.push(checksum(payload));
    block
}

/// Blocks for `data`, numbered from 1
pub fn construct_blocks(data: &[u8], pad: u8) -> Vec<Vec<u8>> {
    let mut seq = 0;
    split_data(data, pad)
        .iter()
        .map(|payload| {
            seq = next_seq(seq);
            construct_block(seq, payload)
        })
        .collect()
}

pub fn is_valid_block(block: &[u8], seq: u8) -> bool {
    block.len() == BLOCK_LEN
        && block[0] == HEADER
        && block[1] == seq
        && block[2] == 255 - seq
        && block[BLOCK_LEN - 1] == checksum(&block[3..BLOCK_LEN - 1])
}

/// What one receive poll found
#[derive(Debug, Clone, PartialEq)]
enum Response {
    Block(Vec<u8>),
    Ack,
    Nak,
    Cancel,
    EndOfTransmission,
    Fail,
}

#[derive(Debug, Clone, PartialEq)]
pub struct XmodemConfig {
    pub cpause: f64,
    pub ignore_sec: f64,
    pub ignorerx: bool,
    pub init_wait: u32,
    pub npoll: u32,
    pub pad_char: u8,
    pub pause: f64,
    pub receive_retry: u32,
    pub send_retry: u32,
}

impl Default for XmodemConfig {
    fn default() -> Self {
        Self {
            cpause: 3.0,
            ignore_sec: 0.5,
            ignorerx: false,
            init_wait: 10,
            npoll: 30,
            pad_char: 0x00,
            pause: 0.1,
            receive_retry: 5,
            send_retry: 5,
        }
    }
}

impl Configurable for XmodemConfig {
    fn to_table(&self) -> ConfigTable {
        ConfigTable::new()
            .entry("cpause", V::Float(self.cpause), "Seconds to wait when double-checking cancel")
            .entry("ignore-sec", V::Float(self.ignore_sec), "Seconds to pause between packets")
            .entry("ignorerx", V::Bool(self.ignorerx), "Ignore response")
            .entry(
                "init-wait",
                V::Int(self.init_wait.into()),
                "Number of receive-loops to wait to send file",
            )
            .entry("npoll", V::Int(self.npoll.into()), "Number of receive-loops before timeout")
            .entry("pad-char", V::Int(self.pad_char.into()), "Pad character")
            .entry("pause", V::Float(self.pause), "Seconds between receive-loops")
            .entry(
                "receive-retry",
                V::Int(self.receive_retry.into()),
                "Number of retries when an invalid packet is received",
            )
            .entry(
                "send-retry",
                V::Int(self.send_retry.into()),
                "Number of retries when a sent packet is rejected",
            )
    }

    fn load_table(&mut self, table: &ConfigTable) -> std::result::Result<(), ConfigError> {
        *self = Self {
            cpause: table.seconds("cpause")?,
            ignore_sec: table.seconds("ignore-sec")?,
            ignorerx: table.boolean("ignorerx")?,
            init_wait: table.count("init-wait")?,
            npoll: table.count("npoll")?,
            pad_char: table.byte("pad-char")?,
            pause: table.seconds("pause")?,
            receive_retry: table.count("receive-retry")?,
            send_retry: table.count("send-retry")?,
        };
        Ok(())
    }
}

/// XMODEM engine over a [`Transport`]
pub struct Xmodem<T: Transport> {
    transport: T,
    config: XmodemConfig,
    interrupt: Interrupt,
}

impl<T: Transport> Xmodem<T> {
    pub fn new(transport: T, interrupt: Interrupt) -> Self {
        Self {
            transport,
            config: XmodemConfig::default(),
            interrupt,
        }
    }

    pub fn config(&self) -> &XmodemConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut XmodemConfig {
        &mut self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn sleep(secs: f64) {
        thread::sleep(Duration::from_secs_f64(secs));
    }

    fn ends_with_cancel(&self) -> bool {
        self.transport.peek().ends_with(&CCC)
    }

    /// Poll the buffer until something recognisable arrives or `npoll`
    /// rounds pass
    fn rcv_buf(&mut self) -> Result<Response> {
        for _ in 0..self.config.npoll {
            self.interrupt.check()?;
            let buf = self.transport.peek();
            if buf.ends_with(&CCC) {
                // a lone burst could be noise, look again after a pause
                Self::sleep(self.config.cpause);
                if self.ends_with_cancel() {
                    return Ok(Response::Cancel);
                }
            } else if buf.len() == 1 && buf[0] != HEADER {
                match self.transport.read_byte() {
                    Some(END_TRANS) => return Ok(Response::EndOfTransmission),
                    Some(ACK) => return Ok(Response::Ack),
                    Some(NAK) => return Ok(Response::Nak),
                    other => log::debug!("Dropping stray byte {:?}", other),
                }
            } else if !buf.is_empty() && buf.len() < BLOCK_LEN {
                let skip = buf.iter().take_while(|&&b| b != HEADER).count();
                if skip > 0 {
                    log::debug!("Dropping {} bytes before block header", skip);
                    self.transport.read_bytes(skip);
                }
            } else if buf.len() >= BLOCK_LEN {
                return Ok(Response::Block(self.transport.read_bytes(BLOCK_LEN)));
            }
            Self::sleep(self.config.pause);
        }
        Ok(Response::Fail)
    }

    /// The reply to something just sent. With `ignorerx` every reply is
    /// taken as an ACK after a fixed pause.
    fn rcv_resp(&mut self) -> Result<Response> {
        if self.config.ignorerx {
            Self::sleep(self.config.ignore_sec);
            return Ok(Response::Ack);
        }
        self.rcv_buf()
    }

    fn send_end_trans(&mut self) -> Result<bool> {
        for _ in 0..self.config.send_retry {
            self.transport.write_byte(END_TRANS)?;
            match self.rcv_resp()? {
                Response::Ack => return Ok(true),
                Response::Cancel => return Ok(false),
                _ => {}
            }
        }
        Ok(false)
    }

    fn wait_for_receiver(&mut self) -> Result<bool> {
        log::info!("Waiting to hear from remote");
        for _ in 0..self.config.init_wait {
            match self.rcv_resp()? {
                Response::Nak => return Ok(true),
                _ if self.config.ignorerx => return Ok(true),
                Response::Cancel => return Ok(false),
                _ => {}
            }
        }
        Ok(false)
    }

    fn send_blocks(&mut self, data: &[u8]) -> Result<bool> {
        let blocks = construct_blocks(data, self.config.pad_char);

        self.transport.clear_buffer();
        if !self.wait_for_receiver()? {
            return Ok(false);
        }

        log::info!("Sending {} bytes in {} blocks", data.len(), blocks.len());
        let mut retries = 0;
        let mut block_num = 0;
        while block_num < blocks.len() {
            if retries == 0 {
                log::info!("Block {} of {}", block_num + 1, blocks.len());
            }
            self.transport.write_bytes(&blocks[block_num])?;
            match self.rcv_resp()? {
                Response::Cancel => {
                    log::info!("Remote host aborted transfer");
                    return Ok(false);
                }
                Response::Ack => {
                    retries = 0;
                    block_num += 1;
                }
                resp => {
                    if resp != Response::Nak && resp != Response::Fail {
                        log::debug!("Unhandled response {:?}", resp);
                    }
                    if retries >= self.config.send_retry {
                        log::info!("Too many retries");
                        self.transport.write_bytes(&CCC)?;
                        return Ok(false);
                    }
                    retries += 1;
                    log::info!("Retrying {}", retries);
                }
            }
        }
        self.send_end_trans()
    }

    /// Send `data`. An interrupt cancels the transfer on both ends.
    pub fn send_bytes(&mut self, data: &[u8]) -> Result<bool> {
        match self.send_blocks(data) {
            Err(LinkError::Interrupted) => {
                log::info!("Transfer interrupted");
                self.transport.write_bytes(&CCC)?;
                Ok(false)
            }
            other => other,
        }
    }

    pub fn send_file(&mut self, path: &Path) -> Result<bool> {
        log::info!("Sending file {}", path.display());
        let data = fs::read(path)?;
        let sent = self.send_bytes(&data)?;
        if !sent {
            log::info!("Failed to send file {}", path.display());
        }
        Ok(sent)
    }

    /// Send `text` as a calculator string object
    pub fn send_text(&mut self, text: &[u8]) -> Result<bool> {
        let trimmed = text.trim_ascii();
        log::info!("Sending {} chars as a string object", trimmed.len());
        self.send_bytes(&txt_to_hpbin(trimmed))
    }

    fn receive_blocks(&mut self) -> Result<Option<Vec<u8>>> {
        // The calculator waits for the receiver to speak first
        self.transport.clear_buffer();
        self.transport.write_byte(NAK)?;

        let mut retries = 0;
        let mut seq = 1;
        let mut data = Vec::new();
        loop {
            match self.rcv_buf()? {
                Response::Block(block) if is_valid_block(&block, seq) => {
                    log::info!("Received block {}", seq);
                    data.extend_from_slice(&block[3..3 + PACKET_LEN]);
                    self.transport.write_byte(ACK)?;
                    seq = next_seq(seq);
                    retries = 0;
                }
                Response::EndOfTransmission => {
                    self.transport.write_byte(ACK)?;
                    return Ok(Some(data));
                }
                Response::Cancel => {
                    log::info!("Canceled by remote host");
                    return Ok(None);
                }
                _ => {
                    if retries >= self.config.receive_retry {
                        log::info!("Max retries exceeded");
                        return Ok(None);
                    }
                    self.transport.clear_buffer();
                    self.transport.write_byte(NAK)?;
                    retries += 1;
                }
            }
        }
    }

    /// Receive one transfer into `path`. Trailing NUL padding is replaced
    /// by the single NUL that ends a calculator object.
    pub fn receive_file(&mut self, path: &Path) -> Result<bool> {
        let received = match self.receive_blocks() {
            Err(LinkError::Interrupted) => {
                log::info!("Transfer interrupted");
                self.transport.write_bytes(&CCC)?;
                return Ok(false);
            }
            other => other?,
        };
        let Some(mut data) = received else {
            return Ok(false);
        };
        if data.is_empty() {
            log::info!("No data received");
            return Ok(false);
        }
        while data.last() == Some(&0) {
            data.pop();
        }
        data.push(0);
        log::info!("Received {} bytes", data.len());
        log::info!("Saving to file {}", path.display());
        fs::write(path, &data)?;
        Ok(true)
    }
}
