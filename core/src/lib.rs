//! Audio-coupled serial link to legacy calculators
//!
//! Bytes travel as on/off-keyed pulses at 2400 bit/s. Kermit, XMODEM and a
//! raw serial mode run on top of the byte stream.

pub mod calibrate;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod hpobj;
pub mod interrupt;
pub mod kermit;
pub mod serial;
pub mod transport;
pub mod verbosity;
pub mod wav;
pub mod xmodem;

pub use config::{ConfigError, ConfigTable, ConfigValue, Configurable};
pub use decoder::{Receiver, SampleSender, StreamDecoder};
pub use encoder::{AudioSink, PulseEncoder, Transmitter};
pub use error::{LinkError, Result};
pub use interrupt::Interrupt;
pub use kermit::KermitProtocol;
pub use serial::Serial;
pub use transport::{ModemTransport, Transport};
pub use verbosity::Verbosity;
pub use xmodem::Xmodem;

// Line configuration
pub const BITS_PER_SEC: usize = 2400; // legacy device spec, 2340..2460 tolerated
pub const DEFAULT_FRAMERATE: u32 = 44100;
pub const DEFAULT_SENSITIVITY: f64 = 0.11;

// Sample values
pub const MAX_SHORT: i16 = i16::MAX;
pub const TRIGGER_VALUE: i16 = (MAX_SHORT as f64 * 0.75) as i16; // arbitrary marker

// Decode frame: 1 start bit + 8 data bits + 1 stop bit.
// The device sends two stop bits, only one is assumed.
pub const BITS_PER_FRAME: usize = 10;

// Playback padding
pub const CHUNK_SAMPLES: usize = 512;
pub const TAIL_SAMPLES: usize = 2048; // lets the last pulse play out

// Decoded bytes kept before the oldest are dropped
pub const MAX_CHAR_BUFFER: usize = 1 << 20;
