use crate::config::{ConfigError, ConfigTable, ConfigValue as V, Configurable};

use super::packet::{BlockCheck, DEFAULT_HEADER, DEFAULT_TRAILER};
use super::{tochar, unchar, MAX_PACKET_LENGTH};

const ON_OFF: &[(&str, i64)] = &[("off", 0), ("on", 1)];
const TRANSFER: &[(&str, i64)] = &[("binary", 1), ("text", 2)];

/// Smallest usable packet length, leaving room for a 3-byte check
pub const MIN_PACKET_LENGTH: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Binary = 1,
    Text = 2,
}

/// One direction's link parameters. These are the MAXL, TIME, NPAD, PADC,
/// EOL, QCTL, QBIN and CHKT fields of the init exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkParams {
    pub end_of_line: u8,
    pub packet_length: u8,
    pub timeout: u8,
    pub padding: u8,
    pub padchar: u8,
    pub ctl_prefix: u8,
    pub bin_prefix: u8,
    pub start_of_packet: u8,
    pub block_check: BlockCheck,
}

impl LinkParams {
    /// What the device sends by default
    pub fn receive_defaults() -> Self {
        Self {
            end_of_line: DEFAULT_TRAILER,
            packet_length: 80,
            timeout: 10,
            padding: 0,
            padchar: b' ',
            ctl_prefix: b'#',
            bin_prefix: b'N',
            start_of_packet: DEFAULT_HEADER,
            block_check: BlockCheck::One,
        }
    }

    pub fn send_defaults() -> Self {
        Self {
            packet_length: MAX_PACKET_LENGTH,
            padchar: b'@',
            block_check: BlockCheck::Three,
            ..Self::receive_defaults()
        }
    }

    /// Literal (never prefix-encoded) data field of an init packet or its ACK
    pub fn init_payload(&self) -> Vec<u8> {
        vec![
            tochar(self.packet_length),
            tochar(self.timeout),
            tochar(self.padding),
            self.padchar,
            tochar(self.end_of_line),
            self.ctl_prefix,
            self.bin_prefix,
            self.block_check.digit(),
        ]
    }

    /// Take the peer's init fields; fields it left out keep their values
    pub fn apply_init_payload(&mut self, payload: &[u8]) {
        for (i, &b) in payload.iter().enumerate().take(8) {
            match i {
                0 => self.packet_length = unchar(b),
                1 => self.timeout = unchar(b),
                2 => self.padding = unchar(b),
                3 => self.padchar = b,
                4 => self.end_of_line = unchar(b),
                5 => self.ctl_prefix = b,
                6 => self.bin_prefix = b,
                _ => match BlockCheck::from_digit(b) {
                    Some(bc) => self.block_check = bc,
                    None => log::debug!("Ignoring block check {:?}", b as char),
                },
            }
        }
    }

    fn to_table(&self) -> ConfigTable {
        ConfigTable::new()
            .entry("end-of-line", V::Int(self.end_of_line.into()), "End-of-line character")
            .entry("packet-length", V::Int(self.packet_length.into()), "Packet length")
            .entry("timeout", V::Int(self.timeout.into()), "Timeout value")
            .entry("padding", V::Int(self.padding.into()), "Number of padding characters")
            .entry("padchar", V::Char(self.padchar), "Padding character")
            .entry("ctl-prefix", V::Char(self.ctl_prefix), "The control-prefix character")
            .entry("bin-prefix", V::Char(self.bin_prefix), "8-bit prefixing")
            .entry(
                "start-of-packet",
                V::Int(self.start_of_packet.into()),
                "Start-of-packet character",
            )
            .choice_entry(
                "block-check",
                V::Int(self.block_check as i64),
                BlockCheck::CHOICES,
                "Block check",
            )
    }

    fn load_table(&mut self, table: &ConfigTable, group: &str) -> Result<(), ConfigError> {
        let path = |name: &str| format!("{}.{}", group, name);
        let packet_length = table.byte(&path("packet-length"))?;
        if !(MIN_PACKET_LENGTH..=MAX_PACKET_LENGTH).contains(&packet_length) {
            return Err(ConfigError::invalid(&path("packet-length"), packet_length));
        }
        let block_check = table.int(&path("block-check"))?;

        self.end_of_line = table.byte(&path("end-of-line"))?;
        self.packet_length = packet_length;
        self.timeout = table.byte(&path("timeout"))?;
        self.padding = table.byte(&path("padding"))?;
        self.padchar = table.char(&path("padchar"))?;
        self.ctl_prefix = table.char(&path("ctl-prefix"))?;
        self.bin_prefix = table.char(&path("bin-prefix"))?;
        self.start_of_packet = table.byte(&path("start-of-packet"))?;
        self.block_check =
            BlockCheck::from_index(block_check)
            .ok_or_else(|| ConfigError::invalid(&path("block-check"), block_check))?;
        Ok(())
    }
}

/// Settings of the Kermit engine. `receive` describes the peer and is
/// only changed by its init packets.
#[derive(Debug, Clone, PartialEq)]
pub struct KermitConfig {
    pub debug: bool,
    pub default_name: String,
    pub transfer: Transfer,
    pub ignorerx: bool,
    pub ignore_sec: f64,
    pub poll_retries: u32,
    pub poll_delay: f64,
    pub warning: bool,
    pub receive: LinkParams,
    pub send: LinkParams,
}

impl Default for KermitConfig {
    fn default() -> Self {
        Self {
            debug: false,
            default_name: "KDAT".to_string(),
            transfer: Transfer::Binary,
            ignorerx: false,
            ignore_sec: 0.5,
            poll_retries: 60,
            poll_delay: 0.1,
            warning: true,
            receive: LinkParams::receive_defaults(),
            send: LinkParams::send_defaults(),
        }
    }
}

impl KermitConfig {
    /// Data bytes that fit a packet of `packet_length` with the send check
    pub fn max_data_len(&self, packet_length: u8) -> usize {
        (packet_length as usize).saturating_sub(self.send.block_check.len() + 2)
    }
}

impl Configurable for KermitConfig {
    fn to_table(&self) -> ConfigTable {
        ConfigTable::new()
            .choice_entry(
                "debug",
                V::Int(self.debug as i64),
                ON_OFF,
                "Show sent and received packet data",
            )
            .entry(
                "default-name",
                V::Str(self.default_name.clone()),
                "Name to use when a valid name cannot be generated",
            )
            .choice_entry("transfer", V::Int(self.transfer as i64), TRANSFER, "Transfer type")
            .entry("ignorerx", V::Bool(self.ignorerx), "Ignore response")
            .entry("ignore-sec", V::Float(self.ignore_sec), "Seconds to pause between packets")
            .entry(
                "poll-retries",
                V::Int(self.poll_retries.into()),
                "Polls while waiting for a packet",
            )
            .entry("poll-delay", V::Float(self.poll_delay), "Seconds between polls")
            .choice_entry(
                "warning",
                V::Int(self.warning as i64),
                ON_OFF,
                "Warn when a received file is renamed",
            )
            .read_only_group("receive", self.receive.to_table())
            .group("send", self.send.to_table())
    }

    fn load_table(&mut self, table: &ConfigTable) -> Result<(), ConfigError> {
        let mut loaded = self.clone();
        loaded.debug = table.int("debug")? != 0;
        loaded.default_name = table.string("default-name")?;
        loaded.transfer = if table.int("transfer")? == Transfer::Text as i64 {
            Transfer::Text
        } else {
            Transfer::Binary
        };
        loaded.ignorerx = table.boolean("ignorerx")?;
        loaded.ignore_sec = table.seconds("ignore-sec")?;
        loaded.poll_retries = table.count("poll-retries")?;
        loaded.poll_delay = table.seconds("poll-delay")?;
        loaded.warning = table.int("warning")? != 0;
        loaded.receive.load_table(table, "receive")?;
        loaded.send.load_table(table, "send")?;

        *self = loaded;
        Ok(())
    }
}
