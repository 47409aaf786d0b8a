use std::fmt;
use thiserror::Error;

use super::{tochar, unchar};

pub const DEFAULT_HEADER: u8 = 0x01;
pub const DEFAULT_TRAILER: u8 = b'\r';

/// Smallest packet on the wire: header, length, seq, type, 1-byte check, trailer
pub const MIN_PACKET_BYTES: usize = 6;

const CRC_MAGIC: u32 = 4225;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCheck {
    /// Single-character folded sum
    One = 1,
    /// Two-character 12-bit sum
    Two = 2,
    /// Three-character CRC
    Three = 3,
}

impl BlockCheck {
    pub const CHOICES: &'static [(&'static str, i64)] = &[("1", 1), ("2", 2), ("3", 3)];

    pub fn from_index(n: i64) -> Option<Self> {
        match n {
            1 => Some(BlockCheck::One),
            2 => Some(BlockCheck::Two),
            3 => Some(BlockCheck::Three),
            _ => None,
        }
    }

    /// Number of check characters
    pub fn len(self) -> usize {
        self as usize
    }

    pub fn digit(self) -> u8 {
        b'0' + self as u8
    }

    pub fn from_digit(ch: u8) -> Option<Self> {
        Self::from_index(ch.wrapping_sub(b'0') as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Break,
    Command,
    Data,
    Error,
    FileHeader,
    Generic,
    Init,
    Nak,
    ReceiveInit,
    SendInit,
    TextHeader,
    Ack,
    Eof,
}

impl PacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            b'B' => PacketType::Break,
            b'C' => PacketType::Command,
            b'D' => PacketType::Data,
            b'E' => PacketType::Error,
            b'F' => PacketType::FileHeader,
            b'G' => PacketType::Generic,
            b'I' => PacketType::Init,
            b'N' => PacketType::Nak,
            b'R' => PacketType::ReceiveInit,
            b'S' => PacketType::SendInit,
            b'X' => PacketType::TextHeader,
            b'Y' => PacketType::Ack,
            b'Z' => PacketType::Eof,
            _ => return None,
        })
    }

    pub fn as_byte(self) -> u8 {
        match self {
            PacketType::Break => b'B',
            PacketType::Command => b'C',
            PacketType::Data => b'D',
            PacketType::Error => b'E',
            PacketType::FileHeader => b'F',
            PacketType::Generic => b'G',
            PacketType::Init => b'I',
            PacketType::Nak => b'N',
            PacketType::ReceiveInit => b'R',
            PacketType::SendInit => b'S',
            PacketType::TextHeader => b'X',
            PacketType::Ack => b'Y',
            PacketType::Eof => b'Z',
        }
    }

    /// Types that may follow this one in a transfer, besides `N` and `E`
    pub fn successors(self) -> Option<&'static [u8]> {
        match self {
            PacketType::SendInit => Some(b"FX"),
            PacketType::FileHeader => Some(b"D"),
            PacketType::Data => Some(b"DZ"),
            PacketType::Eof => Some(b"BF"),
            PacketType::Break => Some(b"IS"),
            PacketType::TextHeader => Some(b"D"),
            _ => None,
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_byte() as char)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("Packet too short: {0} bytes")]
    TooShort(usize),

    #[error("Bad header. Expected:{expected} Actual:{actual}")]
    BadHeader { expected: u8, actual: u8 },

    #[error("Bad seq num. Actual:{0} (exceeds 63)")]
    BadSequence(u8),

    #[error("Unknown type:{0}")]
    UnknownType(char),

    #[error("Bad end-of-line. Expected:{expected} Actual:{actual}")]
    BadTrailer { expected: u8, actual: u8 },

    #[error("Bad length. Expected:{expected} Actual:{actual}")]
    BadLength { expected: u8, actual: u8 },

    #[error("Bad checksum")]
    BadChecksum,
}

/// A single Kermit packet. Length and check characters are derived from the
/// other fields when the packet is serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KermitPacket {
    pub header: u8,
    pub block_check: BlockCheck,
    pub ptype: PacketType,
    /// 0-63
    pub seq: u8,
    pub payload: Vec<u8>,
}

impl KermitPacket {
    pub fn new(block_check: BlockCheck, ptype: PacketType, seq: u8, payload: Vec<u8>) -> Self {
        Self {
            header: DEFAULT_HEADER,
            block_check,
            ptype,
            seq: seq % 64,
            payload,
        }
    }

    pub fn length_char(&self) -> u8 {
        tochar((self.payload.len() + 2 + self.block_check.len()) as u8)
    }

    pub fn seq_char(&self) -> u8 {
        tochar(self.seq)
    }

    fn checked_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        [self.length_char(), self.seq_char(), self.ptype.as_byte()]
            .into_iter()
            .chain(self.payload.iter().copied())
    }

    pub fn checksum(&self) -> Vec<u8> {
        match self.block_check {
            BlockCheck::One => {
                let s: u32 = self.checked_bytes().map(u32::from).sum();
                vec![tochar(((s + ((s & 0xC0) >> 6)) & 0x3F) as u8)]
            }
            BlockCheck::Two => {
                let s: u32 = self.checked_bytes().map(u32::from).sum();
                vec![tochar(((s >> 6) & 0x3F) as u8), tochar((s & 0x3F) as u8)]
            }
            BlockCheck::Three => {
                let crc = self.checked_bytes().fold(0u32, |crc, c| {
                    let c = c as u32;
                    let q = (crc ^ c) & 0x0F;
                    let crc = (crc >> 4) ^ (q * CRC_MAGIC);
                    let q = (crc ^ (c >> 4)) & 0x0F;
                    (crc >> 4) ^ (q * CRC_MAGIC)
                });
                vec![
                    tochar(((crc >> 12) & 0x0F) as u8),
                    tochar(((crc >> 6) & 0x3F) as u8),
                    tochar((crc & 0x3F) as u8),
                ]
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.payload.len() + 8);
        buf.push(self.header);
        buf.push(self.length_char());
        buf.push(self.seq_char());
        buf.push(self.ptype.as_byte());
        buf.extend_from_slice(&self.payload);
        buf.extend(self.checksum());
        buf.push(DEFAULT_TRAILER);
        buf
    }

    /// Decode `buf` as a packet carrying a `block_check` check field
    pub fn parse(
        buf: &[u8],
        block_check: BlockCheck,
        header: u8,
        trailer: u8,
    ) -> Result<Self, PacketError> {
        let check_len = block_check.len();
        if buf.len() < MIN_PACKET_BYTES - 1 + check_len {
            return Err(PacketError::TooShort(buf.len()));
        }
        if buf[0] != header {
            return Err(PacketError::BadHeader {
                expected: header,
                actual: buf[0],
            });
        }
        let seq = unchar(buf[2]);
        if seq > 63 {
            return Err(PacketError::BadSequence(seq));
        }
        let ptype =
            PacketType::from_byte(buf[3]).ok_or(PacketError::UnknownType(buf[3] as char))?;
        let last = buf.len() - 1;
        if buf[last] != trailer {
            return Err(PacketError::BadTrailer {
                expected: trailer,
                actual: buf[last],
            });
        }

        let check_start = last - check_len;
        let packet = KermitPacket {
            header,
            block_check,
            ptype,
            seq,
            payload: buf[4..check_start].to_vec(),
        };
        if buf[1] != packet.length_char() {
            return Err(PacketError::BadLength {
                expected: buf[1],
                actual: packet.length_char(),
            });
        }
        if buf[check_start..last] != packet.checksum()[..] {
            return Err(PacketError::BadChecksum);
        }
        Ok(packet)
    }
}

impl fmt::Display for KermitPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.to_bytes()))
    }
}

/// Builds outgoing packets with a running sequence number
#[derive(Debug, Clone)]
pub struct PacketFactory {
    seq: u8,
    block_check: BlockCheck,
}

impl PacketFactory {
    pub fn new(block_check: BlockCheck) -> Self {
        Self { seq: 0, block_check }
    }

    fn next_seq(&mut self) -> u8 {
        let seq = self.seq;
        self.seq = (self.seq + 1) % 64;
        seq
    }

    fn build(&mut self, block_check: BlockCheck, ptype: PacketType, payload: &[u8]) -> KermitPacket {
        let seq = self.next_seq();
        KermitPacket::new(block_check, ptype, seq, payload.to_vec())
    }

    // Init packets are always sent with the single-character check since
    // the block check has not been negotiated yet.

    pub fn send_initiate(&mut self, params: &[u8]) -> KermitPacket {
        self.build(BlockCheck::One, PacketType::SendInit, params)
    }

    pub fn receive_initiate(&mut self, name: &[u8]) -> KermitPacket {
        self.build(BlockCheck::One, PacketType::ReceiveInit, name)
    }

    pub fn initialize(&mut self, params: &[u8]) -> KermitPacket {
        self.build(BlockCheck::One, PacketType::Init, params)
    }

    pub fn file_header(&mut self, name: &[u8]) -> KermitPacket {
        self.build(self.block_check, PacketType::FileHeader, name)
    }

    pub fn text_header(&mut self) -> KermitPacket {
        self.build(self.block_check, PacketType::TextHeader, &[])
    }

    pub fn error(&mut self, msg: &[u8]) -> KermitPacket {
        self.build(self.block_check, PacketType::Error, msg)
    }

    pub fn data(&mut self, data: &[u8]) -> KermitPacket {
        self.build(self.block_check, PacketType::Data, data)
    }

    pub fn command(&mut self, cmd: &[u8]) -> KermitPacket {
        self.build(self.block_check, PacketType::Command, cmd)
    }

    pub fn end_of_file(&mut self) -> KermitPacket {
        self.build(self.block_check, PacketType::Eof, &[])
    }

    pub fn end_of_transmission(&mut self) -> KermitPacket {
        self.build(self.block_check, PacketType::Break, &[])
    }

    pub fn finish(&mut self) -> KermitPacket {
        self.build(self.block_check, PacketType::Generic, b"F")
    }

    /// ACK carrying the sequence and block check of `pkt`
    pub fn ack(&mut self, pkt: &KermitPacket, params: &[u8]) -> KermitPacket {
        self.next_seq();
        KermitPacket::new(pkt.block_check, PacketType::Ack, pkt.seq, params.to_vec())
    }

    pub fn nak(&mut self, pkt: &KermitPacket) -> KermitPacket {
        self.next_seq();
        KermitPacket::new(pkt.block_check, PacketType::Nak, pkt.seq, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(buf: &[u8], bc: BlockCheck) -> Result<KermitPacket, PacketError> {
        KermitPacket::parse(buf, bc, DEFAULT_HEADER, DEFAULT_TRAILER)
    }

    #[test]
    fn test_build_then_parse_each_block_check() {
        let payloads: [&[u8]; 4] = [b"", b"abc", b"#M#J~* @-#Y3", b"NAME.TXT"];
        for bc in [BlockCheck::One, BlockCheck::Two, BlockCheck::Three] {
            for &t in b"BDEFSYZ" {
                let ptype = PacketType::from_byte(t).expect("Unknown type");
                for seq in [0u8, 1, 31, 63] {
                    for payload in payloads {
                        let pkt = KermitPacket::new(bc, ptype, seq, payload.to_vec());
                        let parsed = parse(&pkt.to_bytes(), bc).expect("Failed to parse");
                        assert_eq!(parsed, pkt);
                    }
                }
            }
        }
    }

    #[test]
    fn test_data_packet_block_check_1() {
        let pkt = KermitPacket::new(BlockCheck::One, PacketType::Data, 0, b"abc".to_vec());
        assert_eq!(pkt.to_bytes(), b"\x01& DabcR\r".to_vec());
    }

    #[test]
    fn test_nak_packet() {
        let pkt = KermitPacket::new(BlockCheck::One, PacketType::Data, 0, b"x".to_vec());
        let nak = PacketFactory::new(BlockCheck::One).nak(&pkt);
        assert_eq!(nak.to_bytes(), b"\x01# N3\r".to_vec());
    }

    #[test]
    fn test_finish_packet_each_block_check() {
        let finish = |bc| {
            let mut pkt = PacketFactory::new(BlockCheck::One).finish();
            pkt.block_check = bc;
            pkt.to_bytes()
        };
        assert_eq!(finish(BlockCheck::One), b"\x01$ GF4\r".to_vec());
        assert_eq!(finish(BlockCheck::Two), b"\x01% GF#2\r".to_vec());
        assert_eq!(finish(BlockCheck::Three), b"\x01& GF.NN\r".to_vec());
    }

    #[test]
    fn test_crc_packet() {
        let pkt = KermitPacket::new(BlockCheck::Three, PacketType::Data, 0, b"a".to_vec());
        assert_eq!(pkt.to_bytes(), b"\x01& Da)1[\r".to_vec());
    }

    #[test]
    fn test_length_includes_check() {
        for (bc, expected) in [
            (BlockCheck::One, b'#'),
            (BlockCheck::Two, b'$'),
            (BlockCheck::Three, b'%'),
        ] {
            let pkt = KermitPacket::new(bc, PacketType::Eof, 5, Vec::new());
            assert_eq!(pkt.length_char(), expected);
        }
    }

    #[test]
    fn test_parse_device_ack() {
        let pkt = parse(b"\x01%$Y+&1\r", BlockCheck::Three).expect("Failed to parse ack");
        assert_eq!(pkt.ptype, PacketType::Ack);
        assert_eq!(pkt.seq, 4);
        assert!(pkt.payload.is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse(b"\x01# N", BlockCheck::One),
            Err(PacketError::TooShort(4))
        );
        assert!(matches!(
            parse(b"\x02# N3\r", BlockCheck::One),
            Err(PacketError::BadHeader { .. })
        ));
        assert_eq!(
            parse(b"\x01#\x7fN3\r", BlockCheck::One),
            Err(PacketError::BadSequence(95))
        );
        assert_eq!(
            parse(b"\x01# Q3\r", BlockCheck::One),
            Err(PacketError::UnknownType('Q'))
        );
        assert!(matches!(
            parse(b"\x01# N3\n", BlockCheck::One),
            Err(PacketError::BadTrailer { .. })
        ));
        assert!(matches!(
            parse(b"\x01$ N3\r", BlockCheck::One),
            Err(PacketError::BadLength { .. })
        ));
        assert_eq!(
            parse(b"\x01# N4\r", BlockCheck::One),
            Err(PacketError::BadChecksum)
        );
    }

    #[test]
    fn test_parse_rejects_wrong_block_check() {
        assert!(parse(b"\x01& DabcR\r", BlockCheck::One).is_ok());
        assert!(parse(b"\x01& DabcR\r", BlockCheck::Two).is_err());
        assert!(parse(b"\x01& DabcR\r", BlockCheck::Three).is_err());
    }

    #[test]
    fn test_factory_sequence_wraps() {
        let mut factory = PacketFactory::new(BlockCheck::Two);
        let first = factory.send_initiate(b"");
        assert_eq!(first.seq, 0);
        assert_eq!(first.block_check, BlockCheck::One);
        for _ in 1..63 {
            factory.data(b"x");
        }
        let last = factory.data(b"x");
        assert_eq!(last.seq, 63);
        assert_eq!(last.block_check, BlockCheck::Two);
        assert_eq!(factory.end_of_file().seq, 0);
    }

    #[test]
    fn test_ack_copies_seq_and_block_check() {
        let pkt = KermitPacket::new(BlockCheck::Three, PacketType::Data, 17, b"hi".to_vec());
        let ack = PacketFactory::new(BlockCheck::One).ack(&pkt, b"");
        assert_eq!(ack.seq, 17);
        assert_eq!(ack.block_check, BlockCheck::Three);
        assert_eq!(ack.ptype, PacketType::Ack);
    }

    #[test]
    fn test_block_check_digit() {
        assert_eq!(BlockCheck::Three.digit(), b'3');
        assert_eq!(BlockCheck::from_digit(b'2'), Some(BlockCheck::Two));
        assert_eq!(BlockCheck::from_digit(b' '), None);
    }
}
