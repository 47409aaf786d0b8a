//! Kermit file transfer
//!
//! Packets are `MARK LEN SEQ TYPE DATA CHECK EOL` with every control field
//! shifted into the printable range by [`tochar`].

pub mod commands;
pub mod packet;
pub mod prefix;
pub mod protocol;
pub mod settings;

pub use packet::{BlockCheck, KermitPacket, PacketError, PacketFactory, PacketType};
pub use protocol::{KermitProtocol, ServeOutcome};
pub use settings::{KermitConfig, LinkParams, Transfer};

/// Largest packet length the protocol allows
pub const MAX_PACKET_LENGTH: u8 = 94;

/// Banner sent in reply to a generic `I` request
pub const SERVER_BANNER: &str = "CalcLink Server";

/// Shift a small integer into the printable range
pub fn tochar(n: u8) -> u8 {
    n.wrapping_add(32)
}

pub fn unchar(ch: u8) -> u8 {
    ch.wrapping_sub(32)
}

/// Toggle a character between its control and printable forms
pub fn ctl(ch: u8) -> u8 {
    ch ^ 64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_helpers() {
        assert_eq!(tochar(0), b' ');
        assert_eq!(tochar(94), b'~');
        assert_eq!(unchar(b'~'), 94);
        assert_eq!(ctl(b'\r'), b'M');
        assert_eq!(ctl(b'M'), b'\r');
        assert_eq!(ctl(0x7F), b'?');
    }
}
