//! Control-character prefix encoding of packet data fields

use super::ctl;

/// True when the low 7 bits of `b` are the prefix character, whatever the
/// high bit
pub fn is_prefix(b: u8, prefix: u8) -> bool {
    b & 0x7F == prefix
}

fn is_control(n: u8) -> bool {
    n < 32 || n == 127
}

/// Prefix-encode `data` and split it into payloads of at most `max_len`
/// bytes. An escape pair is never split across payloads.
pub fn construct_payloads(data: &[u8], prefix: u8, max_len: usize) -> Vec<Vec<u8>> {
    let mut payloads = Vec::new();
    let mut payload: Vec<u8> = Vec::new();

    for &ch in data {
        let n = ch & 0x7F;
        let encoded: [u8; 2];
        let to_add: &[u8] = if is_prefix(ch, prefix) {
            encoded = [prefix, ch];
            &encoded
        } else if is_control(n) {
            encoded = [prefix, ctl(ch)];
            &encoded
        } else {
            std::slice::from_ref(&ch)
        };

        if !payload.is_empty() && payload.len() + to_add.len() > max_len {
            payloads.push(std::mem::take(&mut payload));
        }
        payload.extend_from_slice(to_add);
    }

    if !payload.is_empty() {
        payloads.push(payload);
    }
    payloads
}

/// Reverse [`construct_payloads`] for a single payload
pub fn unescape_payload(payload: &[u8], prefix: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len());
    let mut bytes = payload.iter().copied();
    while let Some(b) = bytes.next() {
        if b != prefix {
            buf.push(b);
            continue;
        }
        match bytes.next() {
            Some(b2) if is_control(ctl(b2 & 0x7F)) => buf.push(ctl(b2)),
            Some(b2) => buf.push(b2),
            None => log::error!("Bad payload length"),
        }
    }
    buf
}
