use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

use crate::error::{LinkError, Result};
use crate::interrupt::Interrupt;
use crate::transport::Transport;

use super::packet::{BlockCheck, KermitPacket, PacketFactory, PacketType, MIN_PACKET_BYTES};
use super::prefix::{construct_payloads, unescape_payload};
use super::settings::{KermitConfig, MIN_PACKET_LENGTH};
use super::{unchar, SERVER_BANNER};

const WRITE_VERIFY_RETRIES: usize = 5;
const SEND_MAX_FAILURES: usize = 6;
const SEND_THEN_RECEIVE_RETRIES: usize = 5;
const ABORT_PACKETS: usize = 3;

/// How a server loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    /// The peer finished, logged out or ended its transmission
    Finished,
    /// The peer sent an error packet
    RemoteError,
    /// The peer NAKed our request
    Rejected,
}

impl ServeOutcome {
    pub fn is_finished(self) -> bool {
        self == ServeOutcome::Finished
    }
}

/// Kermit engine over a [`Transport`]
pub struct KermitProtocol<T: Transport> {
    transport: T,
    config: KermitConfig,
    interrupt: Interrupt,
    allow_remote_exec: bool,
    work_dir: PathBuf,
}

impl<T: Transport> KermitProtocol<T> {
    pub fn new(transport: T, interrupt: Interrupt) -> Self {
        Self {
            transport,
            config: KermitConfig::default(),
            interrupt,
            allow_remote_exec: false,
            work_dir: PathBuf::from("."),
        }
    }

    pub fn config(&self) -> &KermitConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut KermitConfig {
        &mut self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Run the payload of incoming `C` packets through the local shell.
    /// Off unless enabled here.
    pub fn allow_remote_exec(&mut self, allow: bool) {
        self.allow_remote_exec = allow;
    }

    /// Directory received files are saved to and requested files read from
    pub fn set_work_dir<P: Into<PathBuf>>(&mut self, dir: P) {
        self.work_dir = dir.into();
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn init_params(&self) -> Vec<u8> {
        self.config.send.init_payload()
    }

    pub fn set_receive_params(&mut self, pkt: &KermitPacket) {
        self.config.receive.apply_init_payload(&pkt.payload);
    }

    pub fn write_packet(&mut self, pkt: &KermitPacket) -> Result<()> {
        let bytes = pkt.to_bytes();
        if self.config.debug {
            log::info!("Sending {:?}", String::from_utf8_lossy(&bytes));
        }
        self.transport.write_bytes(&bytes)
    }

    /// Drop bytes until the start-of-packet byte is at the head of the buffer
    fn prep_buffer(&mut self) {
        let header = self.config.receive.start_of_packet;
        while let Some(b) = self.transport.peek_byte() {
            if b == header {
                return;
            }
            self.transport.read_byte();
        }
    }

    /// Byte count of the complete packet at the head of the buffer, if any
    fn ready_bytes(&mut self) -> Option<usize> {
        let buf = self.transport.peek();
        if buf.len() < MIN_PACKET_BYTES {
            return None;
        }
        if buf[1] < b' ' {
            log::debug!("Bad length char {:#04x}, skipping header", buf[1]);
            self.transport.read_byte();
            self.prep_buffer();
            return None;
        }
        let packet_len = unchar(buf[1]) as usize + 3;
        (buf.len() >= packet_len).then_some(packet_len)
    }

    /// A truncated packet or a corrupted length field would block the
    /// buffer forever. Once the buffer stops changing, drop one byte.
    fn dislodge_stale_data(&mut self, stale: Option<Vec<u8>>) -> Option<Vec<u8>> {
        let current = self.transport.peek();
        match stale {
            Some(prev) if !prev.is_empty() && prev == current => {
                self.transport.read_byte();
                self.prep_buffer();
                None
            }
            _ => Some(current),
        }
    }

    fn poll_for_packet_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        let delay = Duration::from_secs_f64(self.config.poll_delay);
        let mut stale = None;
        self.prep_buffer();
        for retries in 0..self.config.poll_retries {
            self.interrupt.check()?;
            if let Some(n) = self.ready_bytes() {
                let bytes = self.transport.read_bytes(n);
                if self.config.debug {
                    log::info!("Received {:?}", String::from_utf8_lossy(&bytes));
                }
                return Ok(Some(bytes));
            }
            if retries > 1 {
                stale = self.dislodge_stale_data(stale);
            }
            thread::sleep(delay);
        }
        Ok(None)
    }

    /// The same bytes may decode as valid packets under more than one block
    /// check. Pick one.
    pub fn choose(
        p1: Option<KermitPacket>,
        p2: Option<KermitPacket>,
        p3: Option<KermitPacket>,
        preferred: BlockCheck,
    ) -> Option<KermitPacket> {
        match (p1, p2, p3) {
            (p1, None, None) => p1,
            (None, p2, None) => p2,
            (None, None, p3) => p3,
            (p1, p2, p3) => {
                log::debug!("Multiple decodes: {:?} {:?} {:?}", p1, p2, p3);
                if let Some(p) = p1.as_ref().filter(|p| p.ptype == PacketType::Init) {
                    return Some(p.clone());
                }
                match preferred {
                    BlockCheck::One if p1.is_some() => return p1,
                    BlockCheck::Two if p2.is_some() => return p2,
                    BlockCheck::Three if p3.is_some() => return p3,
                    _ => {}
                }
                p3.or(p2)
            }
        }
    }

    /// Read one packet, trying every block check on the received bytes
    pub fn read_any_packet(&mut self) -> Result<Option<KermitPacket>> {
        let Some(bytes) = self.poll_for_packet_bytes()? else {
            return Ok(None);
        };
        let rcv = &self.config.receive;
        let parse = |bc| match KermitPacket::parse(&bytes, bc, rcv.start_of_packet, rcv.end_of_line) {
            Ok(pkt) => Some(pkt),
            Err(e) => {
                log::trace!("Block check {}: {}", bc as u8, e);
                None
            }
        };
        let (p1, p2, p3) = (
            parse(BlockCheck::One),
            parse(BlockCheck::Two),
            parse(BlockCheck::Three),
        );
        Ok(Self::choose(p1, p2, p3, rcv.block_check))
    }

    /// Write `pkt` until the peer answers it. A NAK triggers a rewrite; an
    /// error packet or any packet with the same sequence is the answer.
    pub fn write_verify(
        &mut self,
        pkt: &KermitPacket,
        ignore_response: bool,
    ) -> Result<Option<KermitPacket>> {
        for _ in 0..WRITE_VERIFY_RETRIES {
            self.write_packet(pkt)?;
            if ignore_response {
                return Ok(None);
            }
            match self.read_any_packet()? {
                Some(reply) if reply.ptype == PacketType::Nak => log::debug!("Retrying"),
                Some(reply) if reply.ptype == PacketType::Error || reply.seq == pkt.seq => {
                    return Ok(Some(reply))
                }
                Some(reply) => log::debug!("Unexpected reply {}", reply),
                None => {}
            }
        }
        Ok(None)
    }

    /// Build the packets of a transfer: Send-Init, file or text header,
    /// data, end of file, end of transmission
    pub fn plan_packets(
        &self,
        name: Option<&[u8]>,
        data: &[u8],
        packet_length: u8,
    ) -> Vec<KermitPacket> {
        let send = &self.config.send;
        let max_data_len = self.config.max_data_len(packet_length);
        let mut factory = PacketFactory::new(send.block_check);

        let mut packets = vec![factory.send_initiate(&send.init_payload())];
        packets.push(match name {
            Some(name) => factory.file_header(name),
            None => factory.text_header(),
        });
        for payload in construct_payloads(data, send.ctl_prefix, max_data_len) {
            packets.push(factory.data(&payload));
        }
        packets.push(factory.end_of_file());
        packets.push(factory.end_of_transmission());
        packets
    }

    fn send_packets(&mut self, name: Option<&[u8]>, data: &[u8]) -> Result<bool> {
        let ignore_response = self.config.ignorerx;
        let pause = Duration::from_secs_f64(self.config.ignore_sec);
        let mut packet_length = self.config.send.packet_length;
        let mut packets = self.plan_packets(name, data, packet_length);

        let mut i = 0;
        let mut failures = 0;
        while i < packets.len() {
            self.interrupt.check()?;
            if failures > SEND_MAX_FAILURES {
                log::error!("Giving up on packet #{}", i + 1);
                return Ok(false);
            }
            log::info!("Sending packet #{} of {}", i + 1, packets.len());
            match self.write_verify(&packets[i], ignore_response)? {
                Some(reply) if reply.ptype == PacketType::Error => {
                    log::error!(
                        "Remote error: {}",
                        String::from_utf8_lossy(&self.unescape(&reply.payload))
                    );
                    return Ok(false);
                }
                Some(reply) => {
                    if packets[i].ptype == PacketType::SendInit {
                        self.set_receive_params(&reply);
                        let peer = self.config.receive.packet_length;
                        if (MIN_PACKET_LENGTH..packet_length).contains(&peer) {
                            log::info!("Peer packet length is {}, repacking", peer);
                            packet_length = peer;
                            packets = self.plan_packets(name, data, packet_length);
                        }
                    }
                    i += 1;
                    failures = 0;
                }
                None if ignore_response => {
                    thread::sleep(pause);
                    i += 1;
                }
                None => {
                    log::info!("Failed to send packet");
                    failures += 1;
                }
            }
        }
        Ok(true)
    }

    /// Send `data` under `name`, or as text output when `name` is `None`.
    /// An interrupt aborts the transfer and tells the peer.
    pub fn send_bytes(&mut self, name: Option<&[u8]>, data: &[u8]) -> Result<bool> {
        match self.send_packets(name, data) {
            Err(LinkError::Interrupted) => {
                log::error!("Aborting");
                self.send_abort()?;
                Ok(false)
            }
            other => other,
        }
    }

    pub fn send_abort(&mut self) -> Result<()> {
        for _ in 0..ABORT_PACKETS {
            let pkt = PacketFactory::new(BlockCheck::One).error(b"Abort");
            self.write_packet(&pkt)?;
        }
        Ok(())
    }

    pub(crate) fn unescape(&self, payload: &[u8]) -> Vec<u8> {
        unescape_payload(payload, self.config.receive.ctl_prefix)
    }

    fn is_resend(prev: Option<&KermitPacket>, pkt: &KermitPacket) -> bool {
        prev.map_or(false, |p| p.seq == pkt.seq && p.ptype == pkt.ptype)
    }

    /// True when `pkt` follows `prev` in sequence. Unexpected type
    /// transitions are only logged since the full set the device sends is
    /// not known.
    pub fn is_next_seq(prev: Option<&KermitPacket>, pkt: &KermitPacket) -> bool {
        let Some(prev) = prev else {
            if !b"ISGECNR".contains(&pkt.ptype.as_byte()) {
                log::debug!("Bad type. Expected one of \"ISGECNR\". Actual:{}", pkt.ptype);
            }
            return true;
        };

        match prev.ptype.successors() {
            Some(expected) => {
                let t = pkt.ptype.as_byte();
                if !expected.contains(&t) && t != b'N' && t != b'E' {
                    log::debug!(
                        "Bad type. Expected:{} Actual:{}",
                        String::from_utf8_lossy(expected),
                        pkt.ptype
                    );
                }
            }
            None => log::debug!("Previous packet type {} has no known successors", prev.ptype),
        }
        (prev.seq + 1) % 64 == pkt.seq % 64
    }

    fn do_ack(&mut self, pkt: &KermitPacket) -> Result<()> {
        let mut factory = PacketFactory::new(BlockCheck::One);
        let ack = match pkt.ptype {
            PacketType::Init | PacketType::SendInit => {
                if pkt.seq != 0 {
                    log::debug!("Bad initial seq. Expected:0 Actual:{}", pkt.seq);
                }
                self.set_receive_params(pkt);
                factory.ack(pkt, &self.init_params())
            }
            PacketType::Generic if pkt.payload == b"F" || pkt.payload == b"L" => {
                factory.ack(pkt, b"Goodbye")
            }
            _ => factory.ack(pkt, b""),
        };
        self.write_packet(&ack)
    }

    fn do_nak(&mut self, pkt: &KermitPacket) -> Result<()> {
        let nak = PacketFactory::new(BlockCheck::One).nak(pkt);
        self.write_packet(&nak)
    }

    fn send_error(&mut self, msg: &str) -> Result<()> {
        let pkt = PacketFactory::new(BlockCheck::One).error(msg.as_bytes());
        self.write_packet(&pkt)
    }

    /// Save received data without overwriting: `NAME`, `NAME.1`, `NAME.2`...
    /// Without a usable name the data is logged instead.
    fn save_data(&self, name: Option<&str>, data: &[u8]) -> Result<()> {
        let file_name = name.and_then(|n| Path::new(n).file_name());
        let Some(file_name) = file_name else {
            log::info!("{}", String::from_utf8_lossy(data));
            return Ok(());
        };
        let base = self.work_dir.join(file_name);
        let mut path = base.clone();
        let mut i = 0;
        while path.exists() {
            i += 1;
            let mut renamed = base.clone().into_os_string();
            renamed.push(format!(".{}", i));
            path = PathBuf::from(renamed);
        }
        fs::write(&path, data)?;
        if self.config.warning && path != base {
            log::info!("Wrote {} as {}", base.display(), path.display());
        } else {
            log::info!("Wrote {}", path.display());
        }
        Ok(())
    }

    fn run_command(&self, cmd: &str) -> Result<Vec<u8>> {
        let mut shell = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C");
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c");
            c
        };
        let output = shell.arg(cmd).current_dir(&self.work_dir).output()?;
        let mut text = output.stdout;
        text.extend_from_slice(&output.stderr);
        Ok(text)
    }

    /// Answer packets from the peer until it finishes. With `exit_on_eot`
    /// an end-of-transmission packet also ends the loop.
    pub fn serve(
        &mut self,
        exit_on_eot: bool,
        init_pkt: Option<KermitPacket>,
    ) -> Result<ServeOutcome> {
        let mut in_name: Option<String> = None;
        let mut in_buf: Vec<u8> = Vec::new();
        let mut prev: Option<KermitPacket> = None;
        let mut pending = init_pkt;

        loop {
            self.interrupt.check()?;
            let pkt = match pending.take() {
                Some(pkt) => pkt,
                None => match self.read_any_packet()? {
                    Some(pkt) => pkt,
                    None => {
                        log::debug!("No packet read");
                        continue;
                    }
                },
            };

            if Self::is_resend(prev.as_ref(), &pkt) || pkt.ptype == PacketType::Init {
                self.do_ack(&pkt)?;
                continue;
            }
            if !Self::is_next_seq(prev.as_ref(), &pkt) {
                self.do_nak(&pkt)?;
                continue;
            }

            let mut done = false;
            match pkt.ptype {
                PacketType::SendInit => self.set_receive_params(&pkt),
                PacketType::Nak => {
                    // seq 0: the peer rejected our request
                    if pkt.seq == 0 {
                        return Ok(ServeOutcome::Rejected);
                    }
                    continue;
                }
                PacketType::Generic => match pkt.payload.as_slice() {
                    b"F" => done = true,
                    b"L" => {
                        self.do_ack(&pkt)?;
                        return Ok(ServeOutcome::Finished);
                    }
                    b"I" => {
                        self.send_bytes(None, SERVER_BANNER.as_bytes())?;
                        prev = None;
                        continue;
                    }
                    p if p.starts_with(b"M:") => {
                        let msg = self.unescape(&p[2..]);
                        log::info!("Message: {}", String::from_utf8_lossy(&msg));
                    }
                    p => log::debug!("Unhandled generic command {:?}", String::from_utf8_lossy(p)),
                },
                PacketType::FileHeader => {
                    let name = String::from_utf8_lossy(&self.unescape(&pkt.payload)).into_owned();
                    if name.is_empty() {
                        self.do_nak(&pkt)?;
                        continue;
                    }
                    in_name = Some(name);
                }
                PacketType::Data => {
                    let data = self.unescape(&pkt.payload);
                    in_buf.extend_from_slice(&data);
                }
                PacketType::Eof => {
                    let data = std::mem::take(&mut in_buf);
                    if !data.is_empty() {
                        match self.save_data(in_name.as_deref(), &data) {
                            Ok(()) => {}
                            Err(LinkError::Io(e)) => {
                                log::error!("Cannot save {:?}: {}", in_name, e);
                                self.send_error("Cannot save file")?;
                                in_name = None;
                                prev = None;
                                continue;
                            }
                            Err(e) => return Err(e),
                        }
                    }
                }
                PacketType::Command => {
                    let cmd = String::from_utf8_lossy(&pkt.payload).into_owned();
                    if self.allow_remote_exec {
                        log::info!("Executing cmd: {}", cmd);
                        match self.run_command(&cmd) {
                            Ok(output) => {
                                log::info!("{}", String::from_utf8_lossy(&output));
                                self.send_bytes(None, &output)?;
                            }
                            Err(LinkError::Io(e)) => {
                                log::error!("Cannot run {}: {}", cmd, e);
                                self.send_error("Cannot run command")?;
                            }
                            Err(e) => return Err(e),
                        }
                    } else {
                        log::warn!("Refusing remote command: {}", cmd);
                        self.send_error("Remote commands are disabled")?;
                    }
                    prev = None;
                    continue;
                }
                PacketType::ReceiveInit => {
                    let name = String::from_utf8_lossy(&self.unescape(&pkt.payload)).into_owned();
                    // only plain names inside the work dir are served
                    let Some(file_name) = Path::new(&name).file_name() else {
                        log::warn!("Refusing to send {:?}", name);
                        self.send_error(&format!("Cannot read {}", name))?;
                        prev = None;
                        continue;
                    };
                    let path = self.work_dir.join(file_name);
                    match self.send_file(&path, false, None) {
                        Ok(_) => {}
                        Err(LinkError::Io(e)) => {
                            log::error!("Cannot send {}: {}", path.display(), e);
                            self.send_error(&format!("Cannot read {}", name))?;
                        }
                        Err(e) => return Err(e),
                    }
                    prev = None;
                    continue;
                }
                PacketType::Break => done = exit_on_eot,
                PacketType::TextHeader => {}
                PacketType::Error => {
                    let msg = self.unescape(&pkt.payload);
                    log::info!("Remote error: {}", String::from_utf8_lossy(&msg));
                    self.do_ack(&pkt)?;
                    return Ok(ServeOutcome::RemoteError);
                }
                PacketType::Ack => {
                    // an ACK of our own ACK; answering it would shift the sequence
                    log::debug!("Ignoring stray ACK: {}", pkt);
                    continue;
                }
                PacketType::Init => log::debug!("Unhandled packet: {}", pkt),
            }

            self.do_ack(&pkt)?;
            if done {
                return Ok(ServeOutcome::Finished);
            }
            // the next transaction starts over at seq 0
            prev = (pkt.ptype != PacketType::Break).then_some(pkt);
        }
    }

    /// Write `pkt` and hand the first non-NAK answer to a receiving server
    /// loop. Used for requests the peer answers with a transfer. True only
    /// when the transfer ran to its end.
    pub fn send_then_receive(&mut self, pkt: &KermitPacket) -> Result<bool> {
        self.transport.clear_buffer();
        for _ in 0..SEND_THEN_RECEIVE_RETRIES {
            match self.write_verify(pkt, false)? {
                Some(reply) if reply.ptype != PacketType::Nak => {
                    let outcome = self.serve(true, Some(reply))?;
                    if !outcome.is_finished() {
                        log::error!(
                            "Command {} refused: {:?}",
                            String::from_utf8_lossy(&pkt.payload),
                            outcome
                        );
                    }
                    return Ok(outcome.is_finished());
                }
                _ => {}
            }
        }
        log::error!(
            "Failed to send command {}",
            String::from_utf8_lossy(&pkt.payload)
        );
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::Canned;

    fn engine(replies: &[&[u8]]) -> KermitProtocol<Canned> {
        let mut kp = KermitProtocol::new(Canned::new(replies), Interrupt::new());
        kp.config_mut().poll_retries = 5;
        kp.config_mut().poll_delay = 0.0;
        kp
    }

    fn pkt(bc: BlockCheck, ptype: PacketType, seq: u8, payload: &[u8]) -> KermitPacket {
        KermitPacket::new(bc, ptype, seq, payload.to_vec())
    }

    #[test]
    fn test_choose_single() {
        let p = pkt(BlockCheck::Two, PacketType::Data, 1, b"x");
        let chosen = KermitProtocol::<Canned>::choose(None, Some(p.clone()), None, BlockCheck::One);
        assert_eq!(chosen, Some(p));
    }

    #[test]
    fn test_choose_prefers_init_then_configured() {
        let p1 = pkt(BlockCheck::One, PacketType::Init, 0, b"a");
        let p3 = pkt(BlockCheck::Three, PacketType::Data, 0, b"");
        let chosen = KermitProtocol::<Canned>::choose(
            Some(p1.clone()),
            None,
            Some(p3.clone()),
            BlockCheck::Three,
        );
        assert_eq!(chosen, Some(p1));

        let p1 = pkt(BlockCheck::One, PacketType::Data, 0, b"a");
        let p2 = pkt(BlockCheck::Two, PacketType::Data, 0, b"");
        let chosen = KermitProtocol::<Canned>::choose(
            Some(p1.clone()),
            Some(p2.clone()),
            Some(p3.clone()),
            BlockCheck::Two,
        );
        assert_eq!(chosen, Some(p2.clone()));

        // configured check missing: most robust wins
        let chosen =
            KermitProtocol::<Canned>::choose(Some(p1.clone()), Some(p2.clone()), None, BlockCheck::Three);
        assert_eq!(chosen, Some(p2));
        let chosen =
            KermitProtocol::<Canned>::choose(Some(p1), None, Some(p3.clone()), BlockCheck::Two);
        assert_eq!(chosen, Some(p3));
    }

    #[test]
    fn test_choose_none() {
        assert_eq!(
            KermitProtocol::<Canned>::choose(None, None, None, BlockCheck::One),
            None
        );
    }

    #[test]
    fn test_is_next_seq() {
        let prev = pkt(BlockCheck::One, PacketType::Data, 63, b"");
        let next = pkt(BlockCheck::One, PacketType::Data, 0, b"");
        let skip = pkt(BlockCheck::One, PacketType::Data, 1, b"");
        assert!(KermitProtocol::<Canned>::is_next_seq(None, &skip));
        assert!(KermitProtocol::<Canned>::is_next_seq(Some(&prev), &next));
        assert!(!KermitProtocol::<Canned>::is_next_seq(Some(&prev), &skip));
    }

    #[test]
    fn test_only_following_seq_is_next() {
        for prev_seq in 0..64u8 {
            let prev = pkt(BlockCheck::One, PacketType::Data, prev_seq, b"");
            for seq in 0..64u8 {
                let next = pkt(BlockCheck::One, PacketType::Data, seq, b"");
                assert_eq!(
                    KermitProtocol::<Canned>::is_next_seq(Some(&prev), &next),
                    seq == (prev_seq + 1) % 64,
                    "prev {} seq {}",
                    prev_seq,
                    seq
                );
            }
        }
    }

    #[test]
    fn test_error_reply_fails_request() {
        let refusal = PacketFactory::new(BlockCheck::One).error(b"No such file").to_bytes();
        let mut kp = engine(&[&refusal]);
        let request = PacketFactory::new(BlockCheck::One).receive_initiate(b"NOSUCH");
        assert!(!kp.send_then_receive(&request).expect("Request failed"));
        // the error packet is acknowledged before giving up
        let ack = kp.transport().written[1].clone();
        assert_eq!(ack[3], b'Y');
    }

    #[test]
    fn test_read_skips_noise_before_header() {
        let mut kp = engine(&[]);
        kp.transport_mut().push_incoming(b"zz\x01# N3\r");
        let read = kp.read_any_packet().expect("Read failed").expect("No packet");
        assert_eq!(read.ptype, PacketType::Nak);
        assert!(kp.transport().peek().is_empty());
    }

    #[test]
    fn test_read_times_out_on_partial_packet() {
        let mut kp = engine(&[]);
        kp.transport_mut().push_incoming(b"\x01+ S~");
        assert_eq!(kp.read_any_packet().expect("Read failed"), None);
    }

    #[test]
    fn test_stale_bytes_dislodged() {
        // the bogus length never completes; the poller drops bytes until
        // the real packet behind it is at the head
        let mut kp = engine(&[]);
        kp.config_mut().poll_retries = 20;
        kp.transport_mut().push_incoming(b"\x01~\x01# N3\r");
        let read = kp.read_any_packet().expect("Read failed").expect("No packet");
        assert_eq!(read.ptype, PacketType::Nak);
    }

    #[test]
    fn test_write_verify_retries_on_nak() {
        let mut kp = engine(&[b"\x01# N3\r", b"\x01& DabcR\r"]);
        let data = pkt(BlockCheck::One, PacketType::Data, 0, b"abc");
        // any packet with the same sequence number is the answer
        let reply = kp.write_verify(&data, false).expect("Write failed");
        assert_eq!(reply.map(|p| p.ptype), Some(PacketType::Data));
        assert_eq!(kp.transport().written.len(), 2);
    }

    #[test]
    fn test_write_verify_gives_up() {
        let mut kp = engine(&[]);
        let data = pkt(BlockCheck::One, PacketType::Data, 0, b"abc");
        assert_eq!(kp.write_verify(&data, false).expect("Write failed"), None);
        assert_eq!(kp.transport().written.len(), WRITE_VERIFY_RETRIES);
    }

    #[test]
    fn test_plan_packets_layout() {
        let kp = engine(&[]);
        let packets = kp.plan_packets(Some(b"A"), &[b'x'; 200], 94);
        let types: Vec<u8> = packets.iter().map(|p| p.ptype.as_byte()).collect();
        assert_eq!(types, b"SFDDDZB".to_vec());
        let seqs: Vec<u8> = packets.iter().map(|p| p.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(packets[2].payload.len(), 89);
        assert_eq!(packets[0].block_check, BlockCheck::One);
        assert_eq!(packets[2].block_check, BlockCheck::Three);
    }

    #[test]
    fn test_send_abort_on_interrupt() {
        let mut kp = engine(&[]);
        kp.interrupt.trigger();
        assert!(!kp.send_bytes(Some(b"A"), b"data").expect("Send failed"));
        let abort = PacketFactory::new(BlockCheck::One).error(b"Abort").to_bytes();
        assert_eq!(kp.transport().written, vec![abort.clone(), abort.clone(), abort]);
    }

    #[test]
    fn test_send_fails_after_repeated_timeouts() {
        let mut kp = engine(&[]);
        kp.config_mut().poll_retries = 1;
        assert!(!kp.send_bytes(Some(b"A"), b"x").expect("Send failed"));
        assert_eq!(
            kp.transport().written.len(),
            (SEND_MAX_FAILURES + 1) * WRITE_VERIFY_RETRIES
        );
    }

    #[test]
    fn test_save_data_never_overwrites() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut kp = engine(&[]);
        kp.set_work_dir(dir.path());
        kp.save_data(Some("PRG"), b"one").expect("Save failed");
        kp.save_data(Some("PRG"), b"two").expect("Save failed");
        kp.save_data(Some("PRG"), b"three").expect("Save failed");
        assert_eq!(fs::read(dir.path().join("PRG")).unwrap(), b"one");
        assert_eq!(fs::read(dir.path().join("PRG.1")).unwrap(), b"two");
        assert_eq!(fs::read(dir.path().join("PRG.2")).unwrap(), b"three");
    }
}
