//! Client operations of the Kermit engine

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{LinkError, Result};
use crate::hpobj::{filter_text, quote, valid_hp_name};
use crate::transport::Transport;

use super::packet::{BlockCheck, PacketFactory};
use super::protocol::KermitProtocol;
use super::settings::Transfer;

// Program delimiters in the calculator's character set
const HP_LEFT_CHEVRON: u8 = 0xAB;
const HP_RIGHT_CHEVRON: u8 = 0xBB;

const FALLBACK_NAME: &str = "KDAT";

impl<T: Transport> KermitProtocol<T> {
    /// Calculator variable name for a file: an explicit `name` wins,
    /// otherwise the upper-cased file name up to its first `.`
    pub fn hp_name(&self, file: Option<&Path>, name: Option<&str>) -> String {
        let candidate = match (name, file) {
            (Some(name), _) => name.to_string(),
            (None, Some(file)) => file
                .file_name()
                .map(|n| n.to_string_lossy())
                .map(|n| n.split('.').next().unwrap_or_default().to_uppercase())
                .unwrap_or_default(),
            (None, None) => FALLBACK_NAME.to_string(),
        };
        let mut hp_name = valid_hp_name(&candidate);
        if hp_name.is_empty() {
            hp_name = valid_hp_name(&self.config().default_name);
        }
        if hp_name.is_empty() {
            hp_name = FALLBACK_NAME.to_string();
        }
        hp_name
    }

    /// Send one file. Text transfers are quoted and stripped to printable
    /// characters so the calculator stores a string.
    pub fn send_file(&mut self, path: &Path, is_text: bool, as_name: Option<&str>) -> Result<bool> {
        let hp_name = self.hp_name(Some(path), as_name);
        let mut data = fs::read(path)?;
        if is_text {
            data = filter_text(&quote(&data));
        }
        log::info!("Sending file {} as {}", path.display(), hp_name);
        self.send_bytes(Some(hp_name.as_bytes()), &data)
    }

    /// Send each file with the configured transfer type. `as_name` renames
    /// a single file.
    pub fn send_files(&mut self, files: &[PathBuf], as_name: Option<&str>) -> Result<bool> {
        if files.is_empty() {
            return Err(LinkError::NoFiles);
        }
        let is_text = self.config().transfer == Transfer::Text;
        let as_name = if files.len() == 1 { as_name } else { None };
        let mut all_sent = true;
        for (i, file) in files.iter().enumerate() {
            if files.len() > 1 {
                log::info!("Sending file {} of {}", i + 1, files.len());
            }
            all_sent &= self.send_file(file, is_text, as_name)?;
        }
        Ok(all_sent)
    }

    /// Ask the server to send each named variable
    pub fn get(&mut self, names: &[String]) -> Result<bool> {
        if names.is_empty() {
            log::info!("Invalid or missing name");
            return Ok(false);
        }
        let mut all_received = true;
        for name in names {
            let pkt = PacketFactory::new(BlockCheck::One).receive_initiate(name.as_bytes());
            all_received &= self.send_then_receive(&pkt)?;
        }
        Ok(all_received)
    }

    /// Tell the server to shut down
    pub fn finish(&mut self) -> Result<()> {
        let pkt = PacketFactory::new(BlockCheck::One).finish();
        self.write_packet(&pkt)
    }

    /// Wait for one transfer from the peer. False when the peer aborted it.
    pub fn receive(&mut self) -> Result<bool> {
        Ok(self.serve(true, None)?.is_finished())
    }

    /// Serve from `dir` (or the current work dir) until the peer finishes.
    /// An interrupt ends the server quietly.
    pub fn server(&mut self, dir: Option<&Path>) -> Result<()> {
        let saved = dir.map(|d| {
            let previous = self.work_dir().to_path_buf();
            self.set_work_dir(d);
            previous
        });
        let result = match self.serve(false, None) {
            Ok(outcome) => {
                log::info!("Server done: {:?}", outcome);
                Ok(())
            }
            Err(LinkError::Interrupted) => {
                log::info!("Server stopped");
                Ok(())
            }
            Err(e) => Err(e),
        };
        if let Some(previous) = saved {
            self.set_work_dir(previous);
        }
        result
    }

    /// Run `cmd` on the calculator and receive its output
    pub fn send_command(&mut self, cmd: &[u8]) -> Result<bool> {
        let pkt = PacketFactory::new(BlockCheck::One).command(cmd);
        self.send_then_receive(&pkt)
    }

    fn remote_eval(&mut self, cmd: &str) -> Result<bool> {
        let mut program = vec![HP_LEFT_CHEVRON, b' '];
        program.extend_from_slice(cmd.as_bytes());
        program.extend_from_slice(&[b' ', HP_RIGHT_CHEVRON]);
        program.extend_from_slice(b" EVAL");
        self.send_command(&program)
    }

    /// Change directory; `None` goes HOME
    pub fn remote_cwd(&mut self, dir: Option<&str>) -> Result<bool> {
        let dir = match dir.map(str::trim).filter(|d| !d.is_empty()) {
            None => "{ HOME }".to_string(),
            Some(d) if d.starts_with('{') => d.to_string(),
            Some(d) => format!("{{ {} }}", d),
        };
        self.send_command(format!("{} EVAL", dir).as_bytes())
    }

    pub fn remote_delete(&mut self, name: &str) -> Result<bool> {
        self.remote_eval(&format!("{} PURGE", name.trim()))
    }

    pub fn remote_directory(&mut self) -> Result<bool> {
        self.remote_eval("VARS")
    }

    pub fn remote_host(&mut self, cmd: &str) -> Result<bool> {
        self.send_command(cmd.trim().as_bytes())
    }

    pub fn remote_path(&mut self) -> Result<bool> {
        self.remote_eval("PATH")
    }

    pub fn remote_space(&mut self) -> Result<bool> {
        self.remote_eval("MEM")
    }

    pub fn remote_type(&mut self, name: &str) -> Result<bool> {
        self.send_command(format!("'{}' RCL", name.trim()).as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::Interrupt;
    use crate::kermit::packet::{KermitPacket, PacketType, DEFAULT_HEADER, DEFAULT_TRAILER};
    use crate::transport::testing::Canned;

    fn engine() -> KermitProtocol<Canned> {
        let mut kp = KermitProtocol::new(Canned::new(&[]), Interrupt::new());
        kp.config_mut().poll_retries = 1;
        kp.config_mut().poll_delay = 0.0;
        kp
    }

    fn first_written(kp: &KermitProtocol<Canned>) -> KermitPacket {
        let bytes = &kp.transport().written[0];
        KermitPacket::parse(bytes, BlockCheck::One, DEFAULT_HEADER, DEFAULT_TRAILER)
            .expect("Failed to parse written packet")
    }

    #[test]
    fn test_hp_name_from_file() {
        let kp = engine();
        assert_eq!(kp.hp_name(Some(Path::new("dir/prog.tar.gz")), None), "PROG");
        assert_eq!(kp.hp_name(Some(Path::new("sin.txt")), None), "KDAT");
        assert_eq!(kp.hp_name(Some(Path::new("x")), Some("Other")), "Other");
        assert_eq!(kp.hp_name(None, None), "KDAT");
    }

    #[test]
    fn test_hp_name_falls_back_to_default_name() {
        let mut kp = engine();
        kp.config_mut().default_name = "MYDAT".to_string();
        assert_eq!(kp.hp_name(Some(Path::new("123.txt")), None), "MYDAT");
        kp.config_mut().default_name = "VARS".to_string();
        assert_eq!(kp.hp_name(Some(Path::new("123.txt")), None), "KDAT");
    }

    #[test]
    fn test_send_files_requires_files() {
        let mut kp = engine();
        assert!(matches!(kp.send_files(&[], None), Err(LinkError::NoFiles)));
    }

    #[test]
    fn test_finish_packet() {
        let mut kp = engine();
        kp.finish().expect("Finish failed");
        assert_eq!(kp.transport().written, vec![b"\x01$ GF4\r".to_vec()]);
    }

    fn command_payload(run: impl FnOnce(&mut KermitProtocol<Canned>) -> Result<bool>) -> Vec<u8> {
        let mut kp = engine();
        // nothing answers, so the command reports failure
        assert!(!run(&mut kp).expect("Command failed"));
        let pkt = first_written(&kp);
        assert_eq!(pkt.ptype, PacketType::Command);
        pkt.payload
    }

    fn eval(cmd: &[u8]) -> Vec<u8> {
        [&[0xAB, b' '][..], cmd, &[b' ', 0xBB], b" EVAL"].concat()
    }

    #[test]
    fn test_remote_payloads() {
        assert_eq!(command_payload(|kp| kp.remote_cwd(None)), b"{ HOME } EVAL".to_vec());
        assert_eq!(
            command_payload(|kp| kp.remote_cwd(Some("GAMES"))),
            b"{ GAMES } EVAL".to_vec()
        );
        assert_eq!(
            command_payload(|kp| kp.remote_cwd(Some("{ HOME A }"))),
            b"{ HOME A } EVAL".to_vec()
        );
        assert_eq!(command_payload(|kp| kp.remote_host(" 1 2 + ")), b"1 2 +".to_vec());
        assert_eq!(command_payload(|kp| kp.remote_type("PRG")), b"'PRG' RCL".to_vec());
        assert_eq!(command_payload(|kp| kp.remote_delete("PRG")), eval(b"PRG PURGE"));
        assert_eq!(command_payload(|kp| kp.remote_directory()), eval(b"VARS"));
        assert_eq!(command_payload(|kp| kp.remote_path()), eval(b"PATH"));
        assert_eq!(command_payload(|kp| kp.remote_space()), eval(b"MEM"));
    }

    #[test]
    fn test_get_sends_receive_init() {
        let mut kp = engine();
        assert!(!kp.get(&["PRG".to_string()]).expect("Get failed"));
        let pkt = first_written(&kp);
        assert_eq!(pkt.ptype, PacketType::ReceiveInit);
        assert_eq!(pkt.payload, b"PRG".to_vec());
        assert!(!kp.get(&[]).expect("Get failed"));
    }
}
