//! Raw character mode: text goes out as-is (with parity), whatever comes
//! back is saved without any framing

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{ConfigError, ConfigTable, ConfigValue as V, Configurable};
use crate::error::Result;
use crate::hpobj::Parity;
use crate::interrupt::Interrupt;
use crate::transport::Transport;

/// Size of the calculator's serial input buffer
const CALC_BUFFER_CHARS: usize = 255;

const WATCH_POLL: Duration = Duration::from_millis(500);
const TIMEOUT_POLL: Duration = Duration::from_millis(100);

const MODES: &[(&str, i64)] = &[("timeout", 1), ("watchars", 2)];

/// How a receive decides the peer is done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveMode {
    Timeout = 1,
    Watchars = 2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SerialConfig {
    pub parity: Parity,
    pub timeout: u32,
    pub watchars: String,
    pub mode: ReceiveMode,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            parity: Parity::None,
            timeout: 10,
            watchars: "ZZ".to_string(),
            mode: ReceiveMode::Timeout,
        }
    }
}

impl Configurable for SerialConfig {
    fn to_table(&self) -> ConfigTable {
        ConfigTable::new()
            .choice_entry("parity", V::Int(self.parity.index()), Parity::CHOICES, "Parity")
            .entry(
                "timeout",
                V::Int(self.timeout.into()),
                "Receive data until given time has elapsed",
            )
            .entry(
                "watchars",
                V::Str(self.watchars.clone()),
                "Receive data until given chars are received",
            )
            .choice_entry("mode", V::Int(self.mode as i64), MODES, "Receive mode")
    }

    fn load_table(&mut self, table: &ConfigTable) -> std::result::Result<(), ConfigError> {
        let parity = table.int("parity")?;
        let watchars = table.string("watchars")?;
        if watchars.is_empty() {
            return Err(ConfigError::invalid("watchars", "\"\""));
        }
        *self = Self {
            parity: Parity::from_index(parity).ok_or_else(|| ConfigError::invalid("parity", parity))?,
            timeout: table.count("timeout")?,
            watchars,
            mode: match table.int("mode")? {
                2 => ReceiveMode::Watchars,
                _ => ReceiveMode::Timeout,
            },
        };
        Ok(())
    }
}

fn is_std_stream(path: &Path) -> bool {
    path.as_os_str() == "-"
}

/// Raw serial engine over a [`Transport`]
pub struct Serial<T: Transport> {
    transport: T,
    config: SerialConfig,
    interrupt: Interrupt,
}

impl<T: Transport> Serial<T> {
    pub fn new(transport: T, interrupt: Interrupt) -> Self {
        Self {
            transport,
            config: SerialConfig::default(),
            interrupt,
        }
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SerialConfig {
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

    pub fn send_chars(&mut self, chars: &[u8]) -> Result<()> {
        log::info!("Sending chars: {}", String::from_utf8_lossy(chars));
        if chars.len() > CALC_BUFFER_CHARS {
            log::warn!("Text length exceeds calc's buffer size ({} chars)", CALC_BUFFER_CHARS);
        }
        let bytes = self.config.parity.apply(chars);
        self.transport.write_bytes(&bytes)
    }

    /// Send a text file, `-` reads standard input
    pub fn send_file(&mut self, path: &Path) -> Result<()> {
        log::info!("Sending file: {}", path.display());
        let chars = if is_std_stream(path) {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf)?;
            buf
        } else {
            fs::read(path)?
        };
        self.send_chars(&chars)
    }

    /// Receive with the configured mode and save to `path` (`-` is
    /// standard output)
    pub fn receive_file(&mut self, path: &Path) -> Result<()> {
        match self.config.mode {
            ReceiveMode::Timeout => self.receive_file_timeout(path, self.config.timeout),
            ReceiveMode::Watchars => {
                let watchars = self.config.watchars.clone();
                self.receive_file_watchars(path, watchars.as_bytes())
            }
        }
    }

    /// Save everything that arrives within `secs` seconds
    pub fn receive_file_timeout(&mut self, path: &Path, secs: u32) -> Result<()> {
        log::info!("Waiting for {} seconds", secs);
        let deadline = Instant::now() + Duration::from_secs(secs.into());
        loop {
            self.interrupt.check()?;
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(TIMEOUT_POLL.min(deadline - now));
        }
        let data = self.transport.read();
        write_output(path, &data)
    }

    /// Save everything before the first `watchars`, which is consumed
    pub fn receive_file_watchars(&mut self, path: &Path, watchars: &[u8]) -> Result<()> {
        log::info!("Watching for {}", String::from_utf8_lossy(watchars));
        let data = loop {
            self.interrupt.check()?;
            let buf = self.transport.peek();
            let found = (!watchars.is_empty())
                .then(|| buf.windows(watchars.len()).position(|w| w == watchars))
                .flatten();
            if let Some(pos) = found {
                let mut data = self.transport.read_bytes(pos + watchars.len());
                data.truncate(pos);
                break data;
            }
            thread::sleep(WATCH_POLL);
        };
        write_output(path, &data)
    }
}

fn write_output(path: &Path, data: &[u8]) -> Result<()> {
    if is_std_stream(path) {
        let mut out = io::stdout().lock();
        out.write_all(data)?;
        out.write_all(b"\n")?;
        out.flush()?;
    } else {
        fs::write(path, data)?;
        log::info!("Wrote file {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;
    use crate::transport::testing::Canned;

    fn engine() -> Serial<Canned> {
        Serial::new(Canned::new(&[]), Interrupt::new())
    }

    #[test]
    fn test_send_chars_with_parity() {
        let mut serial = engine();
        serial.send_chars(b"AC").expect("Send failed");
        serial.config_mut().parity = Parity::Even;
        serial.send_chars(b"AC").expect("Send failed");
        serial.config_mut().parity = Parity::Mark;
        serial.send_chars(b"A").expect("Send failed");
        assert_eq!(
            serial.transport().written,
            vec![b"AC".to_vec(), vec![0x41, 0xC3], vec![0xC1]]
        );
    }

    #[test]
    fn test_send_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("note.txt");
        fs::write(&path, "1 2 +").expect("Failed to write");
        let mut serial = engine();
        serial.send_file(&path).expect("Send failed");
        assert_eq!(serial.transport().written, vec![b"1 2 +".to_vec()]);
    }

    #[test]
    fn test_receive_watchars() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("out.txt");
        let mut serial = engine();
        serial.transport_mut().push_incoming(b"HELLO ZZ tail");
        serial.config_mut().mode = ReceiveMode::Watchars;
        serial.receive_file(&path).expect("Receive failed");
        assert_eq!(fs::read(&path).expect("Failed to read"), b"HELLO ".to_vec());
        assert_eq!(serial.transport().peek(), b" tail".to_vec());
    }

    #[test]
    fn test_receive_timeout_takes_everything() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("out.txt");
        let mut serial = engine();
        serial.transport_mut().push_incoming(b"all of it");
        serial.receive_file_timeout(&path, 0).expect("Receive failed");
        assert_eq!(fs::read(&path).expect("Failed to read"), b"all of it".to_vec());
        assert!(serial.transport().peek().is_empty());
    }

    #[test]
    fn test_receive_watchars_interrupted() {
        let interrupt = Interrupt::new();
        let mut serial = Serial::new(Canned::new(&[]), interrupt.clone());
        interrupt.trigger();
        let result = serial.receive_file_watchars(Path::new("unused"), b"ZZ");
        assert!(matches!(result, Err(LinkError::Interrupted)));
    }

    #[test]
    fn test_config() {
        let mut config = SerialConfig::default();
        config.set_config("parity odd").unwrap();
        assert_eq!(config.parity, Parity::Odd);
        config.set_config("mode watchars").unwrap();
        assert_eq!(config.mode, ReceiveMode::Watchars);
        config.set_config("watchars END").unwrap();
        assert_eq!(config.watchars, "END");
        assert!(config.set_config("parity sideways").is_err());
        assert!(config.set_config("timeout 0").is_err());
        assert!(config.show_config("parity")[0].ends_with("odd"));
    }
}
