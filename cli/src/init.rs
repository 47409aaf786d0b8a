//! Init scripts: `<protocol> [set] <name...> <value>` lines applied to a
//! protocol's settings at startup. `;` starts a comment.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CliError, Result};

pub const DEFAULT_INIT_FILE: &str = "calclink.ini";

const COMMENT_CHAR: char = ';';

#[derive(Debug, Default, Clone, PartialEq)]
pub struct InitScript {
    pub kermit: Vec<String>,
    pub xmodem: Vec<String>,
    pub serial: Vec<String>,
}

impl InitScript {
    /// Read `path`, or `calclink.ini` when it exists. An empty path
    /// disables the script.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) if p.as_os_str().is_empty() => return Ok(Self::default()),
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_INIT_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        log::info!("Reading init script {}", path.display());
        let text = fs::read_to_string(&path)?;
        Self::parse(&text).map_err(|(line, message)| CliError::InitScript {
            path,
            line,
            message,
        })
    }

    /// Errors carry the 1-based line number
    pub fn parse(text: &str) -> std::result::Result<Self, (usize, String)> {
        let mut script = Self::default();
        for (i, raw) in text.lines().enumerate() {
            let line = raw.split(COMMENT_CHAR).next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let (protocol, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
            let rest = rest.trim();
            let setting = rest
                .strip_prefix("set ")
                .map(str::trim_start)
                .unwrap_or(rest)
                .to_string();
            if setting.is_empty() {
                return Err((i + 1, format!("Missing setting after {:?}", protocol)));
            }
            match protocol.to_ascii_lowercase().as_str() {
                "kermit" => script.kermit.push(setting),
                "xmodem" => script.xmodem.push(setting),
                "serial" => script.serial.push(setting),
                other => return Err((i + 1, format!("Unknown protocol {:?}", other))),
            }
        }
        Ok(script)
    }
}
