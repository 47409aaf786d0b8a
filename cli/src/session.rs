//! Protocol sessions over the sound card modem, plus the offline WAV tools

use std::fs;
use std::path::{Path, PathBuf};

use calclink_core::calibrate::compute_sensitivity;
use calclink_core::decoder::filtered;
use calclink_core::kermit::{KermitConfig, Transfer};
use calclink_core::serial::{ReceiveMode, SerialConfig};
use calclink_core::wav::{read_wav, write_wav};
use calclink_core::xmodem::XmodemConfig;
use calclink_core::{
    Configurable, Interrupt, KermitProtocol, ModemTransport, Serial, StreamDecoder, Xmodem,
};

use crate::audio::{Microphone, Speaker};
use crate::error::{CliError, Result};

/// Audio settings of a live session
#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub framerate: u32,
    pub sensitivity: f64,
    pub wav_prefix: Option<String>,
    pub allow_remote_exec: bool,
}

pub enum KermitAction {
    Send {
        files: Vec<PathBuf>,
        as_name: Option<String>,
        text: bool,
    },
    Receive,
    Get(Vec<String>),
    Server(Option<PathBuf>),
    Finish,
    Remote(RemoteAction),
}

pub enum RemoteAction {
    Cwd(Option<String>),
    Delete(String),
    Directory,
    Host(String),
    Path,
    Space,
    Type(String),
}

pub enum XmodemAction {
    Send(PathBuf),
    Receive(PathBuf),
}

pub enum SerialAction {
    SendChars(String),
    SendFile(PathBuf),
    Receive {
        file: PathBuf,
        timeout: Option<u32>,
        watch: Option<String>,
    },
}

/// Apply `NAME VAL` lines in order, stopping at the first bad one
pub fn configure<C: Configurable>(config: &mut C, lines: &[String]) -> Result<()> {
    for line in lines {
        let name = config.set_config(line).map_err(|source| CliError::Config {
            line: line.clone(),
            source,
        })?;
        log::debug!("Set {}", name);
    }
    Ok(())
}

pub fn print_config<C: Configurable>(
    config: &C,
    filter: &str,
    describe: bool,
    json: bool,
) -> Result<()> {
    if json {
        let text = serde_json::to_string_pretty(&config.to_table())
            .map_err(|e| CliError::Failed(e.to_string()))?;
        println!("{}", text);
        return Ok(());
    }
    let lines = if describe {
        config.describe_config(filter)
    } else {
        config.show_config(filter)
    };
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

/// Sound card modem, running until dropped or stopped
struct Modem {
    transport: ModemTransport<Speaker>,
    _microphone: Microphone,
}

impl Modem {
    fn open(options: &LinkOptions) -> Result<Self> {
        let speaker = Speaker::open(options.framerate)?;
        let mut transport = ModemTransport::new(
            speaker,
            options.framerate,
            options.sensitivity,
            options.wav_prefix.as_deref(),
        );
        let microphone = Microphone::open(options.framerate, transport.sample_sender())?;
        transport.start()?;
        Ok(Self {
            transport,
            _microphone: microphone,
        })
    }
}

fn outcome(ok: bool, what: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(CliError::Failed(format!("{} failed", what)))
    }
}

pub fn run_kermit(
    options: &LinkOptions,
    config: KermitConfig,
    action: KermitAction,
    interrupt: Interrupt,
) -> Result<()> {
    let mut modem = Modem::open(options)?;
    let mut kp = KermitProtocol::new(&mut modem.transport, interrupt);
    *kp.config_mut() = config;
    kp.allow_remote_exec(options.allow_remote_exec);

    let result = match action {
        KermitAction::Send {
            files,
            as_name,
            text,
        } => {
            if text {
                kp.config_mut().transfer = Transfer::Text;
            }
            kp.send_files(&files, as_name.as_deref())
                .map_err(CliError::from)
                .and_then(|ok| outcome(ok, "Send"))
        }
        KermitAction::Receive => kp
            .receive()
            .map_err(CliError::from)
            .and_then(|ok| outcome(ok, "Receive")),
        KermitAction::Get(names) => kp
            .get(&names)
            .map_err(CliError::from)
            .and_then(|ok| outcome(ok, "Get")),
        KermitAction::Server(dir) => kp.server(dir.as_deref()).map_err(CliError::from),
        KermitAction::Finish => kp.finish().map_err(CliError::from),
        KermitAction::Remote(remote) => {
            let sent = match remote {
                RemoteAction::Cwd(dir) => kp.remote_cwd(dir.as_deref()),
                RemoteAction::Delete(name) => kp.remote_delete(&name),
                RemoteAction::Directory => kp.remote_directory(),
                RemoteAction::Host(cmd) => kp.remote_host(&cmd),
                RemoteAction::Path => kp.remote_path(),
                RemoteAction::Space => kp.remote_space(),
                RemoteAction::Type(name) => kp.remote_type(&name),
            };
            sent.map_err(CliError::from)
                .and_then(|ok| outcome(ok, "Remote command"))
        }
    };
    modem.transport.stop()?;
    result
}

pub fn run_xmodem(
    options: &LinkOptions,
    config: XmodemConfig,
    action: XmodemAction,
    interrupt: Interrupt,
) -> Result<()> {
    // read stdin before the line opens
    let stdin_text = match &action {
        XmodemAction::Send(path) if path.as_os_str() == "-" => {
            Some(std::io::read_to_string(std::io::stdin())?)
        }
        _ => None,
    };

    let mut modem = Modem::open(options)?;
    let mut xm = Xmodem::new(&mut modem.transport, interrupt);
    *xm.config_mut() = config;

    let result = match action {
        XmodemAction::Send(path) => match stdin_text {
            Some(text) => xm.send_text(text.as_bytes()),
            None => xm.send_file(&path),
        }
        .map_err(CliError::from)
        .and_then(|ok| outcome(ok, "Send")),
        XmodemAction::Receive(path) => xm
            .receive_file(&path)
            .map_err(CliError::from)
            .and_then(|ok| outcome(ok, "Receive")),
    };
    modem.transport.stop()?;
    result
}

pub fn run_serial(
    options: &LinkOptions,
    mut config: SerialConfig,
    action: SerialAction,
    interrupt: Interrupt,
) -> Result<()> {
    if let SerialAction::Receive { timeout, watch, .. } = &action {
        if let Some(secs) = timeout {
            config.mode = ReceiveMode::Timeout;
            config.timeout = *secs;
        } else if let Some(watch) = watch.as_ref().filter(|w| !w.is_empty()) {
            config.mode = ReceiveMode::Watchars;
            config.watchars = watch.clone();
        }
    }

    let mut modem = Modem::open(options)?;
    let mut serial = Serial::new(&mut modem.transport, interrupt);
    *serial.config_mut() = config;

    let result = match action {
        SerialAction::SendChars(text) => serial.send_chars(text.as_bytes()),
        SerialAction::SendFile(path) => serial.send_file(&path),
        SerialAction::Receive { file, .. } => serial.receive_file(&file),
    }
    .map_err(CliError::from);
    modem.transport.stop()?;
    result
}

/// Flags of the offline decoder
#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    pub calibrate: bool,
    pub sensitivity: Option<f64>,
    pub echo: bool,
    pub filter: bool,
    pub info: bool,
}

fn sibling_with_prefix(path: &Path, prefix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}{}", prefix, name))
}

/// Decode a recorded session to `WAV.bin`. Without a sensitivity one is
/// computed from the recording.
pub fn decode_wav(path: &Path, options: &DecodeOptions) -> Result<PathBuf> {
    let wav = read_wav(path)?;
    if options.info {
        println!("Num frames: {}", wav.samples.len());
        println!("Framerate: {}", wav.framerate);
        println!("Duration (sec): {}", wav.duration_secs());
    }

    let sensitivity = match options.sensitivity {
        Some(s) if !options.calibrate => check_sensitivity(s)?,
        _ => {
            let s = compute_sensitivity(&wav.samples, wav.framerate)?;
            println!("sensitivity = {:.2}", s);
            s
        }
    };

    let decoder = StreamDecoder::new(wav.framerate, sensitivity);
    let bytes = decoder.decode_samples(&wav.samples);
    if options.echo {
        println!("{}", String::from_utf8_lossy(&bytes));
    }

    if options.filter {
        let filt_path = sibling_with_prefix(path, "filt_");
        write_wav(&filt_path, &filtered(&wav.samples, sensitivity), wav.framerate)?;
        println!("Wrote {}", filt_path.display());
    }

    let mut out_path = path.as_os_str().to_owned();
    out_path.push(".bin");
    let out_path = PathBuf::from(out_path);
    fs::write(&out_path, &bytes)?;
    println!("Wrote {}", out_path.display());
    Ok(out_path)
}

pub fn calibrate(path: &Path) -> Result<f64> {
    let wav = read_wav(path)?;
    let sensitivity = compute_sensitivity(&wav.samples, wav.framerate)?;
    println!("sensitivity = {:.4}", sensitivity);
    Ok(sensitivity)
}

pub fn check_sensitivity(sensitivity: f64) -> Result<f64> {
    if (0.0..=1.0).contains(&sensitivity) {
        Ok(sensitivity)
    } else {
        Err(CliError::Sensitivity(sensitivity))
    }
}
