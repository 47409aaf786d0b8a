mod audio;
mod error;
mod init;
mod session;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand};

use calclink_core::kermit::KermitConfig;
use calclink_core::serial::SerialConfig;
use calclink_core::xmodem::XmodemConfig;
use calclink_core::{Interrupt, Verbosity, DEFAULT_FRAMERATE, DEFAULT_SENSITIVITY};

use error::{CliError, Result};
use init::InitScript;
use session::{
    DecodeOptions, KermitAction, LinkOptions, RemoteAction, SerialAction, XmodemAction,
};

#[derive(Parser)]
#[command(name = "calclink")]
#[command(about = "Talk to an HP48 over an audio-coupled serial cable")]
struct Cli {
    /// Sound card sample rate
    #[arg(long, default_value_t = DEFAULT_FRAMERATE)]
    framerate: u32,

    /// Pulse detection threshold, 0 to 1
    #[arg(long, default_value_t = DEFAULT_SENSITIVITY)]
    sensitivity: f64,

    /// Record the session to PREFIX_rx.wav and PREFIX_tx.wav
    #[arg(long, value_name = "PREFIX")]
    wav_prefix: Option<String>,

    /// Verbosity: repeat for the level (1 silent .. 6 debug), default 5
    #[arg(short = 'l', long = "log", action = ArgAction::Count)]
    log: u8,

    /// Settings script; an empty value disables the default calclink.ini
    #[arg(long, value_name = "FILE")]
    init: Option<String>,

    /// Let the calculator run host commands from server mode
    #[arg(long)]
    allow_remote_exec: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SetArgs {
    /// Change a setting before running, e.g. --set "send block-check 1"
    #[arg(long = "set", value_name = "NAME VAL", global = true)]
    set: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Kermit file transfer and server
    Kermit {
        #[command(flatten)]
        set: SetArgs,
        #[command(subcommand)]
        command: KermitCommand,
    },

    /// XMODEM file transfer
    Xmodem {
        #[command(flatten)]
        set: SetArgs,
        #[command(subcommand)]
        command: XmodemCommand,
    },

    /// Raw characters over the line
    Serial {
        #[command(flatten)]
        set: SetArgs,
        #[command(subcommand)]
        command: SerialCommand,
    },

    /// Decode a recorded session to WAV.bin
    DecodeWav {
        #[arg(value_name = "WAV")]
        wav: PathBuf,

        /// Compute the sensitivity from the recording
        #[arg(long, conflicts_with = "sensitivity")]
        calibrate: bool,

        /// Use this sensitivity instead of calibrating
        #[arg(long)]
        sensitivity: Option<f64>,

        /// Print the decoded characters
        #[arg(long)]
        echo: bool,

        /// Also write the filtered samples to filt_WAV
        #[arg(long)]
        filter: bool,

        /// Print frame count, rate and duration
        #[arg(long)]
        info: bool,
    },

    /// Print the sensitivity computed from a recording
    Calibrate {
        #[arg(value_name = "WAV")]
        wav: PathBuf,
    },
}

#[derive(Args)]
struct ShowArgs {
    /// Only settings under this name
    #[arg(default_value = "")]
    name: String,

    /// Include help text and choices
    #[arg(long, conflicts_with = "json")]
    describe: bool,

    /// Print as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum KermitCommand {
    /// Send files to the calculator
    Send {
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,

        /// Name on the calculator
        #[arg(long = "as", value_name = "NAME")]
        as_name: Option<String>,

        /// Send as text, translating to calculator characters
        #[arg(long)]
        text: bool,
    },
    /// Receive files sent from the calculator
    Receive,
    /// Fetch variables from a calculator in server mode
    Get {
        #[arg(required = true, value_name = "NAME")]
        names: Vec<String>,
    },
    /// Serve the calculator from DIR
    Server {
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,
    },
    /// Stop the calculator's server
    Finish,
    /// Run a command on a calculator in server mode
    Remote {
        #[command(subcommand)]
        command: RemoteCommand,
    },
    /// Print settings
    Show(ShowArgs),
}

#[derive(Subcommand)]
enum RemoteCommand {
    Cwd { dir: Option<String> },
    Delete { name: String },
    Directory,
    Host { command: String },
    Path,
    Space,
    Type { name: String },
}

#[derive(Subcommand)]
enum XmodemCommand {
    /// Send FILE, or text from stdin as a string object with "-"
    Send {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Receive into FILE
    Receive {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Print settings
    Show(ShowArgs),
}

#[derive(Subcommand)]
enum SerialCommand {
    /// Send TEXT as typed
    SendChars { text: String },
    /// Send FILE, or stdin with "-"
    SendFile {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Receive into FILE, or stdout with "-"
    Receive {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Stop after SECS of silence
        #[arg(long, value_name = "SECS", conflicts_with = "watch")]
        timeout: Option<u32>,

        /// Stop once TEXT arrives
        #[arg(long, value_name = "TEXT")]
        watch: Option<String>,
    },
    /// Print settings
    Show(ShowArgs),
}

fn init_logging(count: u8) {
    let verbosity = Verbosity::new(if count == 0 { Verbosity::INFO.level() } else { count });
    env_logger::Builder::new()
        .filter_level(verbosity.level_filter())
        .format_timestamp(None)
        .init();
    verbosity.apply();
}

/// First Ctrl-C aborts the running transfer, the second one exits
fn watch_ctrl_c(interrupt: Interrupt) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        log::warn!("Interrupted, stopping. Press Ctrl-C again to quit");
        interrupt.trigger();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

fn link_options(cli: &Cli) -> Result<LinkOptions> {
    Ok(LinkOptions {
        framerate: cli.framerate,
        sensitivity: session::check_sensitivity(cli.sensitivity)?,
        wav_prefix: cli.wav_prefix.clone(),
        allow_remote_exec: cli.allow_remote_exec,
    })
}

async fn run(cli: Cli) -> Result<()> {
    let interrupt = Interrupt::new();
    watch_ctrl_c(interrupt.clone());

    let needs_script = matches!(
        cli.command,
        Commands::Kermit { .. } | Commands::Xmodem { .. } | Commands::Serial { .. }
    );
    let script = if needs_script {
        InitScript::load(cli.init.as_deref().map(Path::new))?
    } else {
        InitScript::default()
    };
    let options = link_options(&cli)?;

    match cli.command {
        Commands::Kermit { set, command } => {
            let mut config = KermitConfig::default();
            session::configure(&mut config, &script.kermit)?;
            session::configure(&mut config, &set.set)?;
            let action = match command {
                KermitCommand::Show(show) => {
                    return session::print_config(&config, &show.name, show.describe, show.json)
                }
                KermitCommand::Send {
                    files,
                    as_name,
                    text,
                } => KermitAction::Send {
                    files,
                    as_name,
                    text,
                },
                KermitCommand::Receive => KermitAction::Receive,
                KermitCommand::Get { names } => KermitAction::Get(names),
                KermitCommand::Server { dir } => KermitAction::Server(dir),
                KermitCommand::Finish => KermitAction::Finish,
                KermitCommand::Remote { command } => KermitAction::Remote(match command {
                    RemoteCommand::Cwd { dir } => RemoteAction::Cwd(dir),
                    RemoteCommand::Delete { name } => RemoteAction::Delete(name),
                    RemoteCommand::Directory => RemoteAction::Directory,
                    RemoteCommand::Host { command } => RemoteAction::Host(command),
                    RemoteCommand::Path => RemoteAction::Path,
                    RemoteCommand::Space => RemoteAction::Space,
                    RemoteCommand::Type { name } => RemoteAction::Type(name),
                }),
            };
            tokio::task::spawn_blocking(move || {
                session::run_kermit(&options, config, action, interrupt)
            })
            .await?
        }
        Commands::Xmodem { set, command } => {
            let mut config = XmodemConfig::default();
            session::configure(&mut config, &script.xmodem)?;
            session::configure(&mut config, &set.set)?;
            let action = match command {
                XmodemCommand::Show(show) => {
                    return session::print_config(&config, &show.name, show.describe, show.json)
                }
                XmodemCommand::Send { file } => XmodemAction::Send(file),
                XmodemCommand::Receive { file } => XmodemAction::Receive(file),
            };
            tokio::task::spawn_blocking(move || {
                session::run_xmodem(&options, config, action, interrupt)
            })
            .await?
        }
        Commands::Serial { set, command } => {
            let mut config = SerialConfig::default();
            session::configure(&mut config, &script.serial)?;
            session::configure(&mut config, &set.set)?;
            let action = match command {
                SerialCommand::Show(show) => {
                    return session::print_config(&config, &show.name, show.describe, show.json)
                }
                SerialCommand::SendChars { text } => SerialAction::SendChars(text),
                SerialCommand::SendFile { file } => SerialAction::SendFile(file),
                SerialCommand::Receive {
                    file,
                    timeout,
                    watch,
                } => SerialAction::Receive {
                    file,
                    timeout,
                    watch,
                },
            };
            tokio::task::spawn_blocking(move || {
                session::run_serial(&options, config, action, interrupt)
            })
            .await?
        }
        Commands::DecodeWav {
            wav,
            calibrate,
            sensitivity,
            echo,
            filter,
            info,
        } => {
            let options = DecodeOptions {
                calibrate,
                sensitivity,
                echo,
                filter,
                info,
            };
            session::decode_wav(&wav, &options).map(|_| ())
        }
        Commands::Calibrate { wav } => session::calibrate(&wav).map(|_| ()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Link(calclink_core::LinkError::Interrupted)) => {
            log::warn!("Stopped");
            ExitCode::from(130)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
