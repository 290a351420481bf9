use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use neo_core::files::{load_from_device, save_to_device, save_to_device_named};
use neo_core::protocol::constants::{SETTINGS_FLAGS_0B, SETTINGS_FLAGS_SYSTEM};
use neo_core::{
    AcceptAll, AlphaWordFile, AppletId, AppletInfo, DeviceRegistry, GenericFile, NeoFile, NeoSession,
    NusbTransport, SessionConfig, UsbScanner, UserDictionaryFile,
};
use tracing::{error, info, warn};

/// Largest settings list accepted from a device.
const SETTINGS_BUFFER: usize = 0x4000;

#[derive(Parser, Debug)]
#[command(author, version, about = "AlphaSmart Neo file tool (Pure Rust)", long_about = None)]
struct Args {
    /// Session configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds to wait for a Neo to appear
    #[arg(long, default_value_t = 30)]
    wait: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List installed applets
    Applets,
    /// Show the operating system version
    Version,
    /// Show free ROM and RAM
    Memory,
    /// List the files of an applet
    Files {
        #[arg(short, long, value_parser = parse_applet, default_value = "alphaword")]
        applet: AppletId,
    },
    /// Copy a file off the device
    Read {
        #[arg(short, long, value_parser = parse_applet, default_value = "alphaword")]
        applet: AppletId,
        /// File slot, starting at 1
        #[arg(short, long)]
        index: u8,
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
        /// Output path (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Prefix text output with a byte order mark
        #[arg(long)]
        bom: bool,
    },
    /// Replace a file on the device, creating it when addressed by name
    Write {
        #[arg(short, long, value_parser = parse_applet, default_value = "alphaword")]
        applet: AppletId,
        /// File slot, starting at 1
        #[arg(short, long, conflicts_with = "name", required_unless_present = "name")]
        index: Option<u8>,
        /// File name; the file is created if no slot has this name
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long, default_value = "write")]
        password: String,
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
        input: PathBuf,
    },
    /// Create a new file after the applet's existing ones
    Create {
        #[arg(short, long, value_parser = parse_applet, default_value = "alphaword")]
        applet: AppletId,
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "write")]
        password: String,
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
        input: PathBuf,
    },
    /// Empty one file
    Clear {
        #[arg(short, long, value_parser = parse_applet, default_value = "alphaword")]
        applet: AppletId,
        #[arg(short, long)]
        index: u8,
    },
    /// Erase every file of an applet
    ClearAll {
        #[arg(short, long, value_parser = parse_applet, default_value = "alphaword")]
        applet: AppletId,
    },
    /// Dump an applet's settings
    Settings {
        #[arg(short, long, value_parser = parse_applet, default_value = "system")]
        applet: AppletId,
        /// Request flags (defaults to 0x10 for the system, 0x0b otherwise)
        #[arg(long, value_parser = parse_number)]
        flags: Option<u32>,
    },
    /// Restart the device
    Restart,
    /// Write the effective configuration to a file
    SaveConfig { path: PathBuf },
}

/// On-disk representation of a device file.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    /// Bytes exactly as stored on the device
    Raw,
    /// Plain text (AlphaWord and dictionary only)
    Text,
    /// Generic XML backup of any applet's file
    Xml,
}

fn parse_number(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number {:?}: {}", s, e))
}

fn parse_applet(s: &str) -> Result<AppletId, String> {
    match s.to_ascii_lowercase().as_str() {
        "system" => Ok(AppletId::SYSTEM),
        "alphaword" => Ok(AppletId::ALPHAWORD),
        "dictionary" => Ok(AppletId::DICTIONARY),
        other => {
            let id = parse_number(other)?;
            u16::try_from(id)
                .map(AppletId)
                .map_err(|_| format!("applet ID {:#x} out of range", id))
        }
    }
}

type Session = NeoSession<NusbTransport>;

/// Wait for a Neo, switching it out of keyboard mode if needed.
fn connect(config: SessionConfig, wait: Duration) -> Result<Session> {
    info!("Waiting for device...");
    let mut registry = DeviceRegistry::new(config, Box::new(AcceptAll));
    let mut scanner = UsbScanner::default();
    let start = Instant::now();
    scanner.run_until(&mut registry, |r| !r.is_empty() || start.elapsed() > wait)?;

    let handle = registry
        .handles()
        .first()
        .copied()
        .ok_or_else(|| anyhow!("No Neo found after {}s", wait.as_secs()))?;
    if registry.len() > 1 {
        warn!(devices = registry.len(), "Several devices found, using the first");
    }
    registry
        .take(handle)
        .ok_or_else(|| anyhow!("Device {} vanished", handle))
}

/// File object for `format`, tagged with the applet's version when known.
fn file_for(session: &Session, applet: AppletId, format: Format) -> Result<Box<dyn NeoFile>> {
    let mut file: Box<dyn NeoFile> = match (format, applet) {
        (Format::Text, AppletId::ALPHAWORD) => Box::new(AlphaWordFile::new()),
        (Format::Text, AppletId::DICTIONARY) => Box::new(UserDictionaryFile::new()),
        (Format::Text, _) => bail!("Text format is only available for AlphaWord and the dictionary"),
        (Format::Raw | Format::Xml, _) => Box::new(GenericFile::new()),
    };
    match session.applet_for_id(applet) {
        Some(found) => file.set_applet_info(AppletInfo::from(found.header())),
        None => warn!(applet = %applet, "Applet not installed on this device"),
    }
    Ok(file)
}

fn read_input(file: &mut dyn NeoFile, format: Format, input: &Path) -> Result<()> {
    if format == Format::Raw {
        let data = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
        file.load(data)?;
    } else {
        let text = std::fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
        file.import_text(&text)?;
    }
    Ok(())
}

fn run(args: Args, config: SessionConfig) -> Result<()> {
    if let Command::SaveConfig { path } = &args.command {
        config.save_to_file(path)?;
        info!(path = %path.display(), "Configuration saved");
        return Ok(());
    }

    let mut session = connect(config, Duration::from_secs(args.wait))?;

    match args.command {
        Command::Applets => {
            for applet in session.applets() {
                let header = applet.header();
                println!(
                    "{}  {:<36} v{:<6} {:>3} files  {:>7} bytes RAM",
                    applet.id(),
                    applet.name(),
                    header.version_string(),
                    header.file_count,
                    header.ram_size
                );
            }
        }
        Command::Version => {
            let version = session.system_version()?;
            println!("{} {}.{} ({})", version.name, version.major, version.minor, version.date);
        }
        Command::Memory => {
            let memory = session.system_memory()?;
            println!("Free ROM: {} bytes", memory.free_rom);
            println!("Free RAM: {} bytes", memory.free_ram);
        }
        Command::Files { applet } => {
            for (index, attributes) in session.list_files(applet)? {
                println!(
                    "{:>3}  {:<15} {:>7} bytes  space {}",
                    index,
                    attributes.file_name(),
                    attributes.alloc_size(),
                    attributes.file_space()
                );
            }
        }
        Command::Read {
            applet,
            index,
            format,
            output,
            bom,
        } => {
            let mut file = file_for(&session, applet, format)?;
            load_from_device(file.as_mut(), &mut session, applet, index, None)?;

            let bytes = match format {
                Format::Raw => file.data().to_vec(),
                Format::Text | Format::Xml => file.export_text(bom)?.into_bytes(),
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, &bytes).with_context(|| format!("writing {}", path.display()))?;
                    info!(path = %path.display(), bytes = bytes.len(), "File saved");
                }
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&bytes)?;
                }
            }
        }
        Command::Write {
            applet,
            index,
            name,
            password,
            format,
            input,
        } => {
            let mut file = file_for(&session, applet, format)?;
            read_input(file.as_mut(), format, &input)?;
            let slot = match (index, name) {
                (Some(index), _) => {
                    save_to_device(file.as_ref(), &mut session, applet, index)?;
                    index
                }
                (None, Some(name)) => save_to_device_named(file.as_ref(), &mut session, applet, &name, &password)?,
                (None, None) => bail!("Either --index or --name is required"),
            };
            info!(index = slot, bytes = file.file_size(), "File written");
        }
        Command::Create {
            applet,
            name,
            password,
            format,
            input,
        } => {
            let mut file = file_for(&session, applet, format)?;
            read_input(file.as_mut(), format, &input)?;
            let index = session.create_file(applet, &name, &password, file.data(), true)?;
            println!("Created file {} in slot {}", name, index);
        }
        Command::Clear { applet, index } => {
            session.clear_file(applet, index)?;
            info!(index, "File cleared");
        }
        Command::ClearAll { applet } => {
            session.clear_all_files(applet)?;
            info!(applet = %applet, "All files cleared");
        }
        Command::Settings { applet, flags } => {
            let flags = flags.unwrap_or(if applet == AppletId::SYSTEM {
                SETTINGS_FLAGS_SYSTEM
            } else {
                SETTINGS_FLAGS_0B
            });
            let settings = session.read_settings(applet, flags, SETTINGS_BUFFER)?;
            print!("{}", settings);
        }
        Command::Restart => {
            session.restart()?;
            info!("Device restarting");
        }
        Command::SaveConfig { .. } => {}
    }

    Ok(())
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = match &args.config {
        Some(path) => match SessionConfig::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Error loading {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => SessionConfig::default(),
    };

    if let Err(e) = run(args, config) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_applet_names_and_numbers() {
        assert_eq!(parse_applet("AlphaWord"), Ok(AppletId::ALPHAWORD));
        assert_eq!(parse_applet("0xa005"), Ok(AppletId::DICTIONARY));
        assert_eq!(parse_applet("0"), Ok(AppletId::SYSTEM));
        assert!(parse_applet("0x10000").is_err());
        assert!(parse_applet("word").is_err());
    }

    #[test]
    fn test_write_needs_index_or_name() {
        assert!(Args::try_parse_from(["neo", "write", "in.txt"]).is_err());
        let args = Args::try_parse_from(["neo", "write", "--name", "notes", "in.txt"]).unwrap();
        assert!(matches!(args.command, Command::Write { name: Some(_), index: None, .. }));
    }

    #[test]
    fn test_settings_flags_hex() {
        let args = Args::try_parse_from(["neo", "settings", "--flags", "0x0f"]).unwrap();
        assert!(matches!(args.command, Command::Settings { flags: Some(0x0f), .. }));
    }
}
