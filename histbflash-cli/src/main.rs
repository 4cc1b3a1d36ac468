//! histbflash CLI - Command-line tool for flashing HiSilicon STB boards.
//!
//! ## Features
//!
//! - Flash fastboot images over the bootROM serial protocol
//! - Inspect and extract fastboot images
//! - Decode boot register tables ("regbin" files)
//! - Serial terminal for the freshly booted system
//! - Shell completion generation

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use console::style;
use env_logger::Env;
use histbflash::{auto_detect_port, DeviceVariant, NativePortEnumerator, PortEnumerator};
use log::debug;
use serde::Serialize;
use std::env;
use std::io;
use std::path::PathBuf;

mod commands;

/// histbflash - flash HiSilicon set-top-box boards over serial.
///
/// Environment variables:
///   HISTBFLASH_PORT     - Default serial port
///   HISTBFLASH_BAUD     - Default baud rate (default: 115200)
///   HISTBFLASH_VARIANT  - Default device variant (hi3798, hi3716)
#[derive(Parser)]
#[command(name = "histbflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (auto-detected when exactly one is present).
    #[arg(short, long, global = true, env = "HISTBFLASH_PORT")]
    port: Option<String>,

    /// Baud rate.
    #[arg(
        short,
        long,
        global = true,
        default_value = "115200",
        env = "HISTBFLASH_BAUD"
    )]
    baud: u32,

    /// Target device variant.
    #[arg(
        long,
        global = true,
        default_value = "hi3798",
        env = "HISTBFLASH_VARIANT"
    )]
    variant: Variant,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Supported device variants.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Variant {
    /// Hi3798 family (type query + board information).
    Hi3798,
    /// Hi3716 family (chip-id query + auxiliary code decrypt).
    Hi3716,
}

impl From<Variant> for DeviceVariant {
    fn from(variant: Variant) -> Self {
        match variant {
            Variant::Hi3798 => DeviceVariant::Hi3798,
            Variant::Hi3716 => DeviceVariant::Hi3716,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Flash a fastboot image to a powered-off board.
    Flash {
        /// Path to the fastboot image.
        image: PathBuf,

        /// Open a serial terminal on the port after flashing.
        #[arg(long)]
        terminal: bool,
    },

    /// Show information about a fastboot image.
    Info {
        /// Path to the fastboot image.
        image: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Extract auxiliary code and boot register tables from an image.
    Extract {
        /// Path to the fastboot image.
        image: PathBuf,

        /// Output directory.
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        /// Strip trailing zero padding from extracted files.
        #[arg(long)]
        strip: bool,
    },

    /// Decode and print a boot register table file.
    Regbin {
        /// Path to the regbin file.
        file: PathBuf,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Open a serial terminal.
    Monitor {
        /// Baud rate for the terminal (default: 115200).
        #[arg(long, default_value = "115200")]
        monitor_baud: u32,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> Result<()> {
    // NO_COLOR and TTY detection
    let stderr_is_tty = console::Term::stderr().is_term();
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "histbflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match &cli.command {
        Commands::Flash { image, terminal } => {
            commands::flash::cmd_flash(&cli, image, *terminal)?;
        }
        Commands::Info { image, json } => {
            commands::info::cmd_info(image, *json)?;
        }
        Commands::Extract { image, out, strip } => {
            commands::info::cmd_extract(image, out, *strip)?;
        }
        Commands::Regbin { file } => {
            commands::info::cmd_regbin(file)?;
        }
        Commands::ListPorts { json } => {
            cmd_list_ports(*json)?;
        }
        Commands::Monitor { monitor_baud } => {
            let port = get_port(&cli)?;
            commands::monitor::cmd_monitor(&port, *monitor_baud)?;
        }
        Commands::Completions { shell } => {
            cmd_completions(*shell);
        }
    }

    Ok(())
}

/// Get the serial port from CLI args or auto-detection.
fn get_port(cli: &Cli) -> Result<String> {
    match &cli.port {
        Some(port) => Ok(port.clone()),
        None => Ok(auto_detect_port::<NativePortEnumerator>()?.name),
    }
}

#[derive(Serialize)]
struct PortJson {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    vid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    serial_number: Option<String>,
}

/// List ports command implementation.
fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = NativePortEnumerator::list_ports()?;

    if json {
        let ports: Vec<PortJson> = ports
            .into_iter()
            .map(|p| PortJson {
                name: p.name,
                vid: p.vid,
                pid: p.pid,
                manufacturer: p.manufacturer,
                product: p.product,
                serial_number: p.serial_number,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style("no serial ports found").dim());
        return Ok(());
    }
    for port in &ports {
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .unwrap_or("");
        eprintln!(
            "  {} {}{}{}",
            style("•").green(),
            style(&port.name).cyan(),
            vid_pid,
            if product.is_empty() {
                String::new()
            } else {
                format!(" - {}", style(product).dim())
            }
        );
    }
    if let Ok(auto) = auto_detect_port::<NativePortEnumerator>() {
        eprintln!(
            "\n{} would auto-select {}",
            style("→").green().bold(),
            style(&auto.name)
                .cyan()
                .bold()
        );
    }
    Ok(())
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd
        .get_name()
        .to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        // Verifies that all derive macros produce a valid clap Command
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_flash() {
        let cli = Cli::try_parse_from([
            "histbflash",
            "--port",
            "/dev/ttyUSB0",
            "flash",
            "fastboot.bin",
        ])
        .unwrap();
        assert_eq!(
            cli.port
                .as_deref(),
            Some("/dev/ttyUSB0")
        );
        assert!(matches!(
            cli.command,
            Commands::Flash {
                terminal: false,
                ..
            }
        ));
    }

    #[test]
    fn test_cli_parse_flash_with_terminal() {
        let cli =
            Cli::try_parse_from(["histbflash", "flash", "fastboot.bin", "--terminal"]).unwrap();
        assert!(matches!(cli.command, Commands::Flash { terminal: true, .. }));
    }

    #[test]
    fn test_cli_parse_info_json() {
        let cli = Cli::try_parse_from(["histbflash", "info", "--json", "fastboot.bin"]).unwrap();
        if let Commands::Info { json, .. } = cli.command {
            assert!(json);
        } else {
            panic!("Expected Info command");
        }
    }

    #[test]
    fn test_cli_parse_extract() {
        let cli = Cli::try_parse_from([
            "histbflash",
            "extract",
            "fastboot.bin",
            "--out",
            "/tmp/parts",
            "--strip",
        ])
        .unwrap();
        if let Commands::Extract { out, strip, .. } = cli.command {
            assert_eq!(
                out.to_str()
                    .unwrap(),
                "/tmp/parts"
            );
            assert!(strip);
        } else {
            panic!("Expected Extract command");
        }
    }

    #[test]
    fn test_cli_parse_monitor_default_baud() {
        let cli = Cli::try_parse_from(["histbflash", "monitor"]).unwrap();
        if let Commands::Monitor { monitor_baud } = cli.command {
            assert_eq!(monitor_baud, 115_200);
        } else {
            panic!("Expected Monitor command");
        }
    }

    #[test]
    fn test_cli_default_values() {
        let cli = Cli::try_parse_from(["histbflash", "list-ports"]).unwrap();
        assert_eq!(cli.baud, 115_200);
        assert!(matches!(cli.variant, Variant::Hi3798));
        assert!(!cli.quiet);
        assert!(cli
            .port
            .is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_cli_variant_conversion() {
        assert_eq!(
            DeviceVariant::from(Variant::Hi3798),
            DeviceVariant::Hi3798
        );
        assert_eq!(
            DeviceVariant::from(Variant::Hi3716),
            DeviceVariant::Hi3716
        );
    }

    #[test]
    fn test_cli_invalid_variant() {
        let result = Cli::try_parse_from(["histbflash", "--variant", "hi9999", "list-ports"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["histbflash"]).is_err());
    }
}
