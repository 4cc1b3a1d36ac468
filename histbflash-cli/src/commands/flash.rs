//! Flash command implementation.

use anyhow::{Context, Result};
use console::style;
use histbflash::{
    DeviceInfo, DeviceVariant, FastbootImage, Flasher, NativePort, SerialConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

use crate::commands::monitor;
use crate::{get_port, Cli};

/// Flash a fastboot image, optionally dropping into a terminal afterwards.
pub(crate) fn cmd_flash(cli: &Cli, image_path: &Path, terminal: bool) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading image {}",
            style("•").cyan(),
            style(image_path.display()).bold()
        );
    }

    let image = FastbootImage::from_file(image_path)
        .with_context(|| format!("failed to load image {}", image_path.display()))?;

    if !cli.quiet {
        for line in image
            .to_string()
            .lines()
        {
            eprintln!("    {}", style(line).dim());
        }
    }

    let port_name = get_port(cli)?;
    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("•").cyan(),
            style(&port_name).green(),
            cli.baud
        );
    }

    let port = NativePort::open(&SerialConfig::new(&port_name, cli.baud))
        .with_context(|| format!("failed to open port {port_name}"))?;

    let variant: DeviceVariant = cli
        .variant
        .into();
    let mut flasher = Flasher::new(port, variant, Box::new(std::io::stderr()));

    if !cli.quiet {
        eprintln!(
            "{} Waiting for the board, {} now",
            style("•").yellow(),
            style("power-cycle it")
                .yellow()
                .bold()
        );
    }

    let pb = if cli.quiet || !console::Term::stderr().is_term() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(0);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let mut current_stage = None;
    let info = flasher.run(&image, |stage, sent, total| {
        if current_stage != Some(stage) {
            current_stage = Some(stage);
            pb.set_length(total as u64);
            pb.set_message(stage.name());
        }
        pb.set_position(sent as u64);
    })?;

    pb.finish_and_clear();

    if !cli.quiet {
        match info {
            DeviceInfo::Type(result) => {
                eprintln!("{} Device: {result}", style("✓").green());
            }
            DeviceInfo::ChipId(result) => {
                eprintln!(
                    "{} Chip id: {:#018x}",
                    style("✓").green(),
                    result.chip_id
                );
            }
        }
        eprintln!("{} Flash complete", style("✓").green().bold());
    }

    if terminal {
        if !cli.quiet {
            eprintln!(
                "{} Opening terminal on {}",
                style("•").cyan(),
                style(&port_name).green()
            );
        }
        let port = flasher.finish();
        monitor::run_terminal(histbflash::MonitorSession::from_port(port)?)?;
    }

    Ok(())
}
