//! Image inspection commands: info, extract and regbin decoding.

use anyhow::{Context, Result};
use console::style;
use histbflash::{FastbootImage, RegBin};
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Serialize)]
struct ImageJson {
    size: usize,
    auxcode_addr: String,
    auxcode_size: usize,
    bootregs_addr: String,
    bootreg_size: usize,
    bootreg_count: usize,
}

/// Show information about a fastboot image.
pub(crate) fn cmd_info(image_path: &Path, json: bool) -> Result<()> {
    let image = FastbootImage::from_file(image_path)
        .with_context(|| format!("failed to load image {}", image_path.display()))?;

    if json {
        let info = ImageJson {
            size: image
                .image()
                .len(),
            auxcode_addr: format!("{:#010X}", image.auxcode_addr()),
            auxcode_size: image
                .aux_code()
                .len(),
            bootregs_addr: format!("{:#010X}", image.bootregs_addr()),
            bootreg_size: image
                .bootreg_default()
                .len(),
            bootreg_count: image
                .bootregs()
                .len(),
        };
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    eprintln!(
        "{}",
        style(format!("Image {}", image_path.display()))
            .bold()
            .underlined()
    );
    eprintln!(
        "  size: {:#X} ({} bytes)",
        image
            .image()
            .len(),
        image
            .image()
            .len()
    );
    for line in image
        .to_string()
        .lines()
    {
        eprintln!("  {line}");
    }
    Ok(())
}

/// Extract auxiliary code and boot register tables to a directory.
pub(crate) fn cmd_extract(image_path: &Path, out: &Path, strip: bool) -> Result<()> {
    let image = FastbootImage::from_file(image_path)
        .with_context(|| format!("failed to load image {}", image_path.display()))?;

    image
        .write_to_directory(out, strip)
        .with_context(|| format!("failed to write to {}", out.display()))?;

    let count = image
        .bootregs()
        .len()
        .max(1);
    eprintln!(
        "{} Extracted AUXCODE.img and {count} boot register table(s) to {}",
        style("✓").green(),
        style(out.display()).bold()
    );
    Ok(())
}

/// Decode a regbin file and print it to stdout.
pub(crate) fn cmd_regbin(file: &Path) -> Result<()> {
    let data = fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let regbin =
        RegBin::from_bytes(&data).with_context(|| format!("failed to parse {}", file.display()))?;
    print!("{regbin}");
    Ok(())
}
