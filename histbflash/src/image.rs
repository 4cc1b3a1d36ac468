//! Fastboot image parsing and extraction.
//!
//! A fastboot image is the raw bootloader image as written to flash. The
//! parameter area inside it locates the pieces the flashing session needs:
//! the auxiliary code blob and the boot register tables. All parameter
//! fields are little-endian; offsets are relative to the image start.

use std::fmt;
use std::fs;
use std::path::Path;

use log::{debug, warn};

use crate::error::{Error, Result};

/// Smallest plausible fastboot image (56 KiB).
pub const MIN_IMAGE_SIZE: usize = 0xF000;
/// Largest accepted fastboot image (2 MiB).
pub const MAX_IMAGE_SIZE: usize = 0x20_0000;

/// Maximum number of boot register tables in the list.
const MAX_BOOTREGS: usize = 8;

/// Parameter area offsets, little-endian u32 each.
const AUXCODE_ADDR_OFFSET: usize = 0x214;
const AUXCODE_SIZE_OFFSET: usize = 0x218;
const BOOTREGS_ADDR_OFFSET: usize = 0x2FE4;
const BOOTREG_SIZE_OFFSET: usize = 0x2FE8;

/// The default boot register table always lives here.
const BOOTREG_DEF_ADDR: usize = 0x480;

/// A parsed fastboot image.
#[derive(Debug, Clone)]
pub struct FastbootImage {
    image: Vec<u8>,
    auxcode_addr: u32,
    auxcode_size: u32,
    bootreg_size: u32,
    bootregs_addr: u32,
    bootregs: Vec<Vec<u8>>,
}

impl FastbootImage {
    /// Load and parse a fastboot image from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read(path.as_ref())?;
        Self::from_bytes(data)
    }

    /// Parse a fastboot image already in memory.
    pub fn from_bytes(image: Vec<u8>) -> Result<Self> {
        if image.len() < MIN_IMAGE_SIZE || image.len() > MAX_IMAGE_SIZE {
            return Err(Error::InvalidImage(format!(
                "image is {} bytes, expected between {MIN_IMAGE_SIZE:#x} and {MAX_IMAGE_SIZE:#x}",
                image.len()
            )));
        }

        let auxcode_addr = read_le_u32(&image, AUXCODE_ADDR_OFFSET);
        let auxcode_size = read_le_u32(&image, AUXCODE_SIZE_OFFSET);
        let bootregs_addr = read_le_u32(&image, BOOTREGS_ADDR_OFFSET);
        let bootreg_size = read_le_u32(&image, BOOTREG_SIZE_OFFSET);

        let auxcode_end = auxcode_addr as usize + auxcode_size as usize;
        if auxcode_size == 0 || auxcode_end > image.len() {
            return Err(Error::InvalidImage(format!(
                "auxiliary code range {auxcode_addr:#x}+{auxcode_size:#x} exceeds image"
            )));
        }
        if bootreg_size == 0 || BOOTREG_DEF_ADDR + bootreg_size as usize > image.len() {
            return Err(Error::InvalidImage(format!(
                "boot register size {bootreg_size:#x} is implausible"
            )));
        }

        let mut parsed = Self {
            image,
            auxcode_addr,
            auxcode_size,
            bootreg_size,
            bootregs_addr,
            bootregs: Vec::new(),
        };
        parsed.extract_bootregs()?;
        debug!("parsed image: {parsed}");
        Ok(parsed)
    }

    fn extract_bootregs(&mut self) -> Result<()> {
        let size = self.bootreg_size as usize;
        for index in 0..MAX_BOOTREGS {
            let begin = self.bootregs_addr as usize + index * size;
            let end = begin + size;
            if end
                > self
                    .image
                    .len()
            {
                return Err(Error::InvalidImage(format!(
                    "boot register table {index} at {begin:#x} exceeds image"
                )));
            }
            let table = &self.image[begin..end];
            // A zero first byte terminates the list.
            if table[0] == 0 {
                break;
            }
            self.bootregs
                .push(table.to_vec());
        }
        if let Some(first) = self
            .bootregs
            .first()
        {
            if first != self.bootreg_default() {
                warn!(
                    "boot register table in parameter area differs from the first list entry, \
                     image might be corrupted"
                );
            }
        }
        Ok(())
    }

    /// The whole image.
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Head area: everything before the auxiliary code.
    pub fn head_area(&self) -> &[u8] {
        &self.image[..self.auxcode_addr as usize]
    }

    /// The auxiliary code blob.
    pub fn aux_code(&self) -> &[u8] {
        let begin = self.auxcode_addr as usize;
        &self.image[begin..begin + self.auxcode_size as usize]
    }

    /// The default boot register table from the parameter area.
    pub fn bootreg_default(&self) -> &[u8] {
        &self.image[BOOTREG_DEF_ADDR..BOOTREG_DEF_ADDR + self.bootreg_size as usize]
    }

    /// Boot register tables from the list, in order.
    pub fn bootregs(&self) -> &[Vec<u8>] {
        &self.bootregs
    }

    /// Device load address of the auxiliary code.
    pub fn auxcode_addr(&self) -> u32 {
        self.auxcode_addr
    }

    /// Device load address of the boot register list.
    pub fn bootregs_addr(&self) -> u32 {
        self.bootregs_addr
    }

    /// Extract the auxiliary code and boot register tables to a directory.
    ///
    /// Writes `AUXCODE.img` and one `BOOT_<n>.reg` per table; an image with
    /// an empty list yields `BOOT_0.reg` from the parameter-area default.
    /// With `strip`, trailing zero padding is removed from each output.
    pub fn write_to_directory(&self, path: impl AsRef<Path>, strip: bool) -> Result<()> {
        let dir = path.as_ref();
        fs::create_dir_all(dir)?;

        fn finish(data: &[u8], strip: bool) -> &[u8] {
            if strip {
                strip_trailing_zeros(data)
            } else {
                data
            }
        }

        fs::write(dir.join("AUXCODE.img"), finish(self.aux_code(), strip))?;
        if self
            .bootregs
            .is_empty()
        {
            fs::write(dir.join("BOOT_0.reg"), finish(self.bootreg_default(), strip))?;
        } else {
            for (index, table) in self
                .bootregs
                .iter()
                .enumerate()
            {
                fs::write(dir.join(format!("BOOT_{index}.reg")), finish(table, strip))?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for FastbootImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "auxcode address: {:#010X}", self.auxcode_addr)?;
        writeln!(f, "auxcode size: {:#010X}", self.auxcode_size)?;
        writeln!(f, "bootreg size: {:#010X}", self.bootreg_size)?;
        writeln!(f, "default bootreg address: {BOOTREG_DEF_ADDR:#010X}")?;
        writeln!(f, "bootregs address: {:#010X}", self.bootregs_addr)?;
        write!(
            f,
            "bootregs count: {}",
            self.bootregs
                .len()
        )
    }
}

// Caller guarantees the offset is within the minimum image size.
fn read_le_u32(image: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        image[offset],
        image[offset + 1],
        image[offset + 2],
        image[offset + 3],
    ])
}

/// Trim trailing zero padding.
pub fn strip_trailing_zeros(data: &[u8]) -> &[u8] {
    let end = data
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |i| i + 1);
    &data[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_le_u32(image: &mut [u8], offset: usize, value: u32) {
        image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// A minimal but self-consistent image: auxcode at 0x8000, two boot
    /// register tables at 0x6000.
    fn build_image() -> Vec<u8> {
        let mut image = vec![0u8; 0x10000];
        write_le_u32(&mut image, AUXCODE_ADDR_OFFSET, 0x8000);
        write_le_u32(&mut image, AUXCODE_SIZE_OFFSET, 0x1000);
        write_le_u32(&mut image, BOOTREGS_ADDR_OFFSET, 0x6000);
        write_le_u32(&mut image, BOOTREG_SIZE_OFFSET, 0x200);
        // auxcode content
        image[0x8000..0x9000].fill(0xA5);
        image[0x8FF0..0x9000].fill(0); // trailing padding
        // default table mirrors list entry 0
        image[0x480] = 0xC8;
        image[0x481] = 0x11;
        image[0x6000] = 0xC8;
        image[0x6001] = 0x11;
        // second table
        image[0x6200] = 0xC9;
        image
    }

    #[test]
    fn test_parse_and_accessors() {
        let image = FastbootImage::from_bytes(build_image()).expect("valid image");
        assert_eq!(image.auxcode_addr(), 0x8000);
        assert_eq!(image.bootregs_addr(), 0x6000);
        assert_eq!(
            image
                .head_area()
                .len(),
            0x8000
        );
        assert_eq!(
            image
                .aux_code()
                .len(),
            0x1000
        );
        assert_eq!(image.aux_code()[0], 0xA5);
        assert_eq!(
            image
                .bootreg_default()
                .len(),
            0x200
        );
        assert_eq!(image.bootreg_default()[0], 0xC8);
    }

    #[test]
    fn test_bootreg_list_terminates_on_zero() {
        let image = FastbootImage::from_bytes(build_image()).expect("valid image");
        // Third slot starts with zero, so only two tables survive.
        assert_eq!(
            image
                .bootregs()
                .len(),
            2
        );
        assert_eq!(image.bootregs()[0][0], 0xC8);
        assert_eq!(image.bootregs()[1][0], 0xC9);
    }

    #[test]
    fn test_bootreg_list_capped_at_eight() {
        let mut raw = build_image();
        for i in 0..12 {
            raw[0x6000 + i * 0x200] = 0xC8;
        }
        let image = FastbootImage::from_bytes(raw).expect("valid image");
        assert_eq!(
            image
                .bootregs()
                .len(),
            8
        );
    }

    #[test]
    fn test_size_bounds() {
        assert!(matches!(
            FastbootImage::from_bytes(vec![0; MIN_IMAGE_SIZE - 1]),
            Err(Error::InvalidImage(_))
        ));
        assert!(matches!(
            FastbootImage::from_bytes(vec![0; MAX_IMAGE_SIZE + 1]),
            Err(Error::InvalidImage(_))
        ));
    }

    #[test]
    fn test_auxcode_out_of_range_rejected() {
        let mut raw = build_image();
        write_le_u32(&mut raw, AUXCODE_SIZE_OFFSET, 0x2000_0000);
        assert!(matches!(
            FastbootImage::from_bytes(raw),
            Err(Error::InvalidImage(_))
        ));
    }

    #[test]
    fn test_zero_sized_fields_rejected() {
        let mut raw = build_image();
        write_le_u32(&mut raw, AUXCODE_SIZE_OFFSET, 0);
        assert!(FastbootImage::from_bytes(raw).is_err());

        let mut raw = build_image();
        write_le_u32(&mut raw, BOOTREG_SIZE_OFFSET, 0);
        assert!(FastbootImage::from_bytes(raw).is_err());
    }

    #[test]
    fn test_strip_trailing_zeros() {
        assert_eq!(strip_trailing_zeros(&[1, 2, 0, 0]), &[1, 2]);
        assert_eq!(strip_trailing_zeros(&[0, 0]), &[] as &[u8]);
        assert_eq!(strip_trailing_zeros(&[1, 0, 2]), &[1, 0, 2]);
        assert_eq!(strip_trailing_zeros(&[]), &[] as &[u8]);
    }

    #[test]
    fn test_write_to_directory_outputs() {
        let image = FastbootImage::from_bytes(build_image()).expect("valid image");

        let plain = tempfile::tempdir().expect("tempdir");
        image
            .write_to_directory(plain.path(), false)
            .expect("extraction succeeds");
        let aux = fs::read(plain.path().join("AUXCODE.img")).expect("AUXCODE.img written");
        assert_eq!(aux.len(), 0x1000);
        assert_eq!(aux[0], 0xA5);
        assert!(plain
            .path()
            .join("BOOT_1.reg")
            .exists());

        let stripped = tempfile::tempdir().expect("tempdir");
        image
            .write_to_directory(stripped.path(), true)
            .expect("extraction succeeds");
        let table = fs::read(stripped.path().join("BOOT_0.reg")).expect("BOOT_0.reg written");
        assert_eq!(table, vec![0xC8, 0x11]);
    }

    #[test]
    fn test_display_summary() {
        let image = FastbootImage::from_bytes(build_image()).expect("valid image");
        let text = image.to_string();
        assert!(text.contains("auxcode address: 0x00008000"));
        assert!(text.contains("bootregs count: 2"));
    }
}
