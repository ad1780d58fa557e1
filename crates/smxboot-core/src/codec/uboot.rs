//! Legacy bootloader image wrapper and environment image codecs
//!
//! The legacy image wrapper is the classic 64-byte big-endian header (magic,
//! CRCs, load/entry addresses, type bytes, name) followed by the payload.
//! Environment images are `key=value` entry blocks embedded inside a larger
//! bootloader image, located by a well-known key prefix.

use crate::codec::codec_err;
use crate::error::Result;

/// Legacy image header magic
const IMG_MAGIC: u32 = 0x2705_1956;
/// Legacy image header size
const HEADER_SIZE: usize = 64;
/// Length of the name field
const NAME_LEN: usize = 32;

/// Image payload layout variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    /// Standalone program
    Standalone,
    /// OS kernel
    Kernel,
    /// Ramdisk
    RamDisk,
    /// Several concatenated images with a size table
    Multi,
    /// Raw firmware blob
    Firmware,
    /// Shell script wrapped with a length prologue
    Script,
}

impl ImageType {
    fn id(self) -> u8 {
        match self {
            ImageType::Standalone => 1,
            ImageType::Kernel => 2,
            ImageType::RamDisk => 3,
            ImageType::Multi => 4,
            ImageType::Firmware => 5,
            ImageType::Script => 6,
        }
    }

    fn from_id(id: u8) -> Result<Self> {
        Ok(match id {
            1 => ImageType::Standalone,
            2 => ImageType::Kernel,
            3 => ImageType::RamDisk,
            4 => ImageType::Multi,
            5 => ImageType::Firmware,
            6 => ImageType::Script,
            other => return Err(codec_err("uboot-img", format!("unknown image type {}", other))),
        })
    }

    /// Tag accepted in document HEAD.type fields
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "standalone" => Some(ImageType::Standalone),
            "kernel" => Some(ImageType::Kernel),
            "ramdisk" => Some(ImageType::RamDisk),
            "multi" => Some(ImageType::Multi),
            "firmware" => Some(ImageType::Firmware),
            "script" => Some(ImageType::Script),
            _ => None,
        }
    }
}

/// Target architecture byte (subset that matters here)
pub fn arch_id(tag: &str) -> Option<u8> {
    Some(match tag {
        "alpha" => 1,
        "arm" => 2,
        "x86" => 3,
        "ia64" => 4,
        "mips" => 5,
        "ppc" => 7,
        "riscv" => 22,
        "arm64" => 16,
        _ => return None,
    })
}

/// Operating system byte (subset)
pub fn os_id(tag: &str) -> Option<u8> {
    Some(match tag {
        "openbsd" => 1,
        "netbsd" => 2,
        "freebsd" => 3,
        "bsd4" => 4,
        "linux" => 5,
        "uboot" => 17,
        _ => return None,
    })
}

/// Compression byte (subset)
pub fn comp_id(tag: &str) -> Option<u8> {
    Some(match tag {
        "none" => 0,
        "gzip" => 1,
        "bzip2" => 2,
        "lzma" => 3,
        "lzo" => 4,
        "lz4" => 5,
        _ => return None,
    })
}

/// A legacy bootloader image: typed header plus payload parts.
#[derive(Debug, Clone)]
pub struct LegacyImage {
    /// Image name (truncated to 32 bytes on export)
    pub name: String,
    /// Load address
    pub load_addr: u32,
    /// Entry point address
    pub entry_addr: u32,
    /// Payload layout
    pub image_type: ImageType,
    /// Architecture byte
    pub arch: u8,
    /// OS byte
    pub os: u8,
    /// Compression byte
    pub compression: u8,
    /// Payload parts: one for firmware/standalone/script, several for multi
    parts: Vec<Vec<u8>>,
}

impl LegacyImage {
    /// Create an empty image with the given header fields.
    pub fn new(
        name: String,
        load_addr: u32,
        entry_addr: u32,
        image_type: ImageType,
        arch: u8,
        os: u8,
        compression: u8,
    ) -> Self {
        LegacyImage {
            name,
            load_addr,
            entry_addr,
            image_type,
            arch,
            os,
            compression,
            parts: Vec::new(),
        }
    }

    /// Set the single payload (firmware, standalone, script text, ...).
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.parts = vec![data];
    }

    /// Append a sub-image payload (multi images).
    pub fn append(&mut self, data: Vec<u8>) {
        self.parts.push(data);
    }

    fn payload(&self) -> Vec<u8> {
        match self.image_type {
            ImageType::Multi => {
                let mut out = Vec::new();
                for part in &self.parts {
                    out.extend_from_slice(&(part.len() as u32).to_be_bytes());
                }
                out.extend_from_slice(&0u32.to_be_bytes());
                for part in &self.parts {
                    out.extend_from_slice(part);
                    // parts are 4-byte aligned within the payload
                    out.resize(out.len().div_ceil(4) * 4, 0);
                }
                out
            }
            ImageType::Script => {
                let text = self.parts.first().map_or(&[][..], Vec::as_slice);
                let mut out = Vec::with_capacity(8 + text.len());
                out.extend_from_slice(&(text.len() as u32).to_be_bytes());
                out.extend_from_slice(&0u32.to_be_bytes());
                out.extend_from_slice(text);
                out
            }
            _ => self.parts.first().cloned().unwrap_or_default(),
        }
    }

    /// Encode header + payload, computing both CRCs.
    pub fn export(&self) -> Vec<u8> {
        let payload = self.payload();
        let dcrc = crc32fast::hash(&payload);

        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&IMG_MAGIC.to_be_bytes());
        // header[4..8] is the header CRC, filled below
        // header[8..12] is the build timestamp, left zero for reproducibility
        header[12..16].copy_from_slice(&(payload.len() as u32).to_be_bytes());
        header[16..20].copy_from_slice(&self.load_addr.to_be_bytes());
        header[20..24].copy_from_slice(&self.entry_addr.to_be_bytes());
        header[24..28].copy_from_slice(&dcrc.to_be_bytes());
        header[28] = self.os;
        header[29] = self.arch;
        header[30] = self.image_type.id();
        header[31] = self.compression;
        let name = self.name.as_bytes();
        let n = name.len().min(NAME_LEN - 1);
        header[32..32 + n].copy_from_slice(&name[..n]);

        let hcrc = crc32fast::hash(&header);
        header[4..8].copy_from_slice(&hcrc.to_be_bytes());

        let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&payload);
        out
    }

    /// Decode and CRC-check an image.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(codec_err("uboot-img", "image shorter than header"));
        }
        let word = |i: usize| u32::from_be_bytes(data[i..i + 4].try_into().unwrap());
        if word(0) != IMG_MAGIC {
            return Err(codec_err("uboot-img", "bad magic"));
        }

        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&data[..HEADER_SIZE]);
        let hcrc = word(4);
        header[4..8].fill(0);
        if crc32fast::hash(&header) != hcrc {
            return Err(codec_err("uboot-img", "header CRC mismatch"));
        }

        let size = word(12) as usize;
        if HEADER_SIZE + size > data.len() {
            return Err(codec_err("uboot-img", "payload out of bounds"));
        }
        let payload = &data[HEADER_SIZE..HEADER_SIZE + size];
        if crc32fast::hash(payload) != word(24) {
            return Err(codec_err("uboot-img", "data CRC mismatch"));
        }

        let name_field = &data[32..32 + NAME_LEN];
        let name_end = name_field.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        let name = String::from_utf8_lossy(&name_field[..name_end]).into_owned();

        let mut img = LegacyImage::new(
            name,
            word(16),
            word(20),
            ImageType::from_id(data[30])?,
            data[29],
            data[28],
            data[31],
        );
        img.set_data(payload.to_vec());
        Ok(img)
    }
}

// ============================================================================
// Environment image
// ============================================================================

/// An environment block located inside a larger bootloader image.
///
/// The block is found by searching for a well-known key prefix (the MARK,
/// typically `"bootcmd="`) at an entry boundary; it extends to the double-NUL
/// terminator. Entries are NUL-separated `key=value` strings.
#[derive(Debug, Clone)]
pub struct EnvImage {
    image: Vec<u8>,
    region_start: usize,
    region_len: usize,
    entries: Vec<(String, String)>,
}

impl EnvImage {
    /// Locate and parse the environment block inside `image`.
    pub fn parse(image: Vec<u8>, mark: &str) -> Result<Self> {
        if mark.is_empty() {
            return Err(codec_err("uboot-env", "empty environment mark"));
        }
        let needle = mark.as_bytes();
        // Plain substring search; the bytes before the block (typically the
        // environment CRC word) are arbitrary.
        let start = image
            .windows(needle.len())
            .position(|w| w == needle)
            .ok_or_else(|| {
                codec_err("uboot-env", format!("mark \"{}\" not found in image", mark))
            })?;

        let end = image[start..]
            .windows(2)
            .position(|w| w == [0, 0])
            .map(|off| start + off)
            .ok_or_else(|| codec_err("uboot-env", "environment terminator not found"))?;

        // The writable region includes the NUL padding after the terminator,
        // so the environment may grow up to the region size.
        let mut region_end = end;
        while region_end < image.len() && image[region_end] == 0 {
            region_end += 1;
        }

        let mut entries = Vec::new();
        for chunk in image[start..end].split(|&b| b == 0) {
            if chunk.is_empty() {
                continue;
            }
            let text = String::from_utf8_lossy(chunk);
            match text.split_once('=') {
                Some((k, v)) => entries.push((k.to_string(), v.to_string())),
                None => entries.push((text.into_owned(), String::new())),
            }
        }

        Ok(EnvImage {
            region_len: region_end - start,
            region_start: start,
            image,
            entries,
        })
    }

    /// Drop every entry (replace mode).
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Apply `key=value` lines over the current entries: existing keys are
    /// replaced, new keys appended in order.
    pub fn apply(&mut self, eval: &str) -> Result<()> {
        for raw in eval.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                codec_err("uboot-env", format!("\"{}\" is not a key=value assignment", line))
            })?;
            match self.entries.iter_mut().find(|(k, _)| k == key) {
                Some(entry) => entry.1 = value.to_string(),
                None => self.entries.push((key.to_string(), value.to_string())),
            }
        }
        Ok(())
    }

    /// Current entries, in image order.
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// Re-encode the surrounding image with the updated environment written
    /// back in place, NUL-padded to the original region size.
    pub fn export(&self) -> Result<Vec<u8>> {
        let mut block = Vec::with_capacity(self.region_len);
        for (k, v) in &self.entries {
            block.extend_from_slice(k.as_bytes());
            block.push(b'=');
            block.extend_from_slice(v.as_bytes());
            block.push(0);
        }
        // One extra NUL closes the block (double-NUL terminator)
        if block.len() + 1 > self.region_len {
            return Err(codec_err(
                "uboot-env",
                format!(
                    "environment grew to {} bytes, region holds {}",
                    block.len() + 1,
                    self.region_len
                ),
            ));
        }
        block.resize(self.region_len, 0);

        let mut out = self.image.clone();
        out[self.region_start..self.region_start + self.region_len].copy_from_slice(&block);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_firmware_round_trip() {
        let mut img = LegacyImage::new(
            "u-boot".to_string(),
            0x8780_0000,
            0x8780_0000,
            ImageType::Firmware,
            arch_id("arm").unwrap(),
            os_id("linux").unwrap(),
            comp_id("none").unwrap(),
        );
        img.set_data(vec![0x5A; 128]);

        let blob = img.export();
        let parsed = LegacyImage::parse(&blob).unwrap();
        assert_eq!(parsed.name, "u-boot");
        assert_eq!(parsed.load_addr, 0x8780_0000);
        assert_eq!(parsed.image_type, ImageType::Firmware);
        assert_eq!(parsed.parts[0], vec![0x5A; 128]);
    }

    #[test]
    fn test_legacy_crc_detects_corruption() {
        let mut img = LegacyImage::new(
            "x".to_string(),
            0,
            0,
            ImageType::Firmware,
            2,
            5,
            0,
        );
        img.set_data(vec![1, 2, 3]);
        let mut blob = img.export();
        blob[HEADER_SIZE] ^= 0xFF;
        assert!(LegacyImage::parse(&blob).is_err());
    }

    #[test]
    fn test_script_payload_prologue() {
        let mut img = LegacyImage::new(
            "boot script".to_string(),
            0,
            0,
            ImageType::Script,
            2,
            5,
            0,
        );
        img.set_data(b"setenv x 1\n".to_vec());
        let blob = img.export();
        let len = u32::from_be_bytes(blob[HEADER_SIZE..HEADER_SIZE + 4].try_into().unwrap());
        assert_eq!(len as usize, b"setenv x 1\n".len());
    }

    fn env_fixture() -> Vec<u8> {
        let mut image = vec![0xFFu8; 32];
        image.extend_from_slice(b"bootcmd=run netboot\0bootdelay=3\0\0");
        image.extend_from_slice(&[0u8; 31]);
        image.extend_from_slice(&[0xEE; 16]);
        image
    }

    #[test]
    fn test_env_parse_and_merge() {
        let mut env = EnvImage::parse(env_fixture(), "bootcmd=").unwrap();
        assert_eq!(env.entries().len(), 2);

        env.apply("bootdelay=0\nserverip=10.0.0.1").unwrap();
        let out = env.export().unwrap();
        let reparsed = EnvImage::parse(out, "bootcmd=").unwrap();
        assert_eq!(
            reparsed.entries(),
            &[
                ("bootcmd".to_string(), "run netboot".to_string()),
                ("bootdelay".to_string(), "0".to_string()),
                ("serverip".to_string(), "10.0.0.1".to_string()),
            ]
        );
    }

    #[test]
    fn test_env_replace_mode() {
        let mut env = EnvImage::parse(env_fixture(), "bootcmd=").unwrap();
        env.clear();
        env.apply("bootcmd=boot").unwrap();
        let out = env.export().unwrap();
        // image outside the region is untouched
        assert_eq!(&out[..32], &[0xFFu8; 32][..]);
        let reparsed = EnvImage::parse(out, "bootcmd=").unwrap();
        assert_eq!(reparsed.entries(), &[("bootcmd".to_string(), "boot".to_string())]);
    }

    #[test]
    fn test_env_overflow() {
        let mut env = EnvImage::parse(env_fixture(), "bootcmd=").unwrap();
        let huge = format!("pad={}", "x".repeat(256));
        env.apply(&huge).unwrap();
        assert!(env.export().is_err());
    }

    #[test]
    fn test_env_mark_after_arbitrary_bytes() {
        // the CRC word before the block is arbitrary, never a NUL terminator
        let mut image = vec![0xA5u8; 36];
        image.extend_from_slice(b"bootcmd=boot\0\0");
        image.extend_from_slice(&[0u8; 14]);
        let env = EnvImage::parse(image, "bootcmd=").unwrap();
        assert_eq!(env.entries(), &[("bootcmd".to_string(), "boot".to_string())]);
    }

    #[test]
    fn test_env_mark_missing() {
        assert!(EnvImage::parse(vec![0u8; 64], "bootcmd=").is_err());
    }
}
