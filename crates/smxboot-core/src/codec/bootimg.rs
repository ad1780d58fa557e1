//! Boot image container codecs
//!
//! Two container generations are supported:
//!
//! - **v2**: single-application image with an image vector table (IVT), a
//!   boot-data record, and an optional embedded device-configuration block.
//! - **v3**: multi-core container carrying several sub-images, each tagged
//!   with a processor-core target and load address.

use crate::codec::{align_up, codec_err};
use crate::error::Result;

/// IVT / container header tag
const IVT_TAG: u8 = 0xD1;
/// IVT size in bytes
const IVT_SIZE: usize = 32;
/// Boot data record size in bytes
const BOOT_DATA_SIZE: usize = 12;
/// Default v2 header version
pub const V2_VERSION: u8 = 0x41;
/// Default v3 header version
pub const V3_VERSION: u8 = 0x43;
/// Alignment of the application payload within a v2 image
const APP_ALIGN: usize = 0x400;
/// Alignment of sub-image payloads within a v3 container
const V3_PAYLOAD_ALIGN: usize = 0x200;
/// Size of one v3 image table entry
const V3_ENTRY_SIZE: usize = 24;
/// Size of the v3 container prologue (header + staddr + dcd offset + count)
const V3_HEADER_SIZE: usize = 20;

fn read_u32(data: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap())
}

fn read_u64(data: &[u8], pos: usize) -> u64 {
    u64::from_le_bytes(data[pos..pos + 8].try_into().unwrap())
}

/// A composed or parsed v2 boot image
#[derive(Debug, Clone)]
pub struct BootImageV2 {
    /// RAM address the image is loaded to (start of the full image)
    pub address: u64,
    /// Offset of the IVT within the loaded image
    pub offset: u64,
    /// Header version byte
    pub version: u8,
    /// Plugin image flag
    pub plugin: bool,
    /// Embedded device-configuration block, exported binary form
    pub dcd: Option<Vec<u8>>,
    /// Application entry address
    pub entry: u64,
    /// Application payload
    pub app: Vec<u8>,
}

impl BootImageV2 {
    /// Compose a new image from its parts. `staddr` is the image load
    /// address, `entry` the application entry point.
    pub fn compose(
        staddr: u64,
        offset: u64,
        version: u8,
        plugin: bool,
        dcd: Option<Vec<u8>>,
        app: Vec<u8>,
        entry: u64,
    ) -> Self {
        BootImageV2 {
            address: staddr,
            offset,
            version,
            plugin,
            dcd,
            entry,
            app,
        }
    }

    /// The address the boot ROM jumps into: IVT position in RAM.
    pub fn load_address(&self) -> u64 {
        self.address + self.offset
    }

    /// Parse an existing image (IVT at offset 0 of `data`). The application
    /// payload is everything past the fixed records.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < IVT_SIZE + BOOT_DATA_SIZE {
            return Err(codec_err("bootimg-v2", "image too short for IVT"));
        }
        if data[0] != IVT_TAG {
            return Err(codec_err("bootimg-v2", "missing IVT tag"));
        }
        let header_len = u16::from_be_bytes([data[1], data[2]]) as usize;
        if header_len != IVT_SIZE {
            return Err(codec_err("bootimg-v2", "unexpected IVT length"));
        }
        let version = data[3];

        let entry = read_u32(data, 4) as u64;
        let dcd_ptr = read_u32(data, 12) as u64;
        let boot_data_ptr = read_u32(data, 16) as u64;
        let self_ptr = read_u32(data, 20) as u64;

        if boot_data_ptr < self_ptr || self_ptr > u32::MAX as u64 {
            return Err(codec_err("bootimg-v2", "inconsistent IVT pointers"));
        }
        let bd_off = (boot_data_ptr - self_ptr) as usize;
        if bd_off + BOOT_DATA_SIZE > data.len() {
            return Err(codec_err("bootimg-v2", "boot data record out of bounds"));
        }
        let start = read_u32(data, bd_off) as u64;
        let plugin = read_u32(data, bd_off + 8) != 0;
        if self_ptr < start {
            return Err(codec_err("bootimg-v2", "IVT self pointer below image start"));
        }
        let offset = self_ptr - start;

        let dcd = if dcd_ptr != 0 {
            if dcd_ptr < self_ptr {
                return Err(codec_err("bootimg-v2", "DCD pointer below IVT"));
            }
            let dcd_off = (dcd_ptr - self_ptr) as usize;
            if dcd_off + 4 > data.len() {
                return Err(codec_err("bootimg-v2", "DCD out of bounds"));
            }
            let dcd_len = u16::from_be_bytes([data[dcd_off + 1], data[dcd_off + 2]]) as usize;
            if dcd_off + dcd_len > data.len() {
                return Err(codec_err("bootimg-v2", "DCD out of bounds"));
            }
            Some(data[dcd_off..dcd_off + dcd_len].to_vec())
        } else {
            None
        };

        let app_off = align_up(
            IVT_SIZE + BOOT_DATA_SIZE + dcd.as_ref().map_or(0, Vec::len),
            APP_ALIGN,
        )
        .min(data.len());

        Ok(BootImageV2 {
            address: start,
            offset,
            version,
            plugin,
            dcd,
            entry,
            app: data[app_off..].to_vec(),
        })
    }

    /// Encode the image; the IVT sits at offset 0 of the returned buffer.
    pub fn export(&self) -> Vec<u8> {
        let dcd_len = self.dcd.as_ref().map_or(0, Vec::len);
        let app_off = align_up(IVT_SIZE + BOOT_DATA_SIZE + dcd_len, APP_ALIGN);
        let total = app_off + self.app.len();

        let self_ptr = (self.address + self.offset) as u32;
        let dcd_ptr = if dcd_len > 0 {
            self_ptr + (IVT_SIZE + BOOT_DATA_SIZE) as u32
        } else {
            0
        };

        let mut out = vec![0u8; total];
        // IVT header
        out[0] = IVT_TAG;
        out[1..3].copy_from_slice(&(IVT_SIZE as u16).to_be_bytes());
        out[3] = self.version;
        out[4..8].copy_from_slice(&(self.entry as u32).to_le_bytes());
        out[12..16].copy_from_slice(&dcd_ptr.to_le_bytes());
        out[16..20].copy_from_slice(&(self_ptr + IVT_SIZE as u32).to_le_bytes());
        out[20..24].copy_from_slice(&self_ptr.to_le_bytes());
        // Boot data record
        out[IVT_SIZE..IVT_SIZE + 4].copy_from_slice(&(self.address as u32).to_le_bytes());
        out[IVT_SIZE + 4..IVT_SIZE + 8]
            .copy_from_slice(&((self.offset as usize + total) as u32).to_le_bytes());
        out[IVT_SIZE + 8..IVT_SIZE + 12]
            .copy_from_slice(&(if self.plugin { 1u32 } else { 0 }).to_le_bytes());
        // DCD
        if let Some(dcd) = &self.dcd {
            out[IVT_SIZE + BOOT_DATA_SIZE..IVT_SIZE + BOOT_DATA_SIZE + dcd.len()]
                .copy_from_slice(dcd);
        }
        out[app_off..].copy_from_slice(&self.app);
        out
    }
}

/// Processor-core targets for v3 sub-images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreType {
    /// SCU configuration data
    Scd,
    /// System controller firmware
    Scfw,
    /// Cortex-M4 core 0
    M4First,
    /// Cortex-M4 core 1
    M4Second,
    /// Application core, Cortex-A35
    A35,
    /// Application core, Cortex-A53
    A53,
    /// Application core, Cortex-A72
    A72,
}

impl CoreType {
    /// Tag used in documents (IMAGES list, TYPE key)
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "SCD" => Some(CoreType::Scd),
            "SCFW" => Some(CoreType::Scfw),
            "CM4-0" => Some(CoreType::M4First),
            "CM4-1" => Some(CoreType::M4Second),
            "APP-A35" => Some(CoreType::A35),
            "APP-A53" => Some(CoreType::A53),
            "APP-A72" => Some(CoreType::A72),
            _ => None,
        }
    }

    fn id(self) -> u32 {
        match self {
            CoreType::Scd => 1,
            CoreType::Scfw => 2,
            CoreType::M4First => 3,
            CoreType::M4Second => 4,
            CoreType::A35 => 5,
            CoreType::A53 => 6,
            CoreType::A72 => 7,
        }
    }

    fn from_id(id: u32) -> Result<Self> {
        Ok(match id {
            1 => CoreType::Scd,
            2 => CoreType::Scfw,
            3 => CoreType::M4First,
            4 => CoreType::M4Second,
            5 => CoreType::A35,
            6 => CoreType::A53,
            7 => CoreType::A72,
            other => return Err(codec_err("bootimg-v3", format!("unknown core id {}", other))),
        })
    }
}

/// One sub-image of a v3 container
#[derive(Debug, Clone)]
pub struct SubImage {
    /// Which core consumes this payload
    pub core: CoreType,
    /// Load address for the payload
    pub address: u64,
    /// Payload bytes
    pub data: Vec<u8>,
}

/// A composed v3 multi-core boot container
#[derive(Debug, Clone)]
pub struct BootImageV3 {
    /// Container load address
    pub address: u64,
    /// Offset of the container header within the loaded image
    pub offset: u64,
    /// Header version byte
    pub version: u8,
    /// Optional device-configuration block, exported binary form
    pub dcd: Option<Vec<u8>>,
    /// Sub-images in declaration order
    pub images: Vec<SubImage>,
}

impl BootImageV3 {
    /// The address the boot ROM reads the container header from.
    pub fn load_address(&self) -> u64 {
        self.address + self.offset
    }

    /// Encode the container: prologue, image table, DCD, aligned payloads.
    pub fn export(&self) -> Vec<u8> {
        let dcd_len = self.dcd.as_ref().map_or(0, Vec::len);
        let table_end = V3_HEADER_SIZE + V3_ENTRY_SIZE * self.images.len();
        let dcd_off = if dcd_len > 0 { table_end } else { 0 };

        // Lay out payloads after header, table and DCD
        let mut payload_off = align_up(table_end + dcd_len, V3_PAYLOAD_ALIGN);
        let mut offsets = Vec::with_capacity(self.images.len());
        for img in &self.images {
            offsets.push(payload_off);
            payload_off = align_up(payload_off + img.data.len(), V3_PAYLOAD_ALIGN);
        }
        let last_len = self.images.last().map_or(0, |i| i.data.len());
        let total = offsets.last().map_or(payload_off, |off| off + last_len);

        let mut out = vec![0u8; total];
        out[0] = IVT_TAG;
        out[1..3].copy_from_slice(&(table_end as u16).to_be_bytes());
        out[3] = self.version;
        out[4..12].copy_from_slice(&self.address.to_le_bytes());
        out[12..16].copy_from_slice(&(dcd_off as u32).to_le_bytes());
        out[16..20].copy_from_slice(&(self.images.len() as u32).to_le_bytes());

        for (i, (img, off)) in self.images.iter().zip(&offsets).enumerate() {
            let entry = V3_HEADER_SIZE + i * V3_ENTRY_SIZE;
            out[entry..entry + 4].copy_from_slice(&img.core.id().to_le_bytes());
            out[entry + 4..entry + 12].copy_from_slice(&img.address.to_le_bytes());
            out[entry + 12..entry + 16].copy_from_slice(&(*off as u32).to_le_bytes());
            out[entry + 16..entry + 20].copy_from_slice(&(img.data.len() as u32).to_le_bytes());
            out[*off..*off + img.data.len()].copy_from_slice(&img.data);
        }
        if let Some(dcd) = &self.dcd {
            out[dcd_off..dcd_off + dcd.len()].copy_from_slice(dcd);
        }
        out
    }

    /// Decode a container produced by [`export`](Self::export).
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < V3_HEADER_SIZE || data[0] != IVT_TAG {
            return Err(codec_err("bootimg-v3", "missing container header"));
        }
        let version = data[3];
        let address = read_u64(data, 4);
        let dcd_off = read_u32(data, 12) as usize;
        let count = read_u32(data, 16) as usize;
        let table_end = V3_HEADER_SIZE + V3_ENTRY_SIZE * count;
        if table_end > data.len() {
            return Err(codec_err("bootimg-v3", "image table out of bounds"));
        }

        let mut images = Vec::with_capacity(count);
        for i in 0..count {
            let entry = V3_HEADER_SIZE + i * V3_ENTRY_SIZE;
            let core = CoreType::from_id(read_u32(data, entry))?;
            let load = read_u64(data, entry + 4);
            let off = read_u32(data, entry + 12) as usize;
            let size = read_u32(data, entry + 16) as usize;
            if off + size > data.len() {
                return Err(codec_err("bootimg-v3", "sub-image out of bounds"));
            }
            images.push(SubImage {
                core,
                address: load,
                data: data[off..off + size].to_vec(),
            });
        }

        let dcd = if dcd_off != 0 {
            if dcd_off + 4 > data.len() {
                return Err(codec_err("bootimg-v3", "DCD out of bounds"));
            }
            let dcd_len = u16::from_be_bytes([data[dcd_off + 1], data[dcd_off + 2]]) as usize;
            if dcd_off + dcd_len > data.len() {
                return Err(codec_err("bootimg-v3", "DCD out of bounds"));
            }
            Some(data[dcd_off..dcd_off + dcd_len].to_vec())
        } else {
            None
        };

        Ok(BootImageV3 {
            address,
            offset: 0,
            version,
            dcd,
            images,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::dcd::Dcd;

    fn sample_dcd() -> Vec<u8> {
        Dcd::parse_txt("WriteValue 4 0x30340004 0x4F400005").unwrap().export().unwrap()
    }

    #[test]
    fn test_v2_round_trip() {
        let app = vec![0xAAu8; 300];
        let img = BootImageV2::compose(
            0x8000_0000,
            0x400,
            V2_VERSION,
            false,
            Some(sample_dcd()),
            app.clone(),
            0x8000_1000,
        );
        assert_eq!(img.load_address(), 0x8000_0400);

        let blob = img.export();
        let parsed = BootImageV2::parse(&blob).unwrap();
        assert_eq!(parsed.address, 0x8000_0000);
        assert_eq!(parsed.offset, 0x400);
        assert_eq!(parsed.load_address(), 0x8000_0400);
        assert_eq!(parsed.entry, 0x8000_1000);
        assert_eq!(parsed.dcd, Some(sample_dcd()));
        assert_eq!(parsed.app, app);
    }

    #[test]
    fn test_v2_rejects_short_input() {
        assert!(BootImageV2::parse(&[0u8; 16]).is_err());
        assert!(BootImageV2::parse(&[0u8; 64]).is_err());
    }

    #[test]
    fn test_v3_round_trip() {
        let img = BootImageV3 {
            address: 0x9000_0000,
            offset: 0x400,
            version: V3_VERSION,
            dcd: Some(sample_dcd()),
            images: vec![
                SubImage {
                    core: CoreType::Scfw,
                    address: 0x3000_0000,
                    data: vec![1, 2, 3, 4],
                },
                SubImage {
                    core: CoreType::A53,
                    address: 0x8000_0000,
                    data: vec![5; 700],
                },
            ],
        };
        let blob = img.export();
        let parsed = BootImageV3::parse(&blob).unwrap();
        assert_eq!(parsed.address, 0x9000_0000);
        assert_eq!(parsed.images.len(), 2);
        assert_eq!(parsed.images[0].core, CoreType::Scfw);
        assert_eq!(parsed.images[1].data, vec![5; 700]);
        assert_eq!(parsed.dcd, Some(sample_dcd()));
    }

    #[test]
    fn test_core_tags() {
        assert_eq!(CoreType::from_tag("APP-A53"), Some(CoreType::A53));
        assert_eq!(CoreType::from_tag("bogus"), None);
    }
}
