//! Device configuration data (DCD) block codec
//!
//! A DCD block is a list of register directives executed by the boot ROM
//! before the main image runs. Blocks exist in two source forms: a structured
//! text form (one directive per line) and the binary form embedded in boot
//! images. Both decode to the same command list and re-encode to the binary
//! form.

use crate::codec::codec_err;
use crate::error::Result;
use crate::util::parse_int;

/// DCD block header tag
const DCD_TAG: u8 = 0xD2;
/// Write data command tag
const CMD_WRITE: u8 = 0xCC;
/// Check data command tag
const CMD_CHECK: u8 = 0xCF;
/// No-operation command tag
const CMD_NOP: u8 = 0xC0;
/// Unlock command tag
const CMD_UNLOCK: u8 = 0xB2;
/// Default DCD version
const DCD_VERSION: u8 = 0x41;

/// Write directive variants (parameter flag bits 3..4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    /// `*addr = value`
    Value,
    /// `*addr &= !value`
    ClearBits,
    /// `*addr |= value`
    SetBits,
}

impl WriteOp {
    fn flags(self) -> u8 {
        match self {
            WriteOp::Value => 0,
            WriteOp::ClearBits => 1 << 3,
            WriteOp::SetBits => (1 << 3) | (1 << 4),
        }
    }

    fn from_flags(flags: u8) -> Result<Self> {
        match flags {
            0 => Ok(WriteOp::Value),
            0x08 => Ok(WriteOp::ClearBits),
            0x18 => Ok(WriteOp::SetBits),
            f => Err(codec_err("dcd", format!("invalid write flags 0x{:02X}", f))),
        }
    }
}

/// Check directive variants (parameter flag bits 3..4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOp {
    /// Poll until `*addr & mask == 0`
    AllClear,
    /// Poll until `*addr & mask == mask`
    AllSet,
    /// Poll until `*addr & mask != mask`
    AnyClear,
    /// Poll until `*addr & mask != 0`
    AnySet,
}

impl CheckOp {
    fn flags(self) -> u8 {
        match self {
            CheckOp::AllClear => 0,
            CheckOp::AllSet => 1 << 4,
            CheckOp::AnyClear => 1 << 3,
            CheckOp::AnySet => (1 << 3) | (1 << 4),
        }
    }

    fn from_flags(flags: u8) -> Result<Self> {
        match flags {
            0 => Ok(CheckOp::AllClear),
            0x10 => Ok(CheckOp::AllSet),
            0x08 => Ok(CheckOp::AnyClear),
            0x18 => Ok(CheckOp::AnySet),
            f => Err(codec_err("dcd", format!("invalid check flags 0x{:02X}", f))),
        }
    }
}

/// One decoded DCD directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DcdCommand {
    /// Register write
    Write {
        op: WriteOp,
        bytes: u8,
        address: u32,
        value: u32,
    },
    /// Register poll
    Check {
        op: CheckOp,
        bytes: u8,
        address: u32,
        mask: u32,
        count: Option<u32>,
    },
    /// Padding / no-op
    Nop,
    /// Unlock an engine's features
    Unlock { engine: u8, values: Vec<u32> },
}

/// A decoded device configuration block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dcd {
    /// Directive list in execution order
    pub commands: Vec<DcdCommand>,
}

fn check_access_width(bytes: u64, line: usize) -> Result<u8> {
    match bytes {
        1 | 2 | 4 => Ok(bytes as u8),
        _ => Err(codec_err(
            "dcd",
            format!("line {}: access width must be 1, 2 or 4 bytes", line),
        )),
    }
}

impl Dcd {
    /// Parse the structured text form: one directive per line, `#` comments.
    pub fn parse_txt(text: &str) -> Result<Self> {
        let mut commands = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let tokens: Vec<&str> = trimmed.split_whitespace().collect();
            let name = tokens[0];

            let arg = |i: usize| -> Result<u64> {
                let tok = tokens.get(i).ok_or_else(|| {
                    codec_err("dcd", format!("line {}: {} is missing arguments", line, name))
                })?;
                parse_int(tok).map_err(|e| codec_err("dcd", format!("line {}: {}", line, e)))
            };

            let write_op = |op: WriteOp| -> Result<DcdCommand> {
                Ok(DcdCommand::Write {
                    op,
                    bytes: check_access_width(arg(1)?, line)?,
                    address: arg(2)? as u32,
                    value: arg(3)? as u32,
                })
            };
            let check_op = |op: CheckOp| -> Result<DcdCommand> {
                let count = if tokens.len() > 4 { Some(arg(4)? as u32) } else { None };
                Ok(DcdCommand::Check {
                    op,
                    bytes: check_access_width(arg(1)?, line)?,
                    address: arg(2)? as u32,
                    mask: arg(3)? as u32,
                    count,
                })
            };

            let cmd = match name {
                "WriteValue" => write_op(WriteOp::Value)?,
                "ClearBitMask" => write_op(WriteOp::ClearBits)?,
                "SetBitMask" => write_op(WriteOp::SetBits)?,
                "CheckAllClear" => check_op(CheckOp::AllClear)?,
                "CheckAllSet" => check_op(CheckOp::AllSet)?,
                "CheckAnyClear" => check_op(CheckOp::AnyClear)?,
                "CheckAnySet" => check_op(CheckOp::AnySet)?,
                "Nop" => DcdCommand::Nop,
                other => {
                    return Err(codec_err(
                        "dcd",
                        format!("line {}: unknown directive \"{}\"", line, other),
                    ))
                }
            };
            commands.push(cmd);
        }

        Ok(Dcd { commands })
    }

    /// Parse the binary form.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 4 || data[0] != DCD_TAG {
            return Err(codec_err("dcd", "missing DCD header tag"));
        }
        let total = u16::from_be_bytes([data[1], data[2]]) as usize;
        if total < 4 || total > data.len() {
            return Err(codec_err("dcd", "DCD header length out of bounds"));
        }

        let mut commands = Vec::new();
        let mut pos = 4;
        while pos < total {
            if total - pos < 4 {
                return Err(codec_err("dcd", "truncated command header"));
            }
            let tag = data[pos];
            let len = u16::from_be_bytes([data[pos + 1], data[pos + 2]]) as usize;
            let param = data[pos + 3];
            if len < 4 || pos + len > total {
                return Err(codec_err("dcd", "command length out of bounds"));
            }
            let body = &data[pos + 4..pos + len];
            let word = |i: usize| u32::from_be_bytes(body[i * 4..i * 4 + 4].try_into().unwrap());

            match tag {
                CMD_WRITE => {
                    let op = WriteOp::from_flags(param & 0x18)?;
                    let bytes = param & 0x07;
                    if body.len() % 8 != 0 {
                        return Err(codec_err("dcd", "write command body misaligned"));
                    }
                    for i in 0..body.len() / 8 {
                        commands.push(DcdCommand::Write {
                            op,
                            bytes,
                            address: word(i * 2),
                            value: word(i * 2 + 1),
                        });
                    }
                }
                CMD_CHECK => {
                    let op = CheckOp::from_flags(param & 0x18)?;
                    let bytes = param & 0x07;
                    let count = match body.len() {
                        8 => None,
                        12 => Some(word(2)),
                        _ => return Err(codec_err("dcd", "check command body misaligned")),
                    };
                    commands.push(DcdCommand::Check {
                        op,
                        bytes,
                        address: word(0),
                        mask: word(1),
                        count,
                    });
                }
                CMD_NOP => commands.push(DcdCommand::Nop),
                CMD_UNLOCK => {
                    if body.len() % 4 != 0 {
                        return Err(codec_err("dcd", "unlock command body misaligned"));
                    }
                    commands.push(DcdCommand::Unlock {
                        engine: param,
                        values: (0..body.len() / 4).map(word).collect(),
                    });
                }
                other => {
                    return Err(codec_err("dcd", format!("unknown command tag 0x{:02X}", other)))
                }
            }
            pos += len;
        }

        Ok(Dcd { commands })
    }

    /// Encode to the binary form. The header length field is 16 bits, so a
    /// block larger than 64 KiB cannot be represented.
    pub fn export(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();

        for cmd in &self.commands {
            match cmd {
                DcdCommand::Write { op, bytes, address, value } => {
                    body.push(CMD_WRITE);
                    body.extend_from_slice(&12u16.to_be_bytes());
                    body.push(bytes | op.flags());
                    body.extend_from_slice(&address.to_be_bytes());
                    body.extend_from_slice(&value.to_be_bytes());
                }
                DcdCommand::Check { op, bytes, address, mask, count } => {
                    let len = if count.is_some() { 16u16 } else { 12u16 };
                    body.push(CMD_CHECK);
                    body.extend_from_slice(&len.to_be_bytes());
                    body.push(bytes | op.flags());
                    body.extend_from_slice(&address.to_be_bytes());
                    body.extend_from_slice(&mask.to_be_bytes());
                    if let Some(count) = count {
                        body.extend_from_slice(&count.to_be_bytes());
                    }
                }
                DcdCommand::Nop => {
                    body.push(CMD_NOP);
                    body.extend_from_slice(&4u16.to_be_bytes());
                    body.push(0);
                }
                DcdCommand::Unlock { engine, values } => {
                    body.push(CMD_UNLOCK);
                    body.extend_from_slice(&(4 + 4 * values.len() as u16).to_be_bytes());
                    body.push(*engine);
                    for v in values {
                        body.extend_from_slice(&v.to_be_bytes());
                    }
                }
            }
        }

        let total = 4 + body.len();
        if total > u16::MAX as usize {
            return Err(codec_err(
                "dcd",
                format!("block of {} bytes exceeds the 16-bit length field", total),
            ));
        }

        let mut out = Vec::with_capacity(total);
        out.push(DCD_TAG);
        out.extend_from_slice(&(total as u16).to_be_bytes());
        out.push(DCD_VERSION);
        out.extend_from_slice(&body);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TXT: &str = "\
# DDR setup
WriteValue 4 0x30340004 0x4F400005
SetBitMask 4 0x307900C4 0x00000001
CheckAllSet 4 0x307900C4 0x1
Nop
";

    #[test]
    fn test_parse_txt() {
        let dcd = Dcd::parse_txt(SAMPLE_TXT).unwrap();
        assert_eq!(dcd.commands.len(), 4);
        assert_eq!(
            dcd.commands[0],
            DcdCommand::Write {
                op: WriteOp::Value,
                bytes: 4,
                address: 0x3034_0004,
                value: 0x4F40_0005,
            }
        );
        assert!(matches!(dcd.commands[2], DcdCommand::Check { op: CheckOp::AllSet, .. }));
    }

    #[test]
    fn test_txt_errors() {
        assert!(Dcd::parse_txt("Frobnicate 4 0x0 0x0").is_err());
        assert!(Dcd::parse_txt("WriteValue 3 0x0 0x0").is_err());
        assert!(Dcd::parse_txt("WriteValue 4 0x0").is_err());
    }

    #[test]
    fn test_binary_round_trip() {
        let dcd = Dcd::parse_txt(SAMPLE_TXT).unwrap();
        let bin = dcd.export().unwrap();
        assert_eq!(bin[0], DCD_TAG);
        assert_eq!(u16::from_be_bytes([bin[1], bin[2]]) as usize, bin.len());
        assert_eq!(Dcd::parse(&bin).unwrap(), dcd);
    }

    #[test]
    fn test_export_rejects_oversized_block() {
        // each write directive encodes to 12 bytes, so 6000 of them
        // overflow the 16-bit header length
        let dcd = Dcd {
            commands: std::iter::repeat(DcdCommand::Write {
                op: WriteOp::Value,
                bytes: 4,
                address: 0x3034_0004,
                value: 0x4F40_0005,
            })
            .take(6000)
            .collect(),
        };
        let err = dcd.export().unwrap_err();
        assert!(err.to_string().contains("16-bit length field"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Dcd::parse(&[0x00, 0x00, 0x04, 0x41]).is_err());
        assert!(Dcd::parse(&[0xD2, 0xFF, 0xFF, 0x41]).is_err());
    }
}
