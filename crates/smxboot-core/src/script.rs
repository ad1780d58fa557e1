//! Programming scripts
//!
//! A script is a small line-oriented command list from a document's BODY
//! section. It goes through three states: parsed at construction, resolved
//! once against the segment database (`load`), weighted once for progress
//! reporting (`set_progress_range`). Resolution fills in addresses, payloads
//! and human-readable descriptions; nothing runs here, execution belongs to
//! the transport layer.

use crate::error::{Error, Result};
use crate::segment::{SegmentDb, SegmentKind, SegmentRef};
use crate::util::{fmt_size, parse_int};

/// Programming directive tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Skip the configuration block embedded in the boot image
    SkipDcd,
    /// Jump to an address and start execution
    JumpRun,
    /// Write a single register value
    WriteRegister,
    /// Write a device-configuration block
    WriteDcd,
    /// Write an image payload
    WriteImage,
}

/// One script command; payload fields are populated by resolution.
#[derive(Debug, Clone)]
pub struct Command {
    /// Directive tag, for the executor to branch on
    pub kind: CommandKind,
    /// Human-readable summary
    pub description: String,
    /// Target address (literal or from the referenced segment)
    pub address: Option<u64>,
    /// Payload bytes (write-dcd / write-image)
    pub data: Option<Vec<u8>>,
    /// Register width in bytes (write-register)
    pub bytes: Option<u8>,
    /// Register value (write-register)
    pub value: Option<u64>,
    /// Share of the progress budget assigned to this command
    pub progress_weight: u64,
    segment: Option<SegmentRef>,
}

impl Command {
    fn new(kind: CommandKind) -> Self {
        Command {
            kind,
            description: String::new(),
            address: None,
            data: None,
            bytes: None,
            value: None,
            progress_weight: 0,
            segment: None,
        }
    }
}

/// A named programming script.
#[derive(Debug, Clone)]
pub struct Script {
    name: String,
    description: String,
    cmds: Vec<Command>,
    loaded: bool,
}

impl Script {
    /// Parse script text into a command list. Blank lines and `#` comments
    /// are skipped; arguments are whitespace-separated.
    pub fn parse(name: &str, description: &str, text: &str) -> Result<Self> {
        let mut cmds = Vec::new();

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let tag = tokens[0].to_lowercase();
            let err = |reason: String| Error::Command {
                script: name.to_string(),
                command: format!("{} (line {})", tag, lineno + 1),
                reason,
            };

            let cmd = match tag.as_str() {
                "sdcd" => {
                    let mut cmd = Command::new(CommandKind::SkipDcd);
                    cmd.description = "Skip DCD block inside the boot image".to_string();
                    cmd
                }
                "jrun" => {
                    let mut cmd = Command::new(CommandKind::JumpRun);
                    let arg = tokens
                        .get(1)
                        .ok_or_else(|| err("one argument required".to_string()))?;
                    match parse_int(arg) {
                        Ok(addr) => {
                            cmd.address = Some(addr);
                            cmd.description = format!("Start from address: 0x{:08X}", addr);
                        }
                        // not an integer literal, so a segment reference
                        Err(_) => cmd.segment = Some(SegmentRef::parse(arg).map_err(|e| err(e.to_string()))?),
                    }
                    cmd
                }
                "wreg" => {
                    if tokens.len() < 4 {
                        return Err(err("three arguments required".to_string()));
                    }
                    let mut cmd = Command::new(CommandKind::WriteRegister);
                    let bytes: u8 = tokens[1]
                        .parse()
                        .map_err(|_| err(format!("invalid byte width \"{}\"", tokens[1])))?;
                    cmd.bytes = Some(bytes);
                    cmd.address = Some(parse_int(tokens[2]).map_err(err)?);
                    cmd.value = Some(parse_int(tokens[3]).map_err(err)?);
                    cmd.description = format!(
                        "Write {}bit value: 0x{:X} at address: 0x{:08X}",
                        bytes as u32 * 8,
                        cmd.value.unwrap_or_default(),
                        cmd.address.unwrap_or_default()
                    );
                    cmd
                }
                "wdcd" | "wimg" => {
                    let kind = if tag == "wdcd" {
                        CommandKind::WriteDcd
                    } else {
                        CommandKind::WriteImage
                    };
                    let mut cmd = Command::new(kind);
                    let arg = tokens
                        .get(1)
                        .ok_or_else(|| err("segment reference required".to_string()))?;
                    let segref = SegmentRef::parse(arg).map_err(|e| err(e.to_string()))?;

                    if let Some(addr) = tokens.get(2) {
                        cmd.address = Some(parse_int(addr).map_err(err)?);
                    } else if kind == CommandKind::WriteDcd && segref.kind != SegmentKind::Dcd {
                        return Err(err(format!(
                            "an explicit address is required when writing the DCD of \"{}\"",
                            segref.full_name()
                        )));
                    }
                    cmd.segment = Some(segref);
                    cmd
                }
                other => return Err(err(format!("unknown command \"{}\"", other))),
            };
            cmds.push(cmd);
        }

        Ok(Script {
            name: name.to_string(),
            description: description.to_string(),
            cmds,
            loaded: false,
        })
    }

    /// Script name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Script description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Resolved commands.
    pub fn cmds(&self) -> &[Command] {
        &self.cmds
    }

    /// Whether resolution already ran.
    pub fn loaded(&self) -> bool {
        self.loaded
    }

    /// Resolve segment references against a loaded database. Runs once;
    /// addresses, payloads and descriptions are filled in place.
    pub fn load(&mut self, db: &SegmentDb) -> Result<()> {
        if self.loaded {
            return Err(Error::State(format!(
                "script \"{}\" is already resolved",
                self.name
            )));
        }

        for cmd in &mut self.cmds {
            let segref = match (&cmd.kind, &cmd.segment) {
                (CommandKind::SkipDcd | CommandKind::WriteRegister, _) => continue,
                (CommandKind::JumpRun, None) => continue,
                (_, Some(r)) => r,
                (_, None) => continue,
            };

            let segment = db.get_loaded(&segref.name, segref.kind)?;
            if cmd.address.is_none() {
                cmd.address = segment.address();
            }

            let source = segment
                .path()
                .map(str::to_string)
                .unwrap_or_else(|| segment.name().to_string());

            match cmd.kind {
                CommandKind::JumpRun => {
                    cmd.description = format!(
                        "Boot from address: 0x{:08X}",
                        cmd.address.unwrap_or_default()
                    );
                }
                CommandKind::WriteDcd => {
                    // composed boot images carry their extracted DCD aside
                    let data = if segref.kind.is_composed() {
                        segment
                            .dcd()
                            .ok_or_else(|| Error::Command {
                                script: self.name.clone(),
                                command: "wdcd".to_string(),
                                reason: format!(
                                    "segment \"{}\" carries no DCD block",
                                    segref.full_name()
                                ),
                            })?
                            .to_vec()
                    } else {
                        segment.data().unwrap_or_default().to_vec()
                    };
                    cmd.description =
                        format!("Write DCD from: {} ({})", source, fmt_size(data.len()));
                    cmd.data = Some(data);
                }
                CommandKind::WriteImage => {
                    let data = segment.data().unwrap_or_default().to_vec();
                    cmd.description =
                        format!("Write image: {} ({})", source, fmt_size(data.len()));
                    cmd.data = Some(data);
                }
                _ => {}
            }
        }

        self.loaded = true;
        Ok(())
    }

    /// Split a progress budget across the commands: every control command
    /// gets a fixed step of `budget / 100`, the rest is shared among payload
    /// commands in proportion to their byte size. A payload-free script
    /// splits the budget evenly instead.
    pub fn set_progress_range(&mut self, budget: u64) -> Result<()> {
        if !self.loaded {
            return Err(Error::State(format!(
                "script \"{}\" must be resolved before weighting",
                self.name
            )));
        }
        if self.cmds.is_empty() {
            return Ok(());
        }

        let data_cnt = self.cmds.iter().filter(|c| c.data.is_some()).count() as u64;
        let data_size: u64 = self
            .cmds
            .iter()
            .filter_map(|c| c.data.as_ref())
            .map(|d| d.len() as u64)
            .sum();

        if data_cnt == 0 || data_size == 0 {
            let each = budget / self.cmds.len() as u64;
            for cmd in &mut self.cmds {
                cmd.progress_weight = each;
            }
            return Ok(());
        }

        let n = self.cmds.len() as u64;
        let steps = budget / 100;
        let point = (budget - (n - data_cnt) * steps) as f64 / data_size as f64;

        for cmd in &mut self.cmds {
            cmd.progress_weight = match &cmd.data {
                Some(data) => (data.len() as f64 * point) as u64,
                None => steps,
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Segment;
    use std::path::Path;

    fn loaded_db(dir: &Path) -> SegmentDb {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("app.bin"), vec![0x42u8; 256]).unwrap();

        let mut db = SegmentDb::default();
        db.push(
            Segment::from_value(
                "APP",
                SegmentKind::Raw,
                &serde_yaml::from_str("ADDR: 0x80000000\nFILE: app.bin").unwrap(),
            )
            .unwrap(),
        )
        .unwrap();
        for idx in 0..db.len() {
            let out = db.segment(idx).resolve_payload(&db, dir).unwrap();
            db.segment_mut(idx).apply(out);
        }
        db
    }

    #[test]
    fn test_parse_commands() {
        let s = Script::parse(
            "init",
            "",
            "# comment\n\nwreg 4 0x30340004 0x4F400005\nsdcd\njrun 0x80000000",
        )
        .unwrap();
        assert_eq!(s.cmds().len(), 3);
        assert_eq!(s.cmds()[0].kind, CommandKind::WriteRegister);
        assert_eq!(s.cmds()[0].bytes, Some(4));
        assert_eq!(s.cmds()[2].address, Some(0x8000_0000));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Script::parse("s", "", "frobnicate").is_err());
        assert!(Script::parse("s", "", "wreg 4 0x10").is_err());
        assert!(Script::parse("s", "", "jrun").is_err());
        // wdcd against a non-dcd segment needs an explicit address
        assert!(Script::parse("s", "", "wdcd UBOOT.imx2").is_err());
        assert!(Script::parse("s", "", "wdcd UBOOT.imx2 0x910000").is_ok());
        assert!(Script::parse("s", "", "wdcd DDR.dcd").is_ok());
    }

    #[test]
    fn test_resolution() {
        let dir = std::env::temp_dir().join("smxboot-script-test");
        let db = loaded_db(&dir);

        let mut s = Script::parse(
            "flash",
            "",
            "wimg APP.raw 0x80000000\nsdcd\njrun 0x80000000",
        )
        .unwrap();
        s.load(&db).unwrap();

        let cmds = s.cmds();
        assert_eq!(cmds[0].address, Some(0x8000_0000));
        assert_eq!(cmds[0].data.as_deref().map(<[u8]>::len), Some(256));
        assert_eq!(cmds[0].description, "Write image: app.bin (256 B)");
        assert_eq!(cmds[1].address, None);
        assert!(cmds[1].data.is_none());
        assert_eq!(cmds[2].address, Some(0x8000_0000));
        assert!(cmds[2].data.is_none());

        // one-shot resolution
        assert!(s.load(&db).is_err());
    }

    #[test]
    fn test_resolution_address_default() {
        let dir = std::env::temp_dir().join("smxboot-script-addr-test");
        let db = loaded_db(&dir);

        let mut s = Script::parse("flash", "", "wimg APP.raw\njrun APP.raw").unwrap();
        s.load(&db).unwrap();
        assert_eq!(s.cmds()[0].address, Some(0x8000_0000));
        assert_eq!(s.cmds()[1].address, Some(0x8000_0000));
        assert_eq!(s.cmds()[1].description, "Boot from address: 0x80000000");
    }

    #[test]
    fn test_wdcd_rejects_image_without_dcd() {
        let dir = std::env::temp_dir().join("smxboot-script-wdcd-test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("boot.imx"), vec![0x11u8; 64]).unwrap();

        let mut db = SegmentDb::default();
        db.push(
            Segment::from_value(
                "UBOOT",
                SegmentKind::BootV2Compact,
                &serde_yaml::from_str("FILE: boot.imx").unwrap(),
            )
            .unwrap(),
        )
        .unwrap();
        for idx in 0..db.len() {
            let out = db.segment(idx).resolve_payload(&db, &dir).unwrap();
            db.segment_mut(idx).apply(out);
        }

        let mut s = Script::parse("flash", "", "wdcd UBOOT.imx2b 0x910000").unwrap();
        let err = s.load(&db).unwrap_err();
        assert!(err.to_string().contains("no DCD block"));
    }

    #[test]
    fn test_resolution_missing_segment() {
        let mut s = Script::parse("flash", "", "wimg NOPE.raw").unwrap();
        assert!(s.load(&SegmentDb::default()).is_err());
    }

    #[test]
    fn test_progress_weights() {
        let dir = std::env::temp_dir().join("smxboot-script-pg-test");
        let db = loaded_db(&dir);

        let mut s = Script::parse(
            "flash",
            "",
            "wimg APP.raw 0x80000000\nsdcd\njrun 0x80000000",
        )
        .unwrap();
        s.load(&db).unwrap();
        s.set_progress_range(1000).unwrap();

        let weights: Vec<u64> = s.cmds().iter().map(|c| c.progress_weight).collect();
        // two control steps of 10, payload takes the rest
        assert_eq!(weights[1], 10);
        assert_eq!(weights[2], 10);
        assert_eq!(weights[0], 980);

        // truncation never loses more than one unit per command
        let total: u64 = weights.iter().sum();
        assert!(total <= 1000 && total >= 1000 - 3);
    }

    #[test]
    fn test_progress_equal_split_without_payload() {
        let mut s = Script::parse("init", "", "sdcd\njrun 0x80000000").unwrap();
        s.load(&SegmentDb::default()).unwrap();
        s.set_progress_range(1000).unwrap();
        assert_eq!(s.cmds()[0].progress_weight, 500);
        assert_eq!(s.cmds()[1].progress_weight, 500);
    }

    #[test]
    fn test_weighting_requires_load() {
        let mut s = Script::parse("init", "", "sdcd").unwrap();
        assert!(s.set_progress_range(1000).is_err());
    }
}
