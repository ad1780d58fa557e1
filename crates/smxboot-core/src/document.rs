//! Document model
//!
//! A document is a YAML file with three required sections: HEAD (platform and
//! identity), DATA (the segment definitions) and BODY (the programming
//! scripts). An optional VARS section holds template variables substituted
//! into the raw text before structural parsing.
//!
//! Loading is a two-phase pass over the segment database: simple segments
//! first, then composed boot images that reference them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_yaml::Value;

use crate::error::{Error, Result};
use crate::script::Script;
use crate::segment::{Segment, SegmentDb, SegmentKind};
use crate::{paths, template, value};

/// A parsed document: header fields, segment database and script skeletons.
#[derive(Debug)]
pub struct Document {
    name: String,
    description: String,
    platform: String,
    base_path: PathBuf,
    db: SegmentDb,
    scripts: Vec<Script>,
    loaded: bool,
}

impl Document {
    /// Read and parse a document file. FILE references inside the document
    /// resolve against the file's directory.
    pub fn open<P: AsRef<Path>>(path: P, platforms: &[&str]) -> Result<Self> {
        let path = path.as_ref();
        let text = paths::read_text(Path::new("."), &path.to_string_lossy())?;
        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        Self::parse(&text, base, platforms)
    }

    /// Parse document text. `base` is the directory FILE references resolve
    /// against; `platforms` is the set of accepted CHIP values.
    pub fn parse(text: &str, base: PathBuf, platforms: &[&str]) -> Result<Self> {
        let mut root: Value = serde_yaml::from_str(text)
            .map_err(|e| Error::Parse(format!("invalid document: {}", e)))?;

        // A VARS section triggers one substitution pass over the raw text
        if let Some(vars) = root.get("VARS") {
            let vars = read_vars(vars)?;
            let rendered = template::render(text, &vars)?;
            root = serde_yaml::from_str(&rendered)
                .map_err(|e| Error::Parse(format!("invalid document after expansion: {}", e)))?;
        }

        let section = |key: &str| -> Result<&Value> {
            root.get(key)
                .ok_or_else(|| Error::Parse(format!("required section {} is missing", key)))
        };

        // HEAD
        let head = value::as_map("HEAD", "HEAD", section("HEAD")?)?;
        let head_str = |key: &str| -> Result<Option<String>> {
            match head.get(key) {
                Some(v) => Ok(Some(value::as_str("HEAD", key, v)?)),
                None => Ok(None),
            }
        };
        let platform = head_str("CHIP")?.ok_or_else(|| Error::MissingKey {
            segment: "HEAD".to_string(),
            field: "CHIP".to_string(),
        })?;
        if !platforms.iter().any(|p| *p == platform) {
            return Err(Error::Parse(format!(
                "platform \"{}\" is not supported",
                platform
            )));
        }
        let name = head_str("NAME")?.unwrap_or_default();
        let description = head_str("DESC")?.unwrap_or_default();

        // DATA
        let data = value::as_map("DATA", "DATA", section("DATA")?)?;
        let mut db = SegmentDb::default();
        for (key, body) in data {
            let full = value::key_str("DATA", key)?;
            let (seg_name, kind_tag) = match full.split_once('.') {
                Some((n, k)) if !n.is_empty() && !k.contains('.') => (n, k),
                _ => {
                    return Err(Error::Parse(format!(
                        "\"{}\" is not a <name>.<kind> segment key",
                        full
                    )))
                }
            };
            let kind = SegmentKind::from_tag(kind_tag).ok_or_else(|| {
                Error::Parse(format!(
                    "\"{}\": unknown segment kind \"{}\"",
                    full, kind_tag
                ))
            })?;
            db.push(Segment::from_value(seg_name, kind, body)?)?;
        }

        // BODY
        let body = value::as_seq("BODY", "BODY", section("BODY")?)?;
        let mut scripts = Vec::with_capacity(body.len());
        for item in body {
            let map = value::as_map("BODY", "entry", item)?;
            let get = |key: &str| -> Result<Option<String>> {
                match map.get(key) {
                    Some(v) => Ok(Some(value::as_str("BODY", key, v)?)),
                    None => Ok(None),
                }
            };
            let missing = |what: &str| Error::MissingKey {
                segment: "BODY".to_string(),
                field: what.to_string(),
            };
            let script_name = get("NAME")?.ok_or_else(|| missing("NAME"))?;
            let script_desc = get("DESC")?.unwrap_or_default();
            let cmds = get("CMDS")?.ok_or_else(|| missing("CMDS"))?;
            scripts.push(Script::parse(&script_name, &script_desc, &cmds)?);
        }

        Ok(Document {
            name,
            description,
            platform,
            base_path: base,
            db,
            scripts,
            loaded: false,
        })
    }

    /// Document name from HEAD.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Document description from HEAD.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Target platform from HEAD.
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// The segment database.
    pub fn segments(&self) -> &SegmentDb {
        &self.db
    }

    /// Parsed script skeletons (unresolved).
    pub fn scripts(&self) -> &[Script] {
        &self.scripts
    }

    /// Whether `load` ran.
    pub fn loaded(&self) -> bool {
        self.loaded
    }

    /// Resolve every segment payload. Simple segments load first, composed
    /// boot images second, each group in declaration order; the first failure
    /// aborts the pass and leaves already-loaded segments intact.
    pub fn load(&mut self) -> Result<()> {
        for composed in [false, true] {
            for idx in 0..self.db.len() {
                let segment = self.db.segment(idx);
                if segment.kind().is_composed() != composed {
                    continue;
                }
                log::debug!("loading segment {}", segment.full_name());
                let out = segment.resolve_payload(&self.db, &self.base_path)?;
                self.db.segment_mut(idx).apply(out);
            }
        }
        self.loaded = true;
        Ok(())
    }

    /// Compile a script by name: clone the parsed skeleton, resolve it
    /// against the loaded database, and allocate progress weights.
    pub fn script(&self, name: &str, progress_budget: u64) -> Result<Script> {
        let skeleton = self
            .scripts
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| Error::Parse(format!("script \"{}\" does not exist", name)))?;
        self.compile(skeleton.clone(), progress_budget)
    }

    /// Compile a script by BODY position.
    pub fn script_at(&self, index: usize, progress_budget: u64) -> Result<Script> {
        let skeleton = self
            .scripts
            .get(index)
            .ok_or_else(|| Error::Parse(format!("script index {} is out of range", index)))?;
        self.compile(skeleton.clone(), progress_budget)
    }

    fn compile(&self, mut script: Script, progress_budget: u64) -> Result<Script> {
        if !self.loaded {
            return Err(Error::State(
                "document must be loaded before compiling scripts".to_string(),
            ));
        }
        script.load(&self.db)?;
        script.set_progress_range(progress_budget)?;
        Ok(script)
    }
}

fn read_vars(vars: &Value) -> Result<BTreeMap<String, String>> {
    let map = value::as_map("VARS", "VARS", vars)?;
    let mut out = BTreeMap::new();
    for (key, val) in map {
        let name = value::key_str("VARS", key)?.to_string();
        let text = match val {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => {
                return Err(Error::InvalidValue {
                    segment: "VARS".to_string(),
                    field: name,
                    reason: "variable values must be scalars".to_string(),
                })
            }
        };
        out.insert(name, text);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::CommandKind;

    const PLATFORMS: &[&str] = &["MX7SD", "MX8QXP"];

    fn fixture_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("smxboot-doc-{}", tag));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    const DOC: &str = "\
HEAD:
  CHIP: MX7SD
  NAME: test board
  DESC: flashing document

DATA:
  DDR.dcd:
    DATA: |
      WriteValue 4 0x30340004 0x4F400005

  APP.raw:
    ADDR: 0x80000000
    FILE: app.bin

  BOOT.imx2:
    DATA:
      STADDR: 0x80000000
      DCDSEG: DDR.dcd
      APPSEG: APP.raw

BODY:
  - NAME: flash
    DESC: write everything
    CMDS: |
      wimg BOOT.imx2
      sdcd
      jrun BOOT.imx2
";

    #[test]
    fn test_parse_and_load() {
        let dir = fixture_dir("load");
        std::fs::write(dir.join("app.bin"), vec![0xAB; 512]).unwrap();

        let mut doc = Document::parse(DOC, dir, PLATFORMS).unwrap();
        assert_eq!(doc.platform(), "MX7SD");
        assert_eq!(doc.name(), "test board");
        assert_eq!(doc.segments().len(), 3);
        assert_eq!(doc.scripts().len(), 1);
        assert!(!doc.loaded());

        doc.load().unwrap();
        let boot = doc.segments().get("BOOT", SegmentKind::BootV2).unwrap();
        assert!(boot.loaded());
        assert_eq!(boot.address(), Some(0x8000_0400));
        assert!(boot.dcd().is_some());
    }

    #[test]
    fn test_script_compilation() {
        let dir = fixture_dir("script");
        std::fs::write(dir.join("app.bin"), vec![0xAB; 512]).unwrap();

        let mut doc = Document::parse(DOC, dir, PLATFORMS).unwrap();
        // compiling before load is refused
        assert!(doc.script("flash", 1000).is_err());

        doc.load().unwrap();
        let script = doc.script("flash", 1000).unwrap();
        assert_eq!(script.cmds().len(), 3);
        assert_eq!(script.cmds()[0].kind, CommandKind::WriteImage);
        assert_eq!(script.cmds()[0].address, Some(0x8000_0400));
        assert!(script.cmds()[0].data.is_some());
        assert!(script.cmds()[0].progress_weight > 0);

        // skeletons stay pristine, re-compilation works
        let again = doc.script_at(0, 1000).unwrap();
        assert_eq!(again.cmds().len(), 3);
        assert!(doc.script("missing", 1000).is_err());
    }

    #[test]
    fn test_missing_sections() {
        let err = Document::parse("HEAD:\n  CHIP: MX7SD", PathBuf::from("."), PLATFORMS)
            .unwrap_err();
        assert!(err.to_string().contains("DATA"));

        let err = Document::parse(
            "HEAD:\n  DESC: no chip\nDATA: {}\nBODY: []",
            PathBuf::from("."),
            PLATFORMS,
        )
        .unwrap_err();
        assert!(err.to_string().contains("CHIP"));

        let err = Document::parse(
            "HEAD:\n  CHIP: I500\nDATA: {}\nBODY: []",
            PathBuf::from("."),
            PLATFORMS,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn test_bad_segment_key() {
        let err = Document::parse(
            "HEAD:\n  CHIP: MX7SD\nDATA:\n  NODOT: {}\nBODY: []",
            PathBuf::from("."),
            PLATFORMS,
        )
        .unwrap_err();
        assert!(err.to_string().contains("NODOT"));

        let err = Document::parse(
            "HEAD:\n  CHIP: MX7SD\nDATA:\n  APP.bogus: {}\nBODY: []",
            PathBuf::from("."),
            PLATFORMS,
        )
        .unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_vars_expansion() {
        let dir = fixture_dir("vars");
        std::fs::write(dir.join("app.bin"), vec![1u8; 16]).unwrap();

        let text = "\
VARS:
  APP_ADDR: '0x80000000'

HEAD:
  CHIP: MX8QXP

DATA:
  APP.raw:
    ADDR: '{{ APP_ADDR }}'
    FILE: app.bin

BODY:
  - NAME: run
    CMDS: jrun {{ APP_ADDR }}
";
        let mut doc = Document::parse(text, dir, PLATFORMS).unwrap();
        doc.load().unwrap();
        let app = doc.segments().get("APP", SegmentKind::Raw).unwrap();
        assert_eq!(app.address(), Some(0x8000_0000));
        let script = doc.script("run", 100).unwrap();
        assert_eq!(script.cmds()[0].address, Some(0x8000_0000));
    }

    #[test]
    fn test_load_propagates_missing_file() {
        let dir = fixture_dir("missing-file");
        // app.bin is deliberately absent
        let _ = std::fs::remove_file(dir.join("app.bin"));
        let mut doc = Document::parse(DOC, dir, PLATFORMS).unwrap();
        assert!(doc.load().is_err());
        assert!(!doc.loaded());
    }
}
