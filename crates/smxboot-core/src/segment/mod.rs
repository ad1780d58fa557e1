//! Data segments: typed units of binary content with load addresses
//!
//! A document's DATA section declares named segments of a closed kind set.
//! Each kind has its own schema (validated at parse time from the raw YAML
//! mapping) and load behavior (executed later against the document base path
//! and the shared segment database).

mod bootimg;
mod dcd;
mod fdt;
mod raw;
mod uboot;

use std::collections::HashMap;
use std::path::Path;

use serde_yaml::Value;

use crate::error::{Error, Result};

pub(crate) use bootimg::{BootV2Params, BootV3Params};
pub(crate) use dcd::DcdParams;
pub(crate) use fdt::FdtParams;
pub(crate) use uboot::{EnvPatch, ExecParams, FitParams};

/// The closed set of segment kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// Raw binary payload from a file
    Raw,
    /// Device configuration data block
    Dcd,
    /// Flat device tree blob
    Fdt,
    /// Boot image, v2 container
    BootV2,
    /// Boot image, v2 container, compact variant (file form only)
    BootV2Compact,
    /// Boot image, v3 multi-core container
    BootV3,
    /// Bootloader main image with embedded environment
    UbootEnv,
    /// Bootloader executable image (legacy wrapper)
    UbootExec,
    /// Bootloader FIT-style image
    UbootFit,
}

impl SegmentKind {
    /// All kinds, in no particular order.
    pub const ALL: [SegmentKind; 9] = [
        SegmentKind::Raw,
        SegmentKind::Dcd,
        SegmentKind::Fdt,
        SegmentKind::BootV2,
        SegmentKind::BootV2Compact,
        SegmentKind::BootV3,
        SegmentKind::UbootEnv,
        SegmentKind::UbootExec,
        SegmentKind::UbootFit,
    ];

    /// The kind tag used in composite keys and references.
    pub fn tag(self) -> &'static str {
        match self {
            SegmentKind::Raw => "raw",
            SegmentKind::Dcd => "dcd",
            SegmentKind::Fdt => "fdt",
            SegmentKind::BootV2 => "imx2",
            SegmentKind::BootV2Compact => "imx2b",
            SegmentKind::BootV3 => "imx3",
            SegmentKind::UbootEnv => "ubi",
            SegmentKind::UbootExec => "ubx",
            SegmentKind::UbootFit => "ubt",
        }
    }

    /// Match a kind tag, case-insensitively.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let lower = tag.to_lowercase();
        SegmentKind::ALL.into_iter().find(|k| k.tag() == lower)
    }

    /// Composed kinds are built from other, already-loaded segments and must
    /// load after everything else.
    pub fn is_composed(self) -> bool {
        matches!(
            self,
            SegmentKind::BootV2 | SegmentKind::BootV2Compact | SegmentKind::BootV3
        )
    }
}

/// A `name.kind[/kind2]` segment reference as written in scripts and
/// composed-segment fields. The optional second kind after `/` only groups
/// related segments for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRef {
    /// Referenced segment name
    pub name: String,
    /// Referenced segment kind
    pub kind: SegmentKind,
    /// Companion kind tag, display only
    pub companion: Option<String>,
}

impl SegmentRef {
    /// Parse a reference; the text must contain exactly one `.`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut parts = text.split('.');
        let (name, suffix) = match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(suffix), None) if !name.is_empty() => (name, suffix),
            _ => {
                return Err(Error::Parse(format!(
                    "\"{}\" is not a <name>.<kind> segment reference",
                    text
                )))
            }
        };
        let (kind_tag, companion) = match suffix.split_once('/') {
            Some((first, second)) => (first, Some(second.to_string())),
            None => (suffix, None),
        };
        let kind = SegmentKind::from_tag(kind_tag).ok_or_else(|| {
            Error::Parse(format!("\"{}\": unknown segment kind \"{}\"", text, kind_tag))
        })?;
        Ok(SegmentRef {
            name: name.to_string(),
            kind,
            companion,
        })
    }

    /// Canonical `NAME.kind` form.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.name, self.kind.tag())
    }
}

/// Kind-specific validated options (built at parse time).
#[derive(Debug, Clone)]
pub(crate) enum SegmentParams {
    Raw,
    Dcd(DcdParams),
    Fdt(FdtParams),
    BootV2(BootV2Params),
    BootV2Compact(EnvPatch),
    BootV3(BootV3Params),
    UbootEnv(EnvPatch),
    UbootExec(ExecParams),
    UbootFit(FitParams),
}

/// Payload produced by a segment loader, applied back onto the segment.
#[derive(Debug)]
pub(crate) struct LoadOutput {
    /// Resolved binary payload
    pub data: Vec<u8>,
    /// Resolved load address; `None` keeps the declared ADDR
    pub address: Option<u64>,
    /// Extracted device-configuration block (boot images)
    pub dcd: Option<Vec<u8>>,
}

impl LoadOutput {
    pub(crate) fn data(data: Vec<u8>) -> Self {
        LoadOutput {
            data,
            address: None,
            dcd: None,
        }
    }
}

/// A named, typed unit of binary content.
#[derive(Debug, Clone)]
pub struct Segment {
    name: String,
    kind: SegmentKind,
    description: String,
    address: Option<u64>,
    path: Option<String>,
    data: Option<Vec<u8>>,
    dcd: Option<Vec<u8>>,
    params: SegmentParams,
}

impl Segment {
    /// Validate a raw key/value mapping into a typed segment. Rejects
    /// unknown keys, mistyped values, and missing required keys as a whole;
    /// no partially-valid segment is ever returned.
    pub fn from_value(name: &str, kind: SegmentKind, value: &Value) -> Result<Self> {
        let full = format!("{}.{}", name, kind.tag());
        let map = value.as_mapping().ok_or_else(|| {
            Error::Parse(format!("segment \"{}\" body must be a mapping", full))
        })?;

        let (common, params) = match kind {
            SegmentKind::Raw => raw::build(&full, map)?,
            SegmentKind::Dcd => dcd::build(&full, map)?,
            SegmentKind::Fdt => fdt::build(&full, map)?,
            SegmentKind::BootV2 => bootimg::build_v2(&full, map)?,
            SegmentKind::BootV2Compact => bootimg::build_v2_compact(&full, map)?,
            SegmentKind::BootV3 => bootimg::build_v3(&full, map)?,
            SegmentKind::UbootEnv => uboot::build_env(&full, map)?,
            SegmentKind::UbootExec => uboot::build_exec(&full, map)?,
            SegmentKind::UbootFit => uboot::build_fit(&full, map)?,
        };

        Ok(Segment {
            name: name.to_string(),
            kind,
            description: common.description,
            address: common.address,
            path: common.path,
            data: None,
            dcd: None,
            params,
        })
    }

    /// Segment name (without the kind tag).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Segment kind.
    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    /// Unique `NAME.kind` key.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.name, self.kind.tag())
    }

    /// Optional description from the document.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Load address, resolved after `load` for boot images.
    pub fn address(&self) -> Option<u64> {
        self.address
    }

    /// Source file reference, when the segment reads one.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Binary payload, `None` until loaded.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Extracted device-configuration block (boot image kinds only).
    pub fn dcd(&self) -> Option<&[u8]> {
        self.dcd.as_deref()
    }

    /// Whether the payload has been resolved.
    pub fn loaded(&self) -> bool {
        self.data.is_some()
    }

    /// Compute this segment's payload against a read-only database view.
    pub(crate) fn resolve_payload(&self, db: &SegmentDb, base: &Path) -> Result<LoadOutput> {
        let full = self.full_name();
        match &self.params {
            SegmentParams::Raw => raw::load(self, base),
            SegmentParams::Dcd(p) => dcd::load(self, p, base),
            SegmentParams::Fdt(p) => fdt::load(self, p, base),
            SegmentParams::BootV2(p) => bootimg::load_v2(self, p, db, base),
            SegmentParams::BootV2Compact(p) => bootimg::load_v2_compact(self, p, base),
            SegmentParams::BootV3(p) => bootimg::load_v3(self, p, db, base),
            SegmentParams::UbootEnv(p) => uboot::load_env(self, p, base),
            SegmentParams::UbootExec(p) => uboot::load_exec(self, p, base),
            SegmentParams::UbootFit(p) => uboot::load_fit(self, p, base),
        }
        .map_err(|e| {
            log::debug!("loading {} failed: {}", full, e);
            e
        })
    }

    pub(crate) fn apply(&mut self, output: LoadOutput) {
        self.data = Some(output.data);
        if output.address.is_some() {
            self.address = output.address;
        }
        self.dcd = output.dcd;
    }
}

/// Common fields shared by every segment kind.
#[derive(Debug, Default)]
pub(crate) struct CommonFields {
    pub description: String,
    pub address: Option<u64>,
    pub path: Option<String>,
}

/// Ordered collection of one document's segments, indexed by (name, kind).
///
/// Declaration order is preserved for the two-phase load; lookups go through
/// the auxiliary index.
#[derive(Debug, Default)]
pub struct SegmentDb {
    segments: Vec<Segment>,
    index: HashMap<(String, SegmentKind), usize>,
}

impl SegmentDb {
    /// Append a segment, rejecting duplicate (name, kind) pairs.
    pub fn push(&mut self, segment: Segment) -> Result<()> {
        let key = (segment.name.to_uppercase(), segment.kind);
        if self.index.contains_key(&key) {
            return Err(Error::DuplicateSegment {
                name: segment.full_name(),
            });
        }
        self.index.insert(key, self.segments.len());
        self.segments.push(segment);
        Ok(())
    }

    /// Look up a segment by name and kind (name matched case-insensitively).
    pub fn get(&self, name: &str, kind: SegmentKind) -> Result<&Segment> {
        self.index
            .get(&(name.to_uppercase(), kind))
            .map(|&idx| &self.segments[idx])
            .ok_or_else(|| Error::SegmentNotFound {
                name: format!("{}.{}", name, kind.tag()),
            })
    }

    /// Look up a segment that must already carry resolved data.
    pub fn get_loaded(&self, name: &str, kind: SegmentKind) -> Result<&Segment> {
        let segment = self.get(name, kind)?;
        if !segment.loaded() {
            return Err(Error::SegmentNotFound {
                name: format!("{}.{} (not loaded)", name, kind.tag()),
            });
        }
        Ok(segment)
    }

    /// Segments in declaration order.
    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.segments.iter()
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether the database is empty.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub(crate) fn segment_mut(&mut self, idx: usize) -> &mut Segment {
        &mut self.segments[idx]
    }

    pub(crate) fn segment(&self, idx: usize) -> &Segment {
        &self.segments[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        assert_eq!(SegmentKind::from_tag("raw"), Some(SegmentKind::Raw));
        assert_eq!(SegmentKind::from_tag("IMX2"), Some(SegmentKind::BootV2));
        assert_eq!(SegmentKind::from_tag("bogus"), None);
        for kind in SegmentKind::ALL {
            assert_eq!(SegmentKind::from_tag(kind.tag()), Some(kind));
        }
    }

    #[test]
    fn test_segment_ref_parse() {
        let r = SegmentRef::parse("UBOOT.imx2").unwrap();
        assert_eq!(r.name, "UBOOT");
        assert_eq!(r.kind, SegmentKind::BootV2);
        assert_eq!(r.companion, None);
        assert_eq!(r.full_name(), "UBOOT.imx2");

        let r = SegmentRef::parse("KERNEL.raw/fdt").unwrap();
        assert_eq!(r.kind, SegmentKind::Raw);
        assert_eq!(r.companion.as_deref(), Some("fdt"));

        assert!(SegmentRef::parse("no-dot").is_err());
        assert!(SegmentRef::parse("too.many.dots").is_err());
        assert!(SegmentRef::parse("x.unknown").is_err());
    }

    #[test]
    fn test_db_duplicate_and_lookup() {
        let mut db = SegmentDb::default();
        let seg = Segment::from_value(
            "APP",
            SegmentKind::Raw,
            &serde_yaml::from_str("FILE: app.bin").unwrap(),
        )
        .unwrap();
        db.push(seg.clone()).unwrap();
        assert!(matches!(
            db.push(seg).unwrap_err(),
            Error::DuplicateSegment { .. }
        ));

        assert!(db.get("APP", SegmentKind::Raw).is_ok());
        assert!(db.get("app", SegmentKind::Raw).is_ok());
        assert!(db.get("APP", SegmentKind::Dcd).is_err());
        // unloaded segments are invisible to loaded lookups
        assert!(db.get_loaded("APP", SegmentKind::Raw).is_err());
    }
}
