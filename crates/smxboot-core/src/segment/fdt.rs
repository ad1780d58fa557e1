//! Device tree segment
//!
//! ```yaml
//! <NAME>.fdt:
//!     DESC: str
//!     ADDR: int
//!     FILE: path (required; .dtb blob or .dts source)
//!     MODE: <'disabled' or 'merge'> (default: 'disabled')
//!     DATA: str (overlay source, required when MODE is 'merge')
//! ```

use std::path::Path;

use serde_yaml::Mapping;

use crate::codec::fdt::Fdt;
use crate::error::{Error, Result};
use crate::{paths, value};

use super::{CommonFields, LoadOutput, Segment, SegmentParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OverlayMode {
    Disabled,
    Merge,
}

#[derive(Debug, Clone)]
pub(crate) struct FdtParams {
    pub mode: OverlayMode,
    pub overlay: Option<String>,
}

pub(crate) fn build(full: &str, map: &Mapping) -> Result<(CommonFields, SegmentParams)> {
    let mut common = CommonFields::default();
    let mut mode = OverlayMode::Disabled;
    let mut overlay = None;

    for (key, val) in map {
        let key = value::key_str(full, key)?.to_uppercase();
        match key.as_str() {
            "DESC" => common.description = value::as_str(full, "DESC", val)?,
            "ADDR" => common.address = Some(value::as_int(full, "ADDR", val)?),
            "FILE" => common.path = Some(value::as_str(full, "FILE", val)?),
            "DATA" => overlay = Some(value::as_str(full, "DATA", val)?),
            "MODE" => {
                mode = match value::as_choice(full, "MODE", val, &["disabled", "merge"])?.as_str()
                {
                    "merge" => OverlayMode::Merge,
                    _ => OverlayMode::Disabled,
                }
            }
            other => {
                return Err(Error::UnknownKey {
                    segment: full.to_string(),
                    field: other.to_string(),
                })
            }
        }
    }

    if common.path.is_none() {
        return Err(Error::MissingKey {
            segment: full.to_string(),
            field: "FILE".to_string(),
        });
    }
    if mode == OverlayMode::Merge && overlay.is_none() {
        return Err(Error::MissingKey {
            segment: full.to_string(),
            field: "DATA".to_string(),
        });
    }
    Ok((common, SegmentParams::Fdt(FdtParams { mode, overlay })))
}

pub(crate) fn load(segment: &Segment, params: &FdtParams, base: &Path) -> Result<LoadOutput> {
    let path = segment.path().unwrap_or_default();
    let mut fdt = if path.ends_with(".dtb") {
        Fdt::parse_dtb(&paths::read(base, path)?)?
    } else {
        Fdt::parse_dts(&paths::read_text(base, path)?)?
    };

    if params.mode == OverlayMode::Merge {
        // DATA presence is enforced at build time
        let overlay = Fdt::parse_dts(params.overlay.as_deref().unwrap_or_default())?;
        fdt.merge(&overlay);
    }

    Ok(LoadOutput::data(fdt.to_dtb()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::segment::{SegmentDb, SegmentKind};

    const BASE_DTS: &str = "/ { model = \"board\"; chosen { bootargs = \"quiet\"; }; };";

    fn build_fdt(yaml: &str) -> Result<Segment> {
        Segment::from_value("TREE", SegmentKind::Fdt, &serde_yaml::from_str(yaml).unwrap())
    }

    #[test]
    fn test_merge_requires_data() {
        let err = build_fdt("FILE: base.dts\nMODE: merge").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert!(err.to_string().contains("DATA"));
    }

    #[test]
    fn test_mode_validation() {
        assert!(build_fdt("FILE: a.dts\nMODE: replace").is_err());
    }

    #[test]
    fn test_load_and_merge() {
        let dir = std::env::temp_dir().join("smxboot-fdt-test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("base.dts"), BASE_DTS).unwrap();

        let seg = build_fdt(
            "FILE: base.dts\nMODE: merge\nDATA: '/ { chosen { bootargs = \"debug\"; }; };'",
        )
        .unwrap();
        let out = seg.resolve_payload(&SegmentDb::default(), &dir).unwrap();

        let merged = Fdt::parse_dtb(&out.data).unwrap();
        assert_eq!(merged.version, Some(17));
        assert_eq!(
            merged.root.child("chosen").unwrap().props[0].1,
            b"debug\0"
        );
    }

    #[test]
    fn test_load_dtb_passthrough() {
        let dir = std::env::temp_dir().join("smxboot-fdt-dtb-test");
        std::fs::create_dir_all(&dir).unwrap();
        let blob = Fdt::parse_dts(BASE_DTS).unwrap().to_dtb();
        std::fs::write(dir.join("base.dtb"), &blob).unwrap();

        let seg = build_fdt("FILE: base.dtb\nADDR: 0x83000000").unwrap();
        let out = seg.resolve_payload(&SegmentDb::default(), &dir).unwrap();
        assert_eq!(
            Fdt::parse_dtb(&out.data).unwrap().root,
            Fdt::parse_dts(BASE_DTS).unwrap().root
        );
    }
}
