//! Boot image segments (`imx2`, `imx2b`, `imx3`)
//!
//! These come in two forms. The file form reads a prebuilt image, optionally
//! patches its embedded environment, and extracts the load address and
//! device-configuration block. The composed form (a DATA block) builds the
//! image from other segments of the same document, so it loads in the second
//! phase once those are resolved.

use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::codec::bootimg::{BootImageV2, BootImageV3, CoreType, SubImage, V2_VERSION, V3_VERSION};
use crate::codec::dcd::Dcd;
use crate::error::{Error, Result};
use crate::{paths, value};

use super::uboot::EnvPatch;
use super::{CommonFields, LoadOutput, Segment, SegmentDb, SegmentParams, SegmentRef};

/// Composition recipe for a v2 image.
#[derive(Debug, Clone)]
pub(crate) struct V2Build {
    pub staddr: u64,
    pub offset: u64,
    pub version: u8,
    pub plugin: bool,
    pub dcdseg: Option<SegmentRef>,
    pub appseg: SegmentRef,
}

#[derive(Debug, Clone)]
pub(crate) struct BootV2Params {
    pub patch: EnvPatch,
    pub build: Option<V2Build>,
}

/// Composition recipe for a v3 container.
#[derive(Debug, Clone)]
pub(crate) struct V3Build {
    pub staddr: u64,
    pub offset: u64,
    pub version: u8,
    pub dcdseg: Option<SegmentRef>,
    pub images: Vec<V3ImageSpec>,
}

#[derive(Debug, Clone)]
pub(crate) struct V3ImageSpec {
    pub core: CoreType,
    pub address: u64,
    pub path: String,
}

#[derive(Debug, Clone)]
pub(crate) struct BootV3Params {
    pub patch: EnvPatch,
    pub build: Option<V3Build>,
}

fn seg_ref(full: &str, field: &str, val: &Value) -> Result<SegmentRef> {
    let text = value::as_str(full, field, val)?;
    SegmentRef::parse(&text).map_err(|e| Error::InvalidValue {
        segment: full.to_string(),
        field: field.to_string(),
        reason: e.to_string(),
    })
}

// ============================================================================
// imx2
// ============================================================================

fn build_v2_data(full: &str, map: &Mapping) -> Result<V2Build> {
    let mut staddr = None;
    let mut offset = 0x400u64;
    let mut version = V2_VERSION;
    let mut plugin = false;
    let mut dcdseg = None;
    let mut appseg = None;

    for (key, val) in map {
        let key = value::key_str(full, key)?.to_uppercase();
        match key.as_str() {
            "STADDR" => staddr = Some(value::as_int(full, "DATA/STADDR", val)?),
            "OFFSET" => offset = value::as_int(full, "DATA/OFFSET", val)?,
            "IMGVER" => version = value::as_int(full, "DATA/IMGVER", val)? as u8,
            "PLUGIN" => {
                plugin = value::as_choice(full, "DATA/PLUGIN", val, &["yes", "no"])? == "yes"
            }
            "DCDSEG" => dcdseg = Some(seg_ref(full, "DATA/DCDSEG", val)?),
            "APPSEG" => appseg = Some(seg_ref(full, "DATA/APPSEG", val)?),
            other => {
                return Err(Error::UnknownKey {
                    segment: full.to_string(),
                    field: format!("DATA/{}", other),
                })
            }
        }
    }

    let staddr = staddr.ok_or_else(|| Error::MissingKey {
        segment: full.to_string(),
        field: "DATA/STADDR".to_string(),
    })?;
    let appseg = appseg.ok_or_else(|| Error::MissingKey {
        segment: full.to_string(),
        field: "DATA/APPSEG".to_string(),
    })?;
    Ok(V2Build {
        staddr,
        offset,
        version,
        plugin,
        dcdseg,
        appseg,
    })
}

pub(crate) fn build_v2(full: &str, map: &Mapping) -> Result<(CommonFields, SegmentParams)> {
    let mut common = CommonFields::default();
    let mut patch = EnvPatch::default();
    let mut build = None;

    for (key, val) in map {
        let key = value::key_str(full, key)?.to_uppercase();
        match key.as_str() {
            "DESC" => common.description = value::as_str(full, "DESC", val)?,
            "ADDR" => common.address = Some(value::as_int(full, "ADDR", val)?),
            "FILE" => common.path = Some(value::as_str(full, "FILE", val)?),
            "DATA" => build = Some(build_v2_data(full, value::as_map(full, "DATA", val)?)?),
            other if patch.accept(full, other, val)? => {}
            other => {
                return Err(Error::UnknownKey {
                    segment: full.to_string(),
                    field: other.to_string(),
                })
            }
        }
    }

    if common.path.is_none() && build.is_none() {
        return Err(Error::MissingKey {
            segment: full.to_string(),
            field: "FILE or DATA".to_string(),
        });
    }
    patch.validate(full)?;
    Ok((common, SegmentParams::BootV2(BootV2Params { patch, build })))
}

fn dcd_from_segment(db: &SegmentDb, dcdseg: &SegmentRef) -> Result<Vec<u8>> {
    let seg = db.get_loaded(&dcdseg.name, dcdseg.kind)?;
    Ok(seg.data().unwrap_or_default().to_vec())
}

pub(crate) fn load_v2(
    segment: &Segment,
    params: &BootV2Params,
    db: &SegmentDb,
    base: &Path,
) -> Result<LoadOutput> {
    if let Some(build) = &params.build {
        let dcd = match &build.dcdseg {
            Some(r) => Some(dcd_from_segment(db, r)?),
            None => None,
        };
        if let Some(bytes) = &dcd {
            // reject truncated or mistyped DCD payloads before embedding
            Dcd::parse(bytes).map_err(|e| Error::Codec {
                context: segment.full_name(),
                reason: e.to_string(),
            })?;
        }

        let app = db.get_loaded(&build.appseg.name, build.appseg.kind)?;
        let entry = app.address().ok_or_else(|| Error::InvalidValue {
            segment: segment.full_name(),
            field: "DATA/APPSEG".to_string(),
            reason: format!("segment \"{}\" has no load address", build.appseg.full_name()),
        })?;

        let img = BootImageV2::compose(
            build.staddr,
            build.offset,
            build.version,
            build.plugin,
            dcd.clone(),
            app.data().unwrap_or_default().to_vec(),
            entry,
        );
        return Ok(LoadOutput {
            address: Some(img.load_address()),
            data: img.export(),
            dcd,
        });
    }

    // file form
    let raw = paths::read(base, segment.path().unwrap_or_default())?;
    let data = params.patch.apply(raw)?;
    let img = BootImageV2::parse(&data).map_err(|e| Error::Codec {
        context: segment.full_name(),
        reason: e.to_string(),
    })?;
    Ok(LoadOutput {
        address: Some(img.load_address()),
        dcd: img.dcd,
        data,
    })
}

// ============================================================================
// imx2b (file form only)
// ============================================================================

pub(crate) fn build_v2_compact(full: &str, map: &Mapping) -> Result<(CommonFields, SegmentParams)> {
    let mut common = CommonFields::default();
    let mut patch = EnvPatch::default();

    for (key, val) in map {
        let key = value::key_str(full, key)?.to_uppercase();
        match key.as_str() {
            "DESC" => common.description = value::as_str(full, "DESC", val)?,
            "ADDR" => common.address = Some(value::as_int(full, "ADDR", val)?),
            "FILE" => common.path = Some(value::as_str(full, "FILE", val)?),
            other if patch.accept(full, other, val)? => {}
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
    patch.validate(full)?;
    Ok((common, SegmentParams::BootV2Compact(patch)))
}

pub(crate) fn load_v2_compact(
    segment: &Segment,
    patch: &EnvPatch,
    base: &Path,
) -> Result<LoadOutput> {
    let raw = paths::read(base, segment.path().unwrap_or_default())?;
    Ok(LoadOutput::data(patch.apply(raw)?))
}

// ============================================================================
// imx3
// ============================================================================

fn build_v3_images(full: &str, val: &Value) -> Result<Vec<V3ImageSpec>> {
    let mut images = Vec::new();
    for (i, item) in value::as_seq(full, "DATA/IMAGES", val)?.iter().enumerate() {
        let field = format!("DATA/IMAGES[{}]", i);
        let map = value::as_map(full, &field, item)?;
        let mut core = None;
        let mut address = None;
        let mut path = None;

        for (key, val) in map {
            let key = value::key_str(full, key)?.to_uppercase();
            match key.as_str() {
                "TYPE" => {
                    let tag = value::as_str(full, &field, val)?;
                    core = Some(CoreType::from_tag(&tag).ok_or_else(|| Error::InvalidValue {
                        segment: full.to_string(),
                        field: field.clone(),
                        reason: format!("unsupported core type \"{}\"", tag),
                    })?);
                }
                "ADDR" => address = Some(value::as_int(full, &field, val)?),
                "FILE" => path = Some(value::as_str(full, &field, val)?),
                other => {
                    return Err(Error::UnknownKey {
                        segment: full.to_string(),
                        field: format!("{}/{}", field, other),
                    })
                }
            }
        }

        let missing = |what: &str| Error::MissingKey {
            segment: full.to_string(),
            field: format!("{}/{}", field, what),
        };
        images.push(V3ImageSpec {
            core: core.ok_or_else(|| missing("TYPE"))?,
            address: address.ok_or_else(|| missing("ADDR"))?,
            path: path.ok_or_else(|| missing("FILE"))?,
        });
    }

    if images.is_empty() {
        return Err(Error::InvalidValue {
            segment: full.to_string(),
            field: "DATA/IMAGES".to_string(),
            reason: "at least one sub-image is required".to_string(),
        });
    }
    Ok(images)
}

fn build_v3_data(full: &str, map: &Mapping) -> Result<V3Build> {
    let mut staddr = None;
    let mut offset = 0x400u64;
    let mut version = V3_VERSION;
    let mut dcdseg = None;
    let mut images = None;

    for (key, val) in map {
        let key = value::key_str(full, key)?.to_uppercase();
        match key.as_str() {
            "STADDR" => staddr = Some(value::as_int(full, "DATA/STADDR", val)?),
            "OFFSET" => offset = value::as_int(full, "DATA/OFFSET", val)?,
            "IMGVER" => version = value::as_int(full, "DATA/IMGVER", val)? as u8,
            "DCDSEG" => dcdseg = Some(seg_ref(full, "DATA/DCDSEG", val)?),
            "IMAGES" => images = Some(build_v3_images(full, val)?),
            other => {
                return Err(Error::UnknownKey {
                    segment: full.to_string(),
                    field: format!("DATA/{}", other),
                })
            }
        }
    }

    let missing = |what: &str| Error::MissingKey {
        segment: full.to_string(),
        field: format!("DATA/{}", what),
    };
    Ok(V3Build {
        staddr: staddr.ok_or_else(|| missing("STADDR"))?,
        offset,
        version,
        dcdseg,
        images: images.ok_or_else(|| missing("IMAGES"))?,
    })
}

pub(crate) fn build_v3(full: &str, map: &Mapping) -> Result<(CommonFields, SegmentParams)> {
    let mut common = CommonFields::default();
    let mut patch = EnvPatch::default();
    let mut build = None;

    for (key, val) in map {
        let key = value::key_str(full, key)?.to_uppercase();
        match key.as_str() {
            "DESC" => common.description = value::as_str(full, "DESC", val)?,
            "ADDR" => common.address = Some(value::as_int(full, "ADDR", val)?),
            "FILE" => common.path = Some(value::as_str(full, "FILE", val)?),
            "DATA" => build = Some(build_v3_data(full, value::as_map(full, "DATA", val)?)?),
            other if patch.accept(full, other, val)? => {}
            other => {
                return Err(Error::UnknownKey {
                    segment: full.to_string(),
                    field: other.to_string(),
                })
            }
        }
    }

    if common.path.is_none() && build.is_none() {
        return Err(Error::MissingKey {
            segment: full.to_string(),
            field: "FILE or DATA".to_string(),
        });
    }
    patch.validate(full)?;
    Ok((common, SegmentParams::BootV3(BootV3Params { patch, build })))
}

pub(crate) fn load_v3(
    segment: &Segment,
    params: &BootV3Params,
    db: &SegmentDb,
    base: &Path,
) -> Result<LoadOutput> {
    if let Some(build) = &params.build {
        let dcd = match &build.dcdseg {
            Some(r) => Some(dcd_from_segment(db, r)?),
            None => None,
        };

        let mut images = Vec::with_capacity(build.images.len());
        for spec in &build.images {
            images.push(SubImage {
                core: spec.core,
                address: spec.address,
                data: paths::read(base, &spec.path)?,
            });
        }

        let img = BootImageV3 {
            address: build.staddr,
            offset: build.offset,
            version: build.version,
            dcd: dcd.clone(),
            images,
        };
        return Ok(LoadOutput {
            address: Some(img.load_address()),
            data: img.export(),
            dcd,
        });
    }

    let raw = paths::read(base, segment.path().unwrap_or_default())?;
    let data = params.patch.apply(raw)?;
    let img = BootImageV3::parse(&data).map_err(|e| Error::Codec {
        context: segment.full_name(),
        reason: e.to_string(),
    })?;
    Ok(LoadOutput {
        address: Some(img.load_address()),
        dcd: img.dcd,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentKind;

    fn build(name: &str, kind: SegmentKind, yaml: &str) -> Result<Segment> {
        Segment::from_value(name, kind, &serde_yaml::from_str(yaml).unwrap())
    }

    #[test]
    fn test_v2_requires_file_or_data() {
        let err = build("UBOOT", SegmentKind::BootV2, "DESC: nothing else").unwrap_err();
        assert!(err.to_string().contains("FILE or DATA"));
    }

    #[test]
    fn test_v2_data_form_validation() {
        // APPSEG missing
        let err = build("UBOOT", SegmentKind::BootV2, "DATA:\n  STADDR: 0x80000000").unwrap_err();
        assert!(err.to_string().contains("APPSEG"));

        // STADDR missing
        let err = build("UBOOT", SegmentKind::BootV2, "DATA:\n  APPSEG: APP.raw").unwrap_err();
        assert!(err.to_string().contains("STADDR"));

        let seg = build(
            "UBOOT",
            SegmentKind::BootV2,
            "DATA:\n  STADDR: 0x80000000\n  DCDSEG: DDR.dcd\n  APPSEG: APP.raw\n  PLUGIN: 'no'",
        )
        .unwrap();
        assert!(!seg.loaded());
    }

    #[test]
    fn test_v2_compose_from_segments() {
        let dir = std::env::temp_dir().join("smxboot-imx2-test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("app.bin"), vec![0xA5u8; 128]).unwrap();

        let mut db = SegmentDb::default();
        db.push(
            build(
                "DDR",
                SegmentKind::Dcd,
                "DATA: WriteValue 4 0x30340004 0x4F400005",
            )
            .unwrap(),
        )
        .unwrap();
        db.push(
            build("APP", SegmentKind::Raw, "ADDR: 0x80001000\nFILE: app.bin").unwrap(),
        )
        .unwrap();

        // first phase: simple segments
        for idx in 0..db.len() {
            let out = db.segment(idx).resolve_payload(&db, &dir).unwrap();
            db.segment_mut(idx).apply(out);
        }

        let seg = build(
            "BOOT",
            SegmentKind::BootV2,
            "DATA:\n  STADDR: 0x80000000\n  DCDSEG: DDR.dcd\n  APPSEG: APP.raw",
        )
        .unwrap();
        let out = seg.resolve_payload(&db, &dir).unwrap();
        assert_eq!(out.address, Some(0x8000_0400));
        assert!(out.dcd.is_some());

        let img = BootImageV2::parse(&out.data).unwrap();
        assert_eq!(img.entry, 0x8000_1000);
        assert_eq!(img.app, vec![0xA5u8; 128]);
    }

    #[test]
    fn test_v2_unresolved_reference() {
        let seg = build(
            "BOOT",
            SegmentKind::BootV2,
            "DATA:\n  STADDR: 0x80000000\n  APPSEG: MISSING.raw",
        )
        .unwrap();
        let err = seg
            .resolve_payload(&SegmentDb::default(), Path::new("."))
            .unwrap_err();
        assert!(matches!(err, Error::SegmentNotFound { .. }));
    }

    #[test]
    fn test_v2_compact_rejects_data_block() {
        let err = build(
            "BOOT",
            SegmentKind::BootV2Compact,
            "DATA:\n  STADDR: 0x80000000",
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnknownKey { .. }));
    }

    #[test]
    fn test_v3_images_validation() {
        let err = build(
            "BOOT",
            SegmentKind::BootV3,
            "DATA:\n  STADDR: 0x90000000\n  IMAGES: []",
        )
        .unwrap_err();
        assert!(err.to_string().contains("IMAGES"));

        let err = build(
            "BOOT",
            SegmentKind::BootV3,
            "DATA:\n  STADDR: 0x90000000\n  IMAGES:\n    - TYPE: BOGUS\n      ADDR: 0\n      FILE: a",
        )
        .unwrap_err();
        assert!(err.to_string().contains("core type"));
    }

    #[test]
    fn test_v3_compose() {
        let dir = std::env::temp_dir().join("smxboot-imx3-test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("scfw.bin"), vec![1u8; 32]).unwrap();
        std::fs::write(dir.join("atf.bin"), vec![2u8; 64]).unwrap();

        let seg = build(
            "BOOT",
            SegmentKind::BootV3,
            "DATA:\n  STADDR: 0x90000000\n  IMAGES:\n    - TYPE: SCFW\n      ADDR: 0x30000000\n      FILE: scfw.bin\n    - TYPE: APP-A53\n      ADDR: 0x80000000\n      FILE: atf.bin",
        )
        .unwrap();
        let out = seg.resolve_payload(&SegmentDb::default(), &dir).unwrap();
        assert_eq!(out.address, Some(0x9000_0400));

        let img = BootImageV3::parse(&out.data).unwrap();
        assert_eq!(img.images.len(), 2);
        assert_eq!(img.images[0].core, CoreType::Scfw);
        assert_eq!(img.images[1].data, vec![2u8; 64]);
    }
}
