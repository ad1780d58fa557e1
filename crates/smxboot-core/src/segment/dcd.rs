//! Device configuration data segment
//!
//! ```yaml
//! <NAME>.dcd:
//!     DESC: str
//!     ADDR: int
//!     DATA: str (structured text form)   # or
//!     FILE: path (.txt text form, or a pre-built binary block)
//! ```

use std::path::Path;

use serde_yaml::Mapping;

use crate::codec::dcd::Dcd;
use crate::error::{Error, Result};
use crate::{paths, value};

use super::{CommonFields, LoadOutput, Segment, SegmentParams};

#[derive(Debug, Clone)]
pub(crate) struct DcdParams {
    /// Inline structured-text form, mutually substitutable with FILE
    pub text: Option<String>,
}

pub(crate) fn build(full: &str, map: &Mapping) -> Result<(CommonFields, SegmentParams)> {
    let mut common = CommonFields::default();
    let mut text = None;

    for (key, val) in map {
        let key = value::key_str(full, key)?.to_uppercase();
        match key.as_str() {
            "DESC" => common.description = value::as_str(full, "DESC", val)?,
            "ADDR" => common.address = Some(value::as_int(full, "ADDR", val)?),
            "FILE" => common.path = Some(value::as_str(full, "FILE", val)?),
            "DATA" => text = Some(value::as_str(full, "DATA", val)?),
            other => {
                return Err(Error::UnknownKey {
                    segment: full.to_string(),
                    field: other.to_string(),
                })
            }
        }
    }

    if common.path.is_none() && text.is_none() {
        return Err(Error::MissingKey {
            segment: full.to_string(),
            field: "FILE or DATA".to_string(),
        });
    }
    Ok((common, SegmentParams::Dcd(DcdParams { text })))
}

pub(crate) fn load(segment: &Segment, params: &DcdParams, base: &Path) -> Result<LoadOutput> {
    let dcd = match segment.path() {
        None => Dcd::parse_txt(params.text.as_deref().unwrap_or_default())?,
        Some(path) if path.ends_with(".txt") => Dcd::parse_txt(&paths::read_text(base, path)?)?,
        Some(path) => Dcd::parse(&paths::read(base, path)?)?,
    };
    Ok(LoadOutput::data(dcd.export()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{SegmentDb, SegmentKind};

    const DCD_TXT: &str = "WriteValue 4 0x30340004 0x4F400005";

    fn build_dcd(yaml: &str) -> Result<Segment> {
        Segment::from_value("SETUP", SegmentKind::Dcd, &serde_yaml::from_str(yaml).unwrap())
    }

    #[test]
    fn test_inline_data() {
        let seg = build_dcd(&format!("DATA: |\n  {}", DCD_TXT)).unwrap();
        let out = seg
            .resolve_payload(&SegmentDb::default(), Path::new("."))
            .unwrap();
        assert_eq!(out.data, Dcd::parse_txt(DCD_TXT).unwrap().export().unwrap());
    }

    #[test]
    fn test_file_or_data_required() {
        let err = build_dcd("DESC: just a description").unwrap_err();
        assert!(err.to_string().contains("FILE or DATA"));
    }

    #[test]
    fn test_text_file() {
        let dir = std::env::temp_dir().join("smxboot-dcd-test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("setup.txt"), DCD_TXT).unwrap();

        let seg = build_dcd("FILE: setup.txt").unwrap();
        let out = seg.resolve_payload(&SegmentDb::default(), &dir).unwrap();
        assert_eq!(out.data, Dcd::parse_txt(DCD_TXT).unwrap().export().unwrap());
    }

    #[test]
    fn test_binary_file() {
        let dir = std::env::temp_dir().join("smxboot-dcd-bin-test");
        std::fs::create_dir_all(&dir).unwrap();
        let bin = Dcd::parse_txt(DCD_TXT).unwrap().export().unwrap();
        std::fs::write(dir.join("setup.dcd"), &bin).unwrap();

        let seg = build_dcd("FILE: setup.dcd").unwrap();
        let out = seg.resolve_payload(&SegmentDb::default(), &dir).unwrap();
        assert_eq!(out.data, bin);
    }
}
