//! Raw binary segment
//!
//! ```yaml
//! <NAME>.raw:
//!     DESC: str
//!     ADDR: int
//!     FILE: path (required)
//! ```

use std::path::Path;

use serde_yaml::Mapping;

use crate::error::{Error, Result};
use crate::{paths, value};

use super::{CommonFields, LoadOutput, Segment, SegmentParams};

pub(crate) fn build(full: &str, map: &Mapping) -> Result<(CommonFields, SegmentParams)> {
    let mut common = CommonFields::default();

    for (key, val) in map {
        let key = value::key_str(full, key)?.to_uppercase();
        match key.as_str() {
            "DESC" => common.description = value::as_str(full, "DESC", val)?,
            "ADDR" => common.address = Some(value::as_int(full, "ADDR", val)?),
            "FILE" => common.path = Some(value::as_str(full, "FILE", val)?),
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
    Ok((common, SegmentParams::Raw))
}

pub(crate) fn load(segment: &Segment, base: &Path) -> Result<LoadOutput> {
    // FILE presence is enforced at build time
    let path = segment.path().unwrap_or_default();
    Ok(LoadOutput::data(paths::read(base, path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::segment::SegmentKind;

    fn build_raw(yaml: &str) -> Result<Segment> {
        Segment::from_value("APP", SegmentKind::Raw, &serde_yaml::from_str(yaml).unwrap())
    }

    #[test]
    fn test_validation() {
        let seg = build_raw("FILE: app.bin\nADDR: \"0x10\"\nDESC: app image").unwrap();
        assert_eq!(seg.address(), Some(16));
        assert_eq!(seg.path(), Some("app.bin"));
        assert_eq!(seg.description(), "app image");
        assert!(!seg.loaded());
    }

    #[test]
    fn test_missing_file() {
        let err = build_raw("ADDR: 0x10").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert!(err.to_string().contains("FILE"));
    }

    #[test]
    fn test_unknown_key() {
        let err = build_raw("FILE: a\nBOGUS: 1").unwrap_err();
        assert!(err.to_string().contains("BOGUS"));
        assert!(err.to_string().contains("APP.raw"));
    }

    #[test]
    fn test_bad_addr() {
        let err = build_raw("FILE: a\nADDR: not-a-number").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert!(err.to_string().contains("ADDR"));
    }
}
