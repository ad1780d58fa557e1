//! Bootloader image segments: main image with embedded environment (`ubi`),
//! legacy executable wrapper (`ubx`), and FIT-style image (`ubt`).

use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::codec::uboot::{arch_id, comp_id, os_id, EnvImage, ImageType, LegacyImage};
use crate::error::{Error, Result};
use crate::{paths, value};

use super::{CommonFields, LoadOutput, Segment, SegmentParams};

/// How an environment overlay is applied to an existing image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnvMode {
    Disabled,
    Merge,
    Replace,
}

/// Environment patching options shared by `ubi` and the boot-image file forms.
#[derive(Debug, Clone)]
pub(crate) struct EnvPatch {
    pub mode: EnvMode,
    pub mark: String,
    pub eval: Option<String>,
}

impl Default for EnvPatch {
    fn default() -> Self {
        EnvPatch {
            mode: EnvMode::Disabled,
            mark: "bootcmd=".to_string(),
            eval: None,
        }
    }
}

impl EnvPatch {
    /// Handle MODE/MARK/EVAL keys; returns false for keys it does not own.
    pub(crate) fn accept(&mut self, full: &str, key: &str, val: &Value) -> Result<bool> {
        match key {
            "MODE" => {
                self.mode = match value::as_choice(
                    full,
                    "MODE",
                    val,
                    &["disabled", "merge", "replace"],
                )?
                .as_str()
                {
                    "merge" => EnvMode::Merge,
                    "replace" => EnvMode::Replace,
                    _ => EnvMode::Disabled,
                };
            }
            "MARK" => self.mark = value::as_str(full, "MARK", val)?,
            "EVAL" => self.eval = Some(value::as_str(full, "EVAL", val)?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// EVAL must be present whenever patching is enabled.
    pub(crate) fn validate(&self, full: &str) -> Result<()> {
        if self.mode != EnvMode::Disabled && self.eval.is_none() {
            return Err(Error::MissingKey {
                segment: full.to_string(),
                field: "EVAL".to_string(),
            });
        }
        Ok(())
    }

    /// Apply the configured patch to raw image bytes.
    pub(crate) fn apply(&self, image: Vec<u8>) -> Result<Vec<u8>> {
        if self.mode == EnvMode::Disabled {
            return Ok(image);
        }
        let mut env = EnvImage::parse(image, &self.mark)?;
        if self.mode == EnvMode::Replace {
            env.clear();
        }
        env.apply(self.eval.as_deref().unwrap_or_default())?;
        env.export()
    }
}

// ============================================================================
// ubi: main image with embedded environment
// ============================================================================

pub(crate) fn build_env(full: &str, map: &Mapping) -> Result<(CommonFields, SegmentParams)> {
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
    Ok((common, SegmentParams::UbootEnv(patch)))
}

pub(crate) fn load_env(segment: &Segment, patch: &EnvPatch, base: &Path) -> Result<LoadOutput> {
    let image = paths::read(base, segment.path().unwrap_or_default())?;
    Ok(LoadOutput::data(patch.apply(image)?))
}

// ============================================================================
// ubx: legacy executable image wrapper
// ============================================================================

#[derive(Debug, Clone)]
pub(crate) struct ExecParams {
    pub name: String,
    pub load_addr: u32,
    pub entry_addr: u32,
    pub image_type: ImageType,
    pub arch: u8,
    pub os: u8,
    pub compression: u8,
    /// Source files; several entries for multi images
    pub files: Vec<String>,
    /// Inline payload (script text)
    pub text: Option<String>,
}

fn build_exec_header(full: &str, map: &Mapping, params: &mut ExecParams) -> Result<()> {
    for (key, val) in map {
        let key = value::key_str(full, key)?.to_lowercase();
        match key.as_str() {
            "name" => params.name = value::as_str(full, "HEAD/name", val)?,
            "eaddr" => params.entry_addr = value::as_int(full, "HEAD/eaddr", val)? as u32,
            "laddr" => params.load_addr = value::as_int(full, "HEAD/laddr", val)? as u32,
            "type" => {
                let tag = value::as_str(full, "HEAD/type", val)?.to_lowercase();
                params.image_type = ImageType::from_tag(&tag).ok_or_else(|| {
                    Error::InvalidValue {
                        segment: full.to_string(),
                        field: "HEAD/type".to_string(),
                        reason: format!("unsupported image type \"{}\"", tag),
                    }
                })?;
            }
            "arch" => {
                let tag = value::as_str(full, "HEAD/arch", val)?.to_lowercase();
                params.arch = arch_id(&tag).ok_or_else(|| Error::InvalidValue {
                    segment: full.to_string(),
                    field: "HEAD/arch".to_string(),
                    reason: format!("unsupported architecture \"{}\"", tag),
                })?;
            }
            "os" => {
                let tag = value::as_str(full, "HEAD/os", val)?.to_lowercase();
                params.os = os_id(&tag).ok_or_else(|| Error::InvalidValue {
                    segment: full.to_string(),
                    field: "HEAD/os".to_string(),
                    reason: format!("unsupported OS \"{}\"", tag),
                })?;
            }
            "compress" => {
                let tag = value::as_str(full, "HEAD/compress", val)?.to_lowercase();
                params.compression = comp_id(&tag).ok_or_else(|| Error::InvalidValue {
                    segment: full.to_string(),
                    field: "HEAD/compress".to_string(),
                    reason: format!("unsupported compression \"{}\"", tag),
                })?;
            }
            other => {
                return Err(Error::UnknownKey {
                    segment: full.to_string(),
                    field: format!("HEAD/{}", other),
                })
            }
        }
    }
    Ok(())
}

pub(crate) fn build_exec(full: &str, map: &Mapping) -> Result<(CommonFields, SegmentParams)> {
    let mut common = CommonFields::default();
    let mut params = ExecParams {
        name: String::new(),
        load_addr: 0,
        entry_addr: 0,
        image_type: ImageType::Firmware,
        arch: 2, // arm
        os: 5,   // linux
        compression: 0,
        files: Vec::new(),
        text: None,
    };

    for (key, val) in map {
        let key = value::key_str(full, key)?.to_uppercase();
        match key.as_str() {
            "DESC" => common.description = value::as_str(full, "DESC", val)?,
            "ADDR" => common.address = Some(value::as_int(full, "ADDR", val)?),
            "FILE" => match val {
                Value::String(s) => params.files = vec![s.clone()],
                Value::Sequence(items) => {
                    for item in items {
                        params.files.push(value::as_str(full, "FILE", item)?);
                    }
                }
                _ => {
                    return Err(Error::InvalidValue {
                        segment: full.to_string(),
                        field: "FILE".to_string(),
                        reason: "value must be a path or a list of paths".to_string(),
                    })
                }
            },
            "DATA" => params.text = Some(value::as_str(full, "DATA", val)?),
            "HEAD" => build_exec_header(full, value::as_map(full, "HEAD", val)?, &mut params)?,
            other => {
                return Err(Error::UnknownKey {
                    segment: full.to_string(),
                    field: other.to_string(),
                })
            }
        }
    }

    if params.files.is_empty() && params.text.is_none() {
        return Err(Error::MissingKey {
            segment: full.to_string(),
            field: "FILE or DATA".to_string(),
        });
    }
    if params.image_type != ImageType::Script && params.files.is_empty() {
        return Err(Error::MissingKey {
            segment: full.to_string(),
            field: "FILE".to_string(),
        });
    }

    common.path = params.files.first().cloned();
    Ok((common, SegmentParams::UbootExec(params)))
}

pub(crate) fn load_exec(segment: &Segment, params: &ExecParams, base: &Path) -> Result<LoadOutput> {
    let mut img = LegacyImage::new(
        params.name.clone(),
        params.load_addr,
        params.entry_addr,
        params.image_type,
        params.arch,
        params.os,
        params.compression,
    );

    match params.image_type {
        ImageType::Script => {
            let text = match &params.text {
                Some(text) => text.clone(),
                None => paths::read_text(base, &params.files[0])?,
            };
            img.set_data(text.into_bytes());
        }
        ImageType::Multi => {
            for file in &params.files {
                let bytes = paths::read(base, file)?;
                // each part must itself be a valid legacy image
                LegacyImage::parse(&bytes).map_err(|e| Error::Codec {
                    context: segment.full_name(),
                    reason: format!("multi sub-image \"{}\": {}", file, e),
                })?;
                img.append(bytes);
            }
        }
        _ => img.set_data(paths::read(base, &params.files[0])?),
    }

    Ok(LoadOutput::data(img.export()))
}

// ============================================================================
// ubt: FIT-style image (minimal variant)
// ============================================================================

#[derive(Debug, Clone)]
pub(crate) struct FitParams {
    /// Inline image source text
    pub text: Option<String>,
}

pub(crate) fn build_fit(full: &str, map: &Mapping) -> Result<(CommonFields, SegmentParams)> {
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
    Ok((common, SegmentParams::UbootFit(FitParams { text })))
}

pub(crate) fn load_fit(segment: &Segment, params: &FitParams, base: &Path) -> Result<LoadOutput> {
    let data = match segment.path() {
        Some(path) => paths::read(base, path)?,
        None => params.text.clone().unwrap_or_default().into_bytes(),
    };
    Ok(LoadOutput::data(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{SegmentDb, SegmentKind};

    fn build(name: &str, kind: SegmentKind, yaml: &str) -> Result<Segment> {
        Segment::from_value(name, kind, &serde_yaml::from_str(yaml).unwrap())
    }

    fn env_image() -> Vec<u8> {
        let mut image = vec![0x11u8; 16];
        image.extend_from_slice(b"bootcmd=run netboot\0\0");
        image.extend_from_slice(&[0u8; 43]);
        image
    }

    #[test]
    fn test_env_eval_required() {
        let err = build("UBOOT", SegmentKind::UbootEnv, "FILE: u-boot.img\nMODE: merge")
            .unwrap_err();
        assert!(err.to_string().contains("EVAL"));

        // disabled mode needs no EVAL
        build("UBOOT", SegmentKind::UbootEnv, "FILE: u-boot.img").unwrap();
    }

    #[test]
    fn test_env_merge_load() {
        let dir = std::env::temp_dir().join("smxboot-ubi-test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("u-boot.img"), env_image()).unwrap();

        let seg = build(
            "UBOOT",
            SegmentKind::UbootEnv,
            "FILE: u-boot.img\nMODE: merge\nEVAL: bootdelay=1",
        )
        .unwrap();
        let out = seg.resolve_payload(&SegmentDb::default(), &dir).unwrap();

        let env = EnvImage::parse(out.data, "bootcmd=").unwrap();
        assert_eq!(env.entries().len(), 2);
        assert_eq!(env.entries()[1], ("bootdelay".to_string(), "1".to_string()));
    }

    #[test]
    fn test_exec_script_from_data() {
        let seg = build(
            "SCRIPT",
            SegmentKind::UbootExec,
            "HEAD:\n  name: boot script\n  type: script\nDATA: |\n  setenv x 1\n  boot",
        )
        .unwrap();
        let out = seg
            .resolve_payload(&SegmentDb::default(), Path::new("."))
            .unwrap();
        let img = LegacyImage::parse(&out.data).unwrap();
        assert_eq!(img.name, "boot script");
        assert_eq!(img.image_type, ImageType::Script);
    }

    #[test]
    fn test_exec_firmware_requires_file() {
        let err = build(
            "FW",
            SegmentKind::UbootExec,
            "HEAD:\n  type: firmware\nDATA: inline",
        )
        .unwrap_err();
        assert!(err.to_string().contains("FILE"));
    }

    #[test]
    fn test_exec_bad_head_field() {
        let err = build("FW", SegmentKind::UbootExec, "FILE: a\nHEAD:\n  cpu: arm").unwrap_err();
        assert!(err.to_string().contains("HEAD/cpu"));
    }

    #[test]
    fn test_fit_minimal() {
        let seg = build("FIT", SegmentKind::UbootFit, "DATA: fit-source").unwrap();
        let out = seg
            .resolve_payload(&SegmentDb::default(), Path::new("."))
            .unwrap();
        assert_eq!(out.data, b"fit-source");
    }
}
