//! Typed accessors over raw YAML values
//!
//! Segment definitions arrive as generic string-keyed mappings; these helpers
//! convert individual values into typed fields, producing schema errors that
//! name the segment and the offending key.

use serde_yaml::{Mapping, Value};

use crate::error::{Error, Result};
use crate::util::parse_int;

/// Extract a mapping key as a string (non-string keys are schema errors).
pub fn key_str<'a>(segment: &str, key: &'a Value) -> Result<&'a str> {
    key.as_str().ok_or_else(|| Error::InvalidValue {
        segment: segment.to_string(),
        field: format!("{:?}", key),
        reason: "property name must be a string".to_string(),
    })
}

/// Expect a string value.
pub fn as_str(segment: &str, field: &str, val: &Value) -> Result<String> {
    val.as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidValue {
            segment: segment.to_string(),
            field: field.to_string(),
            reason: "value must be a string".to_string(),
        })
}

/// Expect an integer value, given either as a YAML number or as a string
/// holding a base-prefixed integer literal ("0x10").
pub fn as_int(segment: &str, field: &str, val: &Value) -> Result<u64> {
    match val {
        Value::Number(n) => n.as_u64().ok_or_else(|| Error::InvalidValue {
            segment: segment.to_string(),
            field: field.to_string(),
            reason: format!("value {} is not an unsigned integer", n),
        }),
        Value::String(s) => parse_int(s).map_err(|reason| Error::InvalidValue {
            segment: segment.to_string(),
            field: field.to_string(),
            reason,
        }),
        _ => Err(Error::InvalidValue {
            segment: segment.to_string(),
            field: field.to_string(),
            reason: "value must be an integer".to_string(),
        }),
    }
}

/// Expect a nested mapping.
pub fn as_map<'a>(segment: &str, field: &str, val: &'a Value) -> Result<&'a Mapping> {
    val.as_mapping().ok_or_else(|| Error::InvalidValue {
        segment: segment.to_string(),
        field: field.to_string(),
        reason: "value must be a mapping".to_string(),
    })
}

/// Expect a sequence.
pub fn as_seq<'a>(segment: &str, field: &str, val: &'a Value) -> Result<&'a Vec<Value>> {
    val.as_sequence().ok_or_else(|| Error::InvalidValue {
        segment: segment.to_string(),
        field: field.to_string(),
        reason: "value must be a list".to_string(),
    })
}

/// Expect a string drawn from a closed set of lowercase alternatives.
pub fn as_choice(segment: &str, field: &str, val: &Value, allowed: &[&str]) -> Result<String> {
    let s = as_str(segment, field, val)?.to_lowercase();
    if allowed.contains(&s.as_str()) {
        Ok(s)
    } else {
        Err(Error::InvalidValue {
            segment: segment.to_string(),
            field: field.to_string(),
            reason: format!("unsupported value \"{}\" (expected one of {:?})", s, allowed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_as_int_forms() {
        assert_eq!(as_int("S.raw", "ADDR", &Value::from(16)).unwrap(), 16);
        assert_eq!(as_int("S.raw", "ADDR", &Value::from("0x10")).unwrap(), 16);
        let err = as_int("S.raw", "ADDR", &Value::from("not-a-number")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert!(err.to_string().contains("ADDR"));
    }

    #[test]
    fn test_as_choice() {
        assert_eq!(
            as_choice("S.fdt", "MODE", &Value::from("Merge"), &["disabled", "merge"]).unwrap(),
            "merge"
        );
        assert!(as_choice("S.fdt", "MODE", &Value::from("bogus"), &["disabled", "merge"]).is_err());
    }
}
