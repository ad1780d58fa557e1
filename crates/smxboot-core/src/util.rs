//! Shared parsing and formatting helpers

/// Parse an integer literal with an optional base prefix (`0x`, `0o`, `0b`),
/// the way addresses and register values appear in documents and scripts.
pub fn parse_int(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (digits, radix) = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
    {
        (hex, 16)
    } else if let Some(oct) = s.strip_prefix("0o").or_else(|| s.strip_prefix("0O")) {
        (oct, 8)
    } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        (bin, 2)
    } else {
        (s, 10)
    };
    u64::from_str_radix(digits, radix).map_err(|e| format!("invalid integer \"{}\": {}", s, e))
}

/// Format a byte count with binary magnitude suffixes ("256 B", "1.5 MiB").
pub fn fmt_size(num: usize) -> String {
    const UNITS: [&str; 6] = ["B", "kiB", "MiB", "GiB", "TiB", "PiB"];
    let mut value = num as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", num)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("16"), Ok(16));
        assert_eq!(parse_int("0x10"), Ok(16));
        assert_eq!(parse_int("0X10"), Ok(16));
        assert_eq!(parse_int("0o20"), Ok(16));
        assert_eq!(parse_int("0b10000"), Ok(16));
        assert_eq!(parse_int(" 0x80000000 "), Ok(0x8000_0000));
        assert!(parse_int("not-a-number").is_err());
        assert!(parse_int("0xZZ").is_err());
    }

    #[test]
    fn test_fmt_size() {
        assert_eq!(fmt_size(0), "0 B");
        assert_eq!(fmt_size(256), "256 B");
        assert_eq!(fmt_size(1024), "1.0 kiB");
        assert_eq!(fmt_size(1536), "1.5 kiB");
        assert_eq!(fmt_size(5 * 1024 * 1024), "5.0 MiB");
    }
}
