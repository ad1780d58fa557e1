//! Variable substitution pass applied to document text before parsing
//!
//! Documents may declare a flat `VARS` mapping; every `{{ NAME }}` placeholder
//! in the raw text is replaced by the variable's value, once, before the
//! structural parse. Expansion is never recursive: values containing
//! placeholders are inserted verbatim.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Substitute `{{ NAME }}` placeholders in `text` with values from `vars`.
///
/// A placeholder naming an undeclared variable is an error; unmatched `{{`
/// is left alone (the structural parser will complain if it matters).
pub fn render(text: &str, vars: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        return Err(Error::Parse(format!(
                            "undefined template variable \"{}\"",
                            name
                        )))
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitution() {
        let v = vars(&[("ADDR", "0x80000000"), ("NAME", "u-boot.imx")]);
        let out = render("FILE: {{ NAME }}\nADDR: {{ADDR}}\n", &v).unwrap();
        assert_eq!(out, "FILE: u-boot.imx\nADDR: 0x80000000\n");
    }

    #[test]
    fn test_undefined_variable() {
        assert!(render("{{ MISSING }}", &BTreeMap::new()).is_err());
    }

    #[test]
    fn test_not_recursive() {
        let v = vars(&[("A", "{{ B }}"), ("B", "x")]);
        assert_eq!(render("{{ A }}", &v).unwrap(), "{{ B }}");
    }
}
