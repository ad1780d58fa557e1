//! Flat device tree codec
//!
//! Decodes and encodes DTB blobs (header, memory reservation map, structure
//! block, strings block) and parses a practical subset of DTS source:
//! nested nodes, string / cell-list / byte-list / empty properties, and
//! comments. Enough to merge a document-supplied overlay into a base tree
//! and re-encode it.

use crate::codec::{align_up, codec_err};
use crate::error::Result;
use crate::util::parse_int;

/// DTB header magic
const FDT_MAGIC: u32 = 0xD00D_FEED;
/// DTB header size in bytes
const HEADER_SIZE: usize = 40;
/// Version written when the source blob does not carry one
const DEFAULT_VERSION: u32 = 17;
/// Oldest compatible version advertised on export
const LAST_COMP_VERSION: u32 = 16;

/// Structure block tokens
const FDT_BEGIN_NODE: u32 = 1;
const FDT_END_NODE: u32 = 2;
const FDT_PROP: u32 = 3;
const FDT_NOP: u32 = 4;
const FDT_END: u32 = 9;

/// One node of the tree: properties then children, both in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FdtNode {
    /// Node name ("" for the root)
    pub name: String,
    /// Property name/value pairs
    pub props: Vec<(String, Vec<u8>)>,
    /// Child nodes
    pub children: Vec<FdtNode>,
}

impl FdtNode {
    fn named(name: &str) -> Self {
        FdtNode {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Set or replace a property.
    pub fn set_prop(&mut self, name: &str, value: Vec<u8>) {
        match self.props.iter_mut().find(|(n, _)| n == name) {
            Some(prop) => prop.1 = value,
            None => self.props.push((name.to_string(), value)),
        }
    }

    /// Look up a child node by name.
    pub fn child(&self, name: &str) -> Option<&FdtNode> {
        self.children.iter().find(|c| c.name == name)
    }

    fn merge_from(&mut self, other: &FdtNode) {
        for (name, value) in &other.props {
            self.set_prop(name, value.clone());
        }
        for node in &other.children {
            match self.children.iter_mut().find(|c| c.name == node.name) {
                Some(child) => child.merge_from(node),
                None => self.children.push(node.clone()),
            }
        }
    }
}

/// A device tree: root node plus blob-level metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fdt {
    /// Root node
    pub root: FdtNode,
    /// Blob version, if the source carried one
    pub version: Option<u32>,
    /// Physical CPU id booted on
    pub boot_cpuid: u32,
    /// Memory reservation entries (address, size)
    pub reserved: Vec<(u64, u64)>,
}

impl Fdt {
    /// Merge an overlay into this tree. Overlay properties replace existing
    /// ones; nodes are merged recursively, new nodes appended.
    pub fn merge(&mut self, overlay: &Fdt) {
        self.root.merge_from(&overlay.root);
    }

    // ------------------------------------------------------------------
    // DTB decode
    // ------------------------------------------------------------------

    /// Decode a DTB blob.
    pub fn parse_dtb(data: &[u8]) -> Result<Self> {
        let be32 = |pos: usize| -> Result<u32> {
            data.get(pos..pos + 4)
                .map(|b| u32::from_be_bytes(b.try_into().unwrap()))
                .ok_or_else(|| codec_err("fdt", "truncated blob"))
        };

        if data.len() < HEADER_SIZE || be32(0)? != FDT_MAGIC {
            return Err(codec_err("fdt", "missing DTB magic"));
        }
        let total = be32(4)? as usize;
        let off_struct = be32(8)? as usize;
        let off_strings = be32(12)? as usize;
        let off_rsvmap = be32(16)? as usize;
        let version = be32(20)?;
        let boot_cpuid = be32(28)?;
        if total > data.len() || off_struct >= total || off_strings > total {
            return Err(codec_err("fdt", "header offsets out of bounds"));
        }
        let strings = &data[off_strings..total];

        // memory reservation map: (u64, u64) pairs, (0, 0) terminated
        let mut reserved = Vec::new();
        let mut pos = off_rsvmap;
        loop {
            if pos + 16 > total {
                return Err(codec_err("fdt", "unterminated reservation map"));
            }
            let addr = u64::from_be_bytes(data[pos..pos + 8].try_into().unwrap());
            let size = u64::from_be_bytes(data[pos + 8..pos + 16].try_into().unwrap());
            pos += 16;
            if addr == 0 && size == 0 {
                break;
            }
            reserved.push((addr, size));
        }

        // structure block
        let mut pos = off_struct;
        let mut stack: Vec<FdtNode> = Vec::new();
        let mut root: Option<FdtNode> = None;

        loop {
            let token = be32(pos)?;
            pos += 4;
            match token {
                FDT_BEGIN_NODE => {
                    if pos >= total {
                        return Err(codec_err("fdt", "truncated structure block"));
                    }
                    let name_end = data[pos..total]
                        .iter()
                        .position(|&b| b == 0)
                        .ok_or_else(|| codec_err("fdt", "unterminated node name"))?;
                    let name = String::from_utf8_lossy(&data[pos..pos + name_end]).into_owned();
                    pos = align_up(pos + name_end + 1, 4);
                    stack.push(FdtNode::named(&name));
                }
                FDT_END_NODE => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| codec_err("fdt", "unbalanced node end"))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => root = Some(node),
                    }
                }
                FDT_PROP => {
                    let len = be32(pos)? as usize;
                    let name_off = be32(pos + 4)? as usize;
                    pos += 8;
                    if pos + len > total {
                        return Err(codec_err("fdt", "property value out of bounds"));
                    }
                    let name_end = strings
                        .get(name_off..)
                        .and_then(|s| s.iter().position(|&b| b == 0))
                        .ok_or_else(|| codec_err("fdt", "unterminated property name"))?;
                    let name =
                        String::from_utf8_lossy(&strings[name_off..name_off + name_end])
                            .into_owned();
                    let value = data[pos..pos + len].to_vec();
                    pos = align_up(pos + len, 4);
                    stack
                        .last_mut()
                        .ok_or_else(|| codec_err("fdt", "property outside any node"))?
                        .props
                        .push((name, value));
                }
                FDT_NOP => {}
                FDT_END => break,
                other => {
                    return Err(codec_err("fdt", format!("unknown token 0x{:08X}", other)))
                }
            }
        }

        if !stack.is_empty() {
            return Err(codec_err("fdt", "unclosed node at end of structure block"));
        }
        let root = root.ok_or_else(|| codec_err("fdt", "blob has no root node"))?;

        Ok(Fdt {
            root,
            version: if version == 0 { None } else { Some(version) },
            boot_cpuid,
            reserved,
        })
    }

    // ------------------------------------------------------------------
    // DTB encode
    // ------------------------------------------------------------------

    /// Encode the tree as a DTB blob. An unset version defaults to 17.
    pub fn to_dtb(&self) -> Vec<u8> {
        let mut strings: Vec<u8> = Vec::new();
        let mut structure: Vec<u8> = Vec::new();

        fn string_offset(strings: &mut Vec<u8>, name: &str) -> u32 {
            let needle = name.as_bytes();
            let mut pos = 0;
            while pos < strings.len() {
                let end = pos + strings[pos..].iter().position(|&b| b == 0).unwrap();
                if &strings[pos..end] == needle {
                    return pos as u32;
                }
                pos = end + 1;
            }
            let off = strings.len() as u32;
            strings.extend_from_slice(needle);
            strings.push(0);
            off
        }

        fn emit(node: &FdtNode, structure: &mut Vec<u8>, strings: &mut Vec<u8>) {
            structure.extend_from_slice(&FDT_BEGIN_NODE.to_be_bytes());
            structure.extend_from_slice(node.name.as_bytes());
            structure.push(0);
            structure.resize(align_up(structure.len(), 4), 0);
            for (name, value) in &node.props {
                let name_off = string_offset(strings, name);
                structure.extend_from_slice(&FDT_PROP.to_be_bytes());
                structure.extend_from_slice(&(value.len() as u32).to_be_bytes());
                structure.extend_from_slice(&name_off.to_be_bytes());
                structure.extend_from_slice(value);
                structure.resize(align_up(structure.len(), 4), 0);
            }
            for child in &node.children {
                emit(child, structure, strings);
            }
            structure.extend_from_slice(&FDT_END_NODE.to_be_bytes());
        }

        emit(&self.root, &mut structure, &mut strings);
        structure.extend_from_slice(&FDT_END.to_be_bytes());

        let off_rsvmap = HEADER_SIZE;
        let rsvmap_len = (self.reserved.len() + 1) * 16;
        let off_struct = off_rsvmap + rsvmap_len;
        let off_strings = off_struct + structure.len();
        let total = off_strings + strings.len();

        let mut out = Vec::with_capacity(total);
        for field in [
            FDT_MAGIC,
            total as u32,
            off_struct as u32,
            off_strings as u32,
            off_rsvmap as u32,
            self.version.unwrap_or(DEFAULT_VERSION),
            LAST_COMP_VERSION,
            self.boot_cpuid,
            strings.len() as u32,
            structure.len() as u32,
        ] {
            out.extend_from_slice(&field.to_be_bytes());
        }
        for (addr, size) in &self.reserved {
            out.extend_from_slice(&addr.to_be_bytes());
            out.extend_from_slice(&size.to_be_bytes());
        }
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&structure);
        out.extend_from_slice(&strings);
        out
    }

    // ------------------------------------------------------------------
    // DTS subset parse
    // ------------------------------------------------------------------

    /// Parse DTS source text (subset: see module docs).
    pub fn parse_dts(text: &str) -> Result<Self> {
        let mut parser = DtsParser::new(text);
        parser.skip_trivia();
        // optional "/dts-v1/;" header
        if parser.eat("/dts-v1/") {
            parser.skip_trivia();
            if !parser.eat(";") {
                return Err(parser.error("expected ';' after /dts-v1/"));
            }
            parser.skip_trivia();
        }
        if !parser.eat("/") {
            return Err(parser.error("expected root node '/'"));
        }
        parser.skip_trivia();
        if !parser.eat("{") {
            return Err(parser.error("expected '{' after '/'"));
        }
        let mut root = FdtNode::default();
        parser.node_body(&mut root)?;
        parser.skip_trivia();
        if !parser.eat(";") {
            return Err(parser.error("expected ';' after root node"));
        }
        parser.skip_trivia();
        if !parser.at_end() {
            return Err(parser.error("trailing content after root node"));
        }
        Ok(Fdt {
            root,
            version: None,
            boot_cpuid: 0,
            reserved: Vec::new(),
        })
    }
}

/// Hand-rolled recursive-descent parser for the DTS subset.
struct DtsParser<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> DtsParser<'a> {
    fn new(text: &'a str) -> Self {
        DtsParser { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn error(&self, msg: &str) -> crate::error::Error {
        let line = self.text[..self.pos].lines().count().max(1);
        codec_err("dts", format!("line {}: {}", line, msg))
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            let rest = self.rest();
            if let Some(stripped) = rest.strip_prefix(char::is_whitespace) {
                self.pos += rest.len() - stripped.len();
            } else if rest.starts_with("//") {
                let len = rest.find('\n').map_or(rest.len(), |i| i + 1);
                self.pos += len;
            } else if rest.starts_with("/*") {
                let len = rest.find("*/").map_or(rest.len(), |i| i + 2);
                self.pos += len;
            } else {
                break;
            }
        }
    }

    fn ident(&mut self) -> Option<&'a str> {
        let rest = self.rest();
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || ",._+-@#?".contains(c)))
            .unwrap_or(rest.len());
        if end == 0 {
            None
        } else {
            self.pos += end;
            Some(&rest[..end])
        }
    }

    /// Parse statements until the closing '}' (consumed).
    fn node_body(&mut self, node: &mut FdtNode) -> Result<()> {
        loop {
            self.skip_trivia();
            if self.eat("}") {
                return Ok(());
            }
            let name = self
                .ident()
                .ok_or_else(|| self.error("expected property or node name"))?
                .to_string();
            self.skip_trivia();

            if self.eat("{") {
                let mut child = FdtNode::named(&name);
                self.node_body(&mut child)?;
                self.skip_trivia();
                if !self.eat(";") {
                    return Err(self.error("expected ';' after node"));
                }
                node.children.push(child);
            } else if self.eat("=") {
                let value = self.prop_value()?;
                self.skip_trivia();
                if !self.eat(";") {
                    return Err(self.error("expected ';' after property"));
                }
                node.set_prop(&name, value);
            } else if self.eat(";") {
                node.set_prop(&name, Vec::new());
            } else {
                return Err(self.error("expected '{', '=' or ';'"));
            }
        }
    }

    /// Parse a property value: comma-separated strings, cell lists, byte lists.
    fn prop_value(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia();
            if self.eat("\"") {
                let rest = self.rest();
                let end = rest
                    .find('"')
                    .ok_or_else(|| self.error("unterminated string"))?;
                out.extend_from_slice(rest[..end].as_bytes());
                out.push(0);
                self.pos += end + 1;
            } else if self.eat("<") {
                loop {
                    self.skip_trivia();
                    if self.eat(">") {
                        break;
                    }
                    let tok = self
                        .ident()
                        .ok_or_else(|| self.error("expected cell value"))?;
                    let cell = parse_int(tok).map_err(|e| self.error(&e))?;
                    out.extend_from_slice(&(cell as u32).to_be_bytes());
                }
            } else if self.eat("[") {
                loop {
                    self.skip_trivia();
                    if self.eat("]") {
                        break;
                    }
                    let tok = self
                        .ident()
                        .ok_or_else(|| self.error("expected byte value"))?;
                    let byte = u8::from_str_radix(tok, 16)
                        .map_err(|e| self.error(&format!("invalid byte \"{}\": {}", tok, e)))?;
                    out.push(byte);
                }
            } else {
                return Err(self.error("expected string, cell list, or byte list"));
            }
            self.skip_trivia();
            if !self.eat(",") {
                return Ok(out);
            }
        }
    }
}
