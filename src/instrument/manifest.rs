// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Parsing of `instrument.sss` manifests.
//!
//! The manifest is a small XML document:
//!
//! ```xml
//! <SuperSimpleSampler>
//!   <meta>
//!     <name>Grand Piano</name>
//!     <author>Someone</author>
//!   </meta>
//!   <samples>
//!     <sample file="C3_064_01.wav" rootNote="48" loNote="36" hiNote="53"
//!             loVel="1" hiVel="64"/>
//!   </samples>
//! </SuperSimpleSampler>
//! ```
//!
//! The parser below covers exactly the XML subset these files use
//! (elements, attributes, text, comments, prologs, the five predefined
//! entities and numeric character references). Parsing is pure; file and
//! audio I/O happen in the loader.

/// One `<sample>` entry: a file plus its key/velocity rectangle.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestZone {
    /// Audio file path, relative to the manifest's directory.
    pub file: String,
    /// MIDI note at which the sample plays unshifted.
    pub root_note: u8,
    pub lo_note: u8,
    pub hi_note: u8,
    pub lo_vel: u8,
    pub hi_vel: u8,
}

/// A parsed manifest: optional metadata plus the declared zones.
#[derive(Debug, Clone, Default)]
pub struct InstrumentManifest {
    pub name: Option<String>,
    pub author: Option<String>,
    pub zones: Vec<ManifestZone>,
}

/// Error types for manifest parsing
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("expected root element <SuperSimpleSampler>, found <{0}>")]
    WrongRoot(String),

    #[error("<sample> element is missing the file attribute")]
    MissingFile,

    #[error("invalid value {value:?} for attribute {attribute}")]
    InvalidAttribute { attribute: String, value: String },
}

/// Parses an `instrument.sss` document.
pub fn parse_manifest(text: &str) -> Result<InstrumentManifest, ManifestError> {
    let root = Parser::new(text).parse_document()?;
    if root.name != "SuperSimpleSampler" {
        return Err(ManifestError::WrongRoot(root.name));
    }

    let mut manifest = InstrumentManifest::default();

    if let Some(meta) = root.child("meta") {
        manifest.name = meta.child("name").map(|e| e.text.trim().to_string());
        manifest.author = meta.child("author").map(|e| e.text.trim().to_string());
        manifest.name = manifest.name.filter(|n| !n.is_empty());
        manifest.author = manifest.author.filter(|a| !a.is_empty());
    }

    if let Some(samples) = root.child("samples") {
        for element in samples.children.iter().filter(|e| e.name == "sample") {
            let file = element
                .attribute("file")
                .filter(|f| !f.is_empty())
                .ok_or(ManifestError::MissingFile)?
                .to_string();

            manifest.zones.push(ManifestZone {
                file,
                root_note: note_attribute(element, "rootNote", 60)?,
                lo_note: note_attribute(element, "loNote", 0)?,
                hi_note: note_attribute(element, "hiNote", 127)?,
                lo_vel: note_attribute(element, "loVel", 1)?,
                hi_vel: note_attribute(element, "hiVel", 127)?,
            });
        }
    }

    Ok(manifest)
}

/// Reads a 0-127 attribute, falling back to `default` when absent.
fn note_attribute(element: &Element, name: &str, default: u8) -> Result<u8, ManifestError> {
    match element.attribute(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|v| (0..=127).contains(v))
            .map(|v| v as u8)
            .ok_or_else(|| ManifestError::InvalidAttribute {
                attribute: name.to_string(),
                value: value.to_string(),
            }),
    }
}

#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|e| e.name == name)
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

struct Parser<'a> {
    input: &'a [u8],
    text: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            input: text.as_bytes(),
            text,
            pos: 0,
        }
    }

    fn parse_document(mut self) -> Result<Element, ManifestError> {
        self.skip_misc();
        let root = self.parse_element()?;
        self.skip_misc();
        if self.pos < self.input.len() {
            return Err(self.error("content after root element"));
        }
        Ok(root)
    }

    fn error(&self, message: &str) -> ManifestError {
        let line = self.text[..self.pos.min(self.text.len())]
            .bytes()
            .filter(|&b| b == b'\n')
            .count()
            + 1;
        ManifestError::Syntax {
            line,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.input[self.pos..].starts_with(prefix.as_bytes())
    }

    fn expect(&mut self, prefix: &str) -> Result<(), ManifestError> {
        if self.starts_with(prefix) {
            self.pos += prefix.len();
            Ok(())
        } else {
            Err(self.error(&format!("expected {prefix:?}")))
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    /// Skips whitespace, comments, and prolog/doctype declarations.
    fn skip_misc(&mut self) {
        loop {
            self.skip_whitespace();
            if self.starts_with("<!--") {
                self.skip_until("-->");
            } else if self.starts_with("<?") {
                self.skip_until("?>");
            } else if self.starts_with("<!") {
                self.skip_until(">");
            } else {
                return;
            }
        }
    }

    fn skip_until(&mut self, terminator: &str) {
        match self.text[self.pos..].find(terminator) {
            Some(offset) => self.pos += offset + terminator.len(),
            None => self.pos = self.input.len(),
        }
    }

    fn parse_name(&mut self) -> Result<String, ManifestError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b':') {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.error("expected a name"));
        }
        Ok(self.text[start..self.pos].to_string())
    }

    fn parse_element(&mut self) -> Result<Element, ManifestError> {
        self.expect("<")?;
        let name = self.parse_name()?;
        let mut element = Element {
            name,
            ..Default::default()
        };

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'/') => {
                    self.expect("/>")?;
                    return Ok(element);
                }
                Some(b'>') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => {
                    let attr_name = self.parse_name()?;
                    self.skip_whitespace();
                    self.expect("=")?;
                    self.skip_whitespace();
                    let value = self.parse_attribute_value()?;
                    element.attributes.push((attr_name, value));
                }
                None => return Err(self.error("unterminated start tag")),
            }
        }

        // Content: text, children, comments, then the matching close tag.
        loop {
            if self.starts_with("</") {
                self.pos += 2;
                let close = self.parse_name()?;
                if close != element.name {
                    return Err(
                        self.error(&format!("mismatched close tag </{close}> in <{}>", element.name))
                    );
                }
                self.skip_whitespace();
                self.expect(">")?;
                return Ok(element);
            } else if self.starts_with("<!--") {
                self.skip_until("-->");
            } else if self.peek() == Some(b'<') {
                let child = self.parse_element()?;
                element.children.push(child);
            } else if self.peek().is_some() {
                let start = self.pos;
                while self.peek().is_some() && self.peek() != Some(b'<') {
                    self.pos += 1;
                }
                element.text.push_str(&decode_entities(&self.text[start..self.pos]));
            } else {
                return Err(self.error(&format!("unterminated element <{}>", element.name)));
            }
        }
    }

    fn parse_attribute_value(&mut self) -> Result<String, ManifestError> {
        let quote = match self.peek() {
            Some(q @ (b'"' | b'\'')) => q,
            _ => return Err(self.error("expected a quoted attribute value")),
        };
        self.pos += 1;
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == quote {
                let value = decode_entities(&self.text[start..self.pos]);
                self.pos += 1;
                return Ok(value);
            }
            self.pos += 1;
        }
        Err(self.error("unterminated attribute value"))
    }
}

/// Decodes the predefined XML entities and numeric character references.
fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let end = match rest.find(';') {
            Some(end) => end,
            None => break,
        };
        match &rest[1..end] {
            "amp" => out.push('&'),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            entity => {
                let code = entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()));
                match code.and_then(char::from_u32) {
                    Some(c) => out.push(c),
                    // Unknown entity: keep it verbatim.
                    None => out.push_str(&rest[..end + 1]),
                }
            }
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    out
}
