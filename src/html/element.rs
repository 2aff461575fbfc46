//! Structural elements emitted by the tokenizer.
//!
//! Every element keeps the exact source bytes it was parsed from. Untouched
//! elements render back to those bytes unchanged, whatever the document's
//! encoding; once a filter modifies a tag it is marked dirty and re-serialized
//! from its parts, with untouched attributes copied from their original span.

use std::borrow::Cow;
use std::cell::OnceCell;

use thiserror::Error;

use super::entities::{decode_entities, escape_attribute};

/// Malformed markup that a filter tried to read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed attribute list in <{tag}> at byte {offset}: {reason}")]
pub struct ParseError {
    pub tag: String,
    pub offset: usize,
    pub reason: &'static str,
}

#[derive(Debug, Clone)]
pub enum Element {
    Tag(Tag),
    ClosingTag(ClosingTag),
    Comment(Comment),
    Junk(Junk),
}

impl Element {
    pub fn comment(body: &str) -> Self {
        Element::Comment(Comment {
            source: format!("<!--{body}-->").into_bytes(),
        })
    }

    /// The bytes of the original document this element was parsed from.
    /// Synthesized tags return an empty slice.
    pub fn source(&self) -> &[u8] {
        match self {
            Element::Tag(tag) => &tag.source,
            Element::ClosingTag(closing) => &closing.source,
            Element::Comment(comment) => &comment.source,
            Element::Junk(junk) => &junk.text,
        }
    }

    pub fn as_tag(&self) -> Option<&Tag> {
        match self {
            Element::Tag(tag) => Some(tag),
            _ => None,
        }
    }

    pub fn as_tag_mut(&mut self) -> Option<&mut Tag> {
        match self {
            Element::Tag(tag) => Some(tag),
            _ => None,
        }
    }

    pub fn is_closing(&self, name: &str) -> bool {
        matches!(self, Element::ClosingTag(closing) if closing.name == name)
    }

    pub fn render_into(&self, out: &mut Vec<u8>) -> Result<(), ParseError> {
        match self {
            Element::Tag(tag) => tag.render_into(out),
            other => {
                out.extend_from_slice(other.source());
                Ok(())
            }
        }
    }
}

/// One parsed attribute. Names are lowercased and values entity-decoded;
/// `raw` is the attribute's span in the source, echoed when re-serializing
/// a tag whose other attributes changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
    raw: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Tag {
    name: String,
    source: Vec<u8>,
    offset: usize,
    raw_attributes: Vec<u8>,
    parsed: OnceCell<Result<Vec<Attribute>, ParseError>>,
    overrides: Vec<(String, Option<String>)>,
    content: Vec<u8>,
    closing_tag: Option<String>,
    self_closing: bool,
    dirty: bool,
}

impl Tag {
    /// A synthesized tag with no source; always serialized from its parts.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            source: Vec::new(),
            offset: 0,
            raw_attributes: Vec::new(),
            parsed: OnceCell::new(),
            overrides: Vec::new(),
            content: Vec::new(),
            closing_tag: None,
            self_closing: false,
            dirty: true,
        }
    }

    /// A synthesized raw-text element such as `<script>` with its body.
    pub fn raw_text(name: &str, content: impl Into<Vec<u8>>) -> Self {
        let mut tag = Self::new(name);
        tag.content = content.into();
        tag.closing_tag = Some(format!("</{}>", tag.name));
        tag
    }

    pub(crate) fn parsed(
        name: String,
        source: &[u8],
        offset: usize,
        raw_attributes: &[u8],
        content: &[u8],
        closing_tag: Option<String>,
        self_closing: bool,
    ) -> Self {
        Self {
            name,
            source: source.to_vec(),
            offset,
            raw_attributes: raw_attributes.to_vec(),
            parsed: OnceCell::new(),
            overrides: Vec::new(),
            content: content.to_vec(),
            closing_tag,
            self_closing,
            dirty: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Raw-text body of a `<script>`/`<style>`, or `None` when it is not
    /// valid UTF-8 and so cannot be edited as text.
    pub fn content(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }

    pub fn closing_tag(&self) -> Option<&str> {
        self.closing_tag.as_deref()
    }

    pub fn set_content(&mut self, content: impl Into<Vec<u8>>) {
        self.content = content.into();
        self.dirty = true;
    }

    fn base_attributes(&self) -> Result<&[Attribute], ParseError> {
        self.parsed
            .get_or_init(|| parse_attributes(&self.raw_attributes, &self.name, self.offset))
            .as_ref()
            .map(Vec::as_slice)
            .map_err(Clone::clone)
    }

    /// Value of an attribute. The first occurrence of a duplicated name wins;
    /// a valueless attribute reads as an empty string.
    pub fn attr(&self, name: &str) -> Result<Option<&str>, ParseError> {
        if let Some((_, value)) = self.overrides.iter().find(|(key, _)| key == name) {
            return Ok(value.as_deref());
        }
        Ok(self
            .base_attributes()?
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_deref().unwrap_or("")))
    }

    pub fn has_attr(&self, name: &str) -> Result<bool, ParseError> {
        Ok(self.attr(name)?.is_some())
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        self.put_override(name, Some(value.into()));
    }

    pub fn remove_attr(&mut self, name: &str) {
        self.put_override(name, None);
    }

    fn put_override(&mut self, name: &str, value: Option<String>) {
        let name = name.to_ascii_lowercase();
        match self.overrides.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.overrides.push((name, value)),
        }
        self.dirty = true;
    }

    /// Effective attributes in document order, with overrides applied and
    /// newly added attributes appended.
    pub fn attributes(&self) -> Result<Vec<(&str, Option<&str>)>, ParseError> {
        let mut out: Vec<(&str, Option<&str>)> = Vec::new();
        for attr in self.base_attributes()? {
            if out.iter().any(|(name, _)| *name == attr.name) {
                continue;
            }
            match self.overrides.iter().find(|(key, _)| *key == attr.name) {
                Some((_, Some(value))) => out.push((attr.name.as_str(), Some(value.as_str()))),
                Some((_, None)) => {}
                None => out.push((attr.name.as_str(), attr.value.as_deref())),
            }
        }
        for (name, value) in &self.overrides {
            let Some(value) = value else { continue };
            if !out.iter().any(|(existing, _)| *existing == name.as_str()) {
                out.push((name.as_str(), Some(value.as_str())));
            }
        }
        Ok(out)
    }

    pub fn render_into(&self, out: &mut Vec<u8>) -> Result<(), ParseError> {
        if !self.dirty {
            out.extend_from_slice(&self.source);
            return Ok(());
        }

        out.push(b'<');
        out.extend_from_slice(self.name.as_bytes());
        let mut written: Vec<&str> = Vec::new();
        for attr in self.base_attributes()? {
            if written.contains(&attr.name.as_str()) {
                continue;
            }
            written.push(&attr.name);
            match self.overrides.iter().find(|(key, _)| *key == attr.name) {
                Some((name, Some(value))) => write_attribute(out, name, value),
                Some((_, None)) => {}
                None => {
                    out.push(b' ');
                    out.extend_from_slice(&attr.raw);
                }
            }
        }
        for (name, value) in &self.overrides {
            if let Some(value) = value
                && !written.contains(&name.as_str())
            {
                write_attribute(out, name, value);
            }
        }
        out.extend_from_slice(if self.self_closing { b" />" } else { b">" });
        out.extend_from_slice(&self.content);
        if let Some(closing) = &self.closing_tag {
            out.extend_from_slice(closing.as_bytes());
        }
        Ok(())
    }
}

fn write_attribute(out: &mut Vec<u8>, name: &str, value: &str) {
    let mut escaped = String::with_capacity(value.len());
    escape_attribute(value, &mut escaped);
    out.push(b' ');
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b"=\"");
    out.extend_from_slice(escaped.as_bytes());
    out.push(b'"');
}

#[derive(Debug, Clone)]
pub struct ClosingTag {
    pub(crate) name: String,
    pub(crate) source: Vec<u8>,
}

impl ClosingTag {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone)]
pub struct Comment {
    pub(crate) source: Vec<u8>,
}

impl Comment {
    /// Text between `<!--` and `-->`.
    pub fn body(&self) -> Cow<'_, str> {
        let body = self
            .source
            .strip_prefix(b"<!--")
            .and_then(|rest| rest.strip_suffix(b"-->"))
            .unwrap_or(&self.source);
        String::from_utf8_lossy(body)
    }
}

/// Text between constructs, kept as raw bytes.
#[derive(Debug, Clone)]
pub struct Junk {
    text: Vec<u8>,
}

impl Junk {
    pub(crate) fn new(text: &[u8]) -> Self {
        Self {
            text: text.to_vec(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.text
    }

    /// The text, with undecodable bytes replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.text)
    }

    pub fn set_text(&mut self, text: impl Into<Vec<u8>>) {
        self.text = text.into();
    }
}

fn is_name_byte(byte: u8) -> bool {
    !(byte.is_ascii_whitespace() || matches!(byte, b'=' | b'"' | b'\'' | b'/' | b'>' | b'<'))
}

fn parse_attributes(raw: &[u8], tag: &str, offset: usize) -> Result<Vec<Attribute>, ParseError> {
    let fail = |reason: &'static str| ParseError {
        tag: tag.to_string(),
        offset,
        reason,
    };

    let len = raw.len();
    let mut attributes = Vec::new();
    let mut i = 0;

    loop {
        while i < len && raw[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= len {
            break;
        }
        if raw[i] == b'/' {
            i += 1;
            continue;
        }

        let name_start = i;
        while i < len && is_name_byte(raw[i]) {
            i += 1;
        }
        if i == name_start {
            return Err(fail("expected attribute name"));
        }
        let name = String::from_utf8_lossy(&raw[name_start..i]).to_ascii_lowercase();
        let name_end = i;

        let mut lookahead = i;
        while lookahead < len && raw[lookahead].is_ascii_whitespace() {
            lookahead += 1;
        }
        if lookahead >= len || raw[lookahead] != b'=' {
            attributes.push(Attribute {
                name,
                value: None,
                raw: raw[name_start..name_end].to_vec(),
            });
            continue;
        }

        i = lookahead + 1;
        while i < len && raw[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= len {
            return Err(fail("missing attribute value"));
        }

        let value = match raw[i] {
            quote @ (b'"' | b'\'') => {
                let value_start = i + 1;
                let Some(rel) = memchr::memchr(quote, &raw[value_start..]) else {
                    return Err(fail("unterminated quoted value"));
                };
                i = value_start + rel + 1;
                &raw[value_start..value_start + rel]
            }
            _ => {
                let value_start = i;
                while i < len && !raw[i].is_ascii_whitespace() {
                    i += 1;
                }
                &raw[value_start..i]
            }
        };

        attributes.push(Attribute {
            name,
            value: Some(decode_entities(&String::from_utf8_lossy(value))),
            raw: raw[name_start..i].to_vec(),
        });
    }

    Ok(attributes)
}
