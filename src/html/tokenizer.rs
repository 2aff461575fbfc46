//! Lazy, gap-free HTML tokenizer.
//!
//! Recognized constructs, tried left to right at each `<`: comments,
//! `<script>`/`<style>` raw-text elements (body captured verbatim up to the
//! matching close tag), closing tags, and ordinary tags. Everything else is
//! emitted as [`Element::Junk`], so concatenating the sources of all emitted
//! elements reproduces the input exactly.
//!
//! Attribute lists are only located here; they are parsed on first access
//! (see [`Tag::attr`]).

use memchr::{memchr, memmem};

use super::element::{ClosingTag, Comment, Element, Junk, Tag};

const COMMENT_START: &[u8] = b"<!--";
const COMMENT_END: &[u8] = b"-->";
const RAW_TEXT_ELEMENTS: [&str; 2] = ["script", "style"];

fn is_tag_name_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b':')
}

fn starts_with_ignore_ascii_case_at(haystack: &[u8], start: usize, needle: &[u8]) -> bool {
    haystack.len() >= start + needle.len()
        && haystack[start..start + needle.len()].eq_ignore_ascii_case(needle)
}

/// Tag names are restricted to ASCII name bytes.
fn lowercase_name(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).to_ascii_lowercase()
}

/// Tokenize a complete document. The buffer need not be valid UTF-8.
pub fn tokenize(input: &[u8]) -> Tokenizer<'_> {
    Tokenizer { input, pos: 0 }
}

/// Forward-only iterator over the elements of a buffered document.
#[derive(Debug)]
pub struct Tokenizer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Iterator for Tokenizer<'_> {
    type Item = Element;

    fn next(&mut self) -> Option<Element> {
        if self.pos >= self.input.len() {
            return None;
        }

        let start = self.pos;
        let bytes = self.input;

        if bytes[start] == b'<'
            && let Some((element, end)) = self.match_construct(start)
        {
            self.pos = end;
            return Some(element);
        }

        // Junk runs up to the next `<`. An unmatched `<` is consumed as junk so
        // the scan always makes progress.
        let search_from = if bytes[start] == b'<' { start + 1 } else { start };
        let end = memchr(b'<', &bytes[search_from..])
            .map(|rel| search_from + rel)
            .unwrap_or(bytes.len());
        self.pos = end;
        Some(Element::Junk(Junk::new(&bytes[start..end])))
    }
}

impl Tokenizer<'_> {
    fn match_construct(&self, start: usize) -> Option<(Element, usize)> {
        let bytes = self.input;

        if bytes[start..].starts_with(COMMENT_START) {
            let body_start = start + COMMENT_START.len();
            let rel = memmem::find(&bytes[body_start..], COMMENT_END)?;
            let end = body_start + rel + COMMENT_END.len();
            let comment = Comment {
                source: bytes[start..end].to_vec(),
            };
            return Some((Element::Comment(comment), end));
        }

        let next = *bytes.get(start + 1)?;
        if next == b'/' {
            return self.match_closing_tag(start);
        }
        if next.is_ascii_alphabetic() {
            return self.match_tag(start);
        }
        None
    }

    fn match_closing_tag(&self, start: usize) -> Option<(Element, usize)> {
        let bytes = self.input;
        let name_start = start + 2;
        if !bytes.get(name_start)?.is_ascii_alphabetic() {
            return None;
        }
        let mut i = name_start;
        while i < bytes.len() && is_tag_name_byte(bytes[i]) {
            i += 1;
        }
        let name = lowercase_name(&bytes[name_start..i]);
        let gt = i + memchr(b'>', &bytes[i..])?;
        let end = gt + 1;
        let closing = ClosingTag {
            name,
            source: bytes[start..end].to_vec(),
        };
        Some((Element::ClosingTag(closing), end))
    }

    fn match_tag(&self, start: usize) -> Option<(Element, usize)> {
        let bytes = self.input;
        let name_start = start + 1;
        let mut i = name_start;
        while i < bytes.len() && is_tag_name_byte(bytes[i]) {
            i += 1;
        }
        match bytes.get(i) {
            Some(b) if b.is_ascii_whitespace() || *b == b'>' || *b == b'/' => {}
            _ => return None,
        }
        let name = lowercase_name(&bytes[name_start..i]);
        let gt = find_tag_end(bytes, i)?;
        let raw_attributes = &bytes[i..gt];
        let self_closing = raw_attributes.trim_ascii_end().ends_with(b"/");

        if !RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
            let end = gt + 1;
            let tag = Tag::parsed(
                name,
                &bytes[start..end],
                start,
                raw_attributes,
                b"",
                None,
                self_closing,
            );
            return Some((Element::Tag(tag), end));
        }

        let body_start = gt + 1;
        let close_needle = format!("</{name}");
        let (content_end, end) = find_raw_text_close(bytes, body_start, close_needle.as_bytes())
            .unwrap_or((bytes.len(), bytes.len()));
        let closing_tag =
            (content_end < end).then(|| String::from_utf8_lossy(&bytes[content_end..end]).into_owned());
        let tag = Tag::parsed(
            name,
            &bytes[start..end],
            start,
            raw_attributes,
            &bytes[body_start..content_end],
            closing_tag,
            self_closing,
        );
        Some((Element::Tag(tag), end))
    }
}

/// Index of the `>` closing a start tag, honoring quoted attribute values.
fn find_tag_end(bytes: &[u8], mut i: usize) -> Option<usize> {
    let mut expect_value = false;
    while i < bytes.len() {
        match bytes[i] {
            b'>' => return Some(i),
            b'=' => {
                expect_value = true;
                i += 1;
            }
            quote @ (b'"' | b'\'') if expect_value => {
                let rel = memchr(quote, &bytes[i + 1..])?;
                i += rel + 2;
                expect_value = false;
            }
            b if b.is_ascii_whitespace() => i += 1,
            _ => {
                expect_value = false;
                i += 1;
            }
        }
    }
    None
}

/// Locate `</script` / `</style` (case-insensitive) followed by optional
/// whitespace and `>`. Returns `(content_end, element_end)`.
fn find_raw_text_close(bytes: &[u8], from: usize, needle: &[u8]) -> Option<(usize, usize)> {
    let n = needle.len();
    let mut i = from;
    while i + n <= bytes.len() {
        i += memchr(b'<', &bytes[i..])?;
        if starts_with_ignore_ascii_case_at(bytes, i, needle) {
            let mut k = i + n;
            while k < bytes.len() && bytes[k].is_ascii_whitespace() {
                k += 1;
            }
            if k < bytes.len() && bytes[k] == b'>' {
                return Some((i, k + 1));
            }
        }
        i += 1;
    }
    None
}
