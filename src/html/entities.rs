//! Minimal HTML entity handling for attribute values.
//!
//! Decoding covers the named entities that show up in real attribute values
//! (`&amp;`, `&lt;`, `&gt;`, `&quot;`, `&apos;`, `&nbsp;`) and
//! semicolon-terminated numeric references. Anything else is left unchanged.

const MAX_HEX_DIGITS: usize = 6;
const MAX_DEC_DIGITS: usize = 7;

pub(crate) fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }

    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut copy_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'&' {
            i += 1;
            continue;
        }

        if let Some((decoded, consumed)) = decode_at(&input[i..]) {
            out.push_str(&input[copy_start..i]);
            out.push(decoded);
            i += consumed;
            copy_start = i;
        } else {
            i += 1;
        }
    }

    out.push_str(&input[copy_start..]);
    out
}

fn decode_at(rest: &str) -> Option<(char, usize)> {
    const NAMED: [(&str, char); 6] = [
        ("&amp;", '&'),
        ("&lt;", '<'),
        ("&gt;", '>'),
        ("&quot;", '"'),
        ("&apos;", '\''),
        ("&nbsp;", '\u{a0}'),
    ];

    for (name, ch) in NAMED {
        if rest.starts_with(name) {
            return Some((ch, name.len()));
        }
    }

    let body = rest.strip_prefix("&#")?;
    let (digits_start, radix, max_digits) = match body.as_bytes().first() {
        Some(b'x') | Some(b'X') => (1, 16, MAX_HEX_DIGITS),
        _ => (0, 10, MAX_DEC_DIGITS),
    };
    let digits = &body[digits_start..];
    let end = digits.find(';')?;
    if end == 0 || end > max_digits {
        return None;
    }
    let value = u32::from_str_radix(&digits[..end], radix).ok()?;
    let ch = char::from_u32(value)?;
    Some((ch, 2 + digits_start + end + 1))
}

/// Escape a value for use inside a double-quoted attribute.
pub(crate) fn escape_attribute(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
}
