//! `url(...)` references in CSS text.

use std::borrow::Cow;

use memchr::memmem;

/// Replace every `url(...)` reference for which `rewrite` returns a new value.
/// Quoting is preserved; unquoted values that need it gain double quotes.
pub fn rewrite_css_urls<'a>(
    css: &'a str,
    mut rewrite: impl FnMut(&str) -> Option<String>,
) -> Cow<'a, str> {
    let lower = css.to_ascii_lowercase();
    let bytes = css.as_bytes();
    let mut out = String::new();
    let mut copied = 0;

    for start in memmem::find_iter(lower.as_bytes(), b"url(") {
        if start < copied {
            continue;
        }
        if start > 0 && is_ident_byte(bytes[start - 1]) {
            continue;
        }
        let Some(reference) = parse_reference(css, start + 4) else {
            break;
        };
        let Some(replacement) = rewrite(reference.value) else {
            continue;
        };

        out.push_str(&css[copied..reference.value_start]);
        match reference.quote {
            Some(_) => out.push_str(&replacement),
            None if needs_quotes(&replacement) => {
                out.push('"');
                out.push_str(&replacement);
                out.push('"');
            }
            None => out.push_str(&replacement),
        }
        copied = reference.value_end;
    }

    if copied == 0 {
        return Cow::Borrowed(css);
    }
    out.push_str(&css[copied..]);
    Cow::Owned(out)
}

struct Reference<'a> {
    value: &'a str,
    value_start: usize,
    value_end: usize,
    quote: Option<u8>,
}

fn parse_reference(css: &str, open: usize) -> Option<Reference<'_>> {
    let bytes = css.as_bytes();
    let mut cursor = open;
    while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
        cursor += 1;
    }
    let quote = match bytes.get(cursor) {
        Some(&quote @ (b'"' | b'\'')) => Some(quote),
        Some(_) => None,
        None => return None,
    };

    let (value_start, value_end) = match quote {
        Some(quote) => {
            let start = cursor + 1;
            let end = start + memchr::memchr(quote, &bytes[start..])?;
            (start, end)
        }
        None => {
            let close = cursor + memchr::memchr(b')', &bytes[cursor..])?;
            let value = css[cursor..close].trim_end();
            (cursor, cursor + value.len())
        }
    };

    Some(Reference {
        value: &css[value_start..value_end],
        value_start,
        value_end,
        quote,
    })
}

fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_'
}

fn needs_quotes(value: &str) -> bool {
    value
        .bytes()
        .any(|byte| byte.is_ascii_whitespace() || matches!(byte, b'(' | b')' | b'"' | b'\''))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upper(value: &str) -> Option<String> {
        Some(value.to_uppercase())
    }

    #[test]
    fn rewrites_all_quoting_styles() {
        let css = r#"a{background:url(a.png)} b{background:URL( "b.png" )} c{src:url('c.woff')}"#;
        assert_eq!(
            rewrite_css_urls(css, upper),
            r#"a{background:url(A.PNG)} b{background:URL( "B.PNG" )} c{src:url('C.WOFF')}"#
        );
    }

    #[test]
    fn untouched_css_is_borrowed() {
        let css = "a{color:red}";
        assert!(matches!(rewrite_css_urls(css, upper), Cow::Borrowed(_)));
        let declined = rewrite_css_urls("a{background:url(x.png)}", |_| None);
        assert!(matches!(declined, Cow::Borrowed(_)));
    }

    #[test]
    fn unquoted_replacements_gain_quotes_when_needed() {
        let css = "a{background:url(x.png)}";
        assert_eq!(
            rewrite_css_urls(css, |_| Some("has space.png".to_string())),
            "a{background:url(\"has space.png\")}"
        );
    }

    #[test]
    fn identifiers_ending_in_url_are_not_references() {
        let css = "a{--myurl(x)}";
        let mut seen = Vec::new();
        let _ = rewrite_css_urls(css, |value| {
            seen.push(value.to_string());
            None
        });
        assert!(seen.is_empty());
    }

    #[test]
    fn unterminated_reference_stops_scanning() {
        let css = "a{background:url(x.png";
        assert_eq!(rewrite_css_urls(css, upper), css);
    }
}
