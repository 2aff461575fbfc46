//! Opaque content transforms applied by the services.

use std::borrow::Cow;

use bytes::Bytes;

use super::error::ServiceError;

pub trait TextTransform: Send + Sync {
    fn transform<'a>(&self, input: &'a str) -> Cow<'a, str>;
}

/// Conservative CSS minifier: drops comments and the whitespace that
/// carries no meaning around block and list punctuation.
#[derive(Debug, Default, Clone, Copy)]
pub struct CssMinifier;

impl TextTransform for CssMinifier {
    fn transform<'a>(&self, input: &'a str) -> Cow<'a, str> {
        let minified = minify_css(input);
        if minified == input {
            Cow::Borrowed(input)
        } else {
            Cow::Owned(minified)
        }
    }
}

fn is_punctuation(ch: char) -> bool {
    matches!(ch, '{' | '}' | ';' | ',')
}

fn minify_css(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut pending_space = false;

    while let Some(ch) = chars.next() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if ch == '/' && chars.peek() == Some(&'*') {
            chars.next();
            let keep = chars.peek() == Some(&'!');
            let mut comment = String::from("/*");
            let mut previous = '\0';
            for inner in chars.by_ref() {
                comment.push(inner);
                if previous == '*' && inner == '/' {
                    break;
                }
                previous = inner;
            }
            if keep {
                out.push_str(&comment);
                pending_space = false;
            } else {
                pending_space = true;
            }
            continue;
        }

        if pending_space {
            let after_punctuation = out.chars().next_back().is_some_and(is_punctuation);
            if !out.is_empty() && !after_punctuation && !is_punctuation(ch) {
                out.push(' ');
            }
            pending_space = false;
        }

        match ch {
            '"' | '\'' => {
                out.push(ch);
                while let Some(inner) = chars.next() {
                    out.push(inner);
                    if inner == '\\' {
                        if let Some(escaped) = chars.next() {
                            out.push(escaped);
                        }
                    } else if inner == ch {
                        break;
                    }
                }
            }
            '}' => {
                if out.ends_with(';') {
                    out.pop();
                }
                out.push('}');
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Default script transform: trailing whitespace and blank lines go,
/// except where a line break sits inside a template literal.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsMinifier;

impl TextTransform for JsMinifier {
    fn transform<'a>(&self, input: &'a str) -> Cow<'a, str> {
        let mut scanner = JsScanner::default();
        let mut kept: Vec<&str> = Vec::new();
        for line in input.lines() {
            let starts_in_template = scanner.in_template();
            scanner.scan_line(line);
            if scanner.in_template() {
                kept.push(line);
                continue;
            }
            let trimmed = line.trim_end();
            if !trimmed.is_empty() || starts_in_template {
                kept.push(trimmed);
            }
        }
        let minified = kept.join("\n");
        if minified == input {
            Cow::Borrowed(input)
        } else {
            Cow::Owned(minified)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsFrame {
    Template,
    /// `${ ... }` inside a template, with its open brace depth.
    Interpolation(usize),
}

/// Tracks template literals and block comments across line breaks.
#[derive(Debug, Default)]
struct JsScanner {
    frames: Vec<JsFrame>,
    block_comment: bool,
}

impl JsScanner {
    fn in_template(&self) -> bool {
        !self.block_comment && self.frames.last() == Some(&JsFrame::Template)
    }

    fn scan_line(&mut self, line: &str) {
        let mut chars = line.chars().peekable();
        while let Some(ch) = chars.next() {
            if self.block_comment {
                if ch == '*' && chars.next_if_eq(&'/').is_some() {
                    self.block_comment = false;
                }
                continue;
            }
            if self.frames.last() == Some(&JsFrame::Template) {
                match ch {
                    '\\' => {
                        chars.next();
                    }
                    '`' => {
                        self.frames.pop();
                    }
                    '$' if chars.next_if_eq(&'{').is_some() => {
                        self.frames.push(JsFrame::Interpolation(0));
                    }
                    _ => {}
                }
                continue;
            }
            match ch {
                '"' | '\'' => {
                    while let Some(next) = chars.next() {
                        match next {
                            '\\' => {
                                chars.next();
                            }
                            quote if quote == ch => break,
                            _ => {}
                        }
                    }
                }
                '/' if chars.next_if_eq(&'/').is_some() => break,
                '/' if chars.next_if_eq(&'*').is_some() => self.block_comment = true,
                '`' => self.frames.push(JsFrame::Template),
                '{' => {
                    if let Some(JsFrame::Interpolation(depth)) = self.frames.last_mut() {
                        *depth += 1;
                    }
                }
                '}' => match self.frames.last_mut() {
                    Some(JsFrame::Interpolation(0)) => {
                        self.frames.pop();
                    }
                    Some(JsFrame::Interpolation(depth)) => *depth -= 1,
                    _ => {}
                },
                _ => {}
            }
        }
    }
}

/// Image optimization hook. `stem` carries a density suffix such as `@2x`.
pub trait ImageFilter: Send + Sync {
    fn process(&self, image: Bytes, mime: &str, stem: Option<&str>) -> Result<Bytes, ServiceError>;
}

/// Serves images unchanged once they are known to decode.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughImages;

impl ImageFilter for PassthroughImages {
    fn process(&self, image: Bytes, mime: &str, _stem: Option<&str>) -> Result<Bytes, ServiceError> {
        if mime == "image/svg+xml" {
            return Ok(image);
        }
        imagesize::blob_size(&image)
            .map_err(|err| ServiceError::unprocessable(format!("{mime}: {err}")))?;
        Ok(image)
    }
}
