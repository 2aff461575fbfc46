use crate::html::Element;
use crate::pipeline::{ElementStream, Filter, PageContext, PipelineError};
use crate::service::transforms::{CssMinifier, TextTransform};

/// Elements whose text content is whitespace-sensitive.
const PRESERVE: &[&str] = &["pre", "textarea"];

/// Drops ordinary comments and collapses runs of whitespace in text.
#[derive(Debug, Default)]
pub struct MinifyHtmlFilter;

impl Filter for MinifyHtmlFilter {
    fn key(&self) -> &'static str {
        "minify_html"
    }

    fn apply<'a>(&'a self, input: ElementStream<'a>, _ctx: &'a PageContext) -> ElementStream<'a> {
        let mut preserved = 0usize;
        Box::new(input.filter_map(move |item| {
            let mut element = match item {
                Ok(element) => element,
                Err(err) => return Some(Err(err)),
            };
            match &mut element {
                Element::Tag(tag) if PRESERVE.contains(&tag.name()) && tag.closing_tag().is_none() => {
                    preserved += 1;
                }
                Element::ClosingTag(closing) if PRESERVE.contains(&closing.name()) => {
                    preserved = preserved.saturating_sub(1);
                }
                Element::Comment(comment) if !is_conditional(&comment.body()) => return None,
                Element::Junk(junk) if preserved == 0 => {
                    if let Some(collapsed) = collapse_whitespace(junk.bytes()) {
                        junk.set_text(collapsed);
                    }
                }
                _ => {}
            }
            Some(Ok::<_, PipelineError>(element))
        }))
    }
}

/// `<!--[if IE]>` style comments carry markup for old browsers.
fn is_conditional(body: &str) -> bool {
    body.starts_with("[if") || body.starts_with("<![endif]") || body.ends_with("<![endif]")
}

/// Collapse each whitespace run to one byte, keeping a newline when the
/// run had one. Only ASCII whitespace is touched, so text in any
/// ASCII-compatible encoding survives. `None` when nothing would change.
pub fn collapse_whitespace(text: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len());
    let mut changed = false;
    let mut rest = text;
    while let Some(start) = rest.iter().position(u8::is_ascii_whitespace) {
        out.extend_from_slice(&rest[..start]);
        let tail = &rest[start..];
        let len = tail
            .iter()
            .position(|byte| !byte.is_ascii_whitespace())
            .unwrap_or(tail.len());
        let run = &tail[..len];
        let kept: &[u8] = if run.contains(&b'\n') { b"\n" } else { b" " };
        changed |= run != kept;
        out.extend_from_slice(kept);
        rest = &tail[len..];
    }
    out.extend_from_slice(rest);
    changed.then_some(out)
}

/// Minifies `<style>` bodies.
#[derive(Debug, Default)]
pub struct MinifyInlineFilter {
    css: CssMinifier,
}

impl Filter for MinifyInlineFilter {
    fn key(&self) -> &'static str {
        "minify_inline"
    }

    fn apply<'a>(&'a self, input: ElementStream<'a>, _ctx: &'a PageContext) -> ElementStream<'a> {
        crate::pipeline::for_each_tag(input, move |tag| {
            if tag.name() != "style" {
                return Ok(());
            }
            let Some(css) = tag.content() else {
                return Ok(());
            };
            let minified = self.css.transform(css);
            if minified != css {
                let minified = minified.into_owned();
                tag.set_content(minified);
            }
            Ok(())
        })
    }
}
