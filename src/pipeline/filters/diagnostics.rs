use serde::Serialize;

use crate::html::Element;
use crate::pipeline::{ElementStream, Filter, PageContext, PipelineError};

/// Whole-document statistics, exposed to the page as a script.
#[derive(Debug, Default)]
pub struct DiagnosticsFilter;

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct DocumentStats {
    pub elements: usize,
    pub tags: usize,
    pub closing_tags: usize,
    pub comments: usize,
    pub text_bytes: usize,
    pub modified_tags: usize,
    pub images: usize,
    pub scripts: usize,
    pub stylesheets: usize,
}

impl DocumentStats {
    fn observe(&mut self, element: &Element) {
        self.elements += 1;
        match element {
            Element::Tag(tag) => {
                self.tags += 1;
                if tag.is_dirty() {
                    self.modified_tags += 1;
                }
                match tag.name() {
                    "img" => self.images += 1,
                    "script" => self.scripts += 1,
                    "style" | "link" => self.stylesheets += 1,
                    _ => {}
                }
            }
            Element::ClosingTag(_) => self.closing_tags += 1,
            Element::Comment(_) => self.comments += 1,
            Element::Junk(junk) => self.text_bytes += junk.bytes().len(),
        }
    }

    fn script(&self) -> Result<String, PipelineError> {
        let json = serde_json::to_string(self)
            .map_err(|err| PipelineError::filter("diagnostics", err.to_string()))?;
        Ok(format!(
            "window.pagewrightDiagnostics={};",
            json.replace("</", "<\\/")
        ))
    }
}

impl Filter for DiagnosticsFilter {
    fn key(&self) -> &'static str {
        "diagnostics"
    }

    fn apply<'a>(&'a self, input: ElementStream<'a>, ctx: &'a PageContext) -> ElementStream<'a> {
        let mut pending = Some(input);
        let mut buffered = Vec::new().into_iter();
        Box::new(std::iter::from_fn(move || {
            if let Some(input) = pending.take() {
                let mut stats = DocumentStats::default();
                let mut items = Vec::new();
                for item in input {
                    match item {
                        Ok(element) => {
                            stats.observe(&element);
                            items.push(Ok(element));
                        }
                        Err(err) => {
                            items.push(Err(err));
                            break;
                        }
                    }
                }
                match stats.script() {
                    Ok(script) => ctx.push_script(script),
                    Err(err) => items.push(Err(err)),
                }
                buffered = items.into_iter();
            }
            buffered.next()
        }))
    }
}
