//! Orchestrates a filter chain over one document.
//!
//! The composite is the failure boundary for document rewriting. A filter
//! that reports an error is dropped and the chain is rerun without it; a
//! parse error or a panic anywhere in the chain yields the original input.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, warn};
use url::Url;

use super::context::PageContext;
use super::{ElementStream, Filter, PipelineError};
use crate::html::{Element, Tag, tokenize};
use crate::protocol::Switches;

const METRIC_FILTER_FAILURE: &str = "pagewright_filter_failure_total";
const METRIC_DOCUMENT_FALLBACK: &str = "pagewright_document_fallback_total";
const METRIC_DOCUMENT_MS: &str = "pagewright_document_ms";

/// A configured filter and whether it runs when no switch says otherwise.
struct Slot {
    filter: Arc<dyn Filter>,
    enabled: bool,
}

pub struct Composite {
    slots: Vec<Slot>,
    max_bytes: usize,
    timing_comment: bool,
}

impl Composite {
    /// Filters run in the given order. Each pair carries the filter's
    /// default enablement.
    pub fn new(filters: impl IntoIterator<Item = (Arc<dyn Filter>, bool)>) -> Self {
        Self {
            slots: filters
                .into_iter()
                .map(|(filter, enabled)| Slot { filter, enabled })
                .collect(),
            max_bytes: usize::MAX,
            timing_comment: false,
        }
    }

    /// Documents larger than this pass through untouched.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_timing_comment(mut self, timing_comment: bool) -> Self {
        self.timing_comment = timing_comment;
        self
    }

    pub fn keys(&self) -> Vec<&'static str> {
        self.slots.iter().map(|slot| slot.filter.key()).collect()
    }

    /// Filters that run for a request carrying `switches`.
    pub fn active(&self, switches: &Switches) -> Vec<&dyn Filter> {
        self.slots
            .iter()
            .filter(|slot| switches.is_on(slot.filter.key(), slot.enabled))
            .map(|slot| slot.filter.as_ref())
            .collect()
    }

    /// Rewrite `document`, or return it unchanged when rewriting is switched
    /// off, the document is too large, or the chain cannot complete. The
    /// document is a byte buffer in whatever encoding the page uses.
    pub fn process(&self, document: &[u8], page_url: &Url, switches: &Switches) -> Vec<u8> {
        if !switches.enabled() {
            return document.to_vec();
        }
        if document.len() > self.max_bytes {
            debug!(
                target = "pipeline::composite",
                op = "process",
                result = "oversized",
                bytes = document.len(),
                max_bytes = self.max_bytes,
                "Passing oversized document through"
            );
            return document.to_vec();
        }

        let started = Instant::now();
        let mut active = self.active(switches);
        loop {
            let ctx = PageContext::new(page_url.clone(), switches.clone());
            let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
                let rendered = render(&active, document, &ctx)?;
                rendered.finish(ctx.take_scripts())
            }));

            let err = match attempt {
                Ok(Ok(mut rendered)) => {
                    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                    if self.timing_comment || switches.debug() {
                        let comment = Element::comment(&format!(
                            " pagewright: {elapsed_ms:.2} ms, {} filters ",
                            active.len()
                        ));
                        rendered.extend_from_slice(comment.source());
                    }
                    histogram!(METRIC_DOCUMENT_MS).record(elapsed_ms);
                    return rendered;
                }
                Ok(Err(err)) => err,
                Err(_) => {
                    return fallback(document, page_url, "panic", "Filter chain panicked");
                }
            };

            match err {
                PipelineError::Filter { filter, ref message } => {
                    counter!(METRIC_FILTER_FAILURE, "filter" => filter).increment(1);
                    warn!(
                        target = "pipeline::composite",
                        op = "process",
                        result = "filter_failed",
                        filter,
                        error = %message,
                        page = %page_url,
                        "Skipping failed filter"
                    );
                    let before = active.len();
                    active.retain(|candidate| candidate.key() != filter);
                    if active.len() == before {
                        return fallback(document, page_url, "filter_failed", "Unattributed filter failure");
                    }
                }
                err => {
                    warn!(
                        target = "pipeline::composite",
                        op = "process",
                        result = "parse_failed",
                        error = %err,
                        page = %page_url,
                        "Document could not be rewritten"
                    );
                    return fallback(document, page_url, "parse_failed", "Serving original document");
                }
            }
        }
    }
}

/// Output of one pass, with the offset of the last `</body>` element.
struct Rendered {
    out: Vec<u8>,
    body_close: Option<usize>,
}

impl Rendered {
    /// Emit queued scripts as one element before the last `</body>`, or at
    /// the end when the document has none.
    fn finish(mut self, scripts: Vec<String>) -> Result<Vec<u8>, PipelineError> {
        if scripts.is_empty() {
            return Ok(self.out);
        }
        let mut element = Vec::new();
        Element::Tag(Tag::raw_text("script", scripts.join("\n"))).render_into(&mut element)?;
        let at = self.body_close.unwrap_or(self.out.len());
        self.out.splice(at..at, element);
        Ok(self.out)
    }
}

fn render(filters: &[&dyn Filter], document: &[u8], ctx: &PageContext) -> Result<Rendered, PipelineError> {
    let mut stream: ElementStream<'_> = Box::new(tokenize(document).map(Ok));
    for filter in filters {
        stream = filter.apply(stream, ctx);
    }
    let mut rendered = Rendered {
        out: Vec::with_capacity(document.len()),
        body_close: None,
    };
    for element in stream {
        let element = element?;
        if element.is_closing("body") {
            rendered.body_close = Some(rendered.out.len());
        }
        element.render_into(&mut rendered.out)?;
    }
    Ok(rendered)
}

fn fallback(document: &[u8], page_url: &Url, reason: &'static str, message: &str) -> Vec<u8> {
    counter!(METRIC_DOCUMENT_FALLBACK, "reason" => reason).increment(1);
    debug!(
        target = "pipeline::composite",
        op = "fallback",
        result = reason,
        page = %page_url,
        "{message}"
    );
    document.to_vec()
}
