//! Composable filters over the lazy element stream.
//!
//! A filter takes the upstream stream and the page context and returns a new
//! stream. Most filters rewrite elements as they pass; some buffer the whole
//! document first. The [`Composite`] chains the configured filters and is the
//! failure boundary: a broken document or filter never breaks the page.

mod composite;
mod context;
pub mod filters;
mod registry;

use thiserror::Error;

use crate::html::{Element, ParseError, Tag};

pub use composite::Composite;
pub use context::PageContext;
pub use registry::{FilterConstructor, FilterDeps, FilterRegistry};

pub type ElementStream<'a> = Box<dyn Iterator<Item = Result<Element, PipelineError>> + 'a>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("filter `{filter}` failed: {message}")]
    Filter {
        filter: &'static str,
        message: String,
    },
    #[error("unknown filter `{0}`")]
    UnknownFilter(String),
}

impl PipelineError {
    pub fn filter(filter: &'static str, message: impl Into<String>) -> Self {
        Self::Filter {
            filter,
            message: message.into(),
        }
    }
}

pub trait Filter: Send + Sync {
    /// Configuration key, also usable as a per-request switch.
    fn key(&self) -> &'static str;

    fn apply<'a>(&'a self, input: ElementStream<'a>, ctx: &'a PageContext) -> ElementStream<'a>;
}

/// Stream adapter that hands every tag to `visit` and passes everything on.
pub(crate) fn for_each_tag<'a, F>(input: ElementStream<'a>, mut visit: F) -> ElementStream<'a>
where
    F: FnMut(&mut Tag) -> Result<(), PipelineError> + 'a,
{
    Box::new(input.map(move |item| {
        let mut element = item?;
        if let Element::Tag(tag) = &mut element {
            visit(tag)?;
        }
        Ok(element)
    }))
}
