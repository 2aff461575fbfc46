//! Hand-written HTML tokenizer and the element model the filter pipeline
//! operates on.

mod element;
mod entities;
mod tokenizer;

pub use element::{Attribute, ClosingTag, Comment, Element, Junk, ParseError, Tag};
pub use tokenizer::{Tokenizer, tokenize};
