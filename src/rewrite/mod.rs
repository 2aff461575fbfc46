//! URL and inlining decisions shared by the document filters and the services.

mod allowlist;
mod css;
mod inline;
mod rewriter;
mod srcset;

pub use allowlist::AllowList;
pub use css::rewrite_css_urls;
pub use inline::{InlineCache, data_url};
pub use rewriter::{Eligible, Rewrite, UrlRewriter};
pub use srcset::rewrite_srcset;
