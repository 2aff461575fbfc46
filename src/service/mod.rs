//! The resource services behind rewritten URLs.

pub mod caching;
mod endpoint;
pub mod error;
pub mod response;
pub mod transforms;

pub use caching::{CachedOutput, CachingService};
pub use endpoint::{BUNDLE_SEPARATOR, DiagnosticsInfo, ServiceEndpoint};
pub use error::ServiceError;
pub use response::{Freshness, IncomingRequest, ServiceResponse};
pub use transforms::{CssMinifier, ImageFilter, JsMinifier, PassthroughImages, TextTransform};
