//! Domain types shared by the pipeline, the protocol and the services.

mod resource;
mod types;

pub use resource::{CacheSalt, Dependency, Resource, ResourceRetriever};
pub use types::{RequestFormat, Service, UnknownService};
