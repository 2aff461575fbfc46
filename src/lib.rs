//! Pagewright: a web-resource optimization engine.
//!
//! The crate rewrites HTML documents through a composable filter pipeline,
//! proxies and inlines sub-resources through a signed service protocol, and
//! keeps computed results in a self-healing embedded cache.

pub mod cache;
pub mod config;
pub mod domain;
pub mod engine;
pub mod html;
pub mod infra;
pub mod pipeline;
pub mod protocol;
pub mod rewrite;
pub mod service;

pub use engine::Engine;
