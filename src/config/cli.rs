use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use url::Url;

/// Command-line arguments for the pagewright binary.
#[derive(Debug, Parser)]
#[command(name = "pagewright", version, about = "Web page and resource optimizer")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "PAGEWRIGHT_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Rewrite an HTML document and print the result.
    Optimize(OptimizeArgs),
    /// Run a service request through the endpoint.
    Request(RequestArgs),
    /// Print the signed service URL for a resource.
    Sign(SignArgs),
    /// Inspect or reset the cache store.
    Cache(CacheArgs),
}

#[derive(Debug, Args, Clone)]
pub struct OptimizeArgs {
    /// Document to rewrite.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// URL the document is served from.
    #[arg(long = "page-url", value_name = "URL")]
    pub page_url: Url,

    /// Write the result here instead of stdout.
    #[arg(long, short = 'o', value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    /// Per-request switches, e.g. `debug,-images`.
    #[arg(long, value_name = "LIST")]
    pub switches: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct RequestArgs {
    /// Service URL as produced by `sign` or a rewritten document.
    #[arg(value_name = "URL")]
    pub url: Url,

    /// Extra request header as `Name: value`. Repeatable.
    #[arg(long = "header", short = 'H', value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Write the response body to this file.
    #[arg(long, short = 'o', value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct SignArgs {
    /// Resource to route through the service.
    #[arg(value_name = "URL")]
    pub url: Url,

    /// Service name (images|css|scripts).
    #[arg(long, default_value = "images", value_name = "NAME")]
    pub service: String,
}

#[derive(Debug, Args, Clone)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand, Clone, Copy, PartialEq, Eq)]
pub enum CacheCommand {
    /// Print entry and page counts for the store.
    Stats,
    /// Remove every entry from the store.
    Clear,
}

/// Settings overrides accepted by every subcommand.
#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the site origin.
    #[arg(long = "site-origin", value_name = "URL", global = true)]
    pub site_origin: Option<String>,

    /// Override the directory same-origin URLs map to.
    #[arg(long = "document-root", value_name = "PATH", global = true)]
    pub document_root: Option<PathBuf>,

    /// Override the cache directory.
    #[arg(long = "cache-root", value_name = "PATH", global = true)]
    pub cache_root: Option<PathBuf>,

    /// Override the service URL.
    #[arg(long = "service-url", value_name = "URL", global = true)]
    pub service_url: Option<String>,

    /// Override the request format (query|path).
    #[arg(long = "request-format", value_name = "FORMAT", global = true)]
    pub request_format: Option<String>,
}
