use std::{
    fs,
    io::{self, Write},
    path::Path,
    process,
    str::FromStr,
};

use pagewright::{
    Engine,
    config::{self, CacheCommand, Command, OptimizeArgs, RequestArgs, SignArgs},
    domain::{Service, UnknownService},
    engine::EngineError,
    infra::{error::InfraError, telemetry},
    protocol::Switches,
    service::IncomingRequest,
};
use thiserror::Error;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] config::LoadError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Service(#[from] UnknownService),
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed header `{0}`, expected `Name: value`")]
    Header(String),
    #[error("service answered {0}")]
    Status(u16),
}

impl From<io::Error> for CliError {
    fn from(err: io::Error) -> Self {
        Self::Infra(InfraError::Io(err))
    }
}

fn main() {
    if let Err(error) = run() {
        report_error(&error);
        process::exit(1);
    }
}

fn report_error(error: &CliError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "pagewright failed");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "pagewright failed");
    });
}

fn run() -> Result<(), CliError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let engine = Engine::new(settings)?;
    let result = match cli_args.command {
        Command::Optimize(args) => run_optimize(&engine, args),
        Command::Request(args) => run_request(&engine, args),
        Command::Sign(args) => run_sign(&engine, args),
        Command::Cache(args) => run_cache(&engine, args.command),
    };
    engine.shutdown();
    result
}

fn run_optimize(engine: &Engine, args: OptimizeArgs) -> Result<(), CliError> {
    let document = fs::read(&args.file)?;
    let mut switches = engine.switches_for(&args.page_url, None);
    if let Some(list) = args.switches.as_deref() {
        switches = switches.merge(&Switches::parse(list));
    }

    let optimized = engine.optimize_document(&document, &args.page_url, &switches);
    info!(
        target = "pagewright::optimize",
        path = %args.file.display(),
        input_bytes = document.len(),
        output_bytes = optimized.len(),
        "Optimized document"
    );
    emit(args.output.as_deref(), &optimized)
}

fn run_request(engine: &Engine, args: RequestArgs) -> Result<(), CliError> {
    let mut incoming = IncomingRequest::new(args.url);
    for raw in &args.headers {
        let (name, value) = raw
            .split_once(':')
            .ok_or_else(|| CliError::Header(raw.clone()))?;
        incoming = incoming.with_header(name.trim(), value.trim());
    }

    let response = engine.handle_request(&incoming);
    let mut stderr = io::stderr().lock();
    writeln!(stderr, "{}", response.status)?;
    for (name, value) in &response.headers {
        writeln!(stderr, "{name}: {value}")?;
    }
    writeln!(stderr, "body: {} bytes", response.body.len())?;

    emit(args.output.as_deref(), &response.body)?;
    if response.status >= 400 {
        return Err(CliError::Status(response.status));
    }
    Ok(())
}

fn run_sign(engine: &Engine, args: SignArgs) -> Result<(), CliError> {
    let service = Service::from_str(&args.service)?;
    let signed = engine.sign_url(&args.url, service)?;
    println!("{signed}");
    Ok(())
}

fn run_cache(engine: &Engine, command: CacheCommand) -> Result<(), CliError> {
    match command {
        CacheCommand::Stats => {
            let stats = engine.cache_stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        CacheCommand::Clear => {
            engine.clear_cache()?;
            println!("cache cleared");
        }
    }
    Ok(())
}

fn emit(output: Option<&Path>, bytes: &[u8]) -> Result<(), CliError> {
    match output {
        Some(path) => fs::write(path, bytes)?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(bytes)?;
            stdout.flush()?;
        }
    }
    Ok(())
}
