mod error;

use crate::error::{ErrorKind, Result};
use clap::{Parser, Subcommand};
use conveyor_config::Config;
use conveyor_convert::ConverterSet;
use conveyor_format::{IdentifierHandle, Siegfried};
use conveyor_orchestrate::{Context, Interrupt, RouteOptions, RouteTable, RunEvent, Summary};
use conveyor_registry::{FileRegistry, TracingSink};
use exn::{OptionExt, ResultExt};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Batch conversion of archival files towards their preservation formats")]
struct Opts {
    /// Increase verbosity (-v, -vv). Default INFO.
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Decrease verbosity (-q, -qq).
    #[arg(short = 'q', action = clap::ArgAction::Count, global = true)]
    quiet: u8,
    /// Configuration file (TOML, YAML or JSON).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest, convert and verify a directory tree
    Run {
        /// Directory holding the files to convert
        #[arg(long)]
        input: Option<PathBuf>,
        /// Directory the converted tree is written to; defaults to converting in place
        #[arg(long)]
        output: Option<PathBuf>,
        /// Conversions running at the same time
        #[arg(long)]
        max_concurrency: Option<usize>,
    },
    /// Print the route table built from the available engines
    Routes,
    /// Print the available engines and what they convert
    Converters,
}

fn init_tracing(verbose: u8, quiet: u8) {
    let level = match i16::from(verbose) - i16::from(quiet) {
        ..=-2 => Level::ERROR,
        -1 => Level::WARN,
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();
    // Only fails if a subscriber is already installed.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() {
    let opts = Opts::parse();
    init_tracing(opts.verbose, opts.quiet);
    if let Err(e) = dispatch(opts).await {
        eprintln!("{e:?}");
        std::process::exit(1);
    }
}

async fn dispatch(opts: Opts) -> Result<()> {
    let mut config = Config::load(opts.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    match opts.command {
        Command::Run { input, output, max_concurrency } => {
            config.input = input.or(config.input);
            config.output = output.or(config.output);
            config.max_concurrency = max_concurrency.unwrap_or(config.max_concurrency);
            config.validate().or_raise(|| ErrorKind::Config)?;
            let summary = convert(&config).await?;
            print_summary(&summary);
        },
        Command::Routes => {
            let converters = ConverterSet::discover(&config);
            let routes = RouteTable::build(&converters.capabilities(), &RouteOptions::from(&config))
                .or_raise(|| ErrorKind::Routes)?;
            for (pair, route) in routes.iter() {
                println!("{pair}: {route}");
            }
        },
        Command::Converters => {
            for converter in ConverterSet::discover(&config).iter() {
                println!("{} {}", converter.name(), converter.version());
                for (from, to) in converter.capabilities().pairs() {
                    println!("  {from} -> {to}");
                }
            }
        },
    }
    Ok(())
}

async fn convert(config: &Config) -> Result<Summary> {
    let input = config.input.clone().ok_or_raise(|| ErrorKind::NoInput)?;
    let output = config.output.clone().unwrap_or_else(|| input.clone());
    let identifier: IdentifierHandle = Arc::new(Siegfried::discover().or_raise(|| ErrorKind::Identifier)?);
    let converters = ConverterSet::discover(config);
    if converters.is_empty() {
        exn::bail!(ErrorKind::NoEngines);
    }

    // Installed before ingestion, so an early Ctrl-C still ends in a reconciled run.
    let interrupt = Interrupt::default();
    tokio::spawn({
        let interrupt = interrupt.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling conversions in flight");
                interrupt.trigger();
            }
        }
    });

    let registry = Arc::new(FileRegistry::default());
    let files = conveyor_orchestrate::ingest(&input, &output, identifier.as_ref(), &registry, config.max_concurrency)
        .await
        .or_raise(|| ErrorKind::Ingest)?;
    tracing::info!(files, output = %output.display(), "Files ingested");

    let mut ctx = Context::from_config(config, &output, registry, identifier, converters).or_raise(|| ErrorKind::Run)?;
    ctx.interrupt = interrupt;

    let mut events = std::pin::pin!(conveyor_orchestrate::run(&ctx, &TracingSink));
    let mut summary = None;
    while let Some(event) = events.next().await {
        match event.or_raise(|| ErrorKind::Run)? {
            RunEvent::Progress { round, done, total } => tracing::info!(round, done, total, "Converting"),
            RunEvent::MergeFlushed { directory, files, merged: None } => {
                tracing::warn!(directory = %directory.display(), files, "Merge group not combined")
            },
            RunEvent::Complete(done) => summary = Some(done),
            event => tracing::debug!(?event, "Run event"),
        }
    }
    summary.ok_or_raise(|| ErrorKind::Run)
}

fn print_summary(summary: &Summary) {
    if summary.interrupted {
        println!("Run interrupted; unfinished files are reported as failed.");
    }
    println!("Rounds: {}", summary.rounds);
    println!("Elapsed: {}", summary.elapsed());
    println!("Files: {}", summary.tally.total());
    for (bucket, count) in summary.tally.iter() {
        println!("  {bucket}: {count}");
    }
}
