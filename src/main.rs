use allerlens::{
    add_ingredients, AllerlensConfig, AnalysisClient, AnalysisResult, EventFilter, EventReceiver,
    FrameFormat, FrameSourceBuilder, HttpAnalysisClient, IngredientQuery, IntervalTickSource,
    ResultAggregator, ScanEvent, ScanSession, ScanState,
};
use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "allerlens")]
#[command(about = "Scan product labels for flagged allergenic ingredients")]
#[command(version)]
#[command(long_about = "Captures a short burst of camera frames of a product label, submits \
them to the AllerLens analysis service as one batch and reports which ingredients on your \
flagged list appear in the recognized text.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "allerlens.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one live scan; Ctrl+C stops early and analyses what was captured
    Scan {
        /// Use the synthetic camera instead of a real device
        #[arg(long)]
        mock: bool,

        /// Stop the scan after this many seconds
        #[arg(long, value_name = "SECS")]
        stop_after_secs: Option<u64>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Analyse a single label image
    Upload {
        /// JPEG or PNG file
        path: PathBuf,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add comma-separated terms to the flagged ingredient list
    AddIngredient {
        terms: String,
    },
    /// Show the flagged ingredient list
    Ingredients,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    info!("Starting AllerLens v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match AllerlensConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    config.validate().context("Invalid configuration")?;

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    let client = Arc::new(HttpAnalysisClient::new(&config.api)?);

    match command {
        Command::Scan {
            mock,
            stop_after_secs,
            json,
        } => run_scan(config, client, mock, stop_after_secs, json).await,
        Command::Upload { path, json } => run_upload(client.as_ref(), &path, json).await,
        Command::AddIngredient { terms } => run_add_ingredient(client.as_ref(), &terms).await,
        Command::Ingredients => {
            let ingredients = client.list_ingredients().await?;
            if ingredients.is_empty() {
                println!("No flagged ingredients configured");
            }
            for ingredient in ingredients {
                println!("{}", ingredient);
            }
            Ok(())
        }
    }
}

async fn run_scan(
    config: AllerlensConfig,
    client: Arc<HttpAnalysisClient>,
    mock: bool,
    stop_after_secs: Option<u64>,
    json: bool,
) -> Result<()> {
    let source = FrameSourceBuilder::new()
        .config(config.camera.clone())
        .mock(mock)
        .build()?;

    let session = ScanSession::builder()
        .tick_source(Arc::new(IntervalTickSource::new(config.scan.tick_interval())))
        .config(config.scan.clone())
        .frame_source(source)
        .analysis_client(client)
        .build()?;

    let mut finished = session.event_bus().subscribe_filtered(
        EventFilter::EventTypes(vec!["scan_stopped", "analysis_completed", "analysis_failed"]),
        "cli",
    );

    let generation = session.start().await?;
    println!(
        "Scanning (up to {} frames); press Ctrl+C to stop early",
        session.max_frames()
    );

    let deadline = async {
        match stop_after_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Interrupted; finalizing scan {}", generation);
        }
        _ = deadline => {
            info!("Stop timer elapsed; finalizing scan {}", generation);
        }
        outcome = next_outcome(&mut finished) => {
            return report_outcome(outcome?, json);
        }
    }

    if let Some(result) = session.stop().await? {
        return print_result(&result, json);
    }

    match session.state() {
        // The buffer filled while the stop request was arriving
        ScanState::Finalizing => report_outcome(next_outcome(&mut finished).await?, json),
        // An auto-stop may have finished just before our stop arrived
        _ => match drain_outcome(&mut finished)? {
            Some(result) => print_result(&result, json),
            None => report_outcome(session.last_result(), json),
        },
    }
}

/// Consume an outcome already queued on `events` without waiting
fn drain_outcome(events: &mut EventReceiver) -> Result<Option<AnalysisResult>> {
    while let Some(event) = events.try_recv()? {
        match event {
            ScanEvent::AnalysisCompleted { result, .. } => return Ok(Some(result)),
            ScanEvent::AnalysisFailed { error, .. } => bail!("Analysis failed: {}", error),
            _ => {}
        }
    }
    Ok(None)
}

/// Wait for the running scan to publish its result
///
/// `None` when the scan stopped without frames.
async fn next_outcome(events: &mut EventReceiver) -> Result<Option<AnalysisResult>> {
    loop {
        match events.recv().await? {
            ScanEvent::AnalysisCompleted { result, .. } => return Ok(Some(result)),
            ScanEvent::AnalysisFailed { error, .. } => bail!("Analysis failed: {}", error),
            ScanEvent::ScanStopped { frame_count: 0, .. } => return Ok(None),
            _ => {}
        }
    }
}

fn report_outcome(outcome: Option<AnalysisResult>, json: bool) -> Result<()> {
    match outcome {
        Some(result) => print_result(&result, json),
        None => {
            warn!("Scan ended without any frames");
            println!("No frames were captured; nothing to analyse");
            Ok(())
        }
    }
}

async fn run_upload(client: &dyn AnalysisClient, path: &Path, json: bool) -> Result<()> {
    let format = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(FrameFormat::from_extension)
        .with_context(|| format!("Unsupported image type: {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("label")
        .to_string();

    let image = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    info!("Uploading {} ({} bytes)", file_name, image.len());

    let response = client.analyze_image(image, &file_name, format).await?;
    let result = ResultAggregator::merge(std::slice::from_ref(&response));

    print_result(&result, json)
}

async fn run_add_ingredient(client: &dyn AnalysisClient, terms: &str) -> Result<()> {
    let queries = IngredientQuery::parse_list(terms)?;
    let report = add_ingredients(client, queries).await;

    for query in &report.added {
        println!("Added: {}", query);
    }

    match report.failed {
        Some((query, e)) => bail!("Failed to add '{}': {}", query, e),
        None => Ok(()),
    }
}

fn print_result(result: &AnalysisResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    if result.is_clear() {
        println!("No flagged ingredients found");
    } else {
        println!(
            "Flagged ingredients: {}",
            result.flagged_ingredients.join(", ")
        );
    }

    if !result.recognized_text.is_empty() {
        println!();
        println!("Recognized text:");
        println!("{}", result.recognized_text);
    }

    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("allerlens={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(std::io::stderr)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .with_writer(std::io::stderr)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .with_writer(std::io::stderr)
                .boxed()
        }
    };

    // Rolling file output is plain JSON lines regardless of the console format
    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "allerlens.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# AllerLens Configuration File");
    println!("# Every key is optional; ALLERLENS_<SECTION>__<KEY> environment variables override it");
    println!();
    println!("{}", toml::to_string_pretty(&AllerlensConfig::default())?);
    Ok(())
}
