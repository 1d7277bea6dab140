use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use viewer::client::LiveSource;
use viewer::config::{LogFormat, ViewerConfig};
use viewer::metrics::StreamMetrics;
use viewer::view::{format_duration, render_lines, time_delta};
use viewer::{ApiClient, Level, LogSummary, LogViewer, Searcher, Snapshot, StreamFilter, TailView};

/// Upload log files to a log analysis server and follow them live
#[derive(Parser, Debug)]
#[command(name = "logview")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Extra configuration file layered over the default locations
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file and print the server's summary
    Summary {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Follow a session's log stream
    Tail(TailArgs),
    /// Close a session on the server
    Close {
        #[arg(value_name = "SESSION")]
        session: String,
    },
}

#[derive(Args, Debug)]
struct TailArgs {
    /// File to upload before streaming
    #[arg(value_name = "FILE", required_unless_present = "session", conflicts_with = "session")]
    file: Option<PathBuf>,

    /// Stream an existing session instead of uploading
    #[arg(long, value_name = "ID")]
    session: Option<String>,

    /// Only these levels (comma separated)
    #[arg(long, value_delimiter = ',')]
    levels: Vec<Level>,

    /// Only these domains (comma separated)
    #[arg(long, value_delimiter = ',')]
    domains: Vec<String>,

    /// Only lines containing any of these keywords (comma separated)
    #[arg(long, value_delimiter = ',')]
    keywords: Vec<String>,

    /// Lines of context around keyword matches
    #[arg(long, value_name = "N")]
    context: Option<u32>,

    /// Override buffer.max_lines
    #[arg(long, value_name = "N")]
    max_lines: Option<usize>,

    /// Show the time since the previous line
    #[arg(long)]
    delta: bool,

    /// Search the buffer once the stream ends
    #[arg(long, value_name = "QUERY")]
    search: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    // Phase 1: Basic tracing so we can log during config loading
    let basic_tracing = init_tracing_basic();

    let config = ViewerConfig::load_with(cli.config.as_deref())
        .context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    // Phase 2: Global subscriber from config
    drop(basic_tracing);
    init_tracing_from_config(&config).context("Failed to initialize logging")?;

    let http = LiveSource::default_client(config.connect_timeout())
        .context("Failed to build HTTP client")?;
    let api = ApiClient::new(http.clone(), &config.server.base_url, config.request_timeout())
        .context("Invalid server address")?;

    match cli.command {
        Command::Summary { file } => summary(&api, &file).await,
        Command::Tail(args) => tail(&config, api, LiveSource::new(http), args).await,
        Command::Close { session } => {
            api.close_session(&session).await;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn summary(api: &ApiClient, file: &Path) -> Result<ExitCode> {
    match api.upload(file).await {
        Ok(upload) => {
            print_summary(&upload.session_id, &upload.summary);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            warn!(file = %file.display(), error = %e, "Upload failed");
            eprintln!("Upload failed");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_summary(session_id: &str, summary: &LogSummary) {
    println!("Session:     {}", session_id);
    println!("Total lines: {}", summary.total_lines);
    for (level, count) in summary.levels_in_order() {
        println!("  {:<8} {}", level, count);
    }
    if !summary.unique_domains.is_empty() {
        println!("Domains:     {}", summary.unique_domains.join(", "));
    }
    if let Some(span) = time_span(summary) {
        println!("Time span:   {}", span);
    }
}

/// `start .. stop`, followed by the elapsed time when both timestamps parse.
fn time_span(summary: &LogSummary) -> Option<String> {
    let (start, stop) = (summary.start_timestamp.as_ref()?, summary.stop_timestamp.as_ref()?);
    Some(match time_delta(start, stop) {
        Some(elapsed) => format!("{} .. {} ({})", start, stop, format_duration(elapsed)),
        None => format!("{} .. {}", start, stop),
    })
}

async fn tail(config: &ViewerConfig, api: ApiClient, source: LiveSource, args: TailArgs) -> Result<ExitCode> {
    let session_id = match (&args.file, args.session) {
        (Some(file), _) => match api.upload(file).await {
            Ok(upload) => {
                print_summary(&upload.session_id, &upload.summary);
                upload.session_id
            }
            Err(e) => {
                warn!(file = %file.display(), error = %e, "Upload failed");
                eprintln!("Upload failed");
                return Ok(ExitCode::FAILURE);
            }
        },
        (None, Some(session)) => session,
        (None, None) => anyhow::bail!("either FILE or --session is required"),
    };

    let filter = StreamFilter {
        levels: args.levels,
        domains: args.domains,
        keywords: args.keywords,
        context: args.context,
    };
    let url = api.stream_url(&session_id, &filter)?;

    let mut options = config.stream_options();
    if let Some(max_lines) = args.max_lines {
        options.max_lines = max_lines.max(1);
    }
    let show_delta = args.delta || config.display.show_delta;

    let metrics = StreamMetrics::new();
    let mut viewer = LogViewer::new(Arc::new(source), options, metrics.clone());
    let mut snapshots = viewer.snapshots();
    viewer.subscribe(url).await;

    let mut printed = 0u64;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                print_new_lines(&snapshot, &mut printed, show_delta);
            }
            _ = viewer.finished() => break,
        }
    }

    viewer.unsubscribe().await;
    let snapshot = viewer.snapshot();
    print_new_lines(&snapshot, &mut printed, show_delta);

    if let Some(query) = args.search {
        search(config, &viewer, &snapshot, query).await;
    }

    api.close_session(&session_id).await;
    metrics.log_summary();
    Ok(ExitCode::SUCCESS)
}

/// Print entries appended since the last call.
fn print_new_lines(snapshot: &Snapshot, printed: &mut u64, show_delta: bool) {
    let start = printed.saturating_sub(snapshot.evicted()) as usize;
    for line in render_lines(snapshot, start..snapshot.len(), show_delta) {
        println!("{}", line);
    }
    *printed = snapshot.appended_total();
}

async fn search(config: &ViewerConfig, viewer: &LogViewer, snapshot: &Snapshot, query: String) {
    let mut searcher = Searcher::new(viewer.snapshots(), config.search_options());
    let mut outcomes = searcher.outcomes();
    let generation = searcher.query(query);

    let outcome = match outcomes.wait_for(|o| o.generation == generation).await {
        Ok(outcome) => outcome.clone(),
        Err(_) => return,
    };

    println!();
    println!("{} match(es) for {:?}{}", outcome.results.len(), outcome.query, if outcome.truncated { " (truncated)" } else { "" });
    for result in &outcome.results {
        println!("{}: {}", result.entry_index.saturating_add(1), result.text);
    }

    let Some(first) = outcome.results.first() else {
        return;
    };
    let mut view = TailView::new(config.display.viewport_height);
    if view.jump_to_index(snapshot, first.entry_index).is_some() {
        println!();
        println!("--- around line {} ---", first.entry_index.saturating_add(1));
        for line in render_lines(snapshot, view.visible_range(), config.display.show_delta) {
            println!("{}", line);
        }
    }
}

/// Phase 1: Basic tracing for config loading.
/// Uses set_default (thread-local) so Phase 2 can install the global subscriber.
fn init_tracing_basic() -> tracing::subscriber::DefaultGuard {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();

    tracing::subscriber::set_default(subscriber)
}

/// Phase 2: Re-initialize tracing with configuration values.
/// Logs go to stderr; stdout carries the log lines being viewed.
fn init_tracing_from_config(config: &ViewerConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // Prefer RUST_LOG env var, fall back to config level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .with_context(|| format!("Invalid logging.level: {}", config.logging.level))?;

    match config.logging.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true);
            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false);
            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
    }

    Ok(())
}
