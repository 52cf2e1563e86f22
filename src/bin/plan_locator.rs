use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use plan_locator::app::{App, AppOptions, LocateRequest, ProgressSink, ScanRange};
use plan_locator::archive::Delivery;
use plan_locator::cache::ResultCache;
use plan_locator::catalog::{HttpCatalogClient, SearchQuery};
use plan_locator::config::{ConfigLoader, ResolvedConfig};
use plan_locator::domain::{CacheToken, Identity, RasterFormat};
use plan_locator::error::LocatorError;
use plan_locator::output::{JsonOutput, OutputMode, TextOutput, TextProgress};
use plan_locator::rasterizer::DezoomifyRasterizer;
use plan_locator::store::Workspace;
use plan_locator::tables::MappingTables;

type LiveApp = App<HttpCatalogClient, DezoomifyRasterizer>;

#[derive(Parser)]
#[command(name = "plan-locator")]
#[command(about = "Locate scanned plans in the remote image archive and download them")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Probe an id range for a plan and download the first match")]
    Locate(LocateArgs),
    #[command(about = "Search the catalog and optionally download selected documents")]
    Search(SearchArgs),
    #[command(about = "Interactive search/fetch loop sharing one result cache")]
    Session,
    #[command(about = "List known source aliases")]
    Aliases,
}

#[derive(Args)]
struct LocateArgs {
    #[arg(long)]
    source: String,

    #[arg(long)]
    major: String,

    /// Numeric minor component or a source alias such as `Sy`.
    #[arg(long)]
    minor: String,

    #[arg(long, default_value = "")]
    sheet: String,

    #[arg(long, default_value = "1")]
    part: String,

    #[arg(long)]
    start: Option<String>,

    #[arg(long)]
    end: Option<String>,

    /// Output file, `-` for stdout. Defaults to the artifact name.
    #[arg(long, short)]
    output: Option<PathBuf>,

    #[arg(long)]
    preview: bool,

    /// Raster encoding; overrides the configured format.
    #[arg(long, value_enum)]
    format: Option<RasterFormat>,
}

#[derive(Args)]
struct SearchArgs {
    #[arg(required = true)]
    text: Vec<String>,

    #[arg(long = "collection")]
    collections: Vec<String>,

    #[arg(long = "select")]
    selected: Vec<String>,

    #[arg(long)]
    all: bool,

    #[arg(long, default_value_t = 50)]
    size: usize,

    #[arg(long, value_enum)]
    format: Option<RasterFormat>,

    #[arg(long, short)]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<LocatorError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &LocatorError) -> u8 {
    match error {
        LocatorError::NoMatchInRange { .. }
        | LocatorError::SessionExpired(_)
        | LocatorError::UnknownAlias { .. } => 2,
        LocatorError::TransportFailure(_)
        | LocatorError::CatalogStatus { .. }
        | LocatorError::MalformedSearchResponse(_)
        | LocatorError::RasterizationFailed(_)
        | LocatorError::MissingTool(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Aliases => {
            let tables = MappingTables::load(&config.alias_table, &config.collection_table);
            println!("{}", tables.describe_aliases());
            Ok(())
        }
        Commands::Locate(args) => {
            let app = build_app(&config, args.format.unwrap_or(config.format))?;
            run_locate(args, &config, &app, output_mode)
        }
        Commands::Search(args) => {
            let app = build_app(&config, args.format.unwrap_or(config.format))?;
            run_search(args, &app, output_mode)
        }
        Commands::Session => {
            let app = build_app(&config, config.format)?;
            run_session(&app, output_mode)
        }
    }
}

fn build_app(config: &ResolvedConfig, format: RasterFormat) -> miette::Result<LiveApp> {
    let workspace = match &config.work_dir {
        Some(dir) => Workspace::new_with_root(dir.clone()),
        None => Workspace::new()?,
    };
    workspace.ensure_dirs()?;
    debug!(root = %workspace.root(), "workspace ready");
    let catalog = HttpCatalogClient::new(&config.catalog)?;
    let rasterizer =
        DezoomifyRasterizer::new(&config.rasterizer_program, config.rasterizer_timeout);
    let tool = rasterizer.tool_info();
    if tool.resolved.is_none() {
        warn!(program = %tool.program, "rasterizer not found on PATH; downloads will fail");
    }
    let tables = MappingTables::load(&config.alias_table, &config.collection_table);
    let cache = Arc::new(ResultCache::new(config.cache_capacity, config.cache_ttl));
    Ok(App::new(
        workspace,
        catalog,
        rasterizer,
        tables,
        cache,
        AppOptions {
            workers: config.workers,
            format,
        },
    ))
}

fn sink_for(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::Interactive => &TextProgress,
        OutputMode::NonInteractive => &JsonOutput,
    }
}

fn run_locate(
    args: LocateArgs,
    config: &ResolvedConfig,
    app: &LiveApp,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let start = args
        .start
        .unwrap_or_else(|| config.default_start.to_string());
    let end = args.end.unwrap_or_else(|| config.default_end.to_string());
    let request = LocateRequest {
        identity: Identity {
            source: args.source,
            major: args.major,
            minor: args.minor,
            sheet: args.sheet,
            part: args.part,
        },
        range: ScanRange::parse_bounded(&start, &end, config.max_span)?,
    };

    let outcome = app.locate(&request, sink_for(output_mode))?;
    let written = write_delivery(outcome.delivery, args.output.as_deref())?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_locate(&outcome.result).into_diagnostic(),
        OutputMode::Interactive => {
            TextOutput::print_locate(&outcome.result, args.preview);
            written.report();
            Ok(())
        }
    }
}

fn run_search(args: SearchArgs, app: &LiveApp, output_mode: OutputMode) -> miette::Result<()> {
    let mut query = SearchQuery::new(args.text.join(" "));
    query.collections = args.collections;
    query.size = args.size;

    let sink = sink_for(output_mode);
    let result = app.search(&query, None, sink)?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_search(&result).into_diagnostic()?,
        OutputMode::Interactive => TextOutput::print_search(&result),
    }

    if !args.all && args.selected.is_empty() {
        return Ok(());
    }
    fetch(app, &result.token, &args.selected, args.output.as_deref(), output_mode)
}

fn fetch(
    app: &LiveApp,
    token: &CacheToken,
    selected: &[String],
    output: Option<&Path>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let outcome = app.fetch_selection(token, selected, sink_for(output_mode))?;
    let written = write_delivery(outcome.delivery, output)?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_bulk(&outcome.result).into_diagnostic(),
        OutputMode::Interactive => {
            TextOutput::print_bulk(&outcome.result);
            written.report();
            Ok(())
        }
    }
}

struct Written {
    /// `None` when streamed to stdout.
    target: Option<PathBuf>,
    content_type: &'static str,
    bytes: u64,
}

impl Written {
    fn report(&self) {
        if let Some(target) = &self.target {
            println!(
                "Written to {} ({}, {} bytes)",
                target.display(),
                self.content_type,
                self.bytes
            );
        }
    }
}

/// Streams the delivery to `output` (or its suggested name); `-` means stdout.
fn write_delivery(delivery: Delivery, output: Option<&Path>) -> miette::Result<Written> {
    let content_type = delivery.content_type();
    if output == Some(Path::new("-")) {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        let bytes = delivery.copy_to(&mut lock)?;
        lock.flush().into_diagnostic()?;
        return Ok(Written {
            target: None,
            content_type,
            bytes,
        });
    }
    let target = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(delivery.file_name()));
    let mut file = File::create(&target).into_diagnostic()?;
    let bytes = delivery.copy_to(&mut file)?;
    debug!(target = %target.display(), content_type, bytes, "delivery written");
    Ok(Written {
        target: Some(target),
        content_type,
        bytes,
    })
}

fn run_session(app: &LiveApp, output_mode: OutputMode) -> miette::Result<()> {
    let session = uuid::Uuid::new_v4().to_string();
    let stdin = io::stdin();
    print_prompt()?;
    for line in stdin.lock().lines() {
        let line = line.into_diagnostic()?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((command, rest)) = parts.split_first() else {
            print_prompt()?;
            continue;
        };
        let outcome = match *command {
            "quit" | "exit" => break,
            "clear" => {
                app.cache().clear();
                Ok(())
            }
            "search" => session_search(app, &session, rest, output_mode),
            "fetch" => session_fetch(app, rest, output_mode),
            _ => Err(miette::Report::msg(
                "unknown command (search <text> | fetch <token> [ids] [-o path] | clear | quit)",
            )),
        };
        // errors end the command, not the session
        if let Err(report) = outcome {
            eprintln!("{report:?}");
        }
        print_prompt()?;
    }
    Ok(())
}

fn session_search(
    app: &LiveApp,
    session: &str,
    rest: &[&str],
    output_mode: OutputMode,
) -> miette::Result<()> {
    if rest.is_empty() {
        return Err(miette::Report::msg("search requires text"));
    }
    let query = SearchQuery::new(rest.join(" "));
    let result = app.search(&query, Some(session), sink_for(output_mode))?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_search(&result).into_diagnostic(),
        OutputMode::Interactive => {
            TextOutput::print_search(&result);
            Ok(())
        }
    }
}

fn session_fetch(app: &LiveApp, rest: &[&str], output_mode: OutputMode) -> miette::Result<()> {
    let (token, rest) = rest
        .split_first()
        .ok_or_else(|| miette::Report::msg("fetch requires a token"))?;
    let token: CacheToken = token.parse()?;
    let mut selected = Vec::new();
    let mut output = None;
    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        if matches!(*arg, "-o" | "--output") {
            let path = iter
                .next()
                .ok_or_else(|| miette::Report::msg("-o requires a path"))?;
            output = Some(PathBuf::from(path));
        } else {
            selected.push(arg.to_string());
        }
    }
    fetch(app, &token, &selected, output.as_deref(), output_mode)
}

fn print_prompt() -> miette::Result<()> {
    let mut stderr = io::stderr();
    stderr.write_all(b"> ").into_diagnostic()?;
    stderr.flush().into_diagnostic()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_flag_parses_into_raster_format() {
        let cli = Cli::try_parse_from([
            "plan-locator",
            "locate",
            "--source",
            "Sy",
            "--major",
            "3000",
            "--minor",
            "Sy",
            "--format",
            "png",
        ])
        .unwrap();
        match cli.command {
            Commands::Locate(args) => assert_eq!(args.format, Some(RasterFormat::Png)),
            _ => panic!("expected locate"),
        }
        assert!(Cli::try_parse_from(["plan-locator", "search", "x", "--format", "tiff"]).is_err());
    }
}
