//! CLI binary for filekit.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `OrchestratorConfig` and `ProcessingSettings`, runs one tool request and
//! saves or prints the result.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use filekit::{
    format_size, CompressionLevel, EditOperation, ExecutionStrategy, MetricSource, Notice,
    OrchestratorConfig, OutputReference, Phase, ProcessingResult, ProcessingSettings,
    ProgressCallback, SessionError, ToolContext, ToolKind, ToolProgressCallback, UploadRequest,
};
use futures::future::try_join_all;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one percentage bar per request, with notices
/// printed above it.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  {msg}  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Waiting");
        Arc::new(Self { bar })
    }
}

impl ToolProgressCallback for CliProgressCallback {
    fn on_request_start(&self, tool: ToolKind, _generation: u64, strategy: ExecutionStrategy) {
        self.bar.reset();
        self.bar.set_prefix(tool.name());
        self.bar.set_message(format!("{strategy}"));
        self.bar.enable_steady_tick(Duration::from_millis(80));
    }

    fn on_phase(&self, phase: Phase) {
        self.bar.set_message(phase.to_string());
    }

    fn on_progress(&self, percent: u8, _phase: Phase) {
        self.bar.set_position(percent as u64);
    }

    fn on_notice(&self, notice: &Notice) {
        self.bar
            .println(format!("  {} {}", yellow("⚠"), notice.message));
    }

    fn on_request_complete(&self, _success: bool) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # List the available tools
  filekit tools

  # Remove the background of a photo (result saved to ./out)
  filekit run image-bg-remover portrait.jpg -o out

  # Same, on this machine instead of the service
  filekit run image-bg-remover portrait.jpg --local

  # Compress an image to about 50 KB
  filekit run media-compressor photo.png --target-size 50KB --quality 80

  # Compress a video with the strongest preset
  filekit run media-compressor clip.mp4 --level high

  # Merge PDFs (order is preserved)
  filekit run pdf-merger a.pdf b.pdf c.pdf -o merged

  # Annotate a PDF from a JSON list of edit operations
  filekit run pdf-editor contract.pdf --edits edits.json

  # HTML to a React component, printed to stdout
  filekit run html-to-react page.html

  # Machine-readable result summary
  filekit run word-to-pdf report.docx --json

ENVIRONMENT VARIABLES:
  FILEKIT_API_URL           Base URL of the processing service
  FILEKIT_REQUEST_TIMEOUT   Per-request timeout in seconds
  FILEKIT_DOWNLOAD_TIMEOUT  Timeout for fetching inputs and results
  RUST_LOG                  Override the log filter (e.g. filekit=debug)
"#;

/// Run file-processing tools against a processing service or locally.
#[derive(Parser, Debug)]
#[command(
    name = "filekit",
    version,
    about = "Run file-processing tools (PDF, media compression, background removal)",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Base URL of the processing service.
    #[arg(long, global = true, env = "FILEKIT_API_URL", default_value = filekit::DEFAULT_API_BASE_URL)]
    api_url: String,

    /// Per-request timeout for the processing service in seconds.
    #[arg(long, global = true, env = "FILEKIT_REQUEST_TIMEOUT", default_value_t = 300)]
    request_timeout: u64,

    /// Timeout for downloading inputs and results in seconds.
    #[arg(long, global = true, env = "FILEKIT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Output structured JSON instead of human-readable text.
    #[arg(long, global = true, env = "FILEKIT_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "FILEKIT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "FILEKIT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "FILEKIT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the available tools.
    Tools,

    /// Run one tool on one or more inputs.
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Tool slug, as printed by `filekit tools`.
    tool: String,

    /// Local file paths or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Write the result into this directory.
    #[arg(short, long, env = "FILEKIT_OUTPUT", default_value = ".")]
    output: PathBuf,

    /// Compression preset (media-compressor).
    #[arg(long, value_enum, conflicts_with = "target_size")]
    level: Option<LevelArg>,

    /// Target output size, e.g. 50KB or 1.5MB (media-compressor).
    #[arg(long, value_parser = filekit::parse_byte_size)]
    target_size: Option<u64>,

    /// Image quality 0–100 used with --target-size.
    #[arg(long, requires = "target_size",
          value_parser = clap::value_parser!(u8).range(0..=100))]
    quality: Option<u8>,

    /// JSON file with a list of edit operations (pdf-editor).
    #[arg(long)]
    edits: Option<PathBuf>,

    /// Process on this machine instead of the service (image-bg-remover).
    #[arg(long)]
    local: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LevelArg {
    Low,
    Medium,
    High,
}

impl From<LevelArg> for CompressionLevel {
    fn from(v: LevelArg) -> Self {
        match v {
            LevelArg::Low => CompressionLevel::Low,
            LevelArg::Medium => CompressionLevel::Medium,
            LevelArg::High => CompressionLevel::High,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level logs while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Tools => list_tools(&cli),
        Command::Run(args) => run(&cli, args, show_progress).await,
    }
}

fn list_tools(cli: &Cli) -> Result<()> {
    let ctx = ToolContext::new(build_config(cli, None)?).context("Invalid configuration")?;
    let tools = ctx.registry().descriptors();

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(tools).context("Failed to serialise tool list")?
        );
        return Ok(());
    }

    let mut group = "";
    for tool in tools {
        if tool.group != group {
            group = tool.group;
            println!("{}", bold(group));
        }
        println!(
            "  {:<18} {}{}",
            tool.slug,
            tool.description,
            if tool.supports_local {
                dim("  (local available)")
            } else {
                String::new()
            }
        );
        println!(
            "  {:<18} {}",
            "",
            dim(&format!(
                "accepts {}, up to {}",
                tool.accepts,
                format_size(tool.max_bytes)
            ))
        );
    }
    Ok(())
}

async fn run(cli: &Cli, args: &RunArgs, show_progress: bool) -> Result<()> {
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ToolProgressCallback>)
    } else {
        None
    };
    let ctx = ToolContext::new(build_config(cli, progress_cb)?).context("Invalid configuration")?;
    let session = ctx.open_slug(&args.tool)?;
    let tool = session.tool();
    if args.local && tool.supports_local() {
        // Load the model while the inputs are read.
        let _model_load = ctx.preload_model();
    }

    // ── Stage inputs ─────────────────────────────────────────────────────
    // Inputs load concurrently; order is preserved for tools like the merger.
    let ctx_ref = &ctx;
    let files = try_join_all(args.inputs.iter().map(|input| async move {
        ctx_ref.load_input(input)
            .await
            .with_context(|| format!("Failed to read input '{input}'"))
    }))
    .await?;
    let upload = UploadRequest::new(files).map_err(|e| anyhow::anyhow!(e.user_message()))?;
    if let Err(e) = session.stage(upload) {
        bail!("{}", e.user_message());
    }
    session.set_settings(build_settings(args).await?);

    if args.local {
        if !tool.supports_local() {
            bail!("'{}' can only be processed on the server", tool.slug());
        }
        if !cli.quiet {
            eprintln!("{} Loading local model…", dim("◆"));
        }
        session
            .prepare_local()
            .await
            .map_err(|e| anyhow::anyhow!(e.user_message()))?;
        session.set_preference(Some(ExecutionStrategy::Local));
    }

    // ── Process ──────────────────────────────────────────────────────────
    let result = match session.submit().await {
        Ok(result) => result,
        Err(SessionError::Processing(e)) => bail!("{} {}", red("✘"), e.user_message()),
        Err(e) => return Err(e).context("Request failed"),
    };
    session.close().await;

    // ── Present ──────────────────────────────────────────────────────────
    // Text results without an explicit output directory go to stdout.
    let print_text = result.output.as_text().is_some() && args.output == PathBuf::from(".");
    let saved = if print_text && !cli.json {
        None
    } else {
        Some(
            ctx.save(&result, &args.output)
                .await
                .context("Failed to save result")?,
        )
    };

    if cli.json {
        let summary = serde_json::json!({
            "tool": tool.slug(),
            "file": result.display_file_name,
            "path": saved.as_ref().map(|p| p.display().to_string()),
            "url": match &result.output {
                OutputReference::Url { url } => Some(url.as_str()),
                OutputReference::Inline { .. } => None,
            },
            "originalSize": result.original_size_bytes,
            "resultSize": result.result_size_bytes,
            "reductionPercent": result.reduction_percent,
            "estimated": result.is_estimated(),
            "strategy": result.strategy,
            "viaFallback": result.via_fallback,
            "notices": result.notices,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise result")?
        );
        return Ok(());
    }

    if saved.is_none() {
        if let Some(text) = result.output.as_text() {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(text.as_bytes())
                .context("Failed to write to stdout")?;
            if !text.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
        }
    }

    if !cli.quiet {
        print_summary(&result, saved.as_deref());
    }
    Ok(())
}

fn print_summary(result: &ProcessingResult, saved: Option<&std::path::Path>) {
    for notice in &result.notices {
        eprintln!("  {} {}", yellow("⚠"), notice.message);
    }
    let target = saved
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| result.display_file_name.clone());
    eprintln!(
        "{}  {}  →  {}",
        green("✔"),
        result.strategy,
        bold(&target)
    );
    let estimated = |source: MetricSource| {
        if source == MetricSource::Estimated {
            yellow(" (estimated)")
        } else {
            String::new()
        }
    };
    eprintln!(
        "   {} → {}{}  ({}% smaller{})",
        dim(&format_size(result.original_size_bytes)),
        format_size(result.result_size_bytes.value),
        estimated(result.result_size_bytes.source),
        result.reduction_percent.value,
        estimated(result.reduction_percent.source),
    );
}

/// Map CLI args to `OrchestratorConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<OrchestratorConfig> {
    let mut builder = OrchestratorConfig::builder()
        .api_base_url(&cli.api_url)
        .request_timeout_secs(cli.request_timeout)
        .download_timeout_secs(cli.download_timeout);
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

/// Map tool flags to `ProcessingSettings`.
async fn build_settings(args: &RunArgs) -> Result<ProcessingSettings> {
    if let Some(bytes) = args.target_size {
        return Ok(ProcessingSettings::target_size(bytes, args.quality));
    }
    if let Some(level) = args.level {
        return Ok(ProcessingSettings::preset(level.into()));
    }
    if let Some(ref path) = args.edits {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read edits from {path:?}"))?;
        let operations: Vec<EditOperation> = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid edit operations in {path:?}"))?;
        return Ok(ProcessingSettings::Edits { operations });
    }
    Ok(ProcessingSettings::Default)
}
