//! CLI entry point for `mbox2pdf`.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use mbox2pdf::config::Config;
use mbox2pdf::export::pdf::PageSize;
use mbox2pdf::export::OutputFormat;
use mbox2pdf::pipeline::{self, Phase};
use mbox2pdf::report::RunSummary;

/// Convert a Google Takeout MBOX archive into one chronological PDF.
#[derive(Parser)]
#[command(name = "mbox2pdf", version, about, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// MBOX archive to convert
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Output document (default: emails_combined.pdf / .html)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    format: Option<FormatArg>,

    /// Worker threads for parsing and rendering (1 = sequential)
    #[arg(short, long, value_name = "N")]
    jobs: Option<usize>,

    /// Paper size
    #[arg(long, value_enum)]
    page_size: Option<PageSizeArg>,

    /// Do not embed image attachments or inline pictures
    #[arg(long)]
    no_images: bool,

    /// TOML configuration file
    #[arg(long, value_name = "FILE", env = "MBOX2PDF_CONFIG")]
    config: Option<PathBuf>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Hide the progress bar
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Also write logs to this file
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Pdf,
    Html,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Pdf => OutputFormat::Pdf,
            FormatArg::Html => OutputFormat::Html,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PageSizeArg {
    A4,
    Letter,
}

impl From<PageSizeArg> for PageSize {
    fn from(arg: PageSizeArg) -> Self {
        match arg {
            PageSizeArg::A4 => PageSize::A4,
            PageSizeArg::Letter => PageSize::Letter,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Some(Commands::Completions { shell }) => return cmd_completions(shell),
        Some(Commands::Manpage) => return cmd_manpage(),
        None => {}
    }

    let Some(input) = cli.file.clone() else {
        anyhow::bail!("no MBOX file given (see --help)");
    };

    // Load configuration; problems are reported once logging is up
    let (config, config_error) = match mbox2pdf::config::load_config(cli.config.as_deref()) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, cli.log_file.as_deref())?;

    match (&config_error, &cli.config) {
        (Some(e), _) => tracing::warn!(error = %e, "Failed to load config, using defaults"),
        (None, Some(path)) => tracing::info!(path = %path.display(), "Loaded config"),
        (None, None) => {}
    }

    let mut options = config.convert_options();
    if let Some(format) = cli.format {
        options.format = format.into();
    }
    if let Some(jobs) = cli.jobs {
        options.jobs = jobs;
    }
    if let Some(page_size) = cli.page_size {
        options.pdf.page_size = page_size.into();
    }
    if cli.no_images {
        options.render.embed_images = false;
    }
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(options.format.default_file_name()));

    cmd_convert(&input, &output, &options, cli.json, cli.quiet)
}

/// Run the conversion with a progress bar and print the summary.
fn cmd_convert(
    input: &Path,
    output: &Path,
    options: &pipeline::ConvertOptions,
    json: bool,
    quiet: bool,
) -> anyhow::Result<ExitCode> {
    let pb = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(0)
    };
    let phase = Cell::new(None);
    let on_progress = |current: Phase, done: u64, total: u64| {
        if phase.get() != Some(current) {
            phase.set(Some(current));
            pb.reset();
            pb.set_style(progress_style(current));
        }
        pb.set_length(total);
        pb.set_position(done);
    };

    let start = Instant::now();
    let result = pipeline::convert(input, output, options, Some(&on_progress));
    pb.finish_and_clear();
    let summary = result?;
    let elapsed = start.elapsed();

    if json {
        print_summary_json(input, &summary, elapsed)?;
    } else {
        print_summary_table(input, &summary, elapsed);
    }

    Ok(if summary.processed() > 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn progress_style(phase: Phase) -> ProgressStyle {
    let template = match phase {
        Phase::Reading => {
            "{spinner:.green} Reading   [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})"
        }
        Phase::Rendering => "{spinner:.green} Rendering [{bar:40.cyan/blue}] {pos}/{len}",
        Phase::Writing => "{spinner:.green} Writing document...",
    };
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

fn setup_logging(level: &str, log_file: Option<&Path>) -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("invalid log file path '{}'", path.display()))?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory '{}'", dir.display()))?;

            let file_appender = tracing_appender::rolling::never(dir, name);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_appender);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .init();
        }
    }
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<ExitCode> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mbox2pdf", &mut std::io::stdout());
    Ok(ExitCode::SUCCESS)
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<ExitCode> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(ExitCode::SUCCESS)
}

/// Most diagnostics listed in the table view.
const MAX_LISTED_DIAGNOSTICS: usize = 50;

fn print_summary_table(input: &Path, summary: &RunSummary, elapsed: Duration) {
    use humansize::{format_size, BINARY};

    println!();
    println!("  {:<20} {}", "Archive", input.display());
    if let Some(output) = &summary.output {
        let size = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
        println!(
            "  {:<20} {} ({})",
            "Output",
            output.display(),
            format_size(size, BINARY)
        );
    }
    println!("  {:<20} {}", "Messages found", summary.found);
    println!("  {:<20} {}", "Rendered", summary.rendered);
    println!("  {:<20} {}", "Degraded", summary.degraded);
    println!("  {:<20} {}", "Skipped", summary.skipped);

    if let (Some(min), Some(max)) = (summary.oldest, summary.newest) {
        println!(
            "  {:<20} {} to {}",
            "Date range",
            min.format("%Y-%m-%d"),
            max.format("%Y-%m-%d")
        );
    }

    println!("  {:<20} {:.2?}", "Elapsed", elapsed);

    if !summary.diagnostics.is_empty() {
        println!();
        println!("  Diagnostics:");
        for d in summary.diagnostics.iter().take(MAX_LISTED_DIAGNOSTICS) {
            println!("    {d}");
        }
        let hidden = summary.diagnostics.len().saturating_sub(MAX_LISTED_DIAGNOSTICS);
        if hidden > 0 {
            println!("    ... and {hidden} more (use --json for the full list)");
        }
    }
    println!();
}

fn print_summary_json(input: &Path, summary: &RunSummary, elapsed: Duration) -> anyhow::Result<()> {
    let mut value = serde_json::to_value(summary)?;
    value["input"] = serde_json::json!(input.to_string_lossy());
    value["processed"] = serde_json::json!(summary.processed());
    value["elapsed_ms"] = serde_json::json!(elapsed.as_millis() as u64);
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
