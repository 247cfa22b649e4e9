//! CLI binary for scan-harvest.
//!
//! A thin shim over the library crate that maps the config file and CLI
//! flags to `HarvestConfig`, runs the task list and prints a summary.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use scan_harvest::status::{self, ItemStatus};
use scan_harvest::{
    load_tasks, ChromeConnector, ConfigFile, HarvestConfig, HarvestProgressCallback, ItemKey,
    ItemOutcome, ProgressCallback, RunSummary, TaskRunner,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one bar per item, sized to its scanned-page counter,
/// with item-level results printed above it.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn page_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} pages  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS)
    }
}

impl HarvestProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_items: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{total_items} items in task list"))
        ));
    }

    fn on_item_start(&self, key: &ItemKey, attempt: u32) {
        self.bar.set_prefix(key.to_string());
        self.bar.set_position(0);
        self.bar.set_message(if attempt > 1 {
            format!("attempt {attempt}")
        } else {
            "logging in…".to_string()
        });
    }

    fn on_item_expected(&self, _key: &ItemKey, expected: usize) {
        self.bar.set_length(expected as u64);
        self.bar.set_style(Self::page_style());
        self.bar.reset_elapsed();
    }

    fn on_page_saved(&self, _key: &ItemKey, page: usize, _expected: usize, time_left: Option<&str>) {
        self.bar.set_position(page as u64);
        if let Some(left) = time_left {
            self.bar.set_message(dim(&format!("session {left}")));
        }
    }

    fn on_attempt_failed(&self, key: &ItemKey, attempt: u32, error: &str) {
        let msg = if error.chars().count() > 100 {
            format!("{}\u{2026}", error.chars().take(99).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {}  attempt {}  {}",
            red("✗"),
            key,
            attempt,
            red(&msg)
        ));
    }

    fn on_item_complete(&self, key: &ItemKey, outcome: &ItemOutcome) {
        let line = match outcome {
            ItemOutcome::Skipped => format!("  {} {}  {}", dim("·"), key, dim("archive exists")),
            ItemOutcome::Resumed { pages } => {
                format!("  {} {}  {} pages  {}", green("✓"), key, pages, dim("resumed"))
            }
            ItemOutcome::Completed { pages } => format!("  {} {}  {} pages", green("✓"), key, pages),
        };
        self.bar.println(line);
    }

    fn on_item_failed(&self, key: &ItemKey, error: &str) {
        self.bar
            .println(format!("  {} {}  gave up: {}", red("✘"), key, red(error)));
    }

    fn on_run_complete(&self, _summary: &RunSummary) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process every item in tasks.txt using config.txt
  scan-harvest

  # Explicit files, give up on an item after 10 attempts
  scan-harvest --config my.cfg --tasks fonds.tsv --max-attempts 10

  # Which items still lack an archive?
  scan-harvest --status-only --missing-out missing.txt

  # Same, as JSON
  scan-harvest --status-only --json

CONFIG FILE (key=value, one per line):
  email=me@example.org
  password=secret
  savepath=/data/scans
  # optional
  portal_url=https://…
  jpeg_quality=80
  max_attempts=0           0 = retry forever
  retry_backoff_secs=5

TASK LIST (tab-separated, one item per line):
  <collection>\t<sub-collection>\t<item>

OUTPUT:
  <savepath>/<c>-<s>-<i>/<c>-<s>-<i>.pdf
  <savepath>/<c>-<s>-<i>/<c>-<s>-<i>.zip   completion marker

  Re-running is safe: items with an archive are skipped, and an item
  interrupted after capture resumes at packaging without logging in.
"#;

/// Download scanned archive items and package them as PDF + ZIP.
#[derive(Parser, Debug)]
#[command(
    name = "scan-harvest",
    version,
    about = "Download scanned archive items and package them as PDF + ZIP",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// key=value config file (email, password, savepath, …).
    #[arg(short, long, env = "SCAN_HARVEST_CONFIG", default_value = "config.txt")]
    config: PathBuf,

    /// Tab-separated task list.
    #[arg(short, long, env = "SCAN_HARVEST_TASKS", default_value = "tasks.txt")]
    tasks: PathBuf,

    /// Base output directory (overrides `savepath`).
    #[arg(short, long, env = "SCAN_HARVEST_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Portal login e-mail (overrides `email`).
    #[arg(long, env = "SCAN_HARVEST_EMAIL")]
    email: Option<String>,

    /// Portal password (overrides `password`).
    #[arg(long, env = "SCAN_HARVEST_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Portal landing page.
    #[arg(long, env = "SCAN_HARVEST_PORTAL_URL")]
    portal_url: Option<String>,

    /// Attempts per item before giving up (0 = forever).
    #[arg(long, env = "SCAN_HARVEST_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Seconds to wait between attempts.
    #[arg(long, env = "SCAN_HARVEST_RETRY_BACKOFF")]
    retry_backoff: Option<u64>,

    /// JPEG quality for re-encoded pages (1–100).
    #[arg(long, env = "SCAN_HARVEST_JPEG_QUALITY",
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: Option<u8>,

    /// Show the browser window.
    #[arg(long, env = "SCAN_HARVEST_HEADED")]
    headed: bool,

    /// Only report which items are complete; do not connect.
    #[arg(long)]
    status_only: bool,

    /// Write keys of items without an archive to this file.
    #[arg(long)]
    missing_out: Option<PathBuf>,

    /// Print the status report or run summary as JSON.
    #[arg(long, env = "SCAN_HARVEST_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "SCAN_HARVEST_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SCAN_HARVEST_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SCAN_HARVEST_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries per-page feedback, so library INFO logs are
    // muted while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.status_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if show_progress {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let tasks = load_tasks(&cli.tasks).context("Failed to load task list")?;

    // ── Status-only mode ─────────────────────────────────────────────────
    if cli.status_only {
        let output_dir = status_output_dir(&cli)?;
        let report = status::report(&tasks, &output_dir).context("Failed to scan output")?;
        if let Some(path) = &cli.missing_out {
            report.write_missing(path)?;
        }
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialise report")?
            );
        } else {
            for entry in &report.entries {
                let mark = match entry.status {
                    ItemStatus::Complete => green("✓"),
                    ItemStatus::Partial => cyan("…"),
                    ItemStatus::Missing => dim("·"),
                };
                println!("{mark} {}  {}", entry.key, dim(&format!("{:?}", entry.status)));
            }
            eprintln!(
                "{} complete, {} partial, {} missing",
                bold(&report.count(ItemStatus::Complete).to_string()),
                report.count(ItemStatus::Partial),
                report.count(ItemStatus::Missing),
            );
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let config = build_config(&cli)?;
    let output_dir = config.output_dir.clone();
    let connector = Arc::new(ChromeConnector::new(&config));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, stopping after the current step");
                cancel.cancel();
            }
        });
    }

    let mut runner = TaskRunner::new(config, connector).with_cancel(cancel);
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        runner = runner.with_progress(cb);
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let summary = runner.run(&tasks).await.context("Run aborted")?;

    if let Some(path) = &cli.missing_out {
        status::report(&tasks, &output_dir)?.write_missing(path)?;
    }

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet {
        print_summary(&summary);
    }

    if summary.cancelled {
        std::process::exit(130);
    }
    if !summary.failed.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    let mark = if summary.all_done() {
        green("✔")
    } else {
        red("✘")
    };
    eprintln!(
        "{}  {} completed  {} resumed  {} skipped  {} failed  {}",
        mark,
        bold(&summary.completed.len().to_string()),
        summary.resumed.len(),
        summary.skipped.len(),
        if summary.failed.is_empty() {
            "0".to_string()
        } else {
            red(&summary.failed.len().to_string())
        },
        dim(&format!("({} attempts)", summary.attempts)),
    );
    for failed in &summary.failed {
        eprintln!("   {} {}: {}", red("✗"), failed.key, failed.error);
    }
    if summary.cancelled {
        eprintln!("   {}", cyan("cancelled"));
    }
}

/// Config file first, then CLI flags on top.
fn build_config(cli: &Cli) -> Result<HarvestConfig> {
    let file = ConfigFile::load(&cli.config).context("Failed to load config")?;
    let mut builder = HarvestConfig::builder()
        .apply_file(&file)
        .context("Invalid config file")?
        .headless(!cli.headed);

    if let Some(dir) = &cli.output_dir {
        builder = builder.output_dir(dir);
    }
    if let Some(email) = &cli.email {
        builder = builder.email(email);
    }
    if let Some(password) = &cli.password {
        builder = builder.password(password);
    }
    if let Some(url) = &cli.portal_url {
        builder = builder.portal_url(url);
    }
    if let Some(n) = cli.max_attempts {
        builder = builder.max_attempts(if n == 0 { None } else { Some(n) });
    }
    if let Some(secs) = cli.retry_backoff {
        builder = builder.retry_backoff(Duration::from_secs(secs));
    }
    if let Some(q) = cli.jpeg_quality {
        builder = builder.jpeg_quality(q);
    }

    builder.build().context("Invalid configuration")
}

/// Output directory for `--status-only`; credentials are not needed.
fn status_output_dir(cli: &Cli) -> Result<PathBuf> {
    if let Some(dir) = &cli.output_dir {
        return Ok(dir.clone());
    }
    let file = ConfigFile::load(&cli.config).context("Failed to load config")?;
    file.get("savepath")
        .map(PathBuf::from)
        .with_context(|| format!("No savepath in {}", cli.config.display()))
}
