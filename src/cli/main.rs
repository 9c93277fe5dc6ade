mod logging;
mod progress;

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use serde::Serialize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use takeout_merge::config::{Config, parse_date_filter, parse_file_types};
use takeout_merge::pipeline::{self, Summary};

/// Written by `--init` when `--config` is not given.
const DEFAULT_CONFIG_FILE: &str = "takeout-merge.json";

#[derive(Parser, Debug)]
#[command(
    name = "takeout-merge",
    version,
    about = "Merge Google Photos Takeout sidecar metadata (capture time, GPS, captions) back into photos and videos"
)]
struct Cli {
    /// Root of the Google Photos Takeout tree
    #[arg(short, long, value_name = "DIR", required_unless_present = "init")]
    source: Option<PathBuf>,

    /// Directory the media files are copied (or moved) into before writing
    #[arg(short = 'o', long, value_name = "DIR", required_unless_present = "init")]
    export_dir: Option<PathBuf>,

    /// JSON-lines log file
    #[arg(short, long, value_name = "FILE", default_value = "takeout-merge.log")]
    log_file: PathBuf,

    /// Also log to the console
    #[arg(long)]
    console_log: bool,

    /// error, warn, info, debug or trace
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: LevelFilter,

    /// Number of files processed in parallel [default: 4]
    #[arg(long, value_name = "N")]
    max_workers: Option<usize>,

    /// Move files instead of copying (removes originals)
    #[arg(long)]
    move_files: bool,

    /// Preview operations without making any changes
    #[arg(long)]
    dry_run: bool,

    /// Skip files that already exist in the export directory
    #[arg(long)]
    skip_existing: bool,

    /// Write run statistics to a JSON file
    #[arg(long, value_name = "FILE")]
    stats_file: Option<PathBuf>,

    /// Only files taken on or after this date (YYYY-MM-DD or epoch seconds)
    #[arg(long, value_name = "DATE")]
    date_from: Option<String>,

    /// Only files taken on or before this date (YYYY-MM-DD or epoch seconds)
    #[arg(long, value_name = "DATE")]
    date_to: Option<String>,

    /// Only these extensions, comma-separated (e.g. "jpg,png,mp4")
    #[arg(long, value_name = "LIST")]
    file_types: Option<String>,

    /// Sidecar suffix appended to the media file name
    #[arg(long, value_name = "SUFFIX")]
    metadata_suffix: Option<String>,

    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write a default config file and exit
    #[arg(long)]
    init: bool,

    /// Path to the exiftool program
    #[arg(long, value_name = "PATH")]
    exiftool: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle --init
    if cli.init {
        let path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Config::default().save(&path)?;
        println!("Default config written to {}", path.display());
        return Ok(());
    }

    let (Some(source), Some(export_dir)) = (cli.source.as_deref(), cli.export_dir.as_deref())
    else {
        anyhow::bail!("--source and --export-dir are required. Use --help for usage.");
    };

    create_log_dir(&cli.log_file)?;
    logging::init(&cli.log_file, cli.console_log, cli.log_level)?;

    let mut config = Config::load(cli.config.as_deref())?;
    apply_overrides(&cli, &mut config)?;
    config.validate()?;
    pipeline::validate_paths(source, export_dir, config.dry_run)?;

    print_banner(&cli, &config, source, export_dir);
    log::info!(
        source:% = source.display(),
        export_dir:% = export_dir.display(),
        workers = config.workers,
        move_files = config.transfer.move_files,
        dry_run = config.dry_run,
        skip_existing = config.transfer.skip_existing;
        "Starting takeout merge"
    );

    let show_bar = !cli.console_log && std::io::stderr().is_terminal();
    let bar = Arc::new(progress::Bar::new(show_bar)?);
    let result = pipeline::run_with_progress(&config, source, export_dir, bar.clone()).await?;
    bar.finish();
    log::info!(
        written = result.summary.with_metadata,
        skipped = result.summary.skipped,
        filtered = result.summary.filtered,
        failed = result.summary.failed;
        "Run complete"
    );

    print_summary(&result.summary);

    if let Some(ref stats_path) = cli.stats_file {
        let stats = Stats {
            summary: &result.summary,
            source: source.display().to_string(),
            export_dir: export_dir.display().to_string(),
            dry_run: config.dry_run,
            skip_existing: config.transfer.skip_existing,
        };
        let json = serde_json::to_string_pretty(&stats)?;
        std::fs::write(stats_path, json)
            .with_context(|| format!("Failed to write stats file {}", stats_path.display()))?;
        println!("\nStatistics exported to: {}", stats_path.display());
    }

    Ok(())
}

/// Command-line flags win over the config file.
fn apply_overrides(cli: &Cli, config: &mut Config) -> Result<()> {
    if let Some(workers) = cli.max_workers {
        config.workers = workers;
    }
    if cli.move_files {
        config.transfer.move_files = true;
    }
    if cli.dry_run {
        config.dry_run = true;
    }
    if cli.skip_existing {
        config.transfer.skip_existing = true;
    }
    if let Some(ref from) = cli.date_from {
        config.filters.date_from = Some(parse_date_filter(from)?);
    }
    if let Some(ref to) = cli.date_to {
        config.filters.date_to = Some(parse_date_filter(to)?);
    }
    if let Some(ref types) = cli.file_types {
        let types = parse_file_types(types);
        if !types.is_empty() {
            config.filters.file_types = Some(types);
        }
    }
    if let Some(ref suffix) = cli.metadata_suffix {
        config.sidecar.suffix = suffix.clone();
    }
    if let Some(ref program) = cli.exiftool {
        config.exiftool.program = program.clone();
    }
    Ok(())
}

fn create_log_dir(log_file: &Path) -> Result<()> {
    if let Some(parent) = log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create log file directory: {}", parent.display()))?;
    }
    Ok(())
}

/// Shape of the `--stats-file` JSON.
#[derive(Serialize)]
struct Stats<'a> {
    #[serde(flatten)]
    summary: &'a Summary,
    source: String,
    export_dir: String,
    dry_run: bool,
    skip_existing: bool,
}

const RULE_WIDTH: usize = 60;

fn print_banner(cli: &Cli, config: &Config, source: &Path, export_dir: &Path) {
    println!("{}", "=".repeat(RULE_WIDTH));
    println!("Starting takeout-merge");
    println!("{}", "=".repeat(RULE_WIDTH));
    print_row("Source", &source.display().to_string());
    print_row("Export directory", &export_dir.display().to_string());
    print_row("Log file", &cli.log_file.display().to_string());
    print_row("Max workers", &config.workers.to_string());
    print_row("Move files", &config.transfer.move_files.to_string());
    print_row("Dry run", &config.dry_run.to_string());
    print_row("Skip existing", &config.transfer.skip_existing.to_string());
    if let Some(from) = config.filters.date_from {
        print_row("Date from", &from.to_string());
    }
    if let Some(to) = config.filters.date_to {
        print_row("Date to", &to.to_string());
    }
    if let Some(ref types) = config.filters.file_types {
        let types: Vec<&str> = types.iter().map(String::as_str).collect();
        print_row("File types", &types.join(", "));
    }
    println!("{}", "=".repeat(RULE_WIDTH));
    println!();
}

fn print_summary(summary: &Summary) {
    println!();
    println!("{}", "=".repeat(RULE_WIDTH));
    println!("Processing Summary");
    println!("{}", "=".repeat(RULE_WIDTH));
    print_row("Total files found", &summary.total_files.to_string());
    print_row("Media processed", &summary.media_processed.to_string());
    print_row("Unsupported files", &summary.unsupported_files.to_string());
    print_row("Media with metadata", &summary.with_metadata.to_string());
    print_row("Media skipped", &summary.skipped.to_string());
    print_row("Media filtered", &summary.filtered.to_string());
    print_row("Media failed", &summary.failed.to_string());
    print_row("Sidecars transferred", &summary.sidecars_transferred.to_string());
    for (reason, count) in &summary.skip_reasons {
        print_row(&format!("  skipped ({reason})"), &count.to_string());
    }
    for (backend, count) in &summary.backends {
        print_row(&format!("  written by {backend}"), &count.to_string());
    }
    println!("{}", "=".repeat(RULE_WIDTH));
}

fn print_row(label: &str, value: &str) {
    println!("{:<29}{value}", format!("{label}:"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["takeout-merge"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    // ── argument parsing ─────────────────────────────────────────────

    #[test]
    fn source_and_export_required() {
        assert!(Cli::try_parse_from(["takeout-merge"]).is_err());
        assert!(Cli::try_parse_from(["takeout-merge", "-s", "in"]).is_err());
        assert!(Cli::try_parse_from(["takeout-merge", "--init"]).is_ok());
    }

    #[test]
    fn defaults() {
        let cli = cli(&["-s", "in", "-o", "out"]);
        assert_eq!(cli.log_file, PathBuf::from("takeout-merge.log"));
        assert_eq!(cli.log_level, LevelFilter::Info);
        assert!(!cli.console_log);
        assert!(cli.max_workers.is_none());
    }

    #[test]
    fn overrides_win_over_config() {
        let cli = cli(&[
            "-s", "in", "-o", "out",
            "--max-workers", "8",
            "--move-files",
            "--dry-run",
            "--date-from", "2023-01-01",
            "--file-types", " JPG, .mp4",
            "--metadata-suffix", ".json",
            "--exiftool", "/opt/bin/exiftool",
        ]);
        let mut config = Config::default();
        apply_overrides(&cli, &mut config).unwrap();

        assert_eq!(config.workers, 8);
        assert!(config.transfer.move_files);
        assert!(config.dry_run);
        assert_eq!(config.filters.date_from, Some(1_672_531_200));
        let types = config.filters.file_types.unwrap();
        assert!(types.contains("jpg") && types.contains("mp4"));
        assert_eq!(config.sidecar.suffix, ".json");
        assert_eq!(config.exiftool.program, PathBuf::from("/opt/bin/exiftool"));
    }

    #[test]
    fn bad_date_is_fatal() {
        let cli = cli(&["-s", "in", "-o", "out", "--date-to", "yesterday"]);
        assert!(apply_overrides(&cli, &mut Config::default()).is_err());
    }

    // ── log directory ────────────────────────────────────────────────

    #[test]
    fn creates_log_dir() {
        let out = TempDir::new().unwrap();
        let log_file = out.path().join("logs/run.log");

        create_log_dir(&log_file).unwrap();
        assert!(log_file.parent().unwrap().is_dir());
        create_log_dir(Path::new("bare.log")).unwrap();
    }

    // ── stats ────────────────────────────────────────────────────────

    #[test]
    fn stats_json_is_flat() {
        let summary = Summary {
            failed: 2,
            ..Summary::default()
        };
        let stats = Stats {
            summary: &summary,
            source: "in".to_string(),
            export_dir: "out".to_string(),
            dry_run: false,
            skip_existing: true,
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["failed"], 2);
        assert_eq!(json["source"], "in");
        assert_eq!(json["skip_existing"], true);
    }
}
