use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::task::{FileReport, Job, Outcome, SkipReason, process_entry};
use super::transfer::transfer;
use super::{Discovery, MediaEntry, collect_media};
use crate::config::Config;

/// Per-file reports, in discovery order, plus their totals.
#[derive(Debug)]
pub struct RunReport {
    pub reports: Vec<FileReport>,
    pub summary: Summary,
}

/// Totals for one run, folded from the per-file reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    /// Every file seen except JSON.
    pub total_files: usize,
    /// Media files handed to the worker pool.
    pub media_processed: usize,
    /// Non-media files plus media with no writable metadata (GIF).
    pub unsupported_files: usize,
    /// Written, or would be written in a dry run.
    pub with_metadata: usize,
    pub skipped: usize,
    pub filtered: usize,
    pub failed: usize,
    pub sidecars_transferred: usize,
    pub skip_reasons: BTreeMap<&'static str, usize>,
    pub backends: BTreeMap<&'static str, usize>,
}

impl Summary {
    fn fold(discovery: &Discovery, reports: &[FileReport]) -> Self {
        let mut summary = Self {
            total_files: discovery.entries.len() + discovery.unsupported + discovery.filtered,
            media_processed: reports.len(),
            unsupported_files: discovery.unsupported,
            filtered: discovery.filtered,
            ..Self::default()
        };

        for report in reports {
            match &report.outcome {
                Outcome::Written { backend, .. } => {
                    summary.with_metadata += 1;
                    *summary.backends.entry(backend.as_str()).or_default() += 1;
                }
                Outcome::Planned => summary.with_metadata += 1,
                Outcome::Skipped(SkipReason::Filtered) => summary.filtered += 1,
                Outcome::Skipped(reason) => {
                    summary.skipped += 1;
                    if matches!(reason, SkipReason::Unsupported(_)) {
                        summary.unsupported_files += 1;
                    }
                    *summary.skip_reasons.entry(reason.as_str()).or_default() += 1;
                }
                Outcome::Failed(_) => summary.failed += 1,
            }
        }

        summary
    }
}

/// Process every media file under `source` into `export_root`.
///
/// The source tree is walked once. Each media file then runs as its own
/// blocking task; at most `config.workers` run at a time. A task that panics
/// is reported as [`Outcome::Failed`] for that file only. Sidecars are
/// transferred after every task has finished, since several media files
/// can share one sidecar.
///
/// # Example
///
/// ```rust,no_run
/// use takeout_merge::config::Config;
/// use takeout_merge::pipeline::run;
/// use std::path::Path;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::default();
/// let result = run(&config, Path::new("Takeout/Google Photos"), Path::new("export")).await?;
/// println!("{} written, {} failed", result.summary.with_metadata, result.summary.failed);
/// # Ok(())
/// # }
/// ```
pub async fn run(config: &Config, source: &Path, export_root: &Path) -> Result<RunReport> {
    run_with_progress(config, source, export_root, Arc::new(())).await
}

/// [`run`], reporting each finished file to `progress` as it completes.
pub async fn run_with_progress(
    config: &Config,
    source: &Path,
    export_root: &Path,
    progress: Arc<dyn Progress>,
) -> Result<RunReport> {
    config.validate()?;
    validate_paths(source, export_root, config.dry_run)?;

    let discovery = collect_media(source, config);
    progress.start(discovery.entries.len());
    log::info!(
        "Found {} media file(s), {} JSON file(s), {} unsupported file(s)",
        discovery.entries.len(),
        discovery.json_files,
        discovery.unsupported
    );
    if config.dry_run {
        log::info!("DRY RUN: no files will be modified");
    }

    let job = Arc::new(Job::new(config.clone(), export_root));
    let reports = run_pool(&discovery.entries, &job, config.workers, &progress).await?;

    let sidecars_transferred = if config.dry_run {
        0
    } else {
        transfer_sidecars(&reports, source, &job)
    };

    let mut summary = Summary::fold(&discovery, &reports);
    summary.sidecars_transferred = sidecars_transferred;
    Ok(RunReport { reports, summary })
}

async fn run_pool(
    entries: &[MediaEntry],
    job: &Arc<Job>,
    workers: usize,
    progress: &Arc<dyn Progress>,
) -> Result<Vec<FileReport>> {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut set = JoinSet::new();

    for (index, entry) in entries.iter().cloned().enumerate() {
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .context("Worker pool closed")?;
        let job = Arc::clone(job);
        let progress = Arc::clone(progress);
        set.spawn_blocking(move || {
            let _permit = permit;
            let report = process_guarded(&entry, &job);
            progress.file_done(&report);
            (index, report)
        });
    }

    let mut slots: Vec<Option<FileReport>> = (0..entries.len()).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, report)) => slots[index] = Some(report),
            Err(e) => log::error!("Worker task did not complete: {e}"),
        }
    }

    Ok(slots
        .into_iter()
        .zip(entries)
        .map(|(slot, entry)| {
            slot.unwrap_or_else(|| {
                FileReport::new(
                    entry,
                    &job.export_root,
                    Outcome::Failed("worker task did not complete".to_string()),
                )
            })
        })
        .collect())
}

/// Receives progress from a run. `file_done` is called from worker
/// threads, once per media file, in completion order.
pub trait Progress: Send + Sync {
    /// Discovery is done and `total` media files are about to be processed.
    fn start(&self, _total: usize) {}

    fn file_done(&self, _report: &FileReport) {}
}

impl Progress for () {}

const WRITE_CHECK_FILE: &str = ".takeout-merge-write-check";

/// Checks that must pass before any file is touched: the source is a
/// readable directory, the export root lies outside it, and (unless this
/// is a dry run) the export root can be created and written to.
pub fn validate_paths(source: &Path, export_root: &Path, dry_run: bool) -> Result<()> {
    if !source.exists() {
        anyhow::bail!("Source path does not exist: {}", source.display());
    }
    if !source.is_dir() {
        anyhow::bail!("Source path is not a directory: {}", source.display());
    }
    std::fs::read_dir(source)
        .with_context(|| format!("Source directory is not readable: {}", source.display()))?;

    let source_abs = source
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", source.display()))?;
    let export_abs = if export_root.exists() {
        export_root.canonicalize()
    } else {
        std::path::absolute(export_root)
    }
    .with_context(|| format!("Failed to resolve {}", export_root.display()))?;
    if export_abs.starts_with(&source_abs) {
        anyhow::bail!(
            "Export directory {} must not be inside the source tree {}",
            export_root.display(),
            source.display()
        );
    }
    if export_root.exists() && !export_root.is_dir() {
        anyhow::bail!("Export path is not a directory: {}", export_root.display());
    }

    if !dry_run {
        std::fs::create_dir_all(export_root).with_context(|| {
            format!("Cannot create export directory: {}", export_root.display())
        })?;
        let check = export_root.join(WRITE_CHECK_FILE);
        std::fs::write(&check, b"")
            .with_context(|| format!("No write permission in {}", export_root.display()))?;
        std::fs::remove_file(&check)
            .with_context(|| format!("Failed to remove {}", check.display()))?;
    }

    Ok(())
}

/// Run one task, turning a panic into a failed report.
fn process_guarded(entry: &MediaEntry, job: &Job) -> FileReport {
    match panic::catch_unwind(AssertUnwindSafe(|| process_entry(entry, job))) {
        Ok(report) => report,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!(
                source:% = entry.source.display();
                "Task panicked: {message}"
            );
            FileReport::new(
                entry,
                &job.export_root,
                Outcome::Failed(format!("panic: {message}")),
            )
        }
    }
}

/// Mirror each distinct sidecar of a transferred media file into the
/// export tree. Returns how many were transferred.
fn transfer_sidecars(reports: &[FileReport], source: &Path, job: &Job) -> usize {
    let sidecars: BTreeSet<&PathBuf> = reports
        .iter()
        .filter(|r| r.transferred)
        .filter_map(|r| r.sidecar.as_ref())
        .collect();

    let mode = job.transfer_mode();
    let mut count = 0;
    for sidecar in sidecars {
        let Ok(relative) = sidecar.strip_prefix(source) else {
            log::warn!("Sidecar outside the source tree: {}", sidecar.display());
            continue;
        };
        let dest = job.export_root.join(relative);
        match transfer(sidecar, &dest, mode) {
            Ok(()) => count += 1,
            Err(e) => log::error!(
                sidecar:% = sidecar.display();
                "Failed to {} sidecar: {e:#}",
                mode.verb()
            ),
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sidecar_json(timestamp: i64) -> String {
        format!(
            r#"{{"photoTakenTime": {{"timestamp": "{timestamp}"}},
                "geoData": {{"latitude": 37.0, "longitude": -122.0}}}}"#
        )
    }

    /// A small Takeout-shaped tree under `root`.
    fn takeout(root: &Path) {
        let album = root.join("Photos from 2023");
        fs::create_dir_all(&album).unwrap();
        for (i, name) in ["IMG_0001.jpg", "IMG_0002.jpg", "IMG_0003.png"].iter().enumerate() {
            let path = album.join(name);
            image::RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]))
                .save(&path)
                .unwrap();
            fs::write(
                album.join(format!("{name}.supplemental-metadata.json")),
                sidecar_json(1_682_935_200 + i as i64),
            )
            .unwrap();
        }
        image::RgbImage::new(4, 4).save(album.join("no_sidecar.jpg")).unwrap();
        fs::write(album.join("anim.gif"), b"GIF89a").unwrap();
        fs::write(album.join("anim.gif.supplemental-metadata.json"), sidecar_json(1)).unwrap();
        fs::write(album.join("metadata.txt"), b"x").unwrap();
    }

    fn config(workers: usize) -> Config {
        let mut config = Config::default();
        config.workers = workers;
        config.exiftool.program = PathBuf::from("takeout-merge-no-such-exiftool");
        config
    }

    fn outcomes(report: &RunReport, root: &Path) -> Vec<(PathBuf, &'static str)> {
        report
            .reports
            .iter()
            .map(|r| (r.dest.strip_prefix(root).unwrap().to_path_buf(), r.outcome.label()))
            .collect()
    }

    // ── run ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn run_processes_tree() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        takeout(src.path());

        let result = run(&config(2), src.path(), out.path()).await.unwrap();
        let summary = &result.summary;
        assert_eq!(summary.media_processed, 5);
        assert_eq!(summary.with_metadata, 3);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.unsupported_files, 2);
        assert_eq!(summary.total_files, 6);
        assert_eq!(summary.skip_reasons.get("no_sidecar"), Some(&1));
        assert_eq!(summary.skip_reasons.get("unsupported"), Some(&1));
        assert_eq!(summary.backends.get("jpeg"), Some(&2));
        assert_eq!(summary.backends.get("png"), Some(&1));
        assert_eq!(summary.sidecars_transferred, 4);

        let album = out.path().join("Photos from 2023");
        assert!(album.join("IMG_0001.jpg.supplemental-metadata.json").exists());
        assert!(album.join("no_sidecar.jpg").exists());
        assert!(album.join("anim.gif").exists());
        assert!(!album.join("metadata.txt").exists());
    }

    #[tokio::test]
    async fn worker_count_does_not_change_outcomes() {
        let src = TempDir::new().unwrap();
        takeout(src.path());

        let out_one = TempDir::new().unwrap();
        let one = run(&config(1), src.path(), out_one.path()).await.unwrap();
        let out_many = TempDir::new().unwrap();
        let many = run(&config(4), src.path(), out_many.path()).await.unwrap();

        assert_eq!(outcomes(&one, out_one.path()), outcomes(&many, out_many.path()));
        assert_eq!(one.summary, many.summary);
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        takeout(src.path());

        run(&config(2), src.path(), out.path()).await.unwrap();
        let dest = out.path().join("Photos from 2023/IMG_0001.jpg");
        let first = crate::exif::read_embedded(&dest).unwrap();

        let second_run = run(&config(2), src.path(), out.path()).await.unwrap();
        assert_eq!(second_run.summary.failed, 0);
        assert_eq!(crate::exif::read_embedded(&dest).unwrap(), first);
    }

    #[tokio::test]
    async fn move_mode_empties_source() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        takeout(src.path());

        let mut config = config(3);
        config.transfer.move_files = true;
        let result = run(&config, src.path(), out.path()).await.unwrap();
        assert_eq!(result.summary.failed, 0);

        let album = src.path().join("Photos from 2023");
        assert!(!album.join("IMG_0001.jpg").exists());
        assert!(!album.join("IMG_0001.jpg.supplemental-metadata.json").exists());
        assert!(album.join("metadata.txt").exists());
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        takeout(src.path());

        let mut config = config(2);
        config.dry_run = true;
        let result = run(&config, src.path(), out.path()).await.unwrap();
        assert_eq!(result.summary.with_metadata, 3);
        assert_eq!(result.summary.sidecars_transferred, 0);
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        assert!(run(&config(0), src.path(), out.path()).await.is_err());
    }

    #[tokio::test]
    async fn bitmap_never_overwrites_same_named_png() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        image::RgbImage::from_pixel(3, 3, image::Rgb([255, 0, 0]))
            .save(src.path().join("scan.bmp"))
            .unwrap();
        image::RgbImage::from_pixel(5, 5, image::Rgb([0, 0, 255]))
            .save(src.path().join("scan.png"))
            .unwrap();
        for name in ["scan.bmp", "scan.png"] {
            fs::write(
                src.path().join(format!("{name}.supplemental-metadata.json")),
                sidecar_json(1_682_935_200),
            )
            .unwrap();
        }

        let mut config = config(1);
        config.transfer.move_files = true;
        let result = run(&config, src.path(), out.path()).await.unwrap();
        assert_eq!(result.summary.with_metadata, 2, "{:?}", result.reports);

        let finals: BTreeSet<&Path> = result.reports.iter().map(|r| r.final_path()).collect();
        assert_eq!(finals.len(), 2);

        let dims = |name: &str| image::open(out.path().join(name)).unwrap().to_rgb8().dimensions();
        assert_eq!(dims("scan.png"), (5, 5));
        assert_eq!(dims("scan.bmp.png"), (3, 3));
    }

    // ── progress ─────────────────────────────────────────────────────

    #[derive(Default)]
    struct Counter {
        total: std::sync::atomic::AtomicUsize,
        done: std::sync::atomic::AtomicUsize,
    }

    impl Progress for Counter {
        fn start(&self, total: usize) {
            self.total.store(total, std::sync::atomic::Ordering::SeqCst);
        }

        fn file_done(&self, _report: &FileReport) {
            self.done.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn progress_sees_every_file() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        takeout(src.path());

        let counter = Arc::new(Counter::default());
        let result = run_with_progress(&config(3), src.path(), out.path(), counter.clone())
            .await
            .unwrap();

        let total = counter.total.load(std::sync::atomic::Ordering::SeqCst);
        assert_eq!(total, 5);
        assert_eq!(counter.done.load(std::sync::atomic::Ordering::SeqCst), total);
        assert_eq!(result.reports.len(), total);
    }

    // ── validate_paths ───────────────────────────────────────────────

    #[tokio::test]
    async fn missing_source_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = run(&config(1), &dir.path().join("nope"), &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"), "{err}");
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn file_source_is_fatal() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.jpg");
        fs::write(&file, b"x").unwrap();
        let err = run(&config(1), &file, &dir.path().join("export"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a directory"), "{err}");
    }

    #[test]
    fn export_inside_source_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = validate_paths(dir.path(), &dir.path().join("export"), true).unwrap_err();
        assert!(err.to_string().contains("inside the source"));
    }

    #[test]
    fn export_file_is_fatal() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let file = out.path().join("export");
        fs::write(&file, b"x").unwrap();
        assert!(validate_paths(src.path(), &file, true).is_err());
        assert!(validate_paths(src.path(), &file, false).is_err());
    }

    #[test]
    fn creates_export_and_leaves_no_check_file() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let export = out.path().join("export/deep");

        validate_paths(src.path(), &export, false).unwrap();
        assert!(export.is_dir());
        assert_eq!(fs::read_dir(&export).unwrap().count(), 0);
    }

    #[test]
    fn dry_run_does_not_create_export() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let export = out.path().join("export");

        validate_paths(src.path(), &export, true).unwrap();
        assert!(!export.exists());
    }

    #[test]
    fn read_only_export_is_fatal() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let mut perms = fs::metadata(out.path()).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(out.path(), perms.clone()).unwrap();

        // Permission bits do not bind a privileged user
        let writable = fs::write(out.path().join("x"), b"").is_ok();
        let result = validate_paths(src.path(), out.path(), false);

        perms.set_readonly(false);
        fs::set_permissions(out.path(), perms).unwrap();
        if !writable {
            let err = result.unwrap_err();
            assert!(err.to_string().contains("No write permission"), "{err}");
        }
    }

    // ── Summary::fold ────────────────────────────────────────────────

    #[test]
    fn fold_counts_filtered_from_both_sources() {
        let discovery = Discovery {
            filtered: 2,
            ..Discovery::default()
        };
        let report = FileReport {
            source: PathBuf::from("a.jpg"),
            dest: PathBuf::from("out/a.jpg"),
            sidecar: None,
            transferred: false,
            outcome: Outcome::Skipped(SkipReason::Filtered),
        };
        let summary = Summary::fold(&discovery, &[report]);
        assert_eq!(summary.filtered, 3);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.total_files, 2);
    }
}
