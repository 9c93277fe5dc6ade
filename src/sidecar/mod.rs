//! Sidecar JSON discovery and parsing.
//!
//! - [`resolve`]: Find the sidecar that belongs to a media file
//! - [`Sidecar`] / [`MediaMetadata`]: Parse it and normalize the fields we write

mod record;

pub use record::{GeoPoint, MediaMetadata, Sidecar, load_sidecar};

use std::path::{Path, PathBuf};

use crate::config::SidecarConfig;

const JSON_EXT: &str = ".json";
const EDITED_SUFFIX: &str = "-edited";

/// How a sidecar was paired with its media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// `<name><suffix>`
    Exact,
    /// `photo(1).jpg` → `photo.jpg<suffix>(1).json`
    Duplicate,
    /// Sidecar name cut at the length limit
    Truncated,
    /// `<name>.json` or `<stem>.json`
    Legacy,
    /// Sidecar stem extends the media stem
    Prefix,
    /// Media stem extends a (truncated) sidecar stem
    FuzzyRatio,
    /// Long shared prefix
    FuzzyPrefix,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Duplicate => "duplicate",
            Self::Truncated => "truncated",
            Self::Legacy => "legacy",
            Self::Prefix => "prefix",
            Self::FuzzyRatio => "fuzzy_ratio",
            Self::FuzzyPrefix => "fuzzy_prefix",
        }
    }

    /// Convention-based matches, as opposed to similarity guesses.
    pub fn is_exact(&self) -> bool {
        !matches!(self, Self::FuzzyRatio | Self::FuzzyPrefix)
    }
}

/// A resolved sidecar.
#[derive(Debug, Clone, PartialEq)]
pub struct SidecarMatch {
    pub path: PathBuf,
    /// 1.0 for convention matches, the similarity score for fuzzy ones.
    pub confidence: f64,
    pub kind: MatchKind,
}

impl SidecarMatch {
    fn new(path: PathBuf, kind: MatchKind) -> Self {
        Self {
            path,
            confidence: 1.0,
            kind,
        }
    }
}

/// Locate the sidecar JSON for a media file.
///
/// Naming conventions are tried first, in this order: exact
/// `<name><suffix>`, duplicate counter, truncated name, legacy
/// `<name>.json`. If none exists and fuzzy matching is enabled, the
/// sibling `.json` files are scored against the media stem.
///
/// # Example
///
/// ```rust,no_run
/// use takeout_merge::config::SidecarConfig;
/// use takeout_merge::sidecar::resolve;
/// use std::path::Path;
///
/// let config = SidecarConfig::default();
/// if let Some(found) = resolve(Path::new("Takeout/Photos/IMG_0001.jpg"), &config) {
///     println!("{} ({})", found.path.display(), found.kind.as_str());
/// }
/// ```
pub fn resolve(media: &Path, config: &SidecarConfig) -> Option<SidecarMatch> {
    let dir = media.parent().unwrap_or_else(|| Path::new(""));
    let name = media.file_name()?.to_str()?;

    convention_candidates(name, config)
        .into_iter()
        .map(|(candidate, kind)| (dir.join(candidate), kind))
        .find(|(path, _)| path.is_file())
        .map(|(path, kind)| SidecarMatch::new(path, kind))
        .or_else(|| {
            if config.fuzzy {
                fuzzy_match(dir, media, config)
            } else {
                None
            }
        })
}

/// Candidate sidecar file names for a media name, most specific first.
fn convention_candidates(name: &str, config: &SidecarConfig) -> Vec<(String, MatchKind)> {
    let suffix_stem = config
        .suffix
        .strip_suffix(JSON_EXT)
        .unwrap_or(&config.suffix);
    let mut out = vec![(format!("{name}{}", config.suffix), MatchKind::Exact)];

    // Takeout moves a duplicate counter from the media stem to the end of
    // the sidecar stem: `photo(1).jpg` → `photo.jpg.supplemental-metadata(1).json`
    if let Some((base, counter)) = split_counter(name) {
        out.push((
            format!("{base}{suffix_stem}{counter}{JSON_EXT}"),
            MatchKind::Duplicate,
        ));
        out.push((format!("{base}{counter}{JSON_EXT}"), MatchKind::Duplicate));

        // The counter survives truncation: `<long name>.supplemental-metad(1).json`
        let limit = config
            .max_name_len
            .saturating_sub(JSON_EXT.len() + counter.chars().count());
        let full_stem = format!("{base}{suffix_stem}");
        if full_stem.chars().count() > limit {
            out.push((
                format!("{}{counter}{JSON_EXT}", truncate_chars(&full_stem, limit)),
                MatchKind::Duplicate,
            ));
        }
    }

    let limit = config.max_name_len.saturating_sub(JSON_EXT.len());
    let full_stem = format!("{name}{suffix_stem}");
    if full_stem.chars().count() > limit {
        out.push((
            format!("{}{JSON_EXT}", truncate_chars(&full_stem, limit)),
            MatchKind::Truncated,
        ));
    }
    // Older exports cut the suffix at arbitrary points: `photo.jpg.supplem.json`
    let name_len = name.chars().count();
    for keep in (1..suffix_stem.chars().count()).rev() {
        let stem = format!("{name}{}", truncate_chars(suffix_stem, keep));
        if stem.chars().count() <= limit && stem.chars().count() > name_len {
            out.push((format!("{stem}{JSON_EXT}"), MatchKind::Truncated));
        }
    }

    out.push((format!("{name}{JSON_EXT}"), MatchKind::Legacy));
    if let Some((stem, _)) = name.rsplit_once('.') {
        out.push((format!("{stem}{JSON_EXT}"), MatchKind::Legacy));
    }

    out.dedup_by(|a, b| a.0 == b.0);
    out
}

/// `photo(1).jpg` → `("photo.jpg", "(1)")`
fn split_counter(name: &str) -> Option<(String, String)> {
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (name, None),
    };
    let open = stem.rfind('(')?;
    let digits = stem[open + 1..].strip_suffix(')')?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let base = match ext {
        Some(ext) => format!("{}.{ext}", &stem[..open]),
        None => stem[..open].to_string(),
    };
    Some((base, stem[open..].to_string()))
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Score every sibling `.json` against the media stem.
fn fuzzy_match(dir: &Path, media: &Path, config: &SidecarConfig) -> Option<SidecarMatch> {
    let media_stem = media.file_stem()?.to_str()?;
    let media_stem = media_stem.strip_suffix(EDITED_SUFFIX).unwrap_or(media_stem);

    let mut json_files: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("json"))
        })
        .collect();
    // read_dir order is platform dependent
    json_files.sort();

    best_fuzzy_match(media_stem, &json_files, config)
}

fn best_fuzzy_match(
    media_stem: &str,
    json_files: &[PathBuf],
    config: &SidecarConfig,
) -> Option<SidecarMatch> {
    let media_len = media_stem.chars().count();
    if media_len == 0 {
        return None;
    }

    let mut best: Option<SidecarMatch> = None;
    let mut consider = |path: &Path, score: f64, kind: MatchKind| {
        if best.as_ref().is_none_or(|b| score > b.confidence) {
            best = Some(SidecarMatch {
                path: path.to_path_buf(),
                confidence: score,
                kind,
            });
        }
    };

    for json in json_files {
        let Some(json_stem) = json.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        if json_stem == media_stem {
            return Some(SidecarMatch::new(json.clone(), MatchKind::Exact));
        }

        // `photo.jpg.supplemental-metadata` extends `photo`, but `IMG_10` must
        // not claim `IMG_1`'s sidecar.
        if let Some(rest) = json_stem.strip_prefix(media_stem) {
            if rest.starts_with('.') || rest.starts_with('(') {
                return Some(SidecarMatch::new(json.clone(), MatchKind::Prefix));
            }
        }

        if media_stem.starts_with(json_stem) {
            let ratio = json_stem.chars().count() as f64 / media_len as f64;
            if ratio > config.min_truncation_ratio {
                if ratio > config.confident_ratio {
                    return Some(SidecarMatch {
                        path: json.clone(),
                        confidence: ratio,
                        kind: MatchKind::FuzzyRatio,
                    });
                }
                consider(json, ratio, MatchKind::FuzzyRatio);
            }
            continue;
        }

        let common = media_stem
            .chars()
            .zip(json_stem.chars())
            .take_while(|(a, b)| a == b)
            .count();
        if common > config.min_common_prefix {
            let longest = media_len.max(json_stem.chars().count());
            consider(json, common as f64 / longest as f64, MatchKind::FuzzyPrefix);
        }
    }

    best.filter(|b| b.confidence > config.accept_score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"{}").unwrap();
        path
    }

    // ── conventions ──────────────────────────────────────────────────

    #[test]
    fn exact_suffix_match() {
        let dir = TempDir::new().unwrap();
        let media = touch(dir.path(), "IMG_0001.jpg");
        let json = touch(dir.path(), "IMG_0001.jpg.supplemental-metadata.json");

        let found = resolve(&media, &SidecarConfig::default()).unwrap();
        assert_eq!(found.path, json);
        assert_eq!(found.kind, MatchKind::Exact);
        assert_eq!(found.confidence, 1.0);
    }

    #[test]
    fn exact_wins_over_legacy() {
        let dir = TempDir::new().unwrap();
        let media = touch(dir.path(), "IMG_0001.jpg");
        touch(dir.path(), "IMG_0001.jpg.json");
        let json = touch(dir.path(), "IMG_0001.jpg.supplemental-metadata.json");

        let found = resolve(&media, &SidecarConfig::default()).unwrap();
        assert_eq!(found.path, json);
    }

    #[test]
    fn legacy_name_json() {
        let dir = TempDir::new().unwrap();
        let media = touch(dir.path(), "IMG_0001.jpg");
        let json = touch(dir.path(), "IMG_0001.jpg.json");

        let found = resolve(&media, &SidecarConfig::default()).unwrap();
        assert_eq!(found.path, json);
        assert_eq!(found.kind, MatchKind::Legacy);
    }

    #[test]
    fn duplicate_counter_moves_to_end() {
        let dir = TempDir::new().unwrap();
        let media = touch(dir.path(), "IMG_0001(1).jpg");
        touch(dir.path(), "IMG_0001.jpg.supplemental-metadata.json");
        let json = touch(dir.path(), "IMG_0001.jpg.supplemental-metadata(1).json");

        let found = resolve(&media, &SidecarConfig::default()).unwrap();
        assert_eq!(found.path, json);
        assert_eq!(found.kind, MatchKind::Duplicate);
    }

    #[test]
    fn truncated_name_keeps_duplicate_counter() {
        let dir = TempDir::new().unwrap();
        let media = touch(dir.path(), "PXL_20230501_100000000.PORTRAIT(1).jpg");
        let json = touch(
            dir.path(),
            "PXL_20230501_100000000.PORTRAIT.jpg.supplemental-me(1).json",
        );
        assert_eq!(json.file_name().unwrap().len(), 59);

        let config = SidecarConfig {
            max_name_len: 59,
            ..SidecarConfig::default()
        };
        let found = resolve(&media, &config).unwrap();
        assert_eq!(found.path, json);
        assert_eq!(found.kind, MatchKind::Duplicate);
    }

    #[test]
    fn truncated_counter_at_default_limit() {
        let dir = TempDir::new().unwrap();
        let name = "PXL_20230501_100000000.PORTRAIT.ORIGINAL(2).jpg";
        let media = touch(dir.path(), name);
        // 43 chars of stem + "(2)" + ".json" = 51
        let full_stem = "PXL_20230501_100000000.PORTRAIT.ORIGINAL.jpg.supplemental-metadata";
        let json_name = format!("{}(2).json", truncate_chars(full_stem, 43));
        assert_eq!(json_name.chars().count(), 51);
        let json = touch(dir.path(), &json_name);

        let found = resolve(&media, &SidecarConfig::default()).unwrap();
        assert_eq!(found.path, json);
        assert_eq!(found.kind, MatchKind::Duplicate);
    }

    #[test]
    fn truncated_long_name() {
        let dir = TempDir::new().unwrap();
        let name = "PXL_20230501_100000000.PORTRAIT.ORIGINAL.jpg";
        let media = touch(dir.path(), name);
        // 46 chars of stem + ".json" = 51
        let json_name = format!(
            "{}.json",
            truncate_chars(&format!("{name}.supplemental-metadata"), 46)
        );
        let json = touch(dir.path(), &json_name);

        let found = resolve(&media, &SidecarConfig::default()).unwrap();
        assert_eq!(found.path, json);
        assert_eq!(found.kind, MatchKind::Truncated);
    }

    #[test]
    fn partially_cut_suffix() {
        let dir = TempDir::new().unwrap();
        let media = touch(dir.path(), "IMG_0001.jpg");
        let json = touch(dir.path(), "IMG_0001.jpg.supplem.json");

        let found = resolve(&media, &SidecarConfig::default()).unwrap();
        assert_eq!(found.path, json);
        assert_eq!(found.kind, MatchKind::Truncated);
    }

    #[test]
    fn custom_suffix() {
        let dir = TempDir::new().unwrap();
        let media = touch(dir.path(), "clip.mp4");
        let json = touch(dir.path(), "clip.mp4.meta.json");
        let config = SidecarConfig {
            suffix: ".meta.json".to_string(),
            ..SidecarConfig::default()
        };

        let found = resolve(&media, &config).unwrap();
        assert_eq!(found.path, json);
    }

    #[test]
    fn missing_sidecar() {
        let dir = TempDir::new().unwrap();
        let media = touch(dir.path(), "IMG_0001.jpg");
        touch(dir.path(), "unrelated.json");
        assert!(resolve(&media, &SidecarConfig::default()).is_none());
    }

    // ── fuzzy ────────────────────────────────────────────────────────

    #[test]
    fn edited_variant_shares_sidecar() {
        let dir = TempDir::new().unwrap();
        let media = touch(dir.path(), "IMG_0001-edited.jpg");
        let json = touch(dir.path(), "IMG_0001.jpg.supplemental-metadata.json");

        let found = resolve(&media, &SidecarConfig::default()).unwrap();
        assert_eq!(found.path, json);
        assert_eq!(found.kind, MatchKind::Prefix);
    }

    #[test]
    fn prefix_does_not_cross_numbers() {
        let dir = TempDir::new().unwrap();
        let media = touch(dir.path(), "IMG_1.jpg");
        touch(dir.path(), "IMG_10.jpg.supplemental-metadata.json");
        let config = SidecarConfig {
            fuzzy: true,
            ..SidecarConfig::default()
        };
        assert!(resolve(&media, &config).is_none());
    }

    #[test]
    fn fuzzy_disabled() {
        let dir = TempDir::new().unwrap();
        let media = touch(dir.path(), "IMG_0001-edited.jpg");
        touch(dir.path(), "IMG_0001.jpg.supplemental-metadata.json");
        let config = SidecarConfig {
            fuzzy: false,
            ..SidecarConfig::default()
        };
        assert!(resolve(&media, &config).is_none());
    }

    #[test]
    fn fuzzy_ratio_for_truncated_stem() {
        let config = SidecarConfig::default();
        let files = vec![PathBuf::from("/x/holiday_photo_from_the_beach.json")];
        let found = best_fuzzy_match("holiday_photo_from_the_beach_2", &files, &config).unwrap();
        assert_eq!(found.kind, MatchKind::FuzzyRatio);
        assert!(found.confidence > 0.85);
        assert!(!found.kind.is_exact());
    }

    #[test]
    fn fuzzy_prefix_needs_enough_overlap() {
        let config = SidecarConfig::default();
        let files = vec![PathBuf::from("/x/Screenshot_2023.json")];
        // shares only "Screenshot_" with a much longer stem
        assert!(best_fuzzy_match("Screenshot_1999_12_31_with_a_long_tail", &files, &config).is_none());
    }

    #[test]
    fn fuzzy_thresholds_are_configurable() {
        let files = vec![PathBuf::from("/x/vacation_album.json")];
        let strict = SidecarConfig::default();
        assert!(best_fuzzy_match("vacation_album_extra_copy_2", &files, &strict).is_none());

        let loose = SidecarConfig {
            min_truncation_ratio: 0.3,
            accept_score: 0.3,
            ..SidecarConfig::default()
        };
        let found = best_fuzzy_match("vacation_album_extra_copy_2", &files, &loose).unwrap();
        assert_eq!(found.kind, MatchKind::FuzzyRatio);
    }

    // ── helpers ──────────────────────────────────────────────────────

    #[test]
    fn split_counter_variants() {
        assert_eq!(
            split_counter("photo(1).jpg"),
            Some(("photo.jpg".to_string(), "(1)".to_string()))
        );
        assert_eq!(split_counter("photo(12)"), Some(("photo".to_string(), "(12)".to_string())));
        assert_eq!(split_counter("photo.jpg"), None);
        assert_eq!(split_counter("photo(a).jpg"), None);
        assert_eq!(split_counter("photo().jpg"), None);
    }

    #[test]
    fn truncate_chars_respects_utf8() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
