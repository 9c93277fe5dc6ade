//! # takeout-merge
//!
//! Merge the sidecar JSON files of a Google Photos Takeout export back into
//! the photos and videos they describe: capture time, GPS location and
//! caption end up in each file's own metadata (EXIF, or MP4/MOV atoms).
//!
//! ## Quick Start
//!
//! The simplest way to use the library is [`pipeline::run`], which walks a
//! Takeout tree, mirrors it into an export directory, and writes every
//! sidecar it can pair:
//!
//! ```rust,no_run
//! use takeout_merge::config::Config;
//! use takeout_merge::pipeline::{self, Outcome};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Some("takeout-merge.json".as_ref()))?;
//!
//!     let result = pipeline::run(
//!         &config,
//!         Path::new("Takeout/Google Photos"),
//!         Path::new("export"),
//!     ).await?;
//!
//!     for report in &result.reports {
//!         if let Outcome::Failed(ref err) = report.outcome {
//!             eprintln!("Error processing {}: {err}", report.source.display());
//!         }
//!     }
//!     println!("{} file(s) written", result.summary.with_metadata);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Lower-Level Usage
//!
//! The sidecar resolver and the writers can be used on their own:
//!
//! ```rust,no_run
//! use takeout_merge::config::SidecarConfig;
//! use takeout_merge::exif::{read_embedded, write_jpeg};
//! use takeout_merge::sidecar::{load_sidecar, resolve};
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let photo = Path::new("IMG_0001.jpg");
//!
//!     // 1. Find the sidecar
//!     let Some(found) = resolve(photo, &SidecarConfig::default()) else {
//!         return Ok(());
//!     };
//!     println!("Sidecar: {} ({})", found.path.display(), found.kind.as_str());
//!
//!     // 2. Normalize it
//!     let metadata = load_sidecar(&found.path)?.to_metadata();
//!
//!     // 3. Write it and read it back
//!     write_jpeg(photo, &metadata)?;
//!     println!("Taken at: {:?}", read_embedded(photo)?.taken_at);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Formats
//!
//! | Format | Write Strategy |
//! |--------|---------------|
//! | JPEG (`.jpg`, `.jpeg`) | Native: EXIF APP1, merged with existing tags |
//! | PNG (`.png`) | Native: EXIF `eXIf` chunk |
//! | BMP (`.bmp`) | Converted to PNG, then as PNG |
//! | MP4/MOV (`.mp4`, `.mov`, `.m4v`) | Native: `©day`, `©xyz`, `©cmt` atoms |
//! | HEIC/HEIF, WebP, TIFF | `exiftool` |
//! | GIF (`.gif`) | Copied, never written |
//!
//! ## Modules
//!
//! - [`config`]: Configuration types and loading/saving
//! - [`sidecar`]: Sidecar discovery and parsing
//! - [`exif`]: Per-format metadata writers and the EXIF reader
//! - [`pipeline`]: Discovery, per-file processing, and the worker pool

pub mod config;
pub mod exif;
pub mod pipeline;
pub mod sidecar;
