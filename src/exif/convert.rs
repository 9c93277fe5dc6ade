use anyhow::{Context, Result};
use image::ImageFormat;
use std::path::Path;

/// Convert a bitmap to a PNG at `png_path` and delete the original.
///
/// The original stays in place when decoding or saving fails.
pub fn bmp_to_png(path: &Path, png_path: &Path) -> Result<()> {
    log::info!(
        "Converting {} to {} for metadata support",
        path.display(),
        png_path.display()
    );

    let img = image::open(path).with_context(|| format!("Failed to decode {}", path.display()))?;
    img.save_with_format(png_path, ImageFormat::Png)
        .with_context(|| format!("Failed to write {}", png_path.display()))?;

    std::fs::remove_file(path)
        .with_context(|| format!("Failed to remove converted original {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn converts_and_removes_original() {
        let dir = TempDir::new().unwrap();
        let bmp = dir.path().join("scan.bmp");
        image::RgbImage::from_pixel(3, 2, image::Rgb([1, 2, 3]))
            .save(&bmp)
            .unwrap();

        let png = dir.path().join("scan.bmp.png");
        bmp_to_png(&bmp, &png).unwrap();
        assert!(!bmp.exists());

        let decoded = image::open(&png).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(0, 0), &image::Rgb([1, 2, 3]));
    }

    #[test]
    fn undecodable_bitmap_keeps_original() {
        let dir = TempDir::new().unwrap();
        let bmp = dir.path().join("broken.bmp");
        std::fs::write(&bmp, b"BM garbage").unwrap();

        assert!(bmp_to_png(&bmp, &dir.path().join("broken.png")).is_err());
        assert!(bmp.exists());
    }
}
