//! Document preparation: input validation, PDF rasterisation and downsampling.

use std::ffi::OsStr;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::imageops::FilterType;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::PrepareError;

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tiff", "tif"];

const RENDER_TIMEOUT: Duration = Duration::from_secs(600);

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase)
}

pub fn is_pdf(path: &Path) -> bool {
    extension_of(path).as_deref() == Some("pdf")
}

/// Rejects missing files and unsupported extensions.
pub fn validate(path: &Path) -> Result<(), PrepareError> {
    if !path.is_file() {
        return Err(PrepareError::NotFound(path.to_path_buf()));
    }
    match extension_of(path) {
        Some(ext) if ext == "pdf" || IMAGE_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        Some(ext) => Err(PrepareError::UnsupportedType(format!(".{ext}"))),
        None => Err(PrepareError::UnsupportedType("(none)".to_string())),
    }
}

/// Renders the pages of a paged document into images.
pub trait PageRenderer: Send + Sync + 'static {
    /// Writes one image per page into `out_dir`, returned in page order.
    fn render(
        &self,
        document: &Path,
        out_dir: &Path,
        dpi: u32,
    ) -> impl Future<Output = Result<Vec<PathBuf>, PrepareError>> + Send;
}

/// Renders PDFs with poppler's `pdftoppm`.
#[derive(Debug, Clone)]
pub struct PdftoppmRenderer {
    program: String,
}

impl Default for PdftoppmRenderer {
    fn default() -> Self {
        Self {
            program: "pdftoppm".to_string(),
        }
    }
}

impl PdftoppmRenderer {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl PageRenderer for PdftoppmRenderer {
    async fn render(
        &self,
        document: &Path,
        out_dir: &Path,
        dpi: u32,
    ) -> Result<Vec<PathBuf>, PrepareError> {
        let stem = file_stem(document);
        let prefix = out_dir.join(format!("{stem}_page"));
        debug!(document = %document.display(), dpi, "Rendering PDF pages");

        let mut cmd = Command::new(&self.program);
        cmd.arg("-png")
            .arg("-r")
            .arg(dpi.to_string())
            .arg(document)
            .arg(&prefix)
            .kill_on_drop(true);

        let output = tokio::time::timeout(RENDER_TIMEOUT, cmd.output())
            .await
            .map_err(|_| {
                PrepareError::Render(format!("timed out after {}s", RENDER_TIMEOUT.as_secs()))
            })?
            .map_err(|e| PrepareError::Render(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PrepareError::Render(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let rendered = collect_pages(out_dir, &format!("{stem}_page"))?;
        if rendered.is_empty() {
            return Err(PrepareError::Render("no pages rendered".to_string()));
        }

        // Normalise to `<stem>_page_<n>.png`, the name the merger strips.
        let mut pages = Vec::with_capacity(rendered.len());
        for (number, path) in rendered {
            let target = out_dir.join(format!("{stem}_page_{number}.png"));
            tokio::fs::rename(&path, &target).await?;
            pages.push(target);
        }
        Ok(pages)
    }
}

/// Finds rendered `<prefix>-N.png` files, ordered by page number.
///
/// pdftoppm zero-pads the page number to the width of the page count, so a
/// numeric sort is needed rather than a lexical one.
fn collect_pages(dir: &Path, prefix: &str) -> Result<Vec<(u32, PathBuf)>, PrepareError> {
    let mut pages: Vec<(u32, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if extension_of(&path).as_deref() != Some("png") {
            continue;
        }
        let number = path
            .file_stem()
            .and_then(OsStr::to_str)
            .and_then(|stem| stem.strip_prefix(prefix))
            .and_then(|rest| rest.strip_prefix('-'))
            .and_then(|n| n.parse::<u32>().ok());
        if let Some(number) = number {
            pages.push((number, path));
        }
    }
    pages.sort_by_key(|(number, _)| *number);
    Ok(pages)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}

/// Turns an input document into page images inside `scratch_dir`.
///
/// PDFs go through the renderer; a single image is copied so the engine
/// never writes next to the upload.
pub async fn rasterize<R: PageRenderer>(
    renderer: &R,
    input: &Path,
    scratch_dir: &Path,
    dpi: u32,
) -> Result<Vec<PathBuf>, PrepareError> {
    if is_pdf(input) {
        let pages = renderer.render(input, scratch_dir, dpi).await?;
        info!(pages = pages.len(), "Rendered PDF");
        return Ok(pages);
    }
    let name = input
        .file_name()
        .ok_or_else(|| PrepareError::NotFound(input.to_path_buf()))?;
    let copy = scratch_dir.join(name);
    tokio::fs::copy(input, &copy).await?;
    Ok(vec![copy])
}

/// Target size for an image of `width`×`height` under `pixel_ceiling`, or
/// `None` when it already fits.
pub fn downsampled_size(width: u32, height: u32, pixel_ceiling: u64) -> Option<(u32, u32)> {
    let pixels = u64::from(width) * u64::from(height);
    if pixels <= pixel_ceiling {
        return None;
    }
    let scale = (pixel_ceiling as f64 / pixels as f64).sqrt();
    let new_width = ((f64::from(width) * scale) as u32).max(1);
    let new_height = ((f64::from(height) * scale) as u32).max(1);
    Some((new_width, new_height))
}

/// Shrinks the image at `path` to fit under `pixel_ceiling`.
///
/// Returns the original path when no resize was needed, otherwise the path
/// of a new `<stem>_downsampled.<ext>` file next to it.
pub fn downsample(path: &Path, pixel_ceiling: u64) -> Result<PathBuf, PrepareError> {
    let (width, height) = image::image_dimensions(path)?;
    let Some((new_width, new_height)) = downsampled_size(width, height, pixel_ceiling) else {
        return Ok(path.to_path_buf());
    };

    info!(
        from = %format!("{width}x{height}"),
        to = %format!("{new_width}x{new_height}"),
        "Downsampling oversized page"
    );
    let img = image::open(path)?;
    let resized = img.resize_exact(new_width, new_height, FilterType::Lanczos3);

    let ext = extension_of(path).unwrap_or_else(|| "png".to_string());
    let target = path.with_file_name(format!("{}_downsampled.{ext}", file_stem(path)));
    resized.save(&target)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn validate_rejects_missing_and_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("ghost.pdf");
        assert!(matches!(validate(&missing), Err(PrepareError::NotFound(_))));

        let doc = dir.path().join("notes.docx");
        std::fs::write(&doc, b"x").unwrap();
        let err = validate(&doc).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported file type: .docx");
        assert!(err.is_invalid_input());
    }

    #[test]
    fn validate_accepts_every_supported_extension() {
        let dir = tempfile::tempdir().unwrap();
        for ext in ["png", "JPG", "jpeg", "gif", "bmp", "tiff", "tif", "pdf"] {
            let path = dir.path().join(format!("score.{ext}"));
            std::fs::write(&path, b"x").unwrap();
            assert!(validate(&path).is_ok(), "{ext} should be accepted");
        }
    }

    #[test]
    fn downsampled_size_scales_by_square_root() {
        assert_eq!(downsampled_size(100, 100, 10_000), None);
        assert_eq!(downsampled_size(100, 100, 2_500), Some((50, 50)));
        let (w, h) = downsampled_size(8000, 6000, 20_000_000).unwrap();
        assert!(u64::from(w) * u64::from(h) <= 20_000_000);
        assert!(w > 5000 && h > 3800);
    }

    #[test]
    fn downsample_writes_smaller_copy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page_1.png");
        GrayImage::from_pixel(100, 100, Luma([255])).save(&path).unwrap();

        let result = downsample(&path, 2_500).unwrap();
        assert_ne!(result, path);
        assert!(result.ends_with("page_1_downsampled.png"));
        assert_eq!(image::image_dimensions(&result).unwrap(), (50, 50));

        let unchanged = downsample(&path, 10_000).unwrap();
        assert_eq!(unchanged, path);
    }

    #[test]
    fn pages_are_collected_in_numeric_order() {
        let dir = tempfile::tempdir().unwrap();
        for n in ["10", "02", "01"] {
            std::fs::write(dir.path().join(format!("song_page-{n}.png")), b"").unwrap();
        }
        std::fs::write(dir.path().join("other.png"), b"").unwrap();

        let pages = collect_pages(dir.path(), "song_page").unwrap();
        let names: Vec<(u32, String)> = pages
            .iter()
            .map(|(n, p)| (*n, p.file_name().unwrap().to_string_lossy().into_owned()))
            .collect();
        assert_eq!(
            names,
            vec![
                (1, "song_page-01.png".to_string()),
                (2, "song_page-02.png".to_string()),
                (10, "song_page-10.png".to_string()),
            ]
        );
    }

    struct NoRenderer;

    impl PageRenderer for NoRenderer {
        async fn render(&self, _: &Path, _: &Path, _: u32) -> Result<Vec<PathBuf>, PrepareError> {
            Err(PrepareError::Render("unexpected".into()))
        }
    }

    #[tokio::test]
    async fn single_image_rasterizes_to_one_copied_page() {
        let input_dir = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let input = input_dir.path().join("etude.png");
        GrayImage::from_pixel(4, 4, Luma([0])).save(&input).unwrap();

        let pages = rasterize(&NoRenderer, &input, scratch.path(), 200).await.unwrap();
        assert_eq!(pages, vec![scratch.path().join("etude.png")]);
        assert!(pages[0].exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rendered_pages_are_renamed_in_order() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("pdftoppm.sh");
        // Arguments: -png -r <dpi> <document> <prefix>
        std::fs::write(&script, "#!/bin/sh\ntouch \"$5-2.png\" \"$5-1.png\"\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let out = dir.path().join("scratch");
        std::fs::create_dir(&out).unwrap();
        let renderer = PdftoppmRenderer::with_program(script.to_string_lossy());
        let pages = renderer
            .render(Path::new("/uploads/song.pdf"), &out, 200)
            .await
            .unwrap();
        assert_eq!(pages, vec![out.join("song_page_1.png"), out.join("song_page_2.png")]);
        assert!(pages.iter().all(|p| p.exists()));
    }
}
