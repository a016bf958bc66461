//! PDF to page-image conversion.
//!
//! [`PdfiumRasterizer`] renders every page with Google PDFium and writes
//! `page-0001.png`, `page-0002.png`, ... into a caller-owned directory. Zero-padded names keep
//! lexicographic order equal to page order.

use crate::processing::types::ConversionError;
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};

/// Longest side of a rendered page, in pixels.
const MAX_DIMENSION_PX: u32 = 4096;

/// PDF points per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// Converts a PDF file into ordered page image files.
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// Render every page of `pdf_path` into `output_dir`, returning paths in page order.
    async fn rasterize(
        &self,
        pdf_path: &Path,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, ConversionError>;
}

/// File name for a one-based page number.
pub fn page_file_name(page_number: usize) -> String {
    format!("page-{page_number:04}.png")
}

/// Compute pixel dimensions for rendering at `dpi`, capping the longest side at
/// [`MAX_DIMENSION_PX`] while preserving aspect ratio. Both sides are at least 1.
pub fn compute_render_dimensions(width_points: f32, height_points: f32, dpi: u32) -> (u32, u32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let raw_w = (width_points * scale).max(1.0);
    let raw_h = (height_points * scale).max(1.0);

    let max_dim = raw_w.max(raw_h);
    if max_dim > MAX_DIMENSION_PX as f32 {
        let ratio = MAX_DIMENSION_PX as f32 / max_dim;
        let w = ((raw_w * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        let h = ((raw_h * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        (w, h)
    } else {
        (raw_w as u32, raw_h as u32)
    }
}

/// PDFium-backed rasterizer.
///
/// The PDFium handle is loaded per conversion on a blocking thread; the OS caches the library
/// load so repeat conversions only pay for rendering.
pub struct PdfiumRasterizer {
    dpi: u32,
}

impl PdfiumRasterizer {
    /// Create a rasterizer rendering at `dpi`.
    pub fn new(dpi: u32) -> Self {
        Self { dpi }
    }

    /// Check that the PDFium library can be loaded.
    pub fn probe(&self) -> Result<(), ConversionError> {
        load_pdfium().map(|_| ())
    }
}

#[async_trait]
impl PageRasterizer for PdfiumRasterizer {
    async fn rasterize(
        &self,
        pdf_path: &Path,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, ConversionError> {
        let pdf_path = pdf_path.to_path_buf();
        let output_dir = output_dir.to_path_buf();
        let dpi = self.dpi;
        tokio::task::spawn_blocking(move || render_pages(&pdf_path, &output_dir, dpi))
            .await
            .map_err(|error| ConversionError::Task(error.to_string()))?
    }
}

fn render_pages(
    pdf_path: &Path,
    output_dir: &Path,
    dpi: u32,
) -> Result<Vec<PathBuf>, ConversionError> {
    std::fs::create_dir_all(output_dir)?;
    let pdfium = load_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(map_load_error)?;

    let mut paths = Vec::new();
    for (index, page) in document.pages().iter().enumerate() {
        let page_number = index + 1;
        let (width, height) =
            compute_render_dimensions(page.width().value, page.height().value, dpi);
        let render_config = PdfRenderConfig::new()
            .set_target_width(width as i32)
            .set_maximum_height(height as i32);

        let image = page
            .render_with_config(&render_config)
            .map_err(|error| ConversionError::Render {
                page: page_number,
                reason: format!("rendering failed: {error}"),
            })?
            .as_image();

        let path = output_dir.join(page_file_name(page_number));
        write_page_png(&image, &path).map_err(|error| ConversionError::Render {
            page: page_number,
            reason: format!("PNG encoding failed: {error}"),
        })?;
        tracing::debug!(page = page_number, width, height, path = %path.display(), "Rendered PDF page");
        paths.push(path);
    }

    paths.sort();
    Ok(paths)
}

fn write_page_png(image: &DynamicImage, path: &Path) -> image::ImageResult<()> {
    image.save_with_format(path, ImageFormat::Png)
}

/// Load PDFium from `PDFIUM_DYNAMIC_LIB_PATH`, then next to the executable, then the system
/// library path.
fn load_pdfium() -> Result<Pdfium, ConversionError> {
    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        let bindings = Pdfium::bind_to_library(&path).map_err(|error| {
            ConversionError::LibraryUnavailable(format!("failed to load PDFium from {path}: {error}"))
        })?;
        return Ok(Pdfium::new(bindings));
    }

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.to_string_lossy().to_string()))
    {
        let lib_path = Pdfium::pdfium_platform_library_name_at_path(&exe_dir);
        if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
            tracing::debug!(dir = %exe_dir, "Loaded PDFium next to executable");
            return Ok(Pdfium::new(bindings));
        }
    }

    let bindings = Pdfium::bind_to_system_library().map_err(|error| {
        ConversionError::LibraryUnavailable(format!(
            "PDFium not found; set PDFIUM_DYNAMIC_LIB_PATH or install PDFium: {error}"
        ))
    })?;
    Ok(Pdfium::new(bindings))
}

fn map_load_error(error: PdfiumError) -> ConversionError {
    let message = error.to_string();
    let lower = message.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        ConversionError::Encrypted
    } else {
        ConversionError::Load(message)
    }
}
