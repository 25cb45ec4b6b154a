use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use image::{ImageFormat, ImageReader};

use crate::cli::EnrichArgs;
use crate::config::{OcrConfig, ProjectConfig};
use crate::error::{ErrorClass, PipelineError, Result};
use crate::formats::{EntryError, MapCatalog, MapEntry};
use crate::ocr::{TesseractCli, TextExtractor, truncate_text};
use crate::store::{CatalogLock, Indent, read_json, write_json_atomic};

pub fn run(args: EnrichArgs) -> anyhow::Result<()> {
    let ocr_config = match args.config.as_deref() {
        Some(path) => ProjectConfig::load(Path::new(path)).context("load config")?.ocr,
        None => {
            let mut config = OcrConfig::default();
            config.apply_env();
            config
        }
    };
    let extractor = TesseractCli::new(&ocr_config);
    let options = EnrichOptions {
        max_chars: ocr_config.max_chars,
    };

    let report = enrich_catalog(
        Path::new(&args.catalog),
        Path::new(&args.maps_dir),
        &extractor,
        &options,
    )
    .with_context(|| format!("enrich {}", args.catalog))?;

    print!("{report}");
    Ok(())
}

#[derive(Debug, Clone)]
pub struct EnrichOptions {
    pub max_chars: usize,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self { max_chars: 500 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFailure {
    pub index: usize,
    pub location: String,
    pub class: ErrorClass,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct EnrichReport {
    pub catalog: PathBuf,
    pub total: usize,
    pub enriched: usize,
    pub ocr_runs: usize,
    pub failures: Vec<EntryFailure>,
}

impl EnrichReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

impl fmt::Display for EnrichReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "enriched {}/{} map(s) in {} ({} OCR run(s), {} failure(s))",
            self.enriched,
            self.total,
            self.catalog.display(),
            self.ocr_runs,
            self.failed()
        )?;
        for failure in &self.failures {
            writeln!(
                f,
                "  #{} {}: {}: {}",
                failure.index, failure.location, failure.class, failure.detail
            )?;
        }
        Ok(())
    }
}

/// Enriches every entry of the catalog at `catalog_path` and rewrites it.
///
/// Per-entry failures are recorded in the entry's `analysis.error` and in the
/// report; only a missing or unreadable catalog, or a failed write, fails the
/// whole call.
pub fn enrich_catalog(
    catalog_path: &Path,
    maps_dir: &Path,
    extractor: &dyn TextExtractor,
    options: &EnrichOptions,
) -> Result<EnrichReport> {
    if !catalog_path.exists() {
        return Err(PipelineError::not_found(catalog_path));
    }
    let _lock = CatalogLock::acquire(catalog_path)?;
    let mut catalog: MapCatalog = read_json(catalog_path)?;

    let mut report = EnrichReport {
        catalog: catalog_path.to_path_buf(),
        total: catalog.maps.len(),
        ..EnrichReport::default()
    };

    for (index, entry) in catalog.maps.iter_mut().enumerate() {
        match enrich_entry(entry, maps_dir, extractor, options) {
            Ok(ran_ocr) => {
                entry.analysis.error = None;
                report.enriched += 1;
                if ran_ocr {
                    report.ocr_runs += 1;
                }
            }
            Err(err) => {
                tracing::warn!(index, location = %entry.new_location, error = %err, "map entry failed");
                entry.analysis.error = Some(EntryError::from(&err));
                report.failures.push(EntryFailure {
                    index,
                    location: entry.new_location.clone(),
                    class: err.class(),
                    detail: err.to_string(),
                });
            }
        }
    }

    write_json_atomic(catalog_path, &catalog, Indent::Two)?;

    tracing::info!(
        catalog = %catalog_path.display(),
        total = report.total,
        enriched = report.enriched,
        failed = report.failed(),
        "catalog enriched"
    );
    Ok(report)
}

/// Returns whether OCR ran for the entry. Values from an earlier run are
/// dropped first, so a failed entry never keeps stale results next to its
/// error.
fn enrich_entry(
    entry: &mut MapEntry,
    maps_dir: &Path,
    extractor: &dyn TextExtractor,
    options: &EnrichOptions,
) -> Result<bool> {
    entry.metadata.dimensions = None;
    entry.metadata.format = None;
    if entry.needs_ocr() {
        entry.analysis.extracted_text = None;
    }

    let image_path = maps_dir.join(&entry.new_location);
    let info = probe_image(&image_path)?;
    entry.metadata.dimensions = Some(format!("{}x{}", info.width, info.height));
    entry.metadata.format = Some(info.format);

    if !entry.needs_ocr() {
        return Ok(false);
    }

    let text = extractor.extract_text(&image_path)?;
    entry.analysis.extracted_text = Some(truncate_text(&text, options.max_chars));
    Ok(true)
}

/// Reads dimensions and format from the image header. The file is closed
/// before this returns.
pub fn probe_image(path: &Path) -> Result<ImageInfo> {
    let what = || path.display().to_string();
    let reader = ImageReader::open(path)
        .map_err(|err| PipelineError::from_read(path, err))?
        .with_guessed_format()
        .map_err(|err| PipelineError::decode(what(), err))?;
    let format = reader
        .format()
        .ok_or_else(|| PipelineError::decode(what(), "unrecognized image format"))?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|err| PipelineError::decode(what(), err))?;

    Ok(ImageInfo {
        width,
        height,
        format: format_name(format),
    })
}

fn format_name(format: ImageFormat) -> String {
    let name = match format {
        ImageFormat::Png => "PNG",
        ImageFormat::Jpeg => "JPEG",
        ImageFormat::Gif => "GIF",
        ImageFormat::WebP => "WEBP",
        ImageFormat::Tiff => "TIFF",
        ImageFormat::Bmp => "BMP",
        ImageFormat::Ico => "ICO",
        other => return format!("{other:?}").to_uppercase(),
    };
    name.to_owned()
}
