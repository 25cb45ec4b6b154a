use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;

use crate::cli::RunArgs;
use crate::config::ProjectConfig;
use crate::convert::{convert_file, write_source_document};
use crate::enrich::{EnrichOptions, enrich_catalog};
use crate::error::{ErrorClass, PipelineError};
use crate::formats::SourceDocument;
use crate::links::{HttpLinkChecker, LinkChecker};
use crate::metadata_update::{HttpMetadataUpdater, MetadataUpdater, SourceBatch, UnavailableUpdater};
use crate::ocr::{TesseractCli, TextExtractor};

const UPSTREAM_FAILURE: &str = "skipped due to upstream failure";

pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let root = match args.root.as_deref() {
        Some(root) => PathBuf::from(root),
        None => std::env::current_dir().context("resolve current dir")?,
    };
    let config = ProjectConfig::load(std::path::Path::new(&args.config))
        .context("load config")?
        .rooted(&root);
    tracing::info!(root = %root.display(), sources = config.sources.len(), "run");

    let ocr = TesseractCli::new(&config.ocr);
    let link_checker = HttpLinkChecker::new(Duration::from_secs(config.link_check.timeout_secs))?;
    let updater: Box<dyn MetadataUpdater> = if config.api.youtube.enabled {
        match HttpMetadataUpdater::from_config("YouTube", &config.api.youtube) {
            Ok(updater) => Box::new(updater),
            Err(err) => Box::new(UnavailableUpdater::new(format!("{err:#}"))),
        }
    } else {
        Box::new(UnavailableUpdater::new("api.youtube is disabled"))
    };

    let summary = run_stages(
        &config,
        &Collaborators {
            ocr: &ocr,
            link_checker: &link_checker,
            metadata_updater: updater.as_ref(),
        },
    );

    print!("{summary}");
    if summary.has_failures() {
        anyhow::bail!("pipeline finished with failures");
    }
    Ok(())
}

/// External dependencies of the pipeline.
pub struct Collaborators<'a> {
    pub ocr: &'a dyn TextExtractor,
    pub link_checker: &'a dyn LinkChecker,
    pub metadata_updater: &'a dyn MetadataUpdater,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Convert,
    Enrich,
    CheckLinks,
    UpdateMetadata,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Convert => "convert",
            Self::Enrich => "enrich",
            Self::CheckLinks => "check-links",
            Self::UpdateMetadata => "update-metadata",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Succeeded,
    Partial,
    Failed,
    Skipped(String),
    Disabled,
}

#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
    pub succeeded: usize,
    pub failed: usize,
    /// First failure detail per error class.
    pub first_errors: BTreeMap<ErrorClass, String>,
}

impl StageReport {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Succeeded,
            succeeded: 0,
            failed: 0,
            first_errors: BTreeMap::new(),
        }
    }

    fn not_run(stage: Stage, status: StageStatus) -> Self {
        Self {
            status,
            ..Self::new(stage)
        }
    }

    fn record_failure(&mut self, class: ErrorClass, detail: impl Into<String>) {
        self.failed += 1;
        self.first_errors.entry(class).or_insert_with(|| detail.into());
    }

    fn record_error(&mut self, item: &str, err: &PipelineError) {
        tracing::warn!(stage = %self.stage, item, error = %err, "stage item failed");
        self.record_failure(err.class(), format!("{item}: {err}"));
    }

    /// Derives the status from the item counts.
    fn settle(mut self) -> Self {
        self.status = match (self.succeeded, self.failed) {
            (_, 0) => StageStatus::Succeeded,
            (0, _) => StageStatus::Failed,
            _ => StageStatus::Partial,
        };
        self
    }

    fn fail(mut self) -> Self {
        self.status = StageStatus::Failed;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineSummary {
    pub stages: Vec<StageReport>,
}

impl PipelineSummary {
    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    pub fn has_failures(&self) -> bool {
        self.stages
            .iter()
            .any(|r| matches!(r.status, StageStatus::Failed | StageStatus::Partial))
    }
}

impl fmt::Display for PipelineSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for report in &self.stages {
            let status = match &report.status {
                StageStatus::Succeeded => "succeeded".to_owned(),
                StageStatus::Partial => "partial".to_owned(),
                StageStatus::Failed => "failed".to_owned(),
                StageStatus::Skipped(reason) => format!("skipped ({reason})"),
                StageStatus::Disabled => "disabled".to_owned(),
            };
            writeln!(
                f,
                "{:<16} {:<10} {} ok, {} failed",
                report.stage.to_string(),
                status,
                report.succeeded,
                report.failed
            )?;
            for (class, detail) in &report.first_errors {
                writeln!(f, "  {class}: {detail}")?;
            }
        }
        Ok(())
    }
}

struct Converted {
    batch: SourceBatch,
    doc: SourceDocument,
}

/// Runs convert, enrich, check-links and update-metadata in that order.
///
/// Stages without a data dependency on a failed stage still run. Link
/// checking needs at least one converted source; the metadata update needs
/// every source converted.
pub fn run_stages(config: &ProjectConfig, collaborators: &Collaborators<'_>) -> PipelineSummary {
    let mut summary = PipelineSummary::default();

    tracing::info!("run: convert");
    let (convert_report, mut converted) = convert_stage(config);
    let conversion_failed = convert_report.failed > 0;
    summary.stages.push(convert_report);

    tracing::info!("run: enrich");
    summary.stages.push(enrich_stage(config, collaborators.ocr));

    tracing::info!("run: check links");
    summary.stages.push(check_links_stage(
        config,
        collaborators.link_checker,
        &mut converted,
    ));

    tracing::info!("run: update metadata");
    summary.stages.push(update_stage(
        config,
        collaborators.metadata_updater,
        &converted,
        conversion_failed,
    ));

    summary
}

fn convert_stage(config: &ProjectConfig) -> (StageReport, Vec<Converted>) {
    let mut report = StageReport::new(Stage::Convert);
    let mut converted = Vec::new();

    for source in &config.sources {
        match convert_file(
            &source.input,
            &source.output,
            &source.platform,
            source.filter,
            source.layout,
        ) {
            Ok(conversion) => {
                report.succeeded += 1;
                converted.push(Converted {
                    doc: conversion.document,
                    batch: SourceBatch {
                        name: source.name.clone(),
                        platform: source.platform.clone(),
                        path: source.output.clone(),
                        records: conversion.records,
                    },
                });
            }
            Err(err) => report.record_error(&source.name, &err),
        }
    }

    (report.settle(), converted)
}

fn enrich_stage(config: &ProjectConfig, ocr: &dyn TextExtractor) -> StageReport {
    let mut report = StageReport::new(Stage::Enrich);
    let options = EnrichOptions {
        max_chars: config.ocr.max_chars,
    };

    match enrich_catalog(&config.maps.catalog_path(), &config.maps.dir, ocr, &options) {
        Ok(enriched) => {
            report.succeeded = enriched.enriched;
            for failure in &enriched.failures {
                report.record_failure(failure.class, format!("{}: {}", failure.location, failure.detail));
            }
            report.settle()
        }
        Err(err) => {
            report.record_error("catalog", &err);
            report.fail()
        }
    }
}

fn check_links_stage(
    config: &ProjectConfig,
    checker: &dyn LinkChecker,
    converted: &mut [Converted],
) -> StageReport {
    if !config.link_check.enabled {
        return StageReport::not_run(Stage::CheckLinks, StageStatus::Disabled);
    }
    if config.sources.is_empty() {
        return StageReport::not_run(
            Stage::CheckLinks,
            StageStatus::Skipped("no sources configured".to_owned()),
        );
    }
    if converted.is_empty() {
        return StageReport::not_run(
            Stage::CheckLinks,
            StageStatus::Skipped(format!("{UPSTREAM_FAILURE}: convert")),
        );
    }

    let mut report = StageReport::new(Stage::CheckLinks);
    for source in converted.iter_mut() {
        let checked = checker.check(&mut source.batch.records);
        report.succeeded += checked.reachable;
        report.failed += checked.broken;
        if let Some(first) = checked.first_error {
            report.first_errors.entry(ErrorClass::ExternalService).or_insert(first);
        }

        source.doc = source.doc.with_records(&source.batch.records);
        if let Err(err) = write_source_document(&source.batch.path, &source.doc) {
            report.record_error(&source.batch.name, &err);
            return report.fail();
        }
    }

    report.settle()
}

fn update_stage(
    config: &ProjectConfig,
    updater: &dyn MetadataUpdater,
    converted: &[Converted],
    conversion_failed: bool,
) -> StageReport {
    if !config.api.youtube.enabled {
        return StageReport::not_run(Stage::UpdateMetadata, StageStatus::Disabled);
    }
    if conversion_failed {
        return StageReport::not_run(
            Stage::UpdateMetadata,
            StageStatus::Skipped(format!("{UPSTREAM_FAILURE}: convert")),
        );
    }

    let batches: Vec<SourceBatch> = converted.iter().map(|c| c.batch.clone()).collect();
    let mut report = StageReport::new(Stage::UpdateMetadata);
    match updater.update(&batches) {
        Ok(updated) => {
            report.succeeded = updated.sent;
            report.failed = updated.failed;
            if let Some(first) = updated.first_error {
                report.first_errors.insert(ErrorClass::ExternalService, first);
            }
            report.settle()
        }
        Err(err) => {
            report.record_error("api.youtube", &err);
            report.fail()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::path::Path;

    use super::*;
    use crate::config::{LineFilter, SourceConfig};
    use crate::error::Result;
    use crate::formats::{SourceLayout, SourceRecord, SourceStatus, VideosDocument};
    use crate::links::LinkCheckReport;
    use crate::metadata_update::UpdateReport;

    struct NoOcr;

    impl TextExtractor for NoOcr {
        fn extract_text(&self, _image: &Path) -> Result<String> {
            Ok("texte".to_owned())
        }
    }

    #[derive(Default)]
    struct AllReachable {
        seen: RefCell<Vec<String>>,
    }

    impl LinkChecker for AllReachable {
        fn check(&self, records: &mut [SourceRecord]) -> LinkCheckReport {
            for record in records.iter_mut() {
                self.seen.borrow_mut().push(record.url.clone());
                record.mark_processed();
            }
            LinkCheckReport {
                checked: records.len(),
                reachable: records.len(),
                ..LinkCheckReport::default()
            }
        }
    }

    /// Reads the conversion date from disk while links are being checked.
    struct ConversionDateReader {
        path: PathBuf,
        seen: RefCell<Option<String>>,
    }

    impl LinkChecker for ConversionDateReader {
        fn check(&self, records: &mut [SourceRecord]) -> LinkCheckReport {
            if let Ok(doc) = crate::store::read_json::<VideosDocument>(&self.path) {
                *self.seen.borrow_mut() = Some(doc.metadata.conversion_date);
            }
            for record in records.iter_mut() {
                record.mark_processed();
            }
            LinkCheckReport {
                checked: records.len(),
                reachable: records.len(),
                ..LinkCheckReport::default()
            }
        }
    }

    #[derive(Default)]
    struct CountingUpdater {
        calls: Cell<usize>,
    }

    impl MetadataUpdater for CountingUpdater {
        fn update(&self, batches: &[SourceBatch]) -> Result<UpdateReport> {
            self.calls.set(self.calls.get() + 1);
            Ok(UpdateReport {
                sent: batches.len(),
                ..UpdateReport::default()
            })
        }
    }

    fn source(name: &str, input: &Path, output: &Path) -> SourceConfig {
        SourceConfig {
            name: name.to_owned(),
            platform: "YouTube".to_owned(),
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            filter: LineFilter::NonEmpty,
            layout: SourceLayout::Records,
        }
    }

    fn project(root: &Path) -> anyhow::Result<ProjectConfig> {
        let maps = root.join("maps");
        std::fs::create_dir_all(&maps)?;
        image::RgbImage::new(2, 2).save(maps.join("a.png"))?;
        std::fs::write(
            maps.join("metadata.json"),
            r#"{"maps": [{"new_location": "a.png"}]}"#,
        )?;
        std::fs::write(root.join("yt.txt"), "https://youtu.be/a\n\nhttps://youtu.be/b\n")?;

        let mut config = ProjectConfig::default();
        config.maps.dir = maps;
        config.sources = vec![source("youtube", &root.join("yt.txt"), &root.join("out/yt.json"))];
        config.api.youtube.enabled = true;
        config.api.youtube.endpoint = "http://127.0.0.1:9/unused".to_owned();
        Ok(config)
    }

    #[test]
    fn all_stages_run_in_order_and_statuses_are_persisted() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let config = project(temp.path())?;
        let checker = AllReachable::default();
        let updater = CountingUpdater::default();

        let summary = run_stages(
            &config,
            &Collaborators {
                ocr: &NoOcr,
                link_checker: &checker,
                metadata_updater: &updater,
            },
        );

        let stages: Vec<_> = summary.stages.iter().map(|r| r.stage).collect();
        assert_eq!(
            stages,
            [Stage::Convert, Stage::Enrich, Stage::CheckLinks, Stage::UpdateMetadata]
        );
        assert!(!summary.has_failures(), "{summary}");
        assert_eq!(checker.seen.borrow().len(), 2);
        assert_eq!(updater.calls.get(), 1);

        let written: Vec<SourceRecord> = crate::store::read_json(&temp.path().join("out/yt.json"))?;
        assert!(written.iter().all(|r| r.status == SourceStatus::Processed));
        Ok(())
    }

    #[test]
    fn videos_layout_keeps_the_conversion_metadata_written_by_convert() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let mut config = project(temp.path())?;
        config.sources[0].layout = SourceLayout::Videos;
        let output = temp.path().join("out/yt.json");
        let checker = ConversionDateReader {
            path: output.clone(),
            seen: RefCell::new(None),
        };

        let summary = run_stages(
            &config,
            &Collaborators {
                ocr: &NoOcr,
                link_checker: &checker,
                metadata_updater: &CountingUpdater::default(),
            },
        );
        assert!(!summary.has_failures(), "{summary}");

        let written: VideosDocument = crate::store::read_json(&output)?;
        let converted_at = checker.seen.borrow().clone().expect("date read during check");
        assert_eq!(written.metadata.conversion_date, converted_at);
        assert_eq!(written.metadata.original_file, "yt.txt");
        assert!(written.videos.iter().all(|v| v.status == SourceStatus::Processed));
        Ok(())
    }

    #[test]
    fn failed_source_skips_update_but_not_enrich() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let mut config = project(temp.path())?;
        config.sources.push(source(
            "web",
            &temp.path().join("missing.txt"),
            &temp.path().join("out/web.json"),
        ));
        let checker = AllReachable::default();
        let updater = CountingUpdater::default();

        let summary = run_stages(
            &config,
            &Collaborators {
                ocr: &NoOcr,
                link_checker: &checker,
                metadata_updater: &updater,
            },
        );

        let convert = summary.stage(Stage::Convert).expect("convert stage");
        assert_eq!(convert.status, StageStatus::Partial);
        assert_eq!((convert.succeeded, convert.failed), (1, 1));
        let detail = &convert.first_errors[&ErrorClass::ResourceNotFound];
        assert!(detail.starts_with("web: "), "{detail}");

        let enrich = summary.stage(Stage::Enrich).expect("enrich stage");
        assert_eq!(enrich.status, StageStatus::Succeeded);
        assert_eq!(
            summary.stage(Stage::CheckLinks).map(|r| &r.status),
            Some(&StageStatus::Succeeded)
        );
        assert_eq!(
            summary.stage(Stage::UpdateMetadata).map(|r| &r.status),
            Some(&StageStatus::Skipped(format!("{UPSTREAM_FAILURE}: convert")))
        );
        assert_eq!(updater.calls.get(), 0);
        assert!(!temp.path().join("out/web.json").exists());
        assert!(summary.to_string().contains("skipped due to upstream failure"));
        Ok(())
    }

    #[test]
    fn disabled_integration_is_not_invoked() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let mut config = project(temp.path())?;
        config.api.youtube.enabled = false;
        config.link_check.enabled = false;
        let checker = AllReachable::default();
        let updater = CountingUpdater::default();

        let summary = run_stages(
            &config,
            &Collaborators {
                ocr: &NoOcr,
                link_checker: &checker,
                metadata_updater: &updater,
            },
        );

        assert_eq!(
            summary.stage(Stage::UpdateMetadata).map(|r| &r.status),
            Some(&StageStatus::Disabled)
        );
        assert_eq!(
            summary.stage(Stage::CheckLinks).map(|r| &r.status),
            Some(&StageStatus::Disabled)
        );
        assert_eq!(updater.calls.get(), 0);
        assert!(checker.seen.borrow().is_empty());
        Ok(())
    }

    #[test]
    fn missing_catalog_fails_only_the_enrich_stage() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let config = project(temp.path())?;
        std::fs::remove_file(config.maps.catalog_path())?;
        let updater = CountingUpdater::default();

        let summary = run_stages(
            &config,
            &Collaborators {
                ocr: &NoOcr,
                link_checker: &AllReachable::default(),
                metadata_updater: &updater,
            },
        );

        let enrich = summary.stage(Stage::Enrich).expect("enrich stage");
        assert_eq!(enrich.status, StageStatus::Failed);
        assert!(enrich.first_errors.contains_key(&ErrorClass::ResourceNotFound));
        assert_eq!(
            summary.stage(Stage::Convert).map(|r| &r.status),
            Some(&StageStatus::Succeeded)
        );
        assert_eq!(updater.calls.get(), 1);
        assert!(summary.has_failures());
        Ok(())
    }
}
