use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::Context as _;

use crate::cli::ConvertArgs;
use crate::config::LineFilter;
use crate::error::{PipelineError, Result};
use crate::formats::{
    ConversionMetadata, SourceDocument, SourceLayout, SourceRecord, VideosDocument,
};
use crate::store::{Indent, write_json_atomic};

pub fn run(args: ConvertArgs) -> anyhow::Result<()> {
    let platform = args.platform.display_name();
    let conversion = convert_file(
        Path::new(&args.input),
        Path::new(&args.out),
        platform,
        args.filter,
        args.layout,
    )
    .with_context(|| format!("convert {}", args.input))?;

    println!(
        "converted {} link(s) into {}",
        conversion.records.len(),
        args.out
    );
    Ok(())
}

/// Records read from a legacy file and the document written for them.
#[derive(Debug, Clone)]
pub struct Conversion {
    pub records: Vec<SourceRecord>,
    pub document: SourceDocument,
}

/// Reads one record per accepted line of `reader`, preserving order.
pub fn convert_reader<R: BufRead>(
    reader: R,
    platform: &str,
    filter: LineFilter,
) -> std::io::Result<Vec<SourceRecord>> {
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = if index == 0 {
            line.strip_prefix('\u{feff}').unwrap_or(&line)
        } else {
            &line
        };
        if let Some(url) = accept_line(line, filter) {
            records.push(SourceRecord::unprocessed(platform, url));
        }
    }
    Ok(records)
}

fn accept_line(line: &str, filter: LineFilter) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match filter {
        LineFilter::NonEmpty => Some(trimmed),
        LineFilter::HttpOnly => {
            let unquoted = trimmed.trim_matches('"').trim();
            has_http_scheme(unquoted).then_some(unquoted)
        }
    }
}

fn has_http_scheme(candidate: &str) -> bool {
    ["http://", "https://"].iter().any(|scheme| {
        candidate
            .get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}

/// Converts `input` into a source document at `output`. Nothing is written
/// unless the whole input was read; the output replaces any previous file
/// atomically.
pub fn convert_file(
    input: &Path,
    output: &Path,
    platform: &str,
    filter: LineFilter,
    layout: SourceLayout,
) -> Result<Conversion> {
    let file = File::open(input).map_err(|err| PipelineError::from_read(input, err))?;
    let records = convert_reader(BufReader::new(file), platform, filter)
        .map_err(|err| PipelineError::decode(input.display().to_string(), err))?;

    let document = build_source_document(&records, layout, input);
    write_source_document(output, &document)?;

    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        platform,
        records = records.len(),
        "converted legacy link file"
    );
    Ok(Conversion { records, document })
}

/// Lays `records` out for disk. `origin` names the legacy file they were
/// converted from.
fn build_source_document(
    records: &[SourceRecord],
    layout: SourceLayout,
    origin: &Path,
) -> SourceDocument {
    match layout {
        SourceLayout::Records => SourceDocument::Records(records.to_vec()),
        SourceLayout::Videos => {
            let metadata = ConversionMetadata {
                original_file: origin
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| origin.display().to_string()),
                conversion_date: chrono::Local::now().to_rfc3339(),
            };
            SourceDocument::Videos(VideosDocument::render(records, metadata))
        }
    }
}

pub fn write_source_document(output: &Path, doc: &SourceDocument) -> Result<()> {
    let indent = match doc.layout() {
        SourceLayout::Records => Indent::Four,
        SourceLayout::Videos => Indent::Two,
    };
    write_json_atomic(output, doc, indent)
}
