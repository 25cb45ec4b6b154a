use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use reqwest::StatusCode;
use reqwest::header::USER_AGENT;
use url::Url;

use crate::cli::CheckLinksArgs;
use crate::convert::write_source_document;
use crate::error::Result;
use crate::formats::{SourceDocument, SourceRecord};
use crate::store::read_json;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkCheckReport {
    pub checked: usize,
    pub reachable: usize,
    pub broken: usize,
    pub first_error: Option<String>,
}

/// Validates records and transitions their status to `Processed` or `Error`.
pub trait LinkChecker {
    fn check(&self, records: &mut [SourceRecord]) -> LinkCheckReport;
}

#[derive(Debug, Clone)]
pub struct HttpLinkChecker {
    client: reqwest::blocking::Client,
}

impl HttpLinkChecker {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("build link check http client")?;
        Ok(Self { client })
    }

    fn probe(&self, url: &str) -> std::result::Result<(), String> {
        let parsed = Url::parse(url).map_err(|err| format!("invalid url: {err}"))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(format!("unsupported scheme: {}", parsed.scheme()));
        }

        let status = self.send(reqwest::Method::HEAD, &parsed)?;
        let status = if status == StatusCode::METHOD_NOT_ALLOWED
            || status == StatusCode::NOT_IMPLEMENTED
        {
            self.send(reqwest::Method::GET, &parsed)?
        } else {
            status
        };

        if status.is_success() || status.is_redirection() {
            Ok(())
        } else {
            Err(format!("HTTP {}", status.as_u16()))
        }
    }

    fn send(&self, method: reqwest::Method, url: &Url) -> std::result::Result<StatusCode, String> {
        self.client
            .request(method, url.clone())
            .header(USER_AGENT, concat!("catalogify/", env!("CARGO_PKG_VERSION")))
            .send()
            .map(|response| response.status())
            .map_err(|err| err.to_string())
    }
}

impl LinkChecker for HttpLinkChecker {
    fn check(&self, records: &mut [SourceRecord]) -> LinkCheckReport {
        let mut report = LinkCheckReport::default();
        for record in records.iter_mut() {
            report.checked += 1;
            match self.probe(&record.url) {
                Ok(()) => {
                    record.mark_processed();
                    report.reachable += 1;
                }
                Err(detail) => {
                    tracing::info!(url = %record.url, %detail, "link check failed");
                    if report.first_error.is_none() {
                        report.first_error = Some(format!("{}: {detail}", record.url));
                    }
                    record.mark_error(detail);
                    report.broken += 1;
                }
            }
        }
        report
    }
}

pub fn run(args: CheckLinksArgs) -> anyhow::Result<()> {
    let checker = HttpLinkChecker::new(Duration::from_secs(args.timeout_secs))?;
    for path in &args.sources {
        let report = check_source_file(Path::new(path), &args.platform, &checker)
            .with_context(|| format!("check links in {path}"))?;
        println!(
            "{path}: {} checked, {} reachable, {} broken",
            report.checked, report.reachable, report.broken
        );
    }
    Ok(())
}

/// Checks every record of a source document and rewrites it in its own layout.
pub fn check_source_file(
    path: &Path,
    platform: &str,
    checker: &dyn LinkChecker,
) -> Result<LinkCheckReport> {
    let doc: SourceDocument = read_json(path)?;
    let mut records = doc.clone().into_records(platform);
    let report = checker.check(&mut records);
    write_source_document(path, &doc.with_records(&records))?;
    Ok(report)
}
