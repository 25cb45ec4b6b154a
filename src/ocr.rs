use std::io::{Read as _, Seek as _, SeekFrom};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crate::config::OcrConfig;
use crate::error::{PipelineError, Result};
use crate::retry::{RetryPolicy, with_backoff};

const SERVICE: &str = "ocr";
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Appended to stored OCR text that was cut short.
pub const TRUNCATION_MARKER: &str = "...";

pub trait TextExtractor {
    fn extract_text(&self, image: &Path) -> Result<String>;
}

/// Runs a tesseract-compatible CLI:
/// `<command> [args...] <image> <outbase> -l <languages>`, then reads
/// `<outbase>.txt`.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    command: String,
    args: Vec<String>,
    languages: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl TesseractCli {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            languages: config.languages.clone(),
            timeout: config.timeout(),
            retry: config.retry.clone(),
        }
    }

    fn run_once(&self, image: &Path) -> Result<String> {
        let workdir = tempfile::TempDir::new()
            .map_err(|err| PipelineError::external(SERVICE, format!("create work dir: {err}"), false))?;
        let outbase = workdir.path().join("out");
        let mut stderr = tempfile::tempfile()
            .map_err(|err| PipelineError::external(SERVICE, format!("create stderr file: {err}"), false))?;
        let stderr_sink = stderr
            .try_clone()
            .map_err(|err| PipelineError::external(SERVICE, format!("clone stderr file: {err}"), false))?;

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .arg(image)
            .arg(&outbase)
            .args(["-l", &self.languages]);

        tracing::debug!(
            command = %self.command,
            image = %image.display(),
            languages = %self.languages,
            "ocr exec"
        );

        let child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr_sink))
            .spawn()
            .map_err(|err| {
                PipelineError::external(SERVICE, format!("spawn {}: {err}", self.command), false)
            })?;

        let status = wait_with_timeout(child, self.timeout)?;
        if !status.success() {
            let mut message = String::new();
            let _ = stderr.seek(SeekFrom::Start(0));
            let _ = stderr.read_to_string(&mut message);
            return Err(PipelineError::external(
                SERVICE,
                format!("{} failed ({status}): {}", self.command, message.trim()),
                true,
            ));
        }

        let text_path = outbase.with_extension("txt");
        std::fs::read_to_string(&text_path).map_err(|err| {
            PipelineError::external(
                SERVICE,
                format!("read {}: {err}", text_path.display()),
                false,
            )
        })
    }
}

impl TextExtractor for TesseractCli {
    fn extract_text(&self, image: &Path) -> Result<String> {
        with_backoff("ocr", &self.retry, || self.run_once(image))
    }
}

fn wait_with_timeout(mut child: Child, timeout: Duration) -> Result<ExitStatus> {
    // A timeout too large to represent means no deadline.
    let deadline = Instant::now().checked_add(timeout);
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(err) => {
                return Err(PipelineError::external(SERVICE, format!("wait: {err}"), true));
            }
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(PipelineError::external(
                SERVICE,
                format!("timed out after {}s", timeout.as_secs_f32()),
                true,
            ));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Keeps at most `max_chars` characters, marking text that was cut.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text.to_owned(),
    }
}
