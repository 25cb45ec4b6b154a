use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{PipelineError, Result};

/// Indentation used by `serde_json`'s pretty printer.
#[derive(Debug, Clone, Copy)]
pub enum Indent {
    Two,
    Four,
}

impl Indent {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Two => b"  ",
            Self::Four => b"    ",
        }
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).map_err(|err| PipelineError::from_read(path, err))?;
    serde_json::from_slice(&bytes).map_err(|err| PipelineError::decode(path.display().to_string(), err))
}

pub fn to_pretty_json<T: Serialize>(value: &T, indent: Indent) -> serde_json::Result<Vec<u8>> {
    let mut data = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut serializer = serde_json::Serializer::with_formatter(&mut data, formatter);
    value.serialize(&mut serializer)?;
    data.push(b'\n');
    Ok(data)
}

/// Serializes `value` completely, writes it to a temp file next to `path`,
/// syncs it and renames it over `path`. Readers only ever observe the old or
/// the new document.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T, indent: Indent) -> Result<()> {
    let data = to_pretty_json(value, indent).map_err(|err| PipelineError::persistence(path, err))?;
    write_bytes_atomic(path, &data)
}

pub fn write_bytes_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)
        .map_err(|err| PipelineError::persistence(&parent, format!("create parent dir: {err}")))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".catalogify.")
        .suffix(".tmp")
        .tempfile_in(&parent)
        .map_err(|err| PipelineError::persistence(path, format!("create temp file: {err}")))?;
    tmp.write_all(data)
        .map_err(|err| PipelineError::persistence(tmp.path(), format!("write temp file: {err}")))?;
    tmp.as_file()
        .sync_all()
        .map_err(|err| PipelineError::persistence(tmp.path(), format!("sync temp file: {err}")))?;
    tmp.persist(path)
        .map_err(|err| PipelineError::persistence(path, format!("rename temp file: {}", err.error)))?;

    Ok(())
}

/// Exclusive single-writer lock on a catalog, held for the lifetime of the
/// value. The lock is a sibling file created with `create_new`.
#[derive(Debug)]
pub struct CatalogLock {
    path: PathBuf,
}

impl CatalogLock {
    pub fn acquire(catalog_path: &Path) -> Result<Self> {
        let path = lock_path(catalog_path);
        OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::AlreadyExists {
                    PipelineError::persistence(
                        &path,
                        "catalog is locked by another run (remove the lock file if no run is active)",
                    )
                } else {
                    PipelineError::persistence(&path, format!("create lock file: {err}"))
                }
            })?;
        tracing::debug!(lock = %path.display(), "acquired catalog lock");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CatalogLock {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), ?err, "failed to remove catalog lock");
        }
    }
}

fn lock_path(catalog_path: &Path) -> PathBuf {
    let mut name = catalog_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    catalog_path.with_file_name(name)
}
