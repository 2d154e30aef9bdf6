//! Small filesystem helpers shared by every component.
//!
//! Logs are opened, appended to, and closed per record. Readers skip blank
//! and unparseable lines, which covers a final line truncated by a crash.

use std::{
  fs::{self, OpenOptions},
  io::{ErrorKind, Write as _},
  path::Path,
};

use serde::{Serialize, de::DeserializeOwned};
use tracing::warn;

use crate::{Error, Result};

/// Read a file, or `None` if it does not exist.
pub fn read_opt(path: &Path) -> Result<Option<String>> {
  match fs::read_to_string(path) {
    Ok(text) => Ok(Some(text)),
    Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
    Err(e) => Err(Error::io(path)(e)),
  }
}

/// Write `text` to `path`, creating parent directories.
pub fn write(path: &Path, text: &str) -> Result<()> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(Error::io(parent))?;
  }
  fs::write(path, text).map_err(Error::io(path))
}

/// Write `text` to `path` only if nothing is there yet.
pub fn write_once(path: &Path, text: &str) -> Result<bool> {
  if path.exists() {
    return Ok(false);
  }
  write(path, text)?;
  Ok(true)
}

/// Append one JSON record as a line.
pub fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> Result<()> {
  let mut line = serde_json::to_string(record)?;
  line.push('\n');
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(Error::io(parent))?;
  }
  let mut file = OpenOptions::new()
    .create(true)
    .append(true)
    .open(path)
    .map_err(Error::io(path))?;
  file.write_all(line.as_bytes()).map_err(Error::io(path))
}

/// Every record of a JSON-lines file that decodes as `T`. A missing file is
/// empty. Lines are decoded from raw bytes, so a record cut off inside a
/// multi-byte character is skipped like any other bad line.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
  let bytes = match fs::read(path) {
    Ok(bytes) => bytes,
    Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
    Err(e) => return Err(Error::io(path)(e)),
  };
  let mut rows = Vec::new();
  for (n, line) in bytes.split(|b| *b == b'\n').enumerate() {
    let line = line.trim_ascii();
    if line.is_empty() {
      continue;
    }
    match serde_json::from_slice(line) {
      Ok(row) => rows.push(row),
      Err(e) => {
        warn!(path = %path.display(), line = n + 1, error = %e, "skipping unreadable log line");
      }
    }
  }
  Ok(rows)
}

/// Immediate subdirectories of `dir`, sorted by name. A missing directory has
/// none.
pub fn subdirs(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
  let entries = match fs::read_dir(dir) {
    Ok(entries) => entries,
    Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
    Err(e) => return Err(Error::io(dir)(e)),
  };
  let mut dirs = Vec::new();
  for entry in entries {
    let path = entry.map_err(Error::io(dir))?.path();
    if path.is_dir() {
      dirs.push(path);
    }
  }
  dirs.sort();
  Ok(dirs)
}

/// Files in `dir` with the given extension, sorted by name.
pub fn files_with_ext(dir: &Path, ext: &str) -> Result<Vec<std::path::PathBuf>> {
  let entries = match fs::read_dir(dir) {
    Ok(entries) => entries,
    Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
    Err(e) => return Err(Error::io(dir)(e)),
  };
  let mut files = Vec::new();
  for entry in entries {
    let path = entry.map_err(Error::io(dir))?.path();
    if path.is_file() && path.extension().is_some_and(|e| e == ext) {
      files.push(path);
    }
  }
  files.sort();
  Ok(files)
}
