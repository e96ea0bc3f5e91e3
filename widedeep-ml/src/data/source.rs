//! Record accessors and file pattern resolution.

use crate::data::transform::RawRecord;
use crate::error::MlError;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Lazily produced records of one file.
pub type RecordIter = Box<dyn Iterator<Item = Result<RawRecord, MlError>> + Send>;

/// Converts input files into record streams.
pub trait DataAccessor: Send + Sync {
    /// Open one file. Nothing is read until the iterator is polled.
    fn records(&self, path: &Path) -> Result<RecordIter, MlError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Reads one JSON object per line; blank lines are skipped.
#[derive(Debug, Clone, Default)]
pub struct JsonlAccessor;

impl DataAccessor for JsonlAccessor {
    fn records(&self, path: &Path) -> Result<RecordIter, MlError> {
        let file = File::open(path)
            .map_err(|e| MlError::dataset(format!("failed to open {}: {e}", path.display())))?;
        let display = path.display().to_string();
        let lines = BufReader::new(file).lines().enumerate();

        Ok(Box::new(lines.filter_map(move |(idx, line)| {
            let line = match line {
                Ok(line) => line,
                Err(e) => return Some(Err(MlError::Io(e))),
            };
            if line.trim().is_empty() {
                return None;
            }
            Some(match serde_json::from_str::<serde_json::Value>(&line) {
                Ok(serde_json::Value::Object(map)) => Ok(map),
                Ok(other) => Err(MlError::dataset(format!(
                    "{display}:{}: expected a JSON object, got {other}",
                    idx + 1
                ))),
                Err(e) => Err(MlError::dataset(format!("{display}:{}: {e}", idx + 1))),
            })
        })))
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}

fn has_glob_meta(s: &str) -> bool {
    s.contains(['*', '?', '[', '{'])
}

/// Expand paths and glob patterns into an ordered file list.
///
/// Patterns keep their order; matches within one pattern are sorted. A
/// pattern that matches nothing is an error, as is an empty pattern list.
pub fn resolve_file_patterns(patterns: &[String]) -> Result<Vec<PathBuf>, MlError> {
    if patterns.is_empty() {
        return Err(MlError::dataset("no input file patterns given"));
    }

    let mut files = Vec::new();
    for pattern in patterns {
        let matched = resolve_one(pattern)?;
        if matched.is_empty() {
            return Err(MlError::dataset(format!(
                "file pattern '{pattern}' matched no files"
            )));
        }
        tracing::debug!(pattern = %pattern, files = matched.len(), "Resolved file pattern");
        files.extend(matched);
    }
    Ok(files)
}

fn resolve_one(pattern: &str) -> Result<Vec<PathBuf>, MlError> {
    if !has_glob_meta(pattern) {
        let path = PathBuf::from(pattern);
        return Ok(if path.is_file() { vec![path] } else { Vec::new() });
    }

    // Walk from the deepest directory that has no glob characters.
    let mut base = PathBuf::new();
    for component in Path::new(pattern).components() {
        let text = component.as_os_str().to_string_lossy();
        if has_glob_meta(&text) {
            break;
        }
        match component {
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {
                base.push(component.as_os_str())
            }
            _ => base.push(text.as_ref()),
        }
    }
    if base.as_os_str().is_empty() {
        base.push(".");
    }

    let matcher = globset::GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()?
        .compile_matcher();

    let mut matched: Vec<PathBuf> = WalkDir::new(&base)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            let candidate = p.strip_prefix("./").unwrap_or(p);
            matcher.is_match(p) || matcher.is_match(candidate)
        })
        .collect();
    matched.sort();
    Ok(matched)
}
