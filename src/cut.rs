//! Cluster assignments from `<base>_<N>.cut` files.

use ndarray::Array1;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::types::*;

/// Line that precedes the per-spike cluster indices.
pub const CUT_MARKER: &str = "Exact_cut_for";

/// Parses the text of a cut file into per-spike cluster indices.
///
/// Everything up to and including the marker line is skipped. Every token
/// after it must be an unsigned decimal integer.
pub fn parse_cut(text: &str, path: &Path) -> Result<Vec<i64>> {
    let mut lines = text.lines();
    let found = lines
        .by_ref()
        .any(|line| line.trim_start().starts_with(CUT_MARKER));
    if !found {
        log::warn!("No '{}' line in cut file {}", CUT_MARKER, path.display());
        return Ok(Vec::new());
    }

    let mut indices = Vec::new();
    for token in lines.flat_map(str::split_whitespace) {
        let index = if token.bytes().all(|b| b.is_ascii_digit()) {
            token.parse::<i64>().ok()
        } else {
            None
        };
        match index {
            Some(index) => indices.push(index),
            None => {
                return Err(AxonaError::InvalidCutFile {
                    path: path.to_path_buf(),
                    token: token.to_string(),
                })
            }
        }
    }

    Ok(indices)
}

/// Reads one cut file.
pub fn read_cut_file(path: &Path, channel_group_id: usize) -> Result<CutAssignment> {
    let bytes = fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => AxonaError::MissingFile {
            path: path.to_path_buf(),
        },
        _ => AxonaError::io(path, e),
    })?;
    let text: String = bytes.iter().map(|&b| b as char).collect();
    let indices = parse_cut(&text, path)?;

    Ok(CutAssignment {
        channel_group_id,
        indices: Array1::from(indices),
        path: path.to_path_buf(),
    })
}

/// Finds `<base>_<N>.cut` files, returning `(path, channel_group_id)` pairs
/// sorted by file name.
pub fn discover_cut_files(dir: &Path, base: &str) -> Result<Vec<(PathBuf, usize)>> {
    let prefix = format!("{}_", base);
    let mut names = Vec::new();

    for entry in fs::read_dir(dir).map_err(|e| AxonaError::io(dir, e))? {
        let entry = entry.map_err(|e| AxonaError::io(dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(suffix) = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".cut"))
        else {
            continue;
        };
        if suffix.starts_with(|c: char| c.is_ascii_digit()) {
            names.push((entry.path(), suffix.to_string()));
        }
    }
    names.sort();

    let mut found = Vec::with_capacity(names.len());
    for (path, suffix) in names {
        match suffix.parse::<usize>() {
            Ok(n) if n > 0 => found.push((path, n - 1)),
            _ => log::warn!("Unable to load cut file \"{}\": invalid suffix", path.display()),
        }
    }

    Ok(found)
}
