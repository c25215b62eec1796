//! Listing memory device nodes.

use std::{io, path::Path};

use crate::DEV_DIR;

/// Names of the memory device nodes under [`DEV_DIR`] (`mem0`, `mem1`, ...), sorted.
///
/// A missing directory means no CXL devices and yields an empty list.
pub fn memdevs() -> io::Result<Vec<String>> {
    memdevs_in(DEV_DIR)
}

/// Like [`memdevs`], but lists `dir` instead of [`DEV_DIR`].
pub fn memdevs_in(dir: impl AsRef<Path>) -> io::Result<Vec<String>> {
    let entries = match dir.as_ref().read_dir() {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut names = Vec::new();
    for entry in entries {
        if let Some(name) = entry?.file_name().to_str() {
            if name.starts_with("mem") {
                names.push(name.to_owned());
            }
        }
    }
    // `mem10` after `mem9`
    names.sort_by(|a, b| (a.len(), a).cmp(&(b.len(), b)));
    Ok(names)
}
