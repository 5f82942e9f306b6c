use std::path::{Path, PathBuf};

use crate::error::Result;

/// A file found on disk that can be ingested.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the directory that was walked.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    pub mimetype: String,
}

impl DiscoveredFile {
    pub fn file_name(&self) -> String {
        self.absolute_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Extensions of the file types accepted for upload.
const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "txt"];

/// Find ingestible files. A plain file is returned as-is (if supported); a
/// directory is walked recursively, skipping hidden entries.
pub fn discover_files(root: &Path) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    if canonical_root.is_file() {
        let base = canonical_root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        if let Some(df) = make_discovered(&base, &canonical_root, &canonical_root) {
            results.push(df);
        }
        return Ok(results);
    }
    walk_dir(&canonical_root, &canonical_root, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_dir(root, &entry.path(), results)?;
        } else if file_type.is_symlink() {
            let Ok(resolved) = entry.path().canonicalize() else {
                continue; // broken link
            };
            if resolved.is_file()
                && let Some(df) = make_discovered(root, &entry.path(), &resolved)
            {
                results.push(df);
            }
        } else if file_type.is_file() {
            let abs = entry.path().canonicalize()?;
            if let Some(df) = make_discovered(root, &entry.path(), &abs) {
                results.push(df);
            }
        }
    }

    Ok(())
}

fn supported_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

fn make_discovered(
    root: &Path,
    original_path: &Path,
    absolute_path: &Path,
) -> Option<DiscoveredFile> {
    let ext = supported_extension(original_path)?;
    let mimetype = mime_guess::from_ext(&ext).first_raw()?.to_string();
    let relative_path = original_path
        .strip_prefix(root)
        .unwrap_or(original_path)
        .to_path_buf();

    Some(DiscoveredFile {
        relative_path,
        absolute_path: absolute_path.to_path_buf(),
        mimetype,
    })
}
