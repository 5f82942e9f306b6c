//! Locating a document's file on disk.
//!
//! Stored metadata goes stale: files get moved between hosts, and older
//! records carry Windows-style relative paths or a different timestamp than
//! the file that was actually written. [`PathResolver`] tries a fixed list of
//! strategies in order and returns the first path that exists.

use std::{
    io,
    path::{Path, PathBuf},
};

use regex::Regex;
use tracing::debug;

use crate::{
    doc_id::DocumentId,
    document::DocumentRecord,
    error::Error,
    storage::{StorageLayout, UNKNOWN_CEDULA, split_extension},
};

/// The filesystem queries the resolver needs.
pub trait FileSystem: Send + Sync {
    fn is_file(&self, path: &Path) -> bool;

    /// Names of the entries in `dir`.
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<String>>;
}

/// [`FileSystem`] backed by the real disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }
}

/// No strategy found the file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("file for document {id} not found (expected at {})", .attempted.display())]
pub struct FileNotFound {
    pub id: DocumentId,
    /// The canonical location that was tried.
    pub attempted: PathBuf,
}

impl From<FileNotFound> for Error {
    fn from(e: FileNotFound) -> Self {
        Error::NotFound {
            kind: "file",
            name: e.to_string(),
        }
    }
}

/// One way of finding a record's file.
type Strategy = fn(&PathResolver, &DocumentRecord) -> Option<PathBuf>;

const STRATEGIES: [(&str, Strategy); 4] = [
    ("file path", PathResolver::by_file_path),
    ("relative path", PathResolver::by_relative_path),
    ("canonical path", PathResolver::by_canonical_path),
    ("filename pattern", PathResolver::by_filename_pattern),
];

pub struct PathResolver {
    layout: StorageLayout,
    fs: Box<dyn FileSystem>,
}

impl std::fmt::Debug for PathResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathResolver")
            .field("root", &self.layout.root())
            .finish_non_exhaustive()
    }
}

impl PathResolver {
    pub fn new(layout: StorageLayout, fs: Box<dyn FileSystem>) -> Self {
        Self { layout, fs }
    }

    pub fn on_disk(layout: StorageLayout) -> Self {
        Self::new(layout, Box::new(OsFileSystem))
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Absolute location of the record's file.
    pub fn resolve(&self, record: &DocumentRecord) -> Result<PathBuf, FileNotFound> {
        for (name, strategy) in STRATEGIES {
            if let Some(path) = strategy(self, record) {
                debug!(id = %record.id, strategy = name, path = %path.display(), "Resolved file");
                return Ok(path);
            }
        }
        Err(FileNotFound {
            id: record.id,
            attempted: self.canonical_path(record),
        })
    }

    fn canonical_dir(&self, record: &DocumentRecord) -> PathBuf {
        self.layout
            .canonical_dir(record.year, &record.employee_uuid, &record.document_type)
    }

    fn canonical_path(&self, record: &DocumentRecord) -> PathBuf {
        self.canonical_dir(record).join(&record.filename)
    }

    fn existing(&self, path: PathBuf) -> Option<PathBuf> {
        self.fs.is_file(&path).then_some(path)
    }

    fn by_file_path(&self, record: &DocumentRecord) -> Option<PathBuf> {
        record
            .file_path
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
            .and_then(|p| self.existing(p.clone()))
    }

    /// Accepts `/` and `\` separators. A leading component naming the
    /// storage root itself (`uploads/2024/...`) is tolerated.
    fn by_relative_path(&self, record: &DocumentRecord) -> Option<PathBuf> {
        let normalized = record.relative_path.replace('\\', "/");
        let parts: Vec<&str> = normalized
            .split('/')
            .filter(|p| !p.is_empty() && *p != ".")
            .collect();
        if parts.is_empty() || parts.contains(&"..") {
            return None;
        }

        let join = |parts: &[&str]| {
            parts
                .iter()
                .fold(self.layout.root().to_path_buf(), |acc, p| acc.join(p))
        };
        if let Some(found) = self.existing(join(&parts)) {
            return Some(found);
        }
        let root_name = self.layout.root().file_name()?.to_str()?;
        if parts.len() > 1 && parts[0] == root_name {
            return self.existing(join(&parts[1..]));
        }
        None
    }

    fn by_canonical_path(&self, record: &DocumentRecord) -> Option<PathBuf> {
        if record.filename.is_empty() {
            return None;
        }
        self.existing(self.canonical_path(record))
    }

    /// Same year, cedula, type and base name, any timestamp.
    fn by_filename_pattern(&self, record: &DocumentRecord) -> Option<PathBuf> {
        let pattern = filename_pattern(record)?;
        let dir = self.canonical_dir(record);
        let mut names = self.fs.list_dir(&dir).ok()?;
        names.sort();
        names
            .into_iter()
            .filter(|name| pattern.is_match(name))
            .map(|name| dir.join(name))
            .find(|path| self.fs.is_file(path))
    }
}

/// Build the regex matching any timestamp variant of the record's filename.
///
/// The prefix is taken from the record when the filename starts with it, so
/// document types containing underscores still work; otherwise the first
/// three underscore-separated tokens of the filename are used.
fn filename_pattern(record: &DocumentRecord) -> Option<Regex> {
    let cedula = record
        .employee_cedula
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or(UNKNOWN_CEDULA);
    let expected = format!("{}_{}_{}_", record.year, cedula, record.document_type);

    let (prefix, rest) = match record.filename.strip_prefix(&expected) {
        Some(rest) => (expected.as_str(), rest),
        None => {
            let mut parts = record.filename.splitn(4, '_');
            let (year, cedula, doc_type, rest) =
                (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
            let end = year.len() + cedula.len() + doc_type.len() + 3;
            (&record.filename[..end], rest)
        }
    };

    // Drop the timestamp; keep base name and extension.
    let base_and_ext = match rest.split_once('_') {
        Some((ts, tail)) if !ts.is_empty() && ts.bytes().all(|b| b.is_ascii_digit()) => tail,
        _ => rest,
    };
    if base_and_ext.is_empty() {
        return None;
    }
    let (base, ext) = split_extension(base_and_ext);

    let pattern = format!(
        r"^{}\d+_{}{}$",
        regex::escape(prefix),
        regex::escape(base),
        regex::escape(ext)
    );
    Regex::new(&pattern).ok()
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashSet};

    use chrono::{TimeZone, Utc};

    use super::*;

    const EMPLOYEE: &str = "11111111-1111-4111-8111-111111111111";

    /// Files that "exist", as full paths.
    #[derive(Default)]
    struct FakeFs {
        files: HashSet<PathBuf>,
    }

    impl FakeFs {
        fn with(paths: &[PathBuf]) -> Self {
            Self {
                files: paths.iter().cloned().collect(),
            }
        }
    }

    impl FileSystem for FakeFs {
        fn is_file(&self, path: &Path) -> bool {
            self.files.contains(path)
        }

        fn list_dir(&self, dir: &Path) -> io::Result<Vec<String>> {
            let names: Vec<String> = self
                .files
                .iter()
                .filter(|p| p.parent() == Some(dir))
                .filter_map(|p| p.file_name()?.to_str().map(str::to_string))
                .collect();
            if names.is_empty() {
                return Err(io::Error::from(io::ErrorKind::NotFound));
            }
            Ok(names)
        }
    }

    fn record() -> DocumentRecord {
        DocumentRecord {
            id: DocumentId::new(),
            filename: "2024_123_contratos_1710000000000_contrato.pdf".into(),
            original_name: "contrato.pdf".into(),
            mimetype: "application/pdf".into(),
            size: 1,
            upload_date: Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap(),
            year: 2024,
            title: "Contrato".into(),
            description: None,
            category: None,
            tags: BTreeSet::new(),
            employee_uuid: EMPLOYEE.into(),
            employee_name: None,
            employee_cedula: Some("123".into()),
            document_type: "contratos".into(),
            extracted_text: String::new(),
            keywords: Vec::new(),
            file_path: None,
            relative_path: String::new(),
        }
    }

    fn canonical_dir() -> PathBuf {
        PathBuf::from(format!("/srv/uploads/2024/{EMPLOYEE}/contratos"))
    }

    fn resolver(files: &[PathBuf]) -> PathResolver {
        PathResolver::new(
            StorageLayout::new("/srv/uploads"),
            Box::new(FakeFs::with(files)),
        )
    }

    #[test]
    fn file_path_wins() {
        let direct = PathBuf::from("/elsewhere/contrato.pdf");
        let canonical = canonical_dir().join(record().filename);
        let mut rec = record();
        rec.file_path = Some(direct.clone());
        assert_eq!(resolver(&[direct.clone(), canonical]).resolve(&rec).unwrap(), direct);
    }

    #[test]
    fn stale_file_path_falls_through() {
        let canonical = canonical_dir().join(record().filename);
        let mut rec = record();
        rec.file_path = Some("/gone/contrato.pdf".into());
        assert_eq!(resolver(&[canonical.clone()]).resolve(&rec).unwrap(), canonical);
    }

    #[test]
    fn relative_path_with_backslashes() {
        let target = canonical_dir().join("moved.pdf");
        let mut rec = record();
        rec.relative_path = format!("2024\\{EMPLOYEE}\\contratos\\moved.pdf");
        assert_eq!(resolver(&[target.clone()]).resolve(&rec).unwrap(), target);
    }

    #[test]
    fn relative_path_prefixed_with_root_name() {
        let target = canonical_dir().join("moved.pdf");
        let mut rec = record();
        rec.relative_path = format!("uploads/2024/{EMPLOYEE}/contratos/moved.pdf");
        assert_eq!(resolver(&[target.clone()]).resolve(&rec).unwrap(), target);
    }

    #[test]
    fn relative_path_cannot_escape_root() {
        let outside = PathBuf::from("/srv/secret.pdf");
        let mut rec = record();
        rec.relative_path = "../secret.pdf".into();
        assert!(resolver(&[outside]).resolve(&rec).is_err());
    }

    #[test]
    fn canonical_path() {
        let canonical = canonical_dir().join(record().filename);
        assert_eq!(resolver(&[canonical.clone()]).resolve(&record()).unwrap(), canonical);
    }

    #[test]
    fn pattern_match_finds_other_timestamp() {
        let actual = canonical_dir().join("2024_123_contratos_999999_contrato.pdf");
        let unrelated = canonical_dir().join("2024_123_contratos_5_otro.pdf");
        let resolved = resolver(&[unrelated, actual.clone()]).resolve(&record()).unwrap();
        assert_eq!(resolved, actual);
    }

    #[test]
    fn pattern_match_picks_first_in_name_order() {
        let a = canonical_dir().join("2024_123_contratos_111_contrato.pdf");
        let b = canonical_dir().join("2024_123_contratos_222_contrato.pdf");
        assert_eq!(resolver(&[b, a.clone()]).resolve(&record()).unwrap(), a);
    }

    #[test]
    fn pattern_requires_same_extension_and_digits() {
        let other_ext = canonical_dir().join("2024_123_contratos_999_contrato.docx");
        let not_digits = canonical_dir().join("2024_123_contratos_abc_contrato.pdf");
        assert!(resolver(&[other_ext, not_digits]).resolve(&record()).is_err());
    }

    #[test]
    fn document_type_with_underscores() {
        let mut rec = record();
        rec.document_type = "hoja_de_vida".into();
        rec.filename = "2024_123_hoja_de_vida_1_cv.pdf".into();
        let dir = PathBuf::from(format!("/srv/uploads/2024/{EMPLOYEE}/hoja_de_vida"));
        let actual = dir.join("2024_123_hoja_de_vida_77_cv.pdf");
        assert_eq!(resolver(&[actual.clone()]).resolve(&rec).unwrap(), actual);
    }

    #[test]
    fn not_found_reports_canonical_attempt() {
        let rec = record();
        let err = resolver(&[]).resolve(&rec).unwrap_err();
        assert_eq!(err.id, rec.id);
        assert_eq!(err.attempted, canonical_dir().join(&rec.filename));

        let err: Error = err.into();
        assert!(matches!(err, Error::NotFound { kind: "file", .. }));
        assert!(err.to_string().contains("contratos"));
    }

    #[test]
    fn resolves_on_real_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path());
        let stored = layout
            .store(2024, EMPLOYEE, Some("123"), "contratos", 999999, "contrato.pdf", b"x")
            .unwrap();

        let resolver = PathResolver::on_disk(layout);
        assert_eq!(resolver.resolve(&record()).unwrap(), stored.file_path);
    }
}
