use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::error::{Error, Result};

/// Written in place of a missing employee cedula.
pub const UNKNOWN_CEDULA: &str = "0";

/// Later timestamps tried when a stored name is already taken.
const MAX_NAME_ATTEMPTS: i64 = 1000;

/// Where an uploaded file ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub filename: String,
    pub file_path: PathBuf,
    /// `/`-separated, relative to the storage root.
    pub relative_path: String,
}

/// The on-disk layout of stored documents:
/// `<root>/<year>/<employeeUuid>/<documentType>/<year>_<cedula>_<documentType>_<epochMillis>_<base>.<ext>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one employee's documents of one type for a year.
    pub fn canonical_dir(&self, year: i32, employee_uuid: &str, document_type: &str) -> PathBuf {
        self.root
            .join(year.to_string())
            .join(employee_uuid)
            .join(document_type)
    }

    /// `/`-separated path of a stored file, relative to the root.
    pub fn relative_path(
        year: i32,
        employee_uuid: &str,
        document_type: &str,
        filename: &str,
    ) -> String {
        format!("{year}/{employee_uuid}/{document_type}/{filename}")
    }

    /// Write `bytes` under the canonical location and return where they went.
    ///
    /// An existing file is never replaced: when the name is taken the
    /// timestamp is moved forward one millisecond at a time until a free
    /// name is found.
    pub fn store(
        &self,
        year: i32,
        employee_uuid: &str,
        employee_cedula: Option<&str>,
        document_type: &str,
        timestamp_millis: i64,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<StoredFile> {
        check_component("employee uuid", employee_uuid)?;
        check_component("document type", document_type)?;
        if base_name(original_name).is_empty() {
            return Err(Error::invalid(format!(
                "file name {original_name:?} has no base name"
            )));
        }

        let dir = self.canonical_dir(year, employee_uuid, document_type);
        fs::create_dir_all(&dir)?;

        for millis in timestamp_millis..timestamp_millis + MAX_NAME_ATTEMPTS {
            let filename =
                stored_filename(year, employee_cedula, document_type, millis, original_name);
            let file_path = dir.join(&filename);
            let mut file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&file_path)
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };
            file.write_all(bytes)?;
            debug!(path = %file_path.display(), bytes = bytes.len(), "Stored file");

            return Ok(StoredFile {
                relative_path: Self::relative_path(year, employee_uuid, document_type, &filename),
                filename,
                file_path,
            });
        }

        Err(Error::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!(
                "no free name for {original_name:?} in {} after {MAX_NAME_ATTEMPTS} attempts",
                dir.display()
            ),
        )))
    }

    /// Remove a stored file. Returns `false` if it was already gone.
    pub fn remove(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn check_component(what: &str, value: &str) -> Result<()> {
    let bad = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\']);
    if bad {
        return Err(Error::invalid(format!(
            "{what} {value:?} cannot be used as a directory name"
        )));
    }
    Ok(())
}

/// Name of the uploaded file without any directory components.
pub fn base_name(original_name: &str) -> &str {
    original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name)
}

/// Split a file name into its stem and extension (with the dot).
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(i) => name.split_at(i),
    }
}

/// `<year>_<cedula>_<documentType>_<epochMillis>_<base>.<ext>`
pub fn stored_filename(
    year: i32,
    employee_cedula: Option<&str>,
    document_type: &str,
    timestamp_millis: i64,
    original_name: &str,
) -> String {
    let cedula = employee_cedula
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(UNKNOWN_CEDULA);
    let (stem, ext) = split_extension(base_name(original_name));
    format!("{year}_{cedula}_{document_type}_{timestamp_millis}_{stem}{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPLOYEE: &str = "11111111-1111-4111-8111-111111111111";

    #[test]
    fn canonical_layout() {
        let layout = StorageLayout::new("uploads");
        assert_eq!(
            layout.canonical_dir(2024, EMPLOYEE, "contratos"),
            PathBuf::from(format!("uploads/2024/{EMPLOYEE}/contratos"))
        );
        assert_eq!(
            stored_filename(2024, Some("123"), "contratos", 1710000000000, "contrato.pdf"),
            "2024_123_contratos_1710000000000_contrato.pdf"
        );
    }

    #[test]
    fn missing_cedula_and_directories() {
        assert_eq!(
            stored_filename(2024, None, "nominas", 5, "C:\\docs\\mi nomina.v2.pdf"),
            "2024_0_nominas_5_mi nomina.v2.pdf"
        );
        assert_eq!(
            stored_filename(2024, Some(" "), "nominas", 5, "/tmp/README"),
            "2024_0_nominas_5_README"
        );
    }

    #[test]
    fn extension_split() {
        assert_eq!(split_extension("a.tar.gz"), ("a.tar", ".gz"));
        assert_eq!(split_extension(".env"), (".env", ""));
        assert_eq!(split_extension("plain"), ("plain", ""));
    }

    #[test]
    fn store_and_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path());
        let stored = layout
            .store(2024, EMPLOYEE, Some("123"), "contratos", 42, "contrato.pdf", b"%PDF")
            .unwrap();

        assert_eq!(stored.filename, "2024_123_contratos_42_contrato.pdf");
        assert_eq!(
            stored.relative_path,
            format!("2024/{EMPLOYEE}/contratos/2024_123_contratos_42_contrato.pdf")
        );
        assert_eq!(fs::read(&stored.file_path).unwrap(), b"%PDF");
        assert!(stored.file_path.starts_with(tmp.path()));

        assert!(layout.remove(&stored.file_path).unwrap());
        assert!(!layout.remove(&stored.file_path).unwrap());
    }

    #[test]
    fn taken_names_move_the_timestamp_forward() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path());
        let store = |bytes: &[u8]| {
            layout
                .store(2024, EMPLOYEE, None, "nominas", 42, "enero/nomina.txt", bytes)
                .unwrap()
        };

        let first = store(b"enero");
        let second = store(b"febrero");
        let third = store(b"marzo");

        assert_eq!(first.filename, "2024_0_nominas_42_nomina.txt");
        assert_eq!(second.filename, "2024_0_nominas_43_nomina.txt");
        assert_eq!(third.filename, "2024_0_nominas_44_nomina.txt");
        assert_eq!(fs::read(&first.file_path).unwrap(), b"enero");
        assert_eq!(fs::read(&second.file_path).unwrap(), b"febrero");
        assert_eq!(fs::read(&third.file_path).unwrap(), b"marzo");
    }

    #[test]
    fn rejects_names_without_base() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path());
        let err = layout
            .store(2024, EMPLOYEE, None, "contratos", 1, "dir/", b"x")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn rejects_path_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path());
        let err = layout
            .store(2024, "../etc", None, "contratos", 1, "x.pdf", b"x")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
