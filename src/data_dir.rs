use std::{
    fmt,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::error::{Error, Result};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "DOCVAULT_DATA_DIR";

const CONFIG_FILE: &str = "config.redb";
const INDEX_DIR: &str = "tantivy";
const UPLOADS_DIR: &str = "uploads";

/// Where the data directory location came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirSource {
    Flag,
    Env,
    Xdg,
}

impl fmt::Display for DataDirSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Flag => "--data-dir",
            Self::Env => DATA_DIR_ENV,
            Self::Xdg => "xdg",
        })
    }
}

/// Root of everything docvault keeps on disk: the settings database, the
/// embedded index and (unless `storage.root` says otherwise) the uploads.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
    source: DataDirSource,
}

impl DataDir {
    /// Pick the data directory: `--data-dir`, then `DOCVAULT_DATA_DIR`, then
    /// `$XDG_DATA_HOME/docvault`. The directory is created if missing.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let (root, source) = match explicit {
            Some(path) => (path.to_path_buf(), DataDirSource::Flag),
            None => match std::env::var_os(DATA_DIR_ENV) {
                Some(val) if !val.is_empty() => (PathBuf::from(val), DataDirSource::Env),
                _ => (xdg_data_home()?, DataDirSource::Xdg),
            },
        };

        ensure_dir(&root)?;
        debug!(root = %root.display(), %source, "Using data directory");
        Ok(Self { root, source })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source(&self) -> DataDirSource {
        self.source
    }

    pub fn config_db(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Embedded index directory, created on first use.
    pub fn tantivy_dir(&self) -> Result<PathBuf> {
        let dir = self.root.join(INDEX_DIR);
        ensure_dir(&dir)?;
        Ok(dir)
    }

    /// Default storage root. Created lazily by the first upload.
    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }
}

fn xdg_data_home() -> Result<PathBuf> {
    xdg::BaseDirectories::with_prefix("docvault")
        .get_data_home()
        .ok_or_else(|| Error::Config("no XDG data home for docvault".into()))
}

fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|_| Error::DataDir(path.to_path_buf()))
}
