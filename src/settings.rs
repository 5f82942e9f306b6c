use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use chrono::{Datelike, Utc};

use crate::{
    backend::IndexBackend,
    config_db::ConfigDb,
    data_dir::DataDir,
    elastic::{self, ElasticBackend, ElasticConfig},
    error::{Error, Result},
    tantivy_index::TantivyBackend,
};

/// Setting keys stored in the config database.
pub mod keys {
    pub const BACKEND: &str = "backend";
    pub const STORAGE_ROOT: &str = "storage.root";
    pub const ES_URL: &str = "elasticsearch.url";
    pub const ES_INDEX: &str = "elasticsearch.index";
    pub const ES_USERNAME: &str = "elasticsearch.username";
    pub const ES_PASSWORD: &str = "elasticsearch.password";
    pub const ES_TIMEOUT_SECS: &str = "elasticsearch.timeout_secs";

    pub const ALL: [&str; 7] = [
        BACKEND,
        STORAGE_ROOT,
        ES_URL,
        ES_INDEX,
        ES_USERNAME,
        ES_PASSWORD,
        ES_TIMEOUT_SECS,
    ];

    pub fn is_known(key: &str) -> bool {
        ALL.contains(&key)
    }

    /// Values that should not be echoed back in listings.
    pub fn is_secret(key: &str) -> bool {
        key == ES_PASSWORD
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Tantivy,
    Elasticsearch,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tantivy => "tantivy",
            Self::Elasticsearch => "elasticsearch",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "tantivy" => Ok(Self::Tantivy),
            "elasticsearch" | "elastic" | "es" => Ok(Self::Elasticsearch),
            other => Err(Error::Config(format!(
                "unknown backend {other:?} (expected tantivy or elasticsearch)"
            ))),
        }
    }
}

/// Index name used when none is configured: one index per calendar year.
pub fn default_index_name() -> String {
    format!("documents-{}", Utc::now().year())
}

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub backend: BackendKind,
    pub storage_root: PathBuf,
    pub elastic: ElasticConfig,
}

impl Settings {
    pub fn load(db: &ConfigDb, data_dir: &DataDir) -> Result<Self> {
        let mut stored = db.snapshot()?;

        let backend = match stored.get(keys::BACKEND) {
            Some(value) => value.parse()?,
            None => BackendKind::default(),
        };
        let storage_root = stored
            .remove(keys::STORAGE_ROOT)
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.uploads_dir());

        let mut elastic = ElasticConfig::new(
            stored
                .remove(keys::ES_URL)
                .unwrap_or_else(|| elastic::DEFAULT_URL.to_string()),
            stored.remove(keys::ES_INDEX).unwrap_or_else(default_index_name),
        );
        elastic.username = stored.remove(keys::ES_USERNAME);
        elastic.password = stored.remove(keys::ES_PASSWORD);
        if let Some(secs) = stored.get(keys::ES_TIMEOUT_SECS) {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                Error::Config(format!(
                    "{} must be a whole number of seconds, got {secs:?}",
                    keys::ES_TIMEOUT_SECS
                ))
            })?;
            elastic.timeout = Duration::from_secs(secs);
        }

        Ok(Self {
            backend,
            storage_root,
            elastic,
        })
    }

    /// Open the configured index backend.
    pub fn open_backend(&self, data_dir: &DataDir) -> Result<Box<dyn IndexBackend>> {
        Ok(match self.backend {
            BackendKind::Tantivy => Box::new(TantivyBackend::open(&data_dir.tantivy_dir()?)?),
            BackendKind::Elasticsearch => Box::new(ElasticBackend::new(self.elastic.clone())?),
        })
    }
}

/// Check a value before it is written to the config database.
pub fn validate_setting(key: &str, value: &str) -> Result<()> {
    if !keys::is_known(key) {
        return Err(Error::Config(format!(
            "unknown setting {key:?} (known: {})",
            keys::ALL.join(", ")
        )));
    }
    match key {
        keys::BACKEND => value.parse::<BackendKind>().map(|_| ()),
        keys::ES_TIMEOUT_SECS => value
            .trim()
            .parse::<u64>()
            .map(|_| ())
            .map_err(|_| Error::Config(format!("{key} must be a whole number of seconds"))),
        keys::ES_INDEX | keys::ES_URL | keys::STORAGE_ROOT if value.trim().is_empty() => {
            Err(Error::Config(format!("{key} must not be empty")))
        }
        _ => Ok(()),
    }
}
