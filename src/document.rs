use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
};

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::{doc_id::DocumentId, keywords::MAX_KEYWORDS};

/// Document type used when the uploader does not provide one.
pub const DEFAULT_DOCUMENT_TYPE: &str = "documentos";

/// Everything known about a stored document.
///
/// Created once at ingest. `year` always equals the year of `upload_date`,
/// `keywords` holds no duplicates, and a non-empty `file_path` pointed to an
/// existing file when the record was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: DocumentId,
    /// Name of the file on disk.
    pub filename: String,
    pub original_name: String,
    pub mimetype: String,
    pub size: u64,
    pub upload_date: DateTime<Utc>,
    pub year: i32,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub employee_uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_cedula: Option<String>,
    pub document_type: String,
    #[serde(default)]
    pub extracted_text: String,
    /// Relevance-descending, unique, at most 50 entries.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Absolute location; absent when it has to be derived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    /// Location relative to the storage root, `/`-separated.
    #[serde(default)]
    pub relative_path: String,
}

impl DocumentRecord {
    /// Re-derive `year` from `upload_date`.
    pub fn set_upload_date(&mut self, date: DateTime<Utc>) {
        self.upload_date = date;
        self.year = date.year();
    }

    /// Replace the keyword list, dropping duplicates but keeping order.
    /// At most [`MAX_KEYWORDS`] are kept.
    pub fn set_keywords(&mut self, keywords: Vec<String>) {
        let mut seen = BTreeSet::new();
        self.keywords = keywords
            .into_iter()
            .filter(|k| seen.insert(k.clone()))
            .take(MAX_KEYWORDS)
            .collect();
    }
}

/// Metadata supplied by the upload collaborator alongside the file bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub original_name: String,
    pub mimetype: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub employee_uuid: String,
    #[serde(default)]
    pub employee_name: Option<String>,
    #[serde(default)]
    pub employee_cedula: Option<String>,
    #[serde(default)]
    pub document_type: Option<String>,
}

impl UploadMetadata {
    pub fn document_type(&self) -> &str {
        self.document_type
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(DEFAULT_DOCUMENT_TYPE)
    }

    /// Title to show for the document, defaulting to the original filename.
    pub fn title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.original_name)
    }
}

/// Aggregate figures over the document repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStats {
    pub total_documents: u64,
    pub total_size: u64,
    /// Rounded mean size in bytes; 0 for an empty repository.
    pub average_size: u64,
    /// Documents without a category are not counted here.
    pub categories: BTreeMap<String, u64>,
    pub mime_types: BTreeMap<String, u64>,
}

impl DocumentStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a DocumentRecord>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.total_documents += 1;
            stats.total_size += record.size;
            if let Some(category) = record.category.as_deref().filter(|c| !c.is_empty()) {
                *stats.categories.entry(category.to_string()).or_default() += 1;
            }
            *stats.mime_types.entry(record.mimetype.clone()).or_default() += 1;
        }
        if stats.total_documents > 0 {
            let n = stats.total_documents;
            stats.average_size = (stats.total_size + n / 2) / n;
        }
        stats
    }
}
