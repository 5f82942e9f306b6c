//! The index-client capability.
//!
//! [`IndexBackend`] is the seam between the search layer and whatever engine
//! actually stores the index. Requests cross it as typed
//! [`SearchRequest`](crate::query::SearchRequest) values and come back as
//! [`RawSearchResponse`]s; shaping them for callers is the executor's job.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    doc_id::DocumentId,
    document::DocumentRecord,
    error::Result,
    query::SearchRequest,
};

/// Field names of the index document, as they appear on the wire.
pub mod fields {
    pub const TITLE: &str = "title";
    pub const TITLE_KEYWORD: &str = "title.keyword";
    pub const CONTENT: &str = "content";
    pub const KEYWORDS: &str = "keywords";
    pub const TAGS: &str = "tags";
    pub const CATEGORY: &str = "category";
    pub const DOCUMENT_TYPE: &str = "documentType";
    pub const EMPLOYEE_UUID: &str = "employeeUuid";
    pub const EMPLOYEE_NAME: &str = "employeeName";
    pub const EMPLOYEE_NAME_KEYWORD: &str = "employeeName.keyword";
    pub const EMPLOYEE_CEDULA: &str = "employeeCedula";
    pub const FILENAME: &str = "filename";
    pub const MIMETYPE: &str = "mimetype";
    pub const RELATIVE_PATH: &str = "relativePath";
    pub const UPLOAD_DATE: &str = "uploadDate";
    pub const YEAR: &str = "year";
    pub const SIZE: &str = "size";
}

/// The payload stored in the index for one document.
///
/// Carries everything needed to rebuild a [`DocumentRecord`] except the
/// absolute file path, which is local to the host that wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDocument {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub document_type: String,
    pub employee_uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_cedula: Option<String>,
    pub upload_date: DateTime<Utc>,
    pub year: i32,
    pub filename: String,
    #[serde(default)]
    pub original_name: String,
    pub mimetype: String,
    pub size: u64,
    #[serde(default)]
    pub relative_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&DocumentRecord> for IndexDocument {
    fn from(record: &DocumentRecord) -> Self {
        Self {
            title: record.title.clone(),
            content: record.extracted_text.clone(),
            keywords: record.keywords.clone(),
            tags: record.tags.iter().cloned().collect(),
            category: record.category.clone(),
            document_type: record.document_type.clone(),
            employee_uuid: record.employee_uuid.clone(),
            employee_name: record.employee_name.clone(),
            employee_cedula: record.employee_cedula.clone(),
            upload_date: record.upload_date,
            year: record.year,
            filename: record.filename.clone(),
            original_name: record.original_name.clone(),
            mimetype: record.mimetype.clone(),
            size: record.size,
            relative_path: record.relative_path.clone(),
            description: record.description.clone(),
        }
    }
}

impl IndexDocument {
    pub fn into_record(self, id: DocumentId) -> DocumentRecord {
        let original_name = if self.original_name.is_empty() {
            self.filename.clone()
        } else {
            self.original_name
        };
        let mut record = DocumentRecord {
            id,
            filename: self.filename,
            original_name,
            mimetype: self.mimetype,
            size: self.size,
            upload_date: self.upload_date,
            year: self.year,
            title: self.title,
            description: self.description,
            category: self.category,
            tags: self.tags.into_iter().collect(),
            employee_uuid: self.employee_uuid,
            employee_name: self.employee_name,
            employee_cedula: self.employee_cedula,
            document_type: self.document_type,
            extracted_text: self.content,
            keywords: Vec::new(),
            file_path: None,
            relative_path: self.relative_path,
        };
        record.set_upload_date(self.upload_date);
        record.set_keywords(self.keywords);
        record
    }
}

/// One hit as returned by the engine.
#[derive(Debug, Clone)]
pub struct RawHit {
    pub id: String,
    /// Absent when results were sorted on a field.
    pub score: Option<f32>,
    pub source: IndexDocument,
    pub highlights: BTreeMap<String, Vec<String>>,
}

/// A facet bucket: a field value (or month) and its document count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetBucket {
    pub key: String,
    pub count: u64,
}

/// Facet buckets keyed by aggregation name.
pub type Facets = BTreeMap<String, Vec<FacetBucket>>;

#[derive(Debug, Clone, Default)]
pub struct RawSearchResponse {
    pub hits: Vec<RawHit>,
    pub total: u64,
    pub facets: Facets,
}

/// What a connection check reports about the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterInfo {
    pub name: String,
    pub version: String,
}

/// A full-text index the search layer can write to and query.
///
/// Writes are keyed by document id and overwrite whatever was there.
/// Implementations must be usable from several threads at once.
pub trait IndexBackend: Send + Sync {
    /// Name of the index this backend writes to.
    fn index_name(&self) -> &str;

    /// Check that the engine is reachable.
    fn ping(&self) -> Result<ClusterInfo>;

    /// Create the index with the fixed mapping if it does not exist yet.
    /// Returns `true` if it was created by this call.
    fn ensure_index(&self) -> Result<bool>;

    /// Insert or replace a document.
    fn upsert(&self, id: &DocumentId, doc: &IndexDocument) -> Result<()>;

    /// Insert or replace many documents.
    fn upsert_batch(&self, docs: &[(DocumentId, IndexDocument)]) -> Result<()> {
        for (id, doc) in docs {
            self.upsert(id, doc)?;
        }
        Ok(())
    }

    /// Remove a document. Returns `false` if it was not indexed.
    fn delete(&self, id: &DocumentId) -> Result<bool>;

    fn get(&self, id: &DocumentId) -> Result<Option<IndexDocument>>;

    fn search(&self, request: &SearchRequest) -> Result<RawSearchResponse>;

    fn doc_count(&self) -> Result<u64>;
}

/// The index settings and field mapping used when creating the index.
///
/// Text fields go through a Spanish analyzer (lowercase, stopwords, stemmer);
/// identifiers are exact-match keywords. `title` and `employeeName` also get
/// a `keyword` sub-field for sorting and facets.
pub fn index_mapping() -> serde_json::Value {
    let keyword = json!({ "type": "keyword" });
    let analyzed_with_keyword = json!({
        "type": "text",
        "analyzer": "spanish_analyzer",
        "fields": { "keyword": { "type": "keyword" } }
    });
    json!({
        "settings": {
            "number_of_shards": 1,
            "number_of_replicas": 0,
            "analysis": {
                "analyzer": {
                    "spanish_analyzer": {
                        "type": "custom",
                        "tokenizer": "standard",
                        "filter": ["lowercase", "spanish_stop", "spanish_stemmer"]
                    }
                },
                "filter": {
                    "spanish_stop": { "type": "stop", "stopwords": "_spanish_" },
                    "spanish_stemmer": { "type": "stemmer", "language": "spanish" }
                }
            }
        },
        "mappings": {
            "properties": {
                fields::TITLE: analyzed_with_keyword.clone(),
                fields::CONTENT: { "type": "text", "analyzer": "spanish_analyzer" },
                fields::KEYWORDS: { "type": "text", "analyzer": "keyword" },
                fields::TAGS: keyword.clone(),
                fields::CATEGORY: keyword.clone(),
                fields::EMPLOYEE_UUID: keyword.clone(),
                fields::EMPLOYEE_NAME: analyzed_with_keyword,
                fields::EMPLOYEE_CEDULA: keyword.clone(),
                fields::DOCUMENT_TYPE: keyword.clone(),
                fields::UPLOAD_DATE: { "type": "date" },
                fields::YEAR: { "type": "integer" },
                fields::FILENAME: keyword.clone(),
                fields::MIMETYPE: keyword.clone(),
                fields::SIZE: { "type": "long" },
                fields::RELATIVE_PATH: keyword,
                "originalName": { "type": "keyword", "index": false },
                "description": { "type": "text", "analyzer": "spanish_analyzer" }
            }
        }
    })
}
