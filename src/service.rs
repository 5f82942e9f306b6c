//! Ties the pieces together: upload handling, keyword extraction, the
//! document repository, the search index and the file resolver.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    doc_id::DocumentId,
    document::{DocumentRecord, DocumentStats, UploadMetadata},
    error::{Error, Result},
    executor::{ScoredDocument, SearchExecutor, SearchResult},
    extract,
    keywords,
    repository::DocumentRepository,
    resolver::{FileNotFound, PathResolver},
    search::{SearchQuery, SuggestField},
    storage::StorageLayout,
    validate,
};

/// A validated upload with its text and keywords computed, not yet written
/// anywhere.
#[derive(Debug, Clone)]
pub struct PreparedUpload {
    pub meta: UploadMetadata,
    pub bytes: Vec<u8>,
    pub text: String,
    pub keywords: Vec<String>,
}

pub struct DocumentService {
    repository: Box<dyn DocumentRepository>,
    executor: SearchExecutor,
    resolver: PathResolver,
}

impl std::fmt::Debug for DocumentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentService")
            .field("executor", &self.executor)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl DocumentService {
    pub fn new(
        repository: Box<dyn DocumentRepository>,
        executor: SearchExecutor,
        resolver: PathResolver,
    ) -> Self {
        Self {
            repository,
            executor,
            resolver,
        }
    }

    pub fn executor(&self) -> &SearchExecutor {
        &self.executor
    }

    pub fn layout(&self) -> &StorageLayout {
        self.resolver.layout()
    }

    /// Ranked keywords for a piece of extracted text.
    pub fn ingest_keywords(text: &str) -> Vec<String> {
        keywords::extract_keywords(text)
    }

    /// Validate an upload and compute its text and keywords. Pure CPU work,
    /// safe to run in parallel.
    pub fn prepare(meta: UploadMetadata, bytes: Vec<u8>) -> Result<PreparedUpload> {
        validate::upload(&meta, &bytes)?;
        let text = extract::extract_text(&meta.mimetype, &bytes);
        if text.trim().is_empty() {
            debug!(name = meta.original_name, "No text extracted");
        }
        let keywords = Self::ingest_keywords(&text);
        Ok(PreparedUpload {
            meta,
            bytes,
            text,
            keywords,
        })
    }

    /// Store, record and index a new document.
    ///
    /// The repository record is kept if indexing fails; the error is
    /// returned and [`Self::reindex`] can retry later.
    pub fn ingest(&self, meta: UploadMetadata, bytes: Vec<u8>) -> Result<DocumentRecord> {
        let prepared = Self::prepare(meta, bytes)?;
        let record = self.persist(prepared, Utc::now())?;
        self.executor.upsert(&record)?;
        info!(id = %record.id, title = record.title, keywords = record.keywords.len(), "Ingested document");
        Ok(record)
    }

    /// Store and record several prepared uploads, then index them in one
    /// request.
    pub fn ingest_prepared(&self, uploads: Vec<PreparedUpload>) -> Result<Vec<DocumentRecord>> {
        let mut records = Vec::with_capacity(uploads.len());
        for upload in uploads {
            records.push(self.persist(upload, Utc::now())?);
        }
        self.executor.upsert_batch(&records)?;
        Ok(records)
    }

    /// Write the file and the repository record.
    fn persist(&self, upload: PreparedUpload, upload_date: DateTime<Utc>) -> Result<DocumentRecord> {
        let PreparedUpload {
            meta,
            bytes,
            text,
            keywords,
        } = upload;
        let document_type = meta.document_type().to_string();
        let mut record = DocumentRecord {
            id: DocumentId::new(),
            filename: String::new(),
            original_name: meta.original_name.clone(),
            mimetype: meta.mimetype.clone(),
            size: bytes.len() as u64,
            upload_date,
            year: 0,
            title: meta.title().to_string(),
            description: meta.description.clone(),
            category: meta.category.clone(),
            tags: meta.tags.iter().map(|t| t.trim().to_string()).collect(),
            employee_uuid: meta.employee_uuid.trim().to_string(),
            employee_name: meta.employee_name.clone(),
            employee_cedula: meta.employee_cedula.clone(),
            document_type,
            extracted_text: text,
            keywords: Vec::new(),
            file_path: None,
            relative_path: String::new(),
        };
        record.set_upload_date(upload_date);
        record.set_keywords(keywords);

        let stored = self.layout().store(
            record.year,
            &record.employee_uuid,
            record.employee_cedula.as_deref(),
            &record.document_type,
            upload_date.timestamp_millis(),
            &record.original_name,
            &bytes,
        )?;
        record.filename = stored.filename;
        record.file_path = Some(stored.file_path);
        record.relative_path = stored.relative_path;

        self.repository.put(record.clone())?;
        Ok(record)
    }

    /// Send a stored record to the index again.
    pub fn reindex(&self, id: &DocumentId) -> Result<DocumentRecord> {
        let record = self
            .repository
            .get(id)?
            .ok_or_else(|| not_found(id))?;
        self.executor.upsert(&record)?;
        Ok(record)
    }

    /// Load every indexed document into the repository. Records already
    /// present are left alone.
    pub fn load_from_index(&self) -> Result<usize> {
        let mut loaded = 0;
        for record in self.executor.all_documents()? {
            if self.repository.get(&record.id)?.is_none() {
                self.repository.put(record)?;
                loaded += 1;
            }
        }
        debug!(loaded, "Loaded documents from index");
        Ok(loaded)
    }

    pub fn search(&self, query: &SearchQuery) -> SearchResult {
        self.executor.search(query)
    }

    pub fn suggest(&self, text: &str, field: SuggestField, size: usize) -> Vec<String> {
        self.executor.suggest(text, field, size)
    }

    pub fn find_similar(&self, id: &DocumentId, min_score: f32, max_results: usize) -> Vec<ScoredDocument> {
        self.executor.find_similar(id, min_score, max_results)
    }

    pub fn resolve(&self, record: &DocumentRecord) -> std::result::Result<PathBuf, FileNotFound> {
        self.resolver.resolve(record)
    }

    /// Look up a document and locate its file.
    pub fn resolve_id(&self, id: &DocumentId) -> Result<PathBuf> {
        let record = self.get(id)?.ok_or_else(|| not_found(id))?;
        Ok(self.resolve(&record)?)
    }

    /// The repository record, falling back to the index copy.
    pub fn get(&self, id: &DocumentId) -> Result<Option<DocumentRecord>> {
        if let Some(record) = self.repository.get(id)? {
            return Ok(Some(record));
        }
        let Some(record) = self.executor.get_by_id(id)? else {
            return Ok(None);
        };
        self.repository.put(record.clone())?;
        Ok(Some(record))
    }

    /// Remove the file, the record and the index entry. Returns `false` for
    /// an unknown id.
    pub fn delete(&self, id: &DocumentId) -> Result<bool> {
        let Some(record) = self.get(id)? else {
            return Ok(false);
        };

        match self.resolver.resolve(&record) {
            Ok(path) => {
                self.layout().remove(&path)?;
            }
            Err(e) => warn!(%id, error = %e, "Deleting document without a file"),
        }
        self.repository.delete(id)?;
        self.executor.delete(id)?;
        info!(%id, "Deleted document");
        Ok(true)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<DocumentRecord>> {
        self.repository.recent(limit)
    }

    pub fn stats(&self) -> Result<DocumentStats> {
        self.repository.stats()
    }
}

fn not_found(id: &DocumentId) -> Error {
    Error::NotFound {
        kind: "document",
        name: id.to_string(),
    }
}
