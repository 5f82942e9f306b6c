use std::path::PathBuf;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::{
    document::{DocumentRecord, UploadMetadata},
    error::Result,
    service::{DocumentService, PreparedUpload},
    walker::DiscoveredFile,
};

/// Metadata shared by every file of a batch.
#[derive(Debug, Clone, Default)]
pub struct BatchMetadata {
    pub employee_uuid: String,
    pub employee_name: Option<String>,
    pub employee_cedula: Option<String>,
    pub document_type: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
}

impl BatchMetadata {
    fn for_file(&self, file: &DiscoveredFile) -> UploadMetadata {
        UploadMetadata {
            original_name: file.file_name(),
            mimetype: file.mimetype.clone(),
            title: None,
            description: None,
            tags: self.tags.clone(),
            category: self.category.clone(),
            employee_uuid: self.employee_uuid.clone(),
            employee_name: self.employee_name.clone(),
            employee_cedula: self.employee_cedula.clone(),
            document_type: self.document_type.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub ingested: Vec<DocumentRecord>,
    /// Files that could not be read or were rejected, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

/// Ingest a batch of discovered files.
///
/// Files are read, validated and keyword-extracted in parallel; storing and
/// indexing happen afterwards, in order. Rejected files are reported, not
/// fatal. Storage and index failures abort the batch.
pub fn ingest_files(
    service: &DocumentService,
    files: &[DiscoveredFile],
    batch: &BatchMetadata,
) -> Result<IngestReport> {
    let prepared: Vec<_> = files
        .par_iter()
        .map(|file| -> Result<PreparedUpload> {
            let bytes = std::fs::read(&file.absolute_path)?;
            DocumentService::prepare(batch.for_file(file), bytes)
        })
        .collect();

    let mut report = IngestReport::default();
    let mut uploads = Vec::with_capacity(prepared.len());
    for (file, result) in files.iter().zip(prepared) {
        match result {
            Ok(upload) => uploads.push(upload),
            Err(e) => {
                warn!(path = %file.absolute_path.display(), error = %e, "Skipping file");
                report.skipped.push((file.absolute_path.clone(), e.to_string()));
            }
        }
    }

    debug!(accepted = uploads.len(), skipped = report.skipped.len(), "Prepared batch");
    report.ingested = service.ingest_prepared(uploads)?;
    Ok(report)
}
