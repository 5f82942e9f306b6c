use std::{collections::HashMap, sync::RwLock};

use crate::{
    doc_id::DocumentId,
    document::{DocumentRecord, DocumentStats},
    error::{Error, Result},
};

/// Number of documents returned by [`DocumentRepository::recent`] by default.
pub const DEFAULT_RECENT_LIMIT: usize = 10;

/// Keyed storage of document records.
pub trait DocumentRepository: Send + Sync {
    fn get(&self, id: &DocumentId) -> Result<Option<DocumentRecord>>;

    /// Insert or replace the record with the same id.
    fn put(&self, record: DocumentRecord) -> Result<()>;

    /// Remove and return the record, if it existed.
    fn delete(&self, id: &DocumentId) -> Result<Option<DocumentRecord>>;

    fn list(&self) -> Result<Vec<DocumentRecord>>;

    /// Newest uploads first.
    fn recent(&self, limit: usize) -> Result<Vec<DocumentRecord>> {
        let mut records = self.list()?;
        records.sort_by(|a, b| {
            b.upload_date
                .cmp(&a.upload_date)
                .then_with(|| a.id.to_string().cmp(&b.id.to_string()))
        });
        records.truncate(limit);
        Ok(records)
    }

    fn stats(&self) -> Result<DocumentStats> {
        Ok(DocumentStats::from_records(&self.list()?))
    }
}

/// In-process repository. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    records: RwLock<HashMap<DocumentId, DocumentRecord>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> Error {
    Error::Config("document repository lock poisoned".into())
}

impl DocumentRepository for MemoryRepository {
    fn get(&self, id: &DocumentId) -> Result<Option<DocumentRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(id).cloned())
    }

    fn put(&self, record: DocumentRecord) -> Result<()> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(record.id, record);
        Ok(())
    }

    fn delete(&self, id: &DocumentId) -> Result<Option<DocumentRecord>> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        Ok(records.remove(id))
    }

    fn list(&self) -> Result<Vec<DocumentRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    fn record(days: i64, size: u64, category: Option<&str>) -> DocumentRecord {
        let date = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(days);
        let mut record = DocumentRecord {
            id: DocumentId::new(),
            filename: format!("f{days}.pdf"),
            original_name: format!("f{days}.pdf"),
            mimetype: "application/pdf".into(),
            size,
            upload_date: date,
            year: 0,
            title: format!("doc {days}"),
            description: None,
            category: category.map(str::to_string),
            tags: BTreeSet::new(),
            employee_uuid: "e".into(),
            employee_name: None,
            employee_cedula: None,
            document_type: "documentos".into(),
            extracted_text: String::new(),
            keywords: Vec::new(),
            file_path: None,
            relative_path: String::new(),
        };
        record.set_upload_date(date);
        record
    }

    #[test]
    fn put_get_delete() {
        let repo = MemoryRepository::new();
        let rec = record(0, 1, None);
        let id = rec.id;
        repo.put(rec.clone()).unwrap();
        assert_eq!(repo.get(&id).unwrap(), Some(rec));

        let mut replaced = repo.get(&id).unwrap().unwrap();
        replaced.title = "nuevo".into();
        repo.put(replaced).unwrap();
        assert_eq!(repo.list().unwrap().len(), 1);
        assert_eq!(repo.get(&id).unwrap().unwrap().title, "nuevo");

        assert!(repo.delete(&id).unwrap().is_some());
        assert!(repo.delete(&id).unwrap().is_none());
        assert!(repo.get(&id).unwrap().is_none());
    }

    #[test]
    fn recent_is_newest_first() {
        let repo = MemoryRepository::new();
        for day in [3, 1, 7, 5] {
            repo.put(record(day, 1, None)).unwrap();
        }
        let titles: Vec<_> = repo
            .recent(3)
            .unwrap()
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(titles, ["doc 7", "doc 5", "doc 3"]);
    }

    #[test]
    fn stats_over_repository() {
        let repo = MemoryRepository::new();
        assert_eq!(repo.stats().unwrap(), DocumentStats::default());

        repo.put(record(0, 100, Some("facturas"))).unwrap();
        repo.put(record(1, 201, Some("facturas"))).unwrap();
        repo.put(record(2, 300, None)).unwrap();

        let stats = repo.stats().unwrap();
        assert_eq!(stats.total_documents, 3);
        assert_eq!(stats.total_size, 601);
        assert_eq!(stats.average_size, 200);
        assert_eq!(stats.categories["facturas"], 2);
        assert_eq!(stats.mime_types["application/pdf"], 3);
    }
}
