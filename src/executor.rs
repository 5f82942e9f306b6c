//! Runs queries and mutations against an [`IndexBackend`] and shapes the
//! results for callers.
//!
//! Reads never fail: a backend error turns into an empty result carrying a
//! diagnostic. Writes propagate their errors so the caller can retry.

use std::{
    collections::{BTreeMap, HashSet},
    time::Instant,
};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    backend::{ClusterInfo, Facets, IndexBackend, IndexDocument, RawHit},
    doc_id::DocumentId,
    document::DocumentRecord,
    error::Result,
    keywords,
    query::{Query, SearchRequest},
    search::{self, SearchQuery, SuggestField},
};

pub const DEFAULT_SUGGESTIONS: usize = 5;
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.5;
pub const DEFAULT_SIMILAR_RESULTS: usize = 5;

/// Documents read per requested suggestion; several hits often complete to
/// the same string.
const SUGGEST_FETCH_FACTOR: usize = 4;

/// A document returned by a search, with its relevance score and any
/// highlighted fragments.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredDocument {
    #[serde(flatten)]
    pub record: DocumentRecord,
    pub score: Option<f32>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub highlights: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub documents: Vec<ScoredDocument>,
    pub total: u64,
    pub took_ms: u64,
    pub from: usize,
    pub size: usize,
    pub facets: Facets,
    /// Requested keywords found in at least one returned document.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub matched_keywords: Vec<String>,
    /// Set when the index could not answer; the result is then empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchResult {
    pub fn has_more(&self) -> bool {
        ((self.from + self.size) as u64) < self.total
    }

    fn failed(params: &SearchQuery, message: String, started: Instant) -> Self {
        Self {
            from: params.from,
            size: params.size,
            took_ms: elapsed_ms(started),
            error: Some(message),
            ..Default::default()
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

pub struct SearchExecutor {
    backend: Box<dyn IndexBackend>,
}

impl std::fmt::Debug for SearchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchExecutor")
            .field("index", &self.backend.index_name())
            .finish_non_exhaustive()
    }
}

impl SearchExecutor {
    pub fn new(backend: Box<dyn IndexBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &dyn IndexBackend {
        self.backend.as_ref()
    }

    pub fn ping(&self) -> Result<ClusterInfo> {
        self.backend.ping()
    }

    pub fn ensure_index(&self) -> Result<bool> {
        let created = self.backend.ensure_index()?;
        if created {
            info!(index = self.backend.index_name(), "Created index");
        }
        Ok(created)
    }

    pub fn doc_count(&self) -> Result<u64> {
        self.backend.doc_count()
    }

    /// Index a record, replacing any previous version with the same id.
    pub fn upsert(&self, record: &DocumentRecord) -> Result<DocumentId> {
        self.backend.upsert(&record.id, &IndexDocument::from(record))?;
        debug!(id = %record.id, index = self.backend.index_name(), "Indexed document");
        Ok(record.id)
    }

    pub fn upsert_batch(&self, records: &[DocumentRecord]) -> Result<usize> {
        let docs: Vec<(DocumentId, IndexDocument)> = records
            .iter()
            .map(|r| (r.id, IndexDocument::from(r)))
            .collect();
        self.backend.upsert_batch(&docs)?;
        debug!(count = docs.len(), "Indexed documents");
        Ok(docs.len())
    }

    /// Remove a document from the index. Returns `false` if it was not
    /// there.
    pub fn delete(&self, id: &DocumentId) -> Result<bool> {
        let existed = self.backend.delete(id)?;
        debug!(%id, existed, "Deleted document from index");
        Ok(existed)
    }

    pub fn get_by_id(&self, id: &DocumentId) -> Result<Option<DocumentRecord>> {
        Ok(self.backend.get(id)?.map(|doc| doc.into_record(*id)))
    }

    /// Every indexed document, in index order. Unlike [`Self::search`] this
    /// propagates backend errors.
    pub fn all_documents(&self) -> Result<Vec<DocumentRecord>> {
        let count = usize::try_from(self.backend.doc_count()?).unwrap_or(usize::MAX);
        if count == 0 {
            return Ok(Vec::new());
        }
        let response = self
            .backend
            .search(&SearchRequest::new(Query::MatchAll, count))?;
        Ok(shape_hits(response.hits)
            .into_iter()
            .map(|d| d.record)
            .collect())
    }

    pub fn search(&self, params: &SearchQuery) -> SearchResult {
        let started = Instant::now();
        let request = search::build(params);

        let response = match self.backend.search(&request) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Search failed");
                return SearchResult::failed(params, e.to_string(), started);
            }
        };

        let documents = shape_hits(response.hits);
        let requested = params.normalized_keywords();
        let matched_keywords = requested
            .into_iter()
            .filter(|kw| {
                documents.iter().any(|d| d.record.keywords.contains(kw))
            })
            .collect();

        SearchResult {
            documents,
            total: response.total,
            took_ms: elapsed_ms(started),
            from: params.from,
            size: params.size,
            facets: response.facets,
            matched_keywords,
            error: None,
        }
    }

    /// Complete `text` against `field`. At most `size` distinct strings, in
    /// relevance order.
    pub fn suggest(&self, text: &str, field: SuggestField, size: usize) -> Vec<String> {
        if text.trim().is_empty() || size == 0 {
            return Vec::new();
        }
        let request = search::build_suggest(text, field, size * SUGGEST_FETCH_FACTOR);
        let hits = match self.backend.search(&request) {
            Ok(response) => response.hits,
            Err(e) => {
                warn!(error = %e, %field, "Suggest failed");
                return Vec::new();
            }
        };

        let prefix = keywords::normalize(text);
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for hit in hits {
            let candidates = match field {
                SuggestField::Keywords => hit
                    .source
                    .keywords
                    .into_iter()
                    .filter(|k| k.starts_with(&prefix))
                    .collect(),
                SuggestField::Title | SuggestField::Content => {
                    vec![hit.source.title]
                }
            };
            for candidate in candidates {
                if seen.insert(candidate.clone()) {
                    out.push(candidate);
                    if out.len() == size {
                        return out;
                    }
                }
            }
        }
        out
    }

    /// Documents sharing significant terms with `id`, best first. The
    /// reference document itself is never returned.
    pub fn find_similar(
        &self,
        id: &DocumentId,
        min_score: f32,
        max_results: usize,
    ) -> Vec<ScoredDocument> {
        if max_results == 0 {
            return Vec::new();
        }
        // One extra in case the engine returns the reference document.
        let request = search::build_similar(*id, max_results + 1);
        let hits = match self.backend.search(&request) {
            Ok(response) => response.hits,
            Err(e) => {
                warn!(error = %e, %id, "Similarity search failed");
                return Vec::new();
            }
        };

        shape_hits(hits)
            .into_iter()
            .filter(|d| d.record.id != *id)
            .filter(|d| d.score.is_none_or(|s| s >= min_score))
            .take(max_results)
            .collect()
    }
}

fn shape_hits(hits: Vec<RawHit>) -> Vec<ScoredDocument> {
    hits.into_iter()
        .filter_map(|hit| {
            let id = match DocumentId::parse(&hit.id) {
                Ok(id) => id,
                Err(e) => {
                    warn!(id = hit.id, error = %e, "Skipping hit with malformed id");
                    return None;
                }
            };
            Some(ScoredDocument {
                record: hit.source.into_record(id),
                score: hit.score,
                highlights: hit.highlights,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        error::Error,
        query::SearchRequest,
        search::Filters,
        tantivy_index::TantivyBackend,
    };

    fn record(title: &str, text: &str, category: &str, day: u32) -> DocumentRecord {
        let mut r = DocumentRecord {
            id: DocumentId::new(),
            filename: format!("2024_1_contratos_{day}_{title}.pdf"),
            original_name: format!("{title}.pdf"),
            mimetype: "application/pdf".into(),
            size: 100 * u64::from(day),
            upload_date: Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap(),
            year: 2024,
            title: title.into(),
            description: None,
            category: Some(category.into()),
            tags: BTreeSet::new(),
            employee_uuid: "11111111-1111-4111-8111-111111111111".into(),
            employee_name: Some("Ana".into()),
            employee_cedula: Some("1".into()),
            document_type: "contratos".into(),
            extracted_text: text.into(),
            keywords: Vec::new(),
            file_path: None,
            relative_path: String::new(),
        };
        r.set_keywords(keywords::extract_keywords(text));
        r
    }

    fn executor_with_docs() -> (SearchExecutor, Vec<DocumentRecord>) {
        let exec = SearchExecutor::new(Box::new(TantivyBackend::open_in_ram().unwrap()));
        let docs = vec![
            record("Contrato laboral", "contrato laboral indefinido jornada completa", "legal", 1),
            record("Factura marzo", "factura servicios consultoria marzo", "facturas", 2),
            record("Factura abril", "factura servicios mantenimiento abril", "facturas", 3),
            record("Nomina", "nomina mensual salario retenciones", "nominas", 4),
        ];
        for d in &docs {
            exec.upsert(d).unwrap();
        }
        (exec, docs)
    }

    struct Unreachable;

    impl IndexBackend for Unreachable {
        fn index_name(&self) -> &str {
            "documents"
        }
        fn ping(&self) -> Result<ClusterInfo> {
            Err(Error::IndexUnavailable("connection refused".into()))
        }
        fn ensure_index(&self) -> Result<bool> {
            Err(Error::IndexUnavailable("connection refused".into()))
        }
        fn upsert(&self, _: &DocumentId, _: &IndexDocument) -> Result<()> {
            Err(Error::IndexUnavailable("connection refused".into()))
        }
        fn delete(&self, _: &DocumentId) -> Result<bool> {
            Err(Error::IndexUnavailable("connection refused".into()))
        }
        fn get(&self, _: &DocumentId) -> Result<Option<IndexDocument>> {
            Err(Error::IndexUnavailable("connection refused".into()))
        }
        fn search(&self, _: &SearchRequest) -> Result<crate::backend::RawSearchResponse> {
            Err(Error::IndexUnavailable("connection refused".into()))
        }
        fn doc_count(&self) -> Result<u64> {
            Err(Error::IndexUnavailable("connection refused".into()))
        }
    }

    #[test]
    fn match_all_defaults() {
        let (exec, docs) = executor_with_docs();
        let result = exec.search(&SearchQuery::default());
        assert!(result.error.is_none());
        assert_eq!(result.total, docs.len() as u64);
        assert_eq!(result.documents.len(), docs.len());
        assert_eq!(result.size, 10);
        assert_eq!(result.from, 0);
        assert!(!result.has_more());
    }

    #[test]
    fn category_filter_is_exact() {
        let (exec, _) = executor_with_docs();
        let params = SearchQuery {
            filters: Filters {
                category: Some("facturas".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let result = exec.search(&params);
        assert_eq!(result.total, 2);
        assert!(
            result
                .documents
                .iter()
                .all(|d| d.record.category.as_deref() == Some("facturas"))
        );
    }

    #[test]
    fn free_text_ranks_matches() {
        let (exec, _) = executor_with_docs();
        let result = exec.search(&SearchQuery::text("contrato"));
        assert_eq!(result.total, 1);
        assert_eq!(result.documents[0].record.title, "Contrato laboral");
        assert!(result.documents[0].score.unwrap() > 0.0);
    }

    #[test]
    fn facets_count_matches() {
        let (exec, _) = executor_with_docs();
        let result = exec.search(&SearchQuery::default());
        let categories = &result.facets[search::facets::CATEGORIES];
        assert_eq!(categories[0].key, "facturas");
        assert_eq!(categories[0].count, 2);
        let months = &result.facets[search::facets::UPLOADS_PER_MONTH];
        assert_eq!(months[0].key, "2024-03");
        assert_eq!(months[0].count, 4);
    }

    #[test]
    fn pagination_reports_more() {
        let (exec, _) = executor_with_docs();
        let params = SearchQuery {
            size: 2,
            ..Default::default()
        };
        let result = exec.search(&params);
        assert_eq!(result.documents.len(), 2);
        assert_eq!(result.total, 4);
        assert!(result.has_more());
    }

    #[test]
    fn matched_keywords_are_reported() {
        let (exec, _) = executor_with_docs();
        let params = SearchQuery {
            keywords: vec!["factura".into(), "inexistente".into()],
            ..Default::default()
        };
        let result = exec.search(&params);
        assert_eq!(result.total, 2);
        assert_eq!(result.matched_keywords, vec!["factura"]);
    }

    #[test]
    fn unreachable_index_degrades_search() {
        let exec = SearchExecutor::new(Box::new(Unreachable));
        let result = exec.search(&SearchQuery::text("contrato"));
        assert_eq!(result.total, 0);
        assert!(result.documents.is_empty());
        assert!(!result.error.unwrap().is_empty());
    }

    #[test]
    fn unreachable_index_degrades_reads_but_not_writes() {
        let exec = SearchExecutor::new(Box::new(Unreachable));
        assert!(exec.suggest("con", SuggestField::Title, 5).is_empty());
        assert!(exec.find_similar(&DocumentId::new(), 0.0, 5).is_empty());

        let doc = record("x", "y", "z", 1);
        assert!(exec.upsert(&doc).is_err());
        assert!(exec.delete(&doc.id).is_err());
    }

    #[test]
    fn upsert_overwrites_and_get_returns_record() {
        let (exec, docs) = executor_with_docs();
        let mut changed = docs[0].clone();
        changed.title = "Contrato temporal".into();
        exec.upsert(&changed).unwrap();

        assert_eq!(exec.doc_count().unwrap(), docs.len() as u64);
        let fetched = exec.get_by_id(&changed.id).unwrap().unwrap();
        assert_eq!(fetched.title, "Contrato temporal");
        assert_eq!(exec.get_by_id(&DocumentId::new()).unwrap(), None);
    }

    #[test]
    fn delete_of_absent_id_is_not_an_error() {
        let (exec, docs) = executor_with_docs();
        assert!(exec.delete(&docs[0].id).unwrap());
        assert!(!exec.delete(&docs[0].id).unwrap());
    }

    #[test]
    fn similar_excludes_reference() {
        let (exec, docs) = executor_with_docs();
        let similar = exec.find_similar(&docs[1].id, 0.0, 5);
        assert!(!similar.is_empty());
        assert!(similar.iter().all(|d| d.record.id != docs[1].id));
        assert_eq!(similar[0].record.title, "Factura abril");
    }

    #[test]
    fn suggestions_are_distinct_and_bounded() {
        let (exec, _) = executor_with_docs();
        let titles = exec.suggest("fact", SuggestField::Title, 5);
        assert_eq!(titles.len(), 2);
        assert!(titles.iter().all(|t| t.starts_with("Factura")));

        let keywords = exec.suggest("fact", SuggestField::Keywords, 1);
        assert_eq!(keywords, vec!["factura"]);
    }

    #[test]
    fn all_documents_lists_every_record() {
        let (exec, docs) = executor_with_docs();
        let mut ids: Vec<_> = exec.all_documents().unwrap().into_iter().map(|d| d.id).collect();
        let mut expected: Vec<_> = docs.iter().map(|d| d.id).collect();
        ids.sort();
        expected.sort();
        assert_eq!(ids, expected);

        assert!(SearchExecutor::new(Box::new(Unreachable)).all_documents().is_err());
    }
}
