use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    backend::fields,
    doc_id::DocumentId,
    error::{Error, Result},
    executor::{ScoredDocument, SearchResult},
    keywords,
    query::{
        Aggregation,
        BoolQuery,
        Clause,
        DateRange,
        FieldBoost,
        FieldSort,
        FieldValue,
        Highlight,
        MatchKind,
        MoreLikeThis,
        Query,
        SearchRequest,
        SortOrder,
        TextMatch,
    },
};

pub const DEFAULT_SIZE: usize = 10;

/// Fields searched by free text, with their weights.
pub const TEXT_FIELDS: [FieldBoost; 4] = [
    FieldBoost::new(fields::TITLE, 3.0),
    FieldBoost::new(fields::CONTENT, 2.0),
    FieldBoost::new(fields::KEYWORDS, 2.0),
    FieldBoost::new(fields::FILENAME, 1.0),
];

const TEXT_BOOST: f32 = 2.0;
const CONTENT_BOOST: f32 = 2.0;
const KEYWORD_BOOST: f32 = 1.5;

const FACET_SIZE: usize = 20;
const HIGHLIGHT_FRAGMENT_CHARS: usize = 150;
const HIGHLIGHT_FRAGMENTS: usize = 3;

const SIMILAR_FIELDS: [&str; 3] = [fields::TITLE, fields::CONTENT, fields::KEYWORDS];
const SIMILAR_MAX_QUERY_TERMS: usize = 12;

/// Exact-match restrictions on a search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filters {
    pub category: Option<String>,
    pub document_type: Option<String>,
    pub employee_uuid: Option<String>,
    /// A mimetype (`application/pdf`) or a bare extension (`pdf`).
    pub file_type: Option<String>,
    /// Matches documents carrying any of these tags.
    #[serde(default)]
    pub tags: Vec<String>,
    pub year: Option<i32>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    #[default]
    Relevance,
    Date,
    Size,
    Filename,
}

impl SortField {
    /// The index field to sort on, or `None` for engine relevance.
    pub fn index_field(self) -> Option<&'static str> {
        match self {
            Self::Relevance => None,
            Self::Date => Some(fields::UPLOAD_DATE),
            Self::Size => Some(fields::SIZE),
            Self::Filename => Some(fields::FILENAME),
        }
    }
}

impl FromStr for SortField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "relevance" | "score" => Ok(Self::Relevance),
            "date" | "uploaddate" => Ok(Self::Date),
            "size" => Ok(Self::Size),
            "filename" | "name" => Ok(Self::Filename),
            other => Err(Error::invalid(format!(
                "unknown sort field {other:?} (expected relevance, date, size or filename)"
            ))),
        }
    }
}

/// Parameters of a document search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchQuery {
    /// Free text matched against title, content, keywords and filename.
    pub text: Option<String>,
    /// Text matched against the content only; every hit must match it.
    pub content: Option<String>,
    /// Keywords matched exactly against the extracted keyword list.
    pub keywords: Vec<String>,
    pub filters: Filters,
    pub size: usize,
    pub from: usize,
    pub sort: SortField,
    pub order: SortOrder,
    pub fuzzy: bool,
    pub boost: bool,
    pub highlight: bool,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            text: None,
            content: None,
            keywords: Vec::new(),
            filters: Filters::default(),
            size: DEFAULT_SIZE,
            from: 0,
            sort: SortField::Relevance,
            order: SortOrder::Desc,
            fuzzy: false,
            boost: false,
            highlight: false,
        }
    }
}

impl SearchQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// True if the query carries neither text nor keywords nor filters.
    pub fn is_blank(&self) -> bool {
        non_blank(&self.text).is_none()
            && non_blank(&self.content).is_none()
            && self.normalized_keywords().is_empty()
            && self.filters.is_empty()
    }

    /// Requested keywords, normalized the way stored keywords are.
    pub fn normalized_keywords(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for kw in &self.keywords {
            let kw = keywords::normalize(kw);
            if !kw.is_empty() && !out.contains(&kw) {
                out.push(kw);
            }
        }
        out
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Map a file-type filter to a mimetype. Values that already look like a
/// mimetype pass through; extensions go through the mime table.
pub fn resolve_file_type(file_type: &str) -> String {
    let file_type = file_type.trim();
    if file_type.contains('/') {
        return file_type.to_lowercase();
    }
    let ext = file_type.trim_start_matches('.');
    mime_guess::from_ext(ext)
        .first_raw()
        .map(str::to_string)
        .unwrap_or_else(|| file_type.to_lowercase())
}

/// Build the index request for a search.
pub fn build(params: &SearchQuery) -> SearchRequest {
    let mut must = Vec::new();
    let mut should = Vec::new();

    if let Some(text) = non_blank(&params.text) {
        should.push(Clause::Text(TextMatch {
            text: text.to_string(),
            fields: TEXT_FIELDS.to_vec(),
            kind: MatchKind::BestFields,
            fuzzy: params.fuzzy,
            boost: if params.boost { TEXT_BOOST } else { 1.0 },
        }));
    }

    if let Some(content) = non_blank(&params.content) {
        must.push(Clause::Text(TextMatch {
            text: content.to_string(),
            fields: vec![FieldBoost::new(fields::CONTENT, 1.0)],
            kind: MatchKind::BestFields,
            fuzzy: params.fuzzy,
            boost: CONTENT_BOOST,
        }));
    }

    let keywords = params.normalized_keywords();
    if !keywords.is_empty() {
        should.push(Clause::Terms {
            field: fields::KEYWORDS,
            values: keywords,
            boost: KEYWORD_BOOST,
        });
    }

    let filter = filter_clauses(&params.filters);

    let query = if must.is_empty() && should.is_empty() && filter.is_empty() {
        Query::MatchAll
    } else if must.is_empty() && should.is_empty() {
        Query::Bool(BoolQuery {
            must: vec![Clause::MatchAll],
            filter,
            ..Default::default()
        })
    } else {
        let minimum_should_match =
            (must.is_empty() && !should.is_empty()).then_some(1);
        Query::Bool(BoolQuery {
            must,
            should,
            filter,
            minimum_should_match,
        })
    };

    SearchRequest {
        query,
        from: params.from,
        size: params.size,
        sort: params.sort.index_field().map(|field| FieldSort {
            field,
            order: params.order,
        }),
        aggregations: facet_aggregations(),
        highlight: params.highlight.then(|| Highlight {
            fields: vec![fields::CONTENT, fields::TITLE, fields::KEYWORDS],
            fragment_size: HIGHLIGHT_FRAGMENT_CHARS,
            number_of_fragments: HIGHLIGHT_FRAGMENTS,
        }),
    }
}

fn filter_clauses(filters: &Filters) -> Vec<Clause> {
    let mut clauses = Vec::new();
    let mut term = |field, value: &Option<String>| {
        if let Some(v) = non_blank(value) {
            clauses.push(Clause::Term {
                field,
                value: FieldValue::Text(v.to_string()),
            });
        }
    };
    term(fields::CATEGORY, &filters.category);
    term(fields::DOCUMENT_TYPE, &filters.document_type);
    term(fields::EMPLOYEE_UUID, &filters.employee_uuid);
    term(
        fields::MIMETYPE,
        &non_blank(&filters.file_type).map(resolve_file_type),
    );

    let tags: Vec<String> = filters
        .tags
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if !tags.is_empty() {
        clauses.push(Clause::Terms {
            field: fields::TAGS,
            values: tags,
            boost: 1.0,
        });
    }

    if let Some(year) = filters.year {
        clauses.push(Clause::Term {
            field: fields::YEAR,
            value: FieldValue::Int(year.into()),
        });
    }

    let range = DateRange {
        from: filters.date_from,
        to: filters.date_to,
    };
    if !range.is_empty() {
        clauses.push(Clause::Range {
            field: fields::UPLOAD_DATE,
            range,
        });
    }
    clauses
}

/// Facet names reported with every search.
pub mod facets {
    pub const CATEGORIES: &str = "categories";
    pub const DOCUMENT_TYPES: &str = "documentTypes";
    pub const EMPLOYEES: &str = "employees";
    pub const MIMETYPES: &str = "mimetypes";
    pub const UPLOADS_PER_MONTH: &str = "uploadsPerMonth";
}

fn facet_aggregations() -> Vec<Aggregation> {
    let terms = |name, field| Aggregation::Terms {
        name,
        field,
        size: FACET_SIZE,
    };
    vec![
        terms(facets::CATEGORIES, fields::CATEGORY),
        terms(facets::DOCUMENT_TYPES, fields::DOCUMENT_TYPE),
        terms(facets::EMPLOYEES, fields::EMPLOYEE_NAME_KEYWORD),
        terms(facets::MIMETYPES, fields::MIMETYPE),
        Aggregation::MonthlyHistogram {
            name: facets::UPLOADS_PER_MONTH,
            field: fields::UPLOAD_DATE,
        },
    ]
}

/// Field a suggestion is completed against.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SuggestField {
    #[default]
    Title,
    Content,
    Keywords,
}

impl SuggestField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Title => fields::TITLE,
            Self::Content => fields::CONTENT,
            Self::Keywords => fields::KEYWORDS,
        }
    }
}

impl fmt::Display for SuggestField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SuggestField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "title" => Ok(Self::Title),
            "content" => Ok(Self::Content),
            "keywords" | "keyword" => Ok(Self::Keywords),
            other => Err(Error::invalid(format!(
                "cannot suggest on field {other:?} (expected title, content or keywords)"
            ))),
        }
    }
}

/// Build the request backing a completion lookup. `fetch` is the number of
/// documents to read; several may share a completion.
pub fn build_suggest(text: &str, field: SuggestField, fetch: usize) -> SearchRequest {
    let clause = match field {
        SuggestField::Keywords => Clause::Prefix {
            field: fields::KEYWORDS,
            prefix: keywords::normalize(text),
        },
        SuggestField::Title | SuggestField::Content => Clause::PhrasePrefix {
            field: field.as_str(),
            text: text.trim().to_string(),
        },
    };
    SearchRequest::new(
        Query::Bool(BoolQuery {
            must: vec![clause],
            ..Default::default()
        }),
        fetch,
    )
}

/// Build a similarity request for the document `like`.
pub fn build_similar(like: DocumentId, size: usize) -> SearchRequest {
    SearchRequest::new(
        Query::Bool(BoolQuery {
            must: vec![Clause::MoreLikeThis(MoreLikeThis {
                like,
                fields: SIMILAR_FIELDS.to_vec(),
                min_term_freq: 1,
                min_doc_freq: 1,
                max_query_terms: SIMILAR_MAX_QUERY_TERMS,
            })],
            ..Default::default()
        }),
        size,
    )
}

/// Format results for human-readable terminal output.
pub fn format_human(result: &SearchResult) {
    if let Some(error) = &result.error {
        eprintln!("warning: {error}");
    }
    if result.documents.is_empty() {
        println!("No results found.");
        return;
    }

    for (i, doc) in result.documents.iter().enumerate() {
        print_document_line(result.from + i + 1, doc);
        for fragments in doc.highlights.values() {
            for fragment in fragments {
                println!("     … {}", fragment.replace('\n', " "));
            }
        }
    }

    println!(
        "\n{} of {} result(s) in {} ms{}",
        result.documents.len(),
        result.total,
        result.took_ms,
        if result.has_more() { ", more available" } else { "" }
    );
    if !result.matched_keywords.is_empty() {
        println!("matched keywords: {}", result.matched_keywords.join(", "));
    }
}

pub fn print_document_line(rank: usize, doc: &ScoredDocument) {
    let score = doc
        .score
        .map(|s| format!("{s:.3}"))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{rank:>3}. [{score}] {} #{}",
        doc.record.title,
        doc.record.id.short()
    );
    println!(
        "     {} | {} | {} | {}",
        doc.record.document_type,
        doc.record.category.as_deref().unwrap_or("-"),
        doc.record.upload_date.format("%Y-%m-%d"),
        doc.record.filename
    );
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn bool_query(req: &SearchRequest) -> &BoolQuery {
        match &req.query {
            Query::Bool(b) => b,
            Query::MatchAll => panic!("expected a bool query"),
        }
    }

    #[test]
    fn empty_query_matches_everything() {
        let req = build(&SearchQuery::default());
        assert!(req.query.is_match_all());
        assert_eq!(req.size, 10);
        assert_eq!(req.from, 0);
        assert_eq!(req.sort, None);
        assert!(req.highlight.is_none());
    }

    #[test]
    fn facets_are_always_requested() {
        let req = build(&SearchQuery::default());
        let names: Vec<_> = req.aggregations.iter().map(|a| a.name()).collect();
        assert_eq!(
            names,
            vec![
                "categories",
                "documentTypes",
                "employees",
                "mimetypes",
                "uploadsPerMonth"
            ]
        );
    }

    #[test]
    fn free_text_is_a_weighted_should_clause() {
        let req = build(&SearchQuery::text("contrato laboral"));
        let b = bool_query(&req);
        assert!(b.must.is_empty());
        assert_eq!(b.minimum_should_match, Some(1));
        let Clause::Text(m) = &b.should[0] else {
            panic!("expected text match");
        };
        assert_eq!(m.fields, TEXT_FIELDS.to_vec());
        assert_eq!(m.boost, 1.0);
        assert!(!m.fuzzy);
    }

    #[test]
    fn boost_flag_doubles_weight_and_fuzzy_is_carried() {
        let params = SearchQuery {
            boost: true,
            fuzzy: true,
            ..SearchQuery::text("contrato")
        };
        let req = build(&params);
        let Clause::Text(m) = &bool_query(&req).should[0] else {
            panic!("expected text match");
        };
        assert_eq!(m.boost, 2.0);
        assert!(m.fuzzy);
    }

    #[test]
    fn content_text_is_required() {
        let params = SearchQuery {
            content: Some("vacaciones".into()),
            ..Default::default()
        };
        let req = build(&params);
        let b = bool_query(&req);
        assert_eq!(b.must.len(), 1);
        assert_eq!(b.minimum_should_match, None);
        let Clause::Text(m) = &b.must[0] else {
            panic!("expected text match");
        };
        assert_eq!(m.fields, vec![FieldBoost::new("content", 1.0)]);
        assert_eq!(m.boost, 2.0);
    }

    #[test]
    fn keywords_are_normalized_exact_terms() {
        let params = SearchQuery {
            keywords: vec!["Nómina".into(), "nomina".into(), " ".into()],
            ..Default::default()
        };
        let req = build(&params);
        assert_eq!(
            bool_query(&req).should,
            vec![Clause::Terms {
                field: "keywords",
                values: vec!["nomina".into()],
                boost: 1.5,
            }]
        );
    }

    #[test]
    fn filters_only_keep_match_all() {
        let params = SearchQuery {
            filters: Filters {
                category: Some("facturas".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let req = build(&params);
        let b = bool_query(&req);
        assert_eq!(b.must, vec![Clause::MatchAll]);
        assert_eq!(
            b.filter,
            vec![Clause::Term {
                field: "category",
                value: FieldValue::Text("facturas".into()),
            }]
        );
    }

    #[test]
    fn every_filter_becomes_a_clause() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let params = SearchQuery {
            filters: Filters {
                category: Some("legal".into()),
                document_type: Some("contratos".into()),
                employee_uuid: Some("11111111-1111-4111-8111-111111111111".into()),
                file_type: Some("pdf".into()),
                tags: vec!["firmado".into(), "".into()],
                year: Some(2024),
                date_from: Some(from),
                date_to: None,
            },
            ..Default::default()
        };
        let req = build(&params);
        let filter = &bool_query(&req).filter;
        assert_eq!(filter.len(), 7);
        assert!(filter.contains(&Clause::Term {
            field: "mimetype",
            value: FieldValue::Text("application/pdf".into()),
        }));
        assert!(filter.contains(&Clause::Terms {
            field: "tags",
            values: vec!["firmado".into()],
            boost: 1.0,
        }));
        assert!(filter.contains(&Clause::Term {
            field: "year",
            value: FieldValue::Int(2024),
        }));
    }

    #[test]
    fn file_type_resolution() {
        assert_eq!(resolve_file_type("application/PDF"), "application/pdf");
        assert_eq!(resolve_file_type(".pdf"), "application/pdf");
        assert_eq!(resolve_file_type("txt"), "text/plain");
        assert_eq!(resolve_file_type("zzz"), "zzz");
    }

    #[test]
    fn explicit_sort_and_highlight() {
        let params = SearchQuery {
            sort: SortField::Date,
            order: SortOrder::Asc,
            highlight: true,
            ..Default::default()
        };
        let req = build(&params);
        assert_eq!(
            req.sort,
            Some(FieldSort {
                field: "uploadDate",
                order: SortOrder::Asc,
            })
        );
        let highlight = req.highlight.unwrap();
        assert_eq!(highlight.fields, vec!["content", "title", "keywords"]);
        assert_eq!(highlight.fragment_size, 150);
        assert_eq!(highlight.number_of_fragments, 3);
    }

    #[test]
    fn sort_field_parsing() {
        assert_eq!("date".parse::<SortField>().unwrap(), SortField::Date);
        assert_eq!(" Size ".parse::<SortField>().unwrap(), SortField::Size);
        assert!("weight".parse::<SortField>().is_err());
    }

    #[test]
    fn blank_detection() {
        assert!(SearchQuery::default().is_blank());
        assert!(SearchQuery::text("   ").is_blank());
        assert!(!SearchQuery::text("x").is_blank());
    }

    #[test]
    fn similar_request_shape() {
        let id = DocumentId::new();
        let req = build_similar(id, 5);
        let Clause::MoreLikeThis(mlt) = &bool_query(&req).must[0] else {
            panic!("expected more-like-this");
        };
        assert_eq!(mlt.like, id);
        assert_eq!(mlt.fields, vec!["title", "content", "keywords"]);
        assert_eq!(mlt.min_term_freq, 1);
        assert_eq!(mlt.max_query_terms, 12);
    }

    #[test]
    fn keyword_suggestions_use_normalized_prefix() {
        let req = build_suggest("Nóm", SuggestField::Keywords, 20);
        assert_eq!(
            bool_query(&req).must,
            vec![Clause::Prefix {
                field: "keywords",
                prefix: "nom".into(),
            }]
        );
        assert_eq!(req.size, 20);
    }
}
