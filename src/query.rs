//! Typed search requests.
//!
//! The query builder composes these values; backends either interpret them
//! directly or serialize them with [`SearchRequest::to_wire`], which emits the
//! Elasticsearch query DSL.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::doc_id::DocumentId;

/// A field name with a relevance weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldBoost {
    pub field: &'static str,
    pub boost: f32,
}

impl FieldBoost {
    pub const fn new(field: &'static str, boost: f32) -> Self {
        Self { field, boost }
    }

    fn to_wire(self) -> String {
        if self.boost == 1.0 {
            self.field.to_string()
        } else {
            format!("{}^{}", self.field, self.boost)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Score by the best matching field.
    BestFields,
}

/// Analyzed full-text match over one or more fields.
#[derive(Debug, Clone, PartialEq)]
pub struct TextMatch {
    pub text: String,
    pub fields: Vec<FieldBoost>,
    pub kind: MatchKind,
    /// Tolerate small typos.
    pub fuzzy: bool,
    pub boost: f32,
}

/// A value compared exactly against a non-analyzed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Int(i64),
}

impl FieldValue {
    fn to_wire(&self) -> Value {
        match self {
            Self::Text(s) => Value::String(s.clone()),
            Self::Int(n) => Value::from(*n),
        }
    }
}

/// Upload date span, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn is_empty(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }
}

/// Parameters of a "more like this" similarity query.
#[derive(Debug, Clone, PartialEq)]
pub struct MoreLikeThis {
    pub like: DocumentId,
    pub fields: Vec<&'static str>,
    pub min_term_freq: usize,
    pub min_doc_freq: u64,
    pub max_query_terms: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    MatchAll,
    Text(TextMatch),
    Term {
        field: &'static str,
        value: FieldValue,
    },
    /// Matches if the field equals any of the values.
    Terms {
        field: &'static str,
        values: Vec<String>,
        boost: f32,
    },
    Range {
        field: &'static str,
        range: DateRange,
    },
    /// Exact field value starting with `prefix`.
    Prefix {
        field: &'static str,
        prefix: String,
    },
    /// Analyzed phrase whose last word may be incomplete.
    PhrasePrefix {
        field: &'static str,
        text: String,
    },
    MoreLikeThis(MoreLikeThis),
}

impl Clause {
    fn to_wire(&self) -> Value {
        match self {
            Self::MatchAll => json!({ "match_all": {} }),
            Self::Text(m) => text_match_to_wire(m),
            Self::Term { field, value } => {
                json!({ "term": { *field: value.to_wire() } })
            }
            Self::Terms {
                field,
                values,
                boost,
            } => {
                let mut body = Map::new();
                body.insert((*field).to_string(), json!(values));
                if *boost != 1.0 {
                    body.insert("boost".into(), json!(boost));
                }
                json!({ "terms": body })
            }
            Self::Range { field, range } => {
                let mut bounds = Map::new();
                if let Some(from) = range.from {
                    bounds.insert("gte".into(), json!(rfc3339(from)));
                }
                if let Some(to) = range.to {
                    bounds.insert("lte".into(), json!(rfc3339(to)));
                }
                json!({ "range": { *field: bounds } })
            }
            Self::Prefix { field, prefix } => {
                json!({ "prefix": { *field: prefix } })
            }
            Self::PhrasePrefix { field, text } => {
                json!({ "match_phrase_prefix": { *field: text } })
            }
            Self::MoreLikeThis(mlt) => json!({
                "more_like_this": {
                    "fields": mlt.fields,
                    "like": [{ "_id": mlt.like.to_string() }],
                    "min_term_freq": mlt.min_term_freq,
                    "min_doc_freq": mlt.min_doc_freq,
                    "max_query_terms": mlt.max_query_terms,
                }
            }),
        }
    }
}

fn text_match_to_wire(m: &TextMatch) -> Value {
    let mut body = Map::new();
    body.insert("query".into(), json!(m.text));
    if m.fuzzy {
        body.insert("fuzziness".into(), json!("AUTO"));
    }
    if m.boost != 1.0 {
        body.insert("boost".into(), json!(m.boost));
    }

    if let [single] = m.fields.as_slice()
        && single.boost == 1.0
    {
        return json!({ "match": { single.field: body } });
    }

    body.insert(
        "fields".into(),
        json!(m.fields.iter().map(|f| f.to_wire()).collect::<Vec<_>>()),
    );
    body.insert(
        "type".into(),
        json!(match m.kind {
            MatchKind::BestFields => "best_fields",
        }),
    );
    json!({ "multi_match": body })
}

fn rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A boolean composition of clauses.
///
/// `must` and `should` clauses contribute to the score; `filter` clauses only
/// restrict the result set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoolQuery {
    pub must: Vec<Clause>,
    pub should: Vec<Clause>,
    pub filter: Vec<Clause>,
    pub minimum_should_match: Option<u32>,
}

impl BoolQuery {
    fn to_wire(&self) -> Value {
        let mut body = Map::new();
        for (name, clauses) in [
            ("must", &self.must),
            ("should", &self.should),
            ("filter", &self.filter),
        ] {
            if !clauses.is_empty() {
                body.insert(
                    name.into(),
                    Value::Array(clauses.iter().map(Clause::to_wire).collect()),
                );
            }
        }
        if let Some(n) = self.minimum_should_match {
            body.insert("minimum_should_match".into(), json!(n));
        }
        json!({ "bool": body })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    MatchAll,
    Bool(BoolQuery),
}

impl Query {
    pub fn is_match_all(&self) -> bool {
        matches!(self, Self::MatchAll)
    }

    pub fn to_wire(&self) -> Value {
        match self {
            Self::MatchAll => Clause::MatchAll.to_wire(),
            Self::Bool(b) => b.to_wire(),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Sort on a single indexed field instead of relevance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSort {
    pub field: &'static str,
    pub order: SortOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Document counts per distinct field value.
    Terms {
        name: &'static str,
        field: &'static str,
        size: usize,
    },
    /// Document counts per calendar month.
    MonthlyHistogram {
        name: &'static str,
        field: &'static str,
    },
}

impl Aggregation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Terms { name, .. } | Self::MonthlyHistogram { name, .. } => {
                name
            }
        }
    }

    fn to_wire(self) -> Value {
        match self {
            Self::Terms { field, size, .. } => {
                json!({ "terms": { "field": field, "size": size } })
            }
            Self::MonthlyHistogram { field, .. } => json!({
                "date_histogram": {
                    "field": field,
                    "calendar_interval": "month",
                    "format": "yyyy-MM",
                    "min_doc_count": 1,
                }
            }),
        }
    }
}

/// Markup around highlighted terms, identical on every backend.
pub const HIGHLIGHT_PRE_TAG: &str = "<em>";
pub const HIGHLIGHT_POST_TAG: &str = "</em>";

#[derive(Debug, Clone, PartialEq)]
pub struct Highlight {
    pub fields: Vec<&'static str>,
    pub fragment_size: usize,
    pub number_of_fragments: usize,
}

impl Highlight {
    fn to_wire(&self) -> Value {
        let fields: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| ((*f).to_string(), json!({})))
            .collect();
        json!({
            "fields": fields,
            "pre_tags": [HIGHLIGHT_PRE_TAG],
            "post_tags": [HIGHLIGHT_POST_TAG],
            "fragment_size": self.fragment_size,
            "number_of_fragments": self.number_of_fragments,
        })
    }
}

/// Everything sent to the index for one search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: Query,
    pub from: usize,
    pub size: usize,
    /// `None` sorts by relevance.
    pub sort: Option<FieldSort>,
    pub aggregations: Vec<Aggregation>,
    pub highlight: Option<Highlight>,
}

impl SearchRequest {
    pub fn new(query: Query, size: usize) -> Self {
        Self {
            query,
            from: 0,
            size,
            sort: None,
            aggregations: Vec::new(),
            highlight: None,
        }
    }

    /// The Elasticsearch `_search` body for this request.
    pub fn to_wire(&self) -> Value {
        let mut body = Map::new();
        body.insert("query".into(), self.query.to_wire());
        body.insert("from".into(), json!(self.from));
        body.insert("size".into(), json!(self.size));
        body.insert("track_total_hits".into(), json!(true));
        if let Some(sort) = self.sort {
            body.insert(
                "sort".into(),
                json!([{ sort.field: { "order": sort.order.as_str() } }]),
            );
        }
        if !self.aggregations.is_empty() {
            let aggs: Map<String, Value> = self
                .aggregations
                .iter()
                .map(|a| (a.name().to_string(), a.to_wire()))
                .collect();
            body.insert("aggs".into(), Value::Object(aggs));
        }
        if let Some(highlight) = &self.highlight {
            body.insert("highlight".into(), highlight.to_wire());
        }
        Value::Object(body)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn match_all_wire_form() {
        let req = SearchRequest::new(Query::MatchAll, 10);
        let wire = req.to_wire();
        assert_eq!(wire["query"], json!({ "match_all": {} }));
        assert_eq!(wire["size"], 10);
        assert_eq!(wire["from"], 0);
        assert!(wire.get("sort").is_none());
    }

    #[test]
    fn multi_match_lists_boosted_fields() {
        let clause = Clause::Text(TextMatch {
            text: "contrato".into(),
            fields: vec![
                FieldBoost::new("title", 3.0),
                FieldBoost::new("filename", 1.0),
            ],
            kind: MatchKind::BestFields,
            fuzzy: true,
            boost: 2.0,
        });
        let wire = clause.to_wire();
        let mm = &wire["multi_match"];
        assert_eq!(mm["fields"], json!(["title^3", "filename"]));
        assert_eq!(mm["fuzziness"], "AUTO");
        assert_eq!(mm["type"], "best_fields");
        assert_eq!(mm["boost"], 2.0);
    }

    #[test]
    fn single_field_match_uses_match() {
        let clause = Clause::Text(TextMatch {
            text: "vacaciones".into(),
            fields: vec![FieldBoost::new("content", 1.0)],
            kind: MatchKind::BestFields,
            fuzzy: false,
            boost: 2.0,
        });
        let wire = clause.to_wire();
        assert_eq!(wire["match"]["content"]["query"], "vacaciones");
        assert_eq!(wire["match"]["content"]["boost"], 2.0);
    }

    #[test]
    fn bool_query_omits_empty_sections() {
        let query = Query::Bool(BoolQuery {
            must: vec![Clause::MatchAll],
            filter: vec![Clause::Term {
                field: "category",
                value: FieldValue::Text("facturas".into()),
            }],
            ..Default::default()
        });
        let wire = query.to_wire();
        assert!(wire["bool"].get("should").is_none());
        assert_eq!(wire["bool"]["filter"][0]["term"]["category"], "facturas");
    }

    #[test]
    fn date_range_bounds() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clause = Clause::Range {
            field: "uploadDate",
            range: DateRange {
                from: Some(from),
                to: None,
            },
        };
        let wire = clause.to_wire();
        assert_eq!(
            wire["range"]["uploadDate"]["gte"],
            "2024-01-01T00:00:00.000Z"
        );
        assert!(wire["range"]["uploadDate"].get("lte").is_none());
    }

    #[test]
    fn sort_aggs_and_highlight() {
        let mut req = SearchRequest::new(Query::MatchAll, 5);
        req.sort = Some(FieldSort {
            field: "size",
            order: SortOrder::Asc,
        });
        req.aggregations = vec![
            Aggregation::Terms {
                name: "categories",
                field: "category",
                size: 20,
            },
            Aggregation::MonthlyHistogram {
                name: "uploadsPerMonth",
                field: "uploadDate",
            },
        ];
        req.highlight = Some(Highlight {
            fields: vec!["content"],
            fragment_size: 150,
            number_of_fragments: 3,
        });

        let wire = req.to_wire();
        assert_eq!(wire["sort"], json!([{ "size": { "order": "asc" } }]));
        assert_eq!(wire["aggs"]["categories"]["terms"]["field"], "category");
        assert_eq!(
            wire["aggs"]["uploadsPerMonth"]["date_histogram"]["calendar_interval"],
            "month"
        );
        assert_eq!(wire["highlight"]["fragment_size"], 150);
        assert!(wire["highlight"]["fields"].get("content").is_some());
        assert_eq!(wire["highlight"]["pre_tags"], json!(["<em>"]));
        assert_eq!(wire["highlight"]["post_tags"], json!(["</em>"]));
    }
}
