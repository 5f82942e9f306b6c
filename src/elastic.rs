//! [`IndexBackend`] over the Elasticsearch REST API.

use std::{collections::BTreeMap, time::Duration};

use reqwest::{
    StatusCode,
    blocking::{Client, RequestBuilder, Response},
};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    backend::{
        ClusterInfo,
        FacetBucket,
        Facets,
        IndexBackend,
        IndexDocument,
        RawHit,
        RawSearchResponse,
        index_mapping,
    },
    doc_id::DocumentId,
    error::{Error, Result},
    query::SearchRequest,
};

pub const DEFAULT_URL: &str = "http://localhost:9200";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Writes return once they are visible to searches.
const REFRESH: &str = "refresh=wait_for";

/// Connection settings for an Elasticsearch cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElasticConfig {
    pub url: String,
    pub index: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

impl ElasticConfig {
    pub fn new(url: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            index: index.into(),
            username: None,
            password: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

pub struct ElasticBackend {
    client: Client,
    config: ElasticConfig,
    base: String,
}

impl std::fmt::Debug for ElasticBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticBackend")
            .field("url", &self.config.url)
            .field("index", &self.config.index)
            .finish_non_exhaustive()
    }
}

impl ElasticBackend {
    pub fn new(config: ElasticConfig) -> Result<Self> {
        if config.index.trim().is_empty() {
            return Err(Error::Config("elasticsearch index name is empty".into()));
        }
        let client = Client::builder().timeout(config.timeout).build()?;
        let base = config.url.trim_end_matches('/').to_string();
        Ok(Self {
            client,
            config,
            base,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    fn doc_url(&self, id: &DocumentId) -> String {
        self.url(&format!("{}/_doc/{id}", self.config.index))
    }

    fn with_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.username {
            Some(user) => request.basic_auth(user, self.config.password.as_deref()),
            None => request,
        }
    }

    fn send(&self, request: RequestBuilder) -> Result<Response> {
        Ok(self.with_auth(request).send()?)
    }

    /// Send and decode a JSON body, failing on any non-success status.
    fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = check(self.send(request)?)?;
        Ok(response.json()?)
    }
}

fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(Error::IndexRequest {
        status: status.as_u16(),
        body,
    })
}

#[derive(Deserialize)]
struct InfoResponse {
    cluster_name: String,
    version: VersionInfo,
}

#[derive(Deserialize)]
struct VersionInfo {
    number: String,
}

#[derive(Deserialize)]
struct GetResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<IndexDocument>,
}

#[derive(Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Hits,
    #[serde(default)]
    aggregations: BTreeMap<String, AggregationResult>,
}

#[derive(Deserialize)]
struct Hits {
    total: Total,
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Total {
    Count(u64),
    Object { value: u64 },
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score")]
    score: Option<f32>,
    #[serde(rename = "_source")]
    source: IndexDocument,
    #[serde(default)]
    highlight: BTreeMap<String, Vec<String>>,
}

#[derive(Deserialize)]
struct AggregationResult {
    #[serde(default)]
    buckets: Vec<Bucket>,
}

#[derive(Deserialize)]
struct Bucket {
    key: Value,
    key_as_string: Option<String>,
    doc_count: u64,
}

impl Bucket {
    fn into_facet(self) -> FacetBucket {
        let key = match (self.key_as_string, self.key) {
            (Some(s), _) => s,
            (None, Value::String(s)) => s,
            (None, other) => other.to_string(),
        };
        FacetBucket {
            key,
            count: self.doc_count,
        }
    }
}

fn parse_search_response(body: SearchResponse) -> RawSearchResponse {
    let total = match body.hits.total {
        Total::Count(n) | Total::Object { value: n } => n,
    };
    let hits = body
        .hits
        .hits
        .into_iter()
        .map(|hit| RawHit {
            id: hit.id,
            score: hit.score,
            source: hit.source,
            highlights: hit.highlight,
        })
        .collect();
    let facets: Facets = body
        .aggregations
        .into_iter()
        .map(|(name, agg)| {
            (name, agg.buckets.into_iter().map(Bucket::into_facet).collect())
        })
        .collect();
    RawSearchResponse {
        hits,
        total,
        facets,
    }
}

impl IndexBackend for ElasticBackend {
    fn index_name(&self) -> &str {
        &self.config.index
    }

    fn ping(&self) -> Result<ClusterInfo> {
        let info: InfoResponse = self.send_json(self.client.get(self.url("/")))?;
        Ok(ClusterInfo {
            name: info.cluster_name,
            version: info.version.number,
        })
    }

    fn ensure_index(&self) -> Result<bool> {
        let index_url = self.url(&self.config.index);
        let response = self.send(self.client.head(&index_url))?;
        match response.status() {
            StatusCode::OK => return Ok(false),
            StatusCode::NOT_FOUND => {}
            _ => {
                check(response)?;
            }
        }

        check(self.send(self.client.put(&index_url).json(&index_mapping()))?)?;
        info!(index = self.config.index, "Created Elasticsearch index");
        Ok(true)
    }

    fn upsert(&self, id: &DocumentId, doc: &IndexDocument) -> Result<()> {
        self.ensure_index()?;
        let request = self
            .client
            .put(format!("{}?{REFRESH}", self.doc_url(id)))
            .json(doc);
        check(self.send(request)?)?;
        debug!(%id, index = self.config.index, "Upserted document");
        Ok(())
    }

    fn upsert_batch(&self, docs: &[(DocumentId, IndexDocument)]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        self.ensure_index()?;
        let mut body = String::new();
        for (id, doc) in docs {
            let action = serde_json::json!({ "index": { "_index": self.config.index, "_id": id.to_string() } });
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&serde_json::to_string(doc)?);
            body.push('\n');
        }
        let request = self
            .client
            .post(self.url(&format!("_bulk?{REFRESH}")))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        let response: Value = self.send_json(request)?;
        if response["errors"].as_bool().unwrap_or(false) {
            return Err(Error::IndexRequest {
                status: 200,
                body: response["items"].to_string(),
            });
        }
        Ok(())
    }

    fn delete(&self, id: &DocumentId) -> Result<bool> {
        let request = self
            .client
            .delete(format!("{}?{REFRESH}", self.doc_url(id)));
        let response = self.send(request)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(response)?;
        Ok(true)
    }

    fn get(&self, id: &DocumentId) -> Result<Option<IndexDocument>> {
        let response = self.send(self.client.get(self.doc_url(id)))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: GetResponse = check(response)?.json()?;
        Ok(body.found.then_some(body.source).flatten())
    }

    fn search(&self, request: &SearchRequest) -> Result<RawSearchResponse> {
        let url = self.url(&format!("{}/_search", self.config.index));
        let body: SearchResponse =
            self.send_json(self.client.post(url).json(&request.to_wire()))?;
        Ok(parse_search_response(body))
    }

    fn doc_count(&self) -> Result<u64> {
        let url = self.url(&format!("{}/_count", self.config.index));
        let body: CountResponse = self.send_json(self.client.get(url))?;
        Ok(body.count)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn urls_are_joined_without_double_slashes() {
        let backend =
            ElasticBackend::new(ElasticConfig::new("http://es:9200/", "documents-2024")).unwrap();
        let id = DocumentId::parse("11111111-1111-4111-8111-111111111111").unwrap();
        assert_eq!(
            backend.doc_url(&id),
            "http://es:9200/documents-2024/_doc/11111111-1111-4111-8111-111111111111"
        );
        assert_eq!(backend.url("/"), "http://es:9200/");
    }

    #[test]
    fn empty_index_name_is_rejected() {
        assert!(matches!(
            ElasticBackend::new(ElasticConfig::new(DEFAULT_URL, " ")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn parses_search_response() {
        let body = json!({
            "hits": {
                "total": { "value": 7, "relation": "eq" },
                "hits": [{
                    "_id": "11111111-1111-4111-8111-111111111111",
                    "_score": 1.5,
                    "_source": {
                        "title": "Factura",
                        "content": "factura marzo",
                        "keywords": ["factura"],
                        "documentType": "facturas",
                        "employeeUuid": "e",
                        "uploadDate": "2024-03-01T00:00:00Z",
                        "year": 2024,
                        "filename": "f.pdf",
                        "mimetype": "application/pdf",
                        "size": 3
                    },
                    "highlight": { "content": ["<em>factura</em> marzo"] }
                }]
            },
            "aggregations": {
                "categories": { "buckets": [{ "key": "facturas", "doc_count": 7 }] },
                "uploadsPerMonth": { "buckets": [
                    { "key": 1709251200000_i64, "key_as_string": "2024-03", "doc_count": 7 }
                ] }
            }
        });
        let parsed = parse_search_response(serde_json::from_value(body).unwrap());
        assert_eq!(parsed.total, 7);
        assert_eq!(parsed.hits[0].score, Some(1.5));
        assert_eq!(parsed.hits[0].source.title, "Factura");
        assert_eq!(parsed.hits[0].highlights["content"].len(), 1);
        assert_eq!(parsed.facets["categories"][0].key, "facturas");
        assert_eq!(parsed.facets["uploadsPerMonth"][0].key, "2024-03");
    }

    #[test]
    fn parses_legacy_total_and_null_scores() {
        let body = json!({
            "hits": { "total": 0, "hits": [] }
        });
        let parsed = parse_search_response(serde_json::from_value(body).unwrap());
        assert_eq!(parsed.total, 0);
        assert!(parsed.facets.is_empty());
    }

    #[test]
    fn unreachable_cluster_is_reported_as_unavailable() {
        let mut config = ElasticConfig::new("http://127.0.0.1:9", "documents");
        config.timeout = Duration::from_secs(2);
        let backend = ElasticBackend::new(config).unwrap();
        let err = backend.ping().unwrap_err();
        assert!(err.is_unavailable(), "unexpected error: {err}");
    }
}
