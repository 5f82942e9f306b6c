use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::Mutex,
};

use chrono::{DateTime, Utc};

use tantivy::{
    DocAddress,
    DocId,
    Index,
    IndexReader,
    IndexWriter,
    Searcher,
    TantivyDocument,
    Term,
    collector::TopDocs,
    columnar::StrColumn,
    query::{
        AllQuery,
        BooleanQuery,
        BoostQuery,
        ConstScoreQuery,
        EmptyQuery,
        MoreLikeThisQuery,
        Occur,
        Query as TantivyQuery,
        QueryParser,
        RegexQuery,
        TermQuery,
    },
    schema::*,
    snippet::SnippetGenerator,
    tokenizer::{
        AsciiFoldingFilter,
        Language,
        LowerCaser,
        RawTokenizer,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        StopWordFilter,
        TextAnalyzer,
        TokenStream,
    },
};
use tracing::debug;

use crate::{
    backend::{
        ClusterInfo,
        FacetBucket,
        Facets,
        IndexBackend,
        IndexDocument,
        RawHit,
        RawSearchResponse,
        fields,
    },
    doc_id::DocumentId,
    error::{Error, Result},
    keywords,
    query::{
        Aggregation,
        BoolQuery,
        Clause,
        DateRange,
        FieldSort,
        FieldValue,
        HIGHLIGHT_POST_TAG,
        HIGHLIGHT_PRE_TAG,
        Highlight,
        MoreLikeThis,
        Query,
        SearchRequest,
        SortOrder,
        TextMatch,
    },
    stopwords,
};

const WRITER_MEMORY_BUDGET: usize = 50_000_000;

const SPANISH_TOKENIZER: &str = "es_stem";
const KEYWORD_TOKENIZER: &str = "keyword_folded";

/// Stored-only copy of the full index payload, as JSON.
const SOURCE: &str = "source";
const ID: &str = "id";
/// Untokenized employee name, for facet counts.
const EMPLOYEE_NAME_RAW: &str = "employeeNameRaw";

/// Embedded full-text index on top of Tantivy.
///
/// Every document keeps its full payload in a stored `source` field; the
/// remaining fields exist only to be searched, filtered and sorted on.
/// Facets and field sorts read fast-field columns, so only the returned
/// page ever has its payload loaded.
pub struct TantivyBackend {
    name: String,
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: SchemaFields,
}

/// Resolved field handles for the schema.
#[derive(Clone, Copy)]
struct SchemaFields {
    id: Field,
    source: Field,
    title: Field,
    content: Field,
    keywords: Field,
    tags: Field,
    category: Field,
    document_type: Field,
    employee_uuid: Field,
    employee_name: Field,
    employee_name_raw: Field,
    employee_cedula: Field,
    filename: Field,
    mimetype: Field,
    relative_path: Field,
    upload_date: Field,
    year: Field,
    size: Field,
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();

    let analyzed = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(SPANISH_TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );
    let keyword = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(KEYWORD_TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqs),
    );

    let id = builder.add_text_field(ID, STRING | STORED | FAST);
    let source = builder.add_text_field(SOURCE, STORED);
    let title = builder.add_text_field(fields::TITLE, analyzed.clone());
    let content = builder.add_text_field(fields::CONTENT, analyzed.clone());
    let keywords = builder.add_text_field(fields::KEYWORDS, keyword);
    let tags = builder.add_text_field(fields::TAGS, STRING | FAST);
    let category = builder.add_text_field(fields::CATEGORY, STRING | FAST);
    let document_type = builder.add_text_field(fields::DOCUMENT_TYPE, STRING | FAST);
    let employee_uuid = builder.add_text_field(fields::EMPLOYEE_UUID, STRING | FAST);
    let employee_name = builder.add_text_field(fields::EMPLOYEE_NAME, analyzed);
    let employee_name_raw = builder.add_text_field(EMPLOYEE_NAME_RAW, STRING | FAST);
    let employee_cedula =
        builder.add_text_field(fields::EMPLOYEE_CEDULA, STRING);
    let filename = builder.add_text_field(fields::FILENAME, STRING | FAST);
    let mimetype = builder.add_text_field(fields::MIMETYPE, STRING | FAST);
    let relative_path = builder.add_text_field(fields::RELATIVE_PATH, STRING);
    // Seconds since the epoch.
    let upload_date = builder.add_i64_field(fields::UPLOAD_DATE, INDEXED | FAST);
    let year = builder.add_i64_field(fields::YEAR, INDEXED | FAST);
    let size = builder.add_u64_field(fields::SIZE, INDEXED | FAST);

    let schema = builder.build();
    let fields = SchemaFields {
        id,
        source,
        title,
        content,
        keywords,
        tags,
        category,
        document_type,
        employee_uuid,
        employee_name,
        employee_name_raw,
        employee_cedula,
        filename,
        mimetype,
        relative_path,
        upload_date,
        year,
        size,
    };

    (schema, fields)
}

fn register_tokenizers(index: &Index) {
    let es_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(AsciiFoldingFilter)
        .filter(StopWordFilter::remove(
            stopwords::words().map(str::to_string),
        ))
        .filter(Stemmer::new(Language::Spanish))
        .build();
    index.tokenizers().register(SPANISH_TOKENIZER, es_stem);

    let keyword_folded = TextAnalyzer::builder(RawTokenizer::default())
        .filter(LowerCaser)
        .filter(AsciiFoldingFilter)
        .build();
    index.tokenizers().register(KEYWORD_TOKENIZER, keyword_folded);
}

impl TantivyBackend {
    /// Open or create an index at the given directory.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let (schema, fields) = build_schema();

        let mmap_dir = tantivy::directory::MmapDirectory::open(dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;
        let index = if Index::exists(&mmap_dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?
        {
            Index::open(mmap_dir)?
        } else {
            Index::create(mmap_dir, schema, tantivy::IndexSettings::default())?
        };

        Self::with_index(dir.display().to_string(), index, fields)
    }

    /// Create an in-memory index (for testing).
    pub fn open_in_ram() -> Result<Self> {
        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        Self::with_index("memory".to_string(), index, fields)
    }

    fn with_index(name: String, index: Index, fields: SchemaFields) -> Result<Self> {
        register_tokenizers(&index);
        let reader = index.reader()?;
        let writer = index.writer(WRITER_MEMORY_BUDGET)?;
        Ok(Self {
            name,
            index,
            reader,
            writer: Mutex::new(writer),
            fields,
        })
    }

    fn lock_writer(&self) -> Result<std::sync::MutexGuard<'_, IndexWriter>> {
        self.writer.lock().map_err(|_| {
            Error::Tantivy(tantivy::TantivyError::SystemError(
                "index writer lock poisoned".to_string(),
            ))
        })
    }

    fn searcher(&self) -> Result<Searcher> {
        self.reader.reload()?;
        Ok(self.reader.searcher())
    }

    fn field(&self, name: &str) -> Result<Field> {
        self.index
            .schema()
            .get_field(name)
            .map_err(|_| Error::invalid(format!("field {name:?} is not searchable")))
    }

    fn build_document(&self, id: &DocumentId, doc: &IndexDocument) -> Result<TantivyDocument> {
        let f = self.fields;
        let mut document = TantivyDocument::default();
        document.add_text(f.id, id.to_string());
        document.add_text(f.source, serde_json::to_string(doc)?);
        document.add_text(f.title, &doc.title);
        document.add_text(f.content, &doc.content);
        for keyword in &doc.keywords {
            document.add_text(f.keywords, keyword);
        }
        for tag in &doc.tags {
            document.add_text(f.tags, tag);
        }
        let optional = [
            (f.category, &doc.category),
            (f.employee_name, &doc.employee_name),
            (f.employee_cedula, &doc.employee_cedula),
        ];
        for (field, value) in optional {
            if let Some(value) = value {
                document.add_text(field, value);
            }
        }
        if let Some(name) = &doc.employee_name {
            document.add_text(f.employee_name_raw, name);
        }
        document.add_text(f.document_type, &doc.document_type);
        document.add_text(f.employee_uuid, &doc.employee_uuid);
        document.add_text(f.filename, &doc.filename);
        document.add_text(f.mimetype, &doc.mimetype);
        document.add_text(f.relative_path, &doc.relative_path);
        document.add_i64(f.upload_date, doc.upload_date.timestamp());
        document.add_i64(f.year, i64::from(doc.year));
        document.add_u64(f.size, doc.size);
        Ok(document)
    }

    fn id_query(&self, id: &DocumentId) -> TermQuery {
        TermQuery::new(
            Term::from_field_text(self.fields.id, &id.to_string()),
            IndexRecordOption::Basic,
        )
    }

    fn find_address(&self, searcher: &Searcher, id: &DocumentId) -> Result<Option<DocAddress>> {
        let top = searcher.search(&self.id_query(id), &TopDocs::with_limit(1))?;
        Ok(top.first().map(|(_, addr)| *addr))
    }

    fn load(&self, searcher: &Searcher, addr: DocAddress) -> Result<(String, IndexDocument)> {
        let doc: TantivyDocument = searcher.doc(addr)?;
        let id = extract_text(&doc, self.fields.id);
        let source: IndexDocument =
            serde_json::from_str(&extract_text(&doc, self.fields.source))?;
        Ok((id, source))
    }

    fn compile(&self, searcher: &Searcher, query: &Query) -> Result<Box<dyn TantivyQuery>> {
        match query {
            Query::MatchAll => Ok(Box::new(AllQuery)),
            Query::Bool(b) => self.compile_bool(searcher, b),
        }
    }

    fn compile_bool(&self, searcher: &Searcher, b: &BoolQuery) -> Result<Box<dyn TantivyQuery>> {
        let mut clauses: Vec<(Occur, Box<dyn TantivyQuery>)> = Vec::new();
        for clause in &b.must {
            clauses.push((Occur::Must, self.compile_clause(searcher, clause)?));
        }
        for clause in &b.filter {
            let inner = self.compile_clause(searcher, clause)?;
            clauses.push((Occur::Must, Box::new(ConstScoreQuery::new(inner, 0.0))));
        }

        let mut should = Vec::with_capacity(b.should.len());
        for clause in &b.should {
            should.push((Occur::Should, self.compile_clause(searcher, clause)?));
        }
        // At least one should clause has to match: group them under a
        // required disjunction.
        let required = b.minimum_should_match.is_some_and(|n| n > 0) && b.must.is_empty();
        if required && !should.is_empty() {
            clauses.push((Occur::Must, Box::new(BooleanQuery::new(should))));
        } else {
            clauses.extend(should);
        }

        if clauses.is_empty() {
            return Ok(Box::new(AllQuery));
        }
        Ok(Box::new(BooleanQuery::new(clauses)))
    }

    fn compile_clause(&self, searcher: &Searcher, clause: &Clause) -> Result<Box<dyn TantivyQuery>> {
        match clause {
            Clause::MatchAll => Ok(Box::new(AllQuery)),
            Clause::Text(m) => self.text_query(m),
            Clause::Term { field, value } => {
                Ok(Box::new(TermQuery::new(self.term(field, value)?, IndexRecordOption::Basic)))
            }
            Clause::Terms {
                field,
                values,
                boost,
            } => {
                let mut any = Vec::with_capacity(values.len());
                for value in values {
                    let term = self.term(field, &FieldValue::Text(value.clone()))?;
                    let q: Box<dyn TantivyQuery> =
                        Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs));
                    any.push((Occur::Should, q));
                }
                Ok(boosted(Box::new(BooleanQuery::new(any)), *boost))
            }
            Clause::Range { field, range } => self.range_query(field, range),
            Clause::Prefix { field, prefix } => {
                let pattern = format!("{}.*", regex::escape(prefix));
                Ok(Box::new(RegexQuery::from_pattern(&pattern, self.field(field)?)?))
            }
            Clause::PhrasePrefix { field, text } => self.phrase_prefix_query(field, text),
            Clause::MoreLikeThis(mlt) => self.more_like_this_query(searcher, mlt),
        }
    }

    fn term(&self, name: &str, value: &FieldValue) -> Result<Term> {
        let field = self.field(name)?;
        match (value, self.index.schema().get_field_entry(field).field_type()) {
            (FieldValue::Text(text), FieldType::Str(_)) => {
                let text = if field == self.fields.keywords {
                    keywords::normalize(text)
                } else {
                    text.clone()
                };
                Ok(Term::from_field_text(field, &text))
            }
            (FieldValue::Int(n), FieldType::I64(_)) => Ok(Term::from_field_i64(field, *n)),
            (FieldValue::Text(text), FieldType::I64(_)) => {
                let n = text
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| Error::invalid(format!("{name} expects a number, got {text:?}")))?;
                Ok(Term::from_field_i64(field, n))
            }
            _ => Err(Error::invalid(format!("cannot filter on {name} with {value:?}"))),
        }
    }

    fn text_query(&self, m: &TextMatch) -> Result<Box<dyn TantivyQuery>> {
        let mut resolved = Vec::with_capacity(m.fields.len());
        for fb in &m.fields {
            resolved.push((self.field(fb.field)?, fb));
        }
        let mut parser =
            QueryParser::for_index(&self.index, resolved.iter().map(|(f, _)| *f).collect());
        for (field, fb) in &resolved {
            if fb.boost != 1.0 {
                parser.set_field_boost(*field, fb.boost);
            }
            // Identifiers are matched exactly even in fuzzy mode.
            if m.fuzzy && *field != self.fields.filename {
                parser.set_field_fuzzy(*field, false, 1, true);
            }
        }

        let (query, errors) = parser.parse_query_lenient(&m.text);
        if !errors.is_empty() {
            debug!(text = m.text, errors = errors.len(), "Lenient parse dropped query parts");
        }
        Ok(boosted(query, m.boost))
    }

    fn range_query(&self, name: &str, range: &DateRange) -> Result<Box<dyn TantivyQuery>> {
        let bound = |d: Option<chrono::DateTime<chrono::Utc>>| {
            d.map(|d| d.timestamp().to_string())
                .unwrap_or_else(|| "*".to_string())
        };
        let field = self.field(name)?;
        let parser = QueryParser::for_index(&self.index, vec![field]);
        let expr = format!("{name}:[{} TO {}]", bound(range.from), bound(range.to));
        Ok(parser.parse_query(&expr)?)
    }

    /// All complete words must match; the last one may be a prefix.
    fn phrase_prefix_query(&self, name: &str, text: &str) -> Result<Box<dyn TantivyQuery>> {
        let field = self.field(name)?;
        let mut words: Vec<&str> = text.split_whitespace().collect();
        let Some(last) = words.pop() else {
            return Ok(Box::new(EmptyQuery));
        };

        let mut clauses: Vec<(Occur, Box<dyn TantivyQuery>)> = Vec::new();
        let mut analyzer = self.index.tokenizer_for_field(field)?;
        for word in words {
            let mut stream = analyzer.token_stream(word);
            while stream.advance() {
                let term = Term::from_field_text(field, &stream.token().text);
                clauses.push((
                    Occur::Must,
                    Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs)),
                ));
            }
        }

        let prefix = keywords::normalize(last);
        if !prefix.is_empty() {
            let pattern = format!("{}.*", regex::escape(&prefix));
            clauses.push((Occur::Must, Box::new(RegexQuery::from_pattern(&pattern, field)?)));
        }
        if clauses.is_empty() {
            return Ok(Box::new(EmptyQuery));
        }
        Ok(Box::new(BooleanQuery::new(clauses)))
    }

    fn more_like_this_query(
        &self,
        searcher: &Searcher,
        mlt: &MoreLikeThis,
    ) -> Result<Box<dyn TantivyQuery>> {
        let Some(addr) = self.find_address(searcher, &mlt.like)? else {
            return Ok(Box::new(EmptyQuery));
        };
        let (_, source) = self.load(searcher, addr)?;

        let mut doc_fields = Vec::with_capacity(mlt.fields.len());
        for name in &mlt.fields {
            let values: Vec<OwnedValue> = match *name {
                fields::TITLE => vec![OwnedValue::Str(source.title.clone())],
                fields::CONTENT => vec![OwnedValue::Str(source.content.clone())],
                fields::KEYWORDS => source
                    .keywords
                    .iter()
                    .map(|k| OwnedValue::Str(k.clone()))
                    .collect(),
                other => {
                    return Err(Error::invalid(format!(
                        "similarity is not supported on {other}"
                    )));
                }
            };
            doc_fields.push((self.field(name)?, values));
        }

        let query = MoreLikeThisQuery::builder()
            .with_min_doc_frequency(mlt.min_doc_freq)
            .with_min_term_frequency(mlt.min_term_freq)
            .with_max_query_terms(mlt.max_query_terms)
            .with_document_fields(doc_fields);
        Ok(Box::new(query))
    }

    fn highlights(
        &self,
        searcher: &Searcher,
        query: &dyn TantivyQuery,
        highlight: &Highlight,
    ) -> Result<Vec<(&'static str, SnippetGenerator)>> {
        let mut generators = Vec::with_capacity(highlight.fields.len());
        for name in &highlight.fields {
            let mut generator = SnippetGenerator::create(searcher, query, self.field(name)?)?;
            generator.set_max_num_chars(highlight.fragment_size);
            generators.push((*name, generator));
        }
        Ok(generators)
    }
}

impl std::fmt::Debug for TantivyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TantivyBackend")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl IndexBackend for TantivyBackend {
    fn index_name(&self) -> &str {
        &self.name
    }

    fn ping(&self) -> Result<ClusterInfo> {
        Ok(ClusterInfo {
            name: format!("tantivy ({})", self.name),
            version: tantivy::version_string().to_string(),
        })
    }

    /// The index is created when the backend is opened.
    fn ensure_index(&self) -> Result<bool> {
        Ok(false)
    }

    fn upsert(&self, id: &DocumentId, doc: &IndexDocument) -> Result<()> {
        self.upsert_batch(std::slice::from_ref(&(*id, doc.clone())))
    }

    fn upsert_batch(&self, docs: &[(DocumentId, IndexDocument)]) -> Result<()> {
        let mut writer = self.lock_writer()?;
        for (id, doc) in docs {
            let document = self.build_document(id, doc)?;
            // Delete any existing document with this ID first.
            writer.delete_term(Term::from_field_text(self.fields.id, &id.to_string()));
            writer.add_document(document)?;
        }
        writer.commit()?;
        Ok(())
    }

    fn delete(&self, id: &DocumentId) -> Result<bool> {
        let existed = self.find_address(&self.searcher()?, id)?.is_some();
        if existed {
            let mut writer = self.lock_writer()?;
            writer.delete_term(Term::from_field_text(self.fields.id, &id.to_string()));
            writer.commit()?;
        }
        Ok(existed)
    }

    fn get(&self, id: &DocumentId) -> Result<Option<IndexDocument>> {
        let searcher = self.searcher()?;
        match self.find_address(&searcher, id)? {
            Some(addr) => Ok(Some(self.load(&searcher, addr)?.1)),
            None => Ok(None),
        }
    }

    fn search(&self, request: &SearchRequest) -> Result<RawSearchResponse> {
        let searcher = self.searcher()?;
        let query = self.compile(&searcher, &request.query)?;

        // Every match, best first. More-like-this queries only run with
        // scoring enabled, so the match set comes from a scoring collector.
        let limit = usize::try_from(searcher.num_docs()).unwrap_or(usize::MAX).max(1);
        let matched = searcher.search(&*query, &TopDocs::with_limit(limit))?;
        let total = matched.len() as u64;

        let segments = by_segment(matched.iter().map(|(_, addr)| *addr));
        let facets = compute_facets(&searcher, &request.aggregations, &segments)?;

        let page: Vec<(Option<f32>, DocAddress)> = if request.size == 0 {
            Vec::new()
        } else if let Some(sort) = request.sort {
            let mut keyed = sort_keys(&searcher, sort.field, &segments)?;
            keyed.sort_by(|a, b| compare_keys(sort, a, b));
            keyed
                .into_iter()
                .skip(request.from)
                .take(request.size)
                .map(|k| (None, k.addr))
                .collect()
        } else {
            matched
                .into_iter()
                .skip(request.from)
                .take(request.size)
                .map(|(score, addr)| (Some(score), addr))
                .collect()
        };

        let generators = match &request.highlight {
            Some(h) => self.highlights(&searcher, &*query, h)?,
            None => Vec::new(),
        };
        let max_fragments = request.highlight.as_ref().map_or(0, |h| h.number_of_fragments);

        let mut hits = Vec::with_capacity(page.len());
        for (score, addr) in page {
            let (id, source) = self.load(&searcher, addr)?;
            let mut highlights = BTreeMap::new();
            for (name, generator) in &generators {
                let fragments = highlight_fragments(generator, name, &source, max_fragments);
                if !fragments.is_empty() {
                    highlights.insert((*name).to_string(), fragments);
                }
            }
            hits.push(RawHit {
                id,
                score,
                source,
                highlights,
            });
        }

        Ok(RawSearchResponse {
            hits,
            total,
            facets,
        })
    }

    fn doc_count(&self) -> Result<u64> {
        Ok(self.searcher()?.num_docs())
    }
}

fn boosted(query: Box<dyn TantivyQuery>, boost: f32) -> Box<dyn TantivyQuery> {
    if boost == 1.0 {
        query
    } else {
        Box::new(BoostQuery::new(query, boost))
    }
}

fn highlight_fragments(
    generator: &SnippetGenerator,
    field: &str,
    source: &IndexDocument,
    max_fragments: usize,
) -> Vec<String> {
    let texts: Vec<&str> = match field {
        fields::TITLE => vec![source.title.as_str()],
        fields::CONTENT => vec![source.content.as_str()],
        fields::KEYWORDS => source.keywords.iter().map(String::as_str).collect(),
        _ => Vec::new(),
    };
    texts
        .into_iter()
        .map(|text| generator.snippet(text))
        .filter(|snippet| !snippet.highlighted().is_empty())
        .map(|mut snippet| {
            snippet.set_snippet_prefix_postfix(HIGHLIGHT_PRE_TAG, HIGHLIGHT_POST_TAG);
            snippet.to_html()
        })
        .take(max_fragments)
        .collect()
}

/// Matching documents grouped by segment, in segment order.
fn by_segment(addrs: impl Iterator<Item = DocAddress>) -> BTreeMap<u32, Vec<DocId>> {
    let mut segments: BTreeMap<u32, Vec<DocId>> = BTreeMap::new();
    for addr in addrs {
        segments.entry(addr.segment_ord).or_default().push(addr.doc_id);
    }
    segments
}

/// Fast-field column holding the values of a facetable field.
fn facet_column(field: &str) -> Result<&'static str> {
    Ok(match field {
        fields::CATEGORY => fields::CATEGORY,
        fields::DOCUMENT_TYPE => fields::DOCUMENT_TYPE,
        fields::EMPLOYEE_UUID => fields::EMPLOYEE_UUID,
        fields::EMPLOYEE_NAME | fields::EMPLOYEE_NAME_KEYWORD => EMPLOYEE_NAME_RAW,
        fields::MIMETYPE => fields::MIMETYPE,
        fields::TAGS => fields::TAGS,
        fields::FILENAME => fields::FILENAME,
        other => return Err(Error::invalid(format!("cannot count values of {other}"))),
    })
}

fn first_str(column: Option<&StrColumn>, doc: DocId) -> Result<Option<String>> {
    let Some(column) = column else {
        return Ok(None);
    };
    let Some(ord) = column.term_ords(doc).next() else {
        return Ok(None);
    };
    let mut value = String::new();
    Ok(column.ord_to_str(ord, &mut value)?.then_some(value))
}

/// Documents per distinct value; a document counts once per value.
fn count_terms(
    searcher: &Searcher,
    column: &str,
    segments: &BTreeMap<u32, Vec<DocId>>,
) -> Result<HashMap<String, u64>> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    let mut ords = Vec::new();
    let mut value = String::new();
    for (&segment, docs) in segments {
        let Some(values) = searcher.segment_reader(segment).fast_fields().str(column)? else {
            continue;
        };
        let mut per_ord: HashMap<u64, u64> = HashMap::new();
        for &doc in docs {
            ords.clear();
            ords.extend(values.term_ords(doc));
            ords.sort_unstable();
            ords.dedup();
            for &ord in &ords {
                *per_ord.entry(ord).or_default() += 1;
            }
        }
        for (ord, count) in per_ord {
            value.clear();
            if values.ord_to_str(ord, &mut value)? {
                *counts.entry(value.clone()).or_default() += count;
            }
        }
    }
    Ok(counts)
}

/// Documents per `YYYY-MM` upload month.
fn count_months(
    searcher: &Searcher,
    segments: &BTreeMap<u32, Vec<DocId>>,
) -> Result<HashMap<String, u64>> {
    let mut per_second: HashMap<i64, u64> = HashMap::new();
    for (&segment, docs) in segments {
        let dates = searcher
            .segment_reader(segment)
            .fast_fields()
            .i64(fields::UPLOAD_DATE)?;
        for &doc in docs {
            if let Some(secs) = dates.first(doc) {
                *per_second.entry(secs).or_default() += 1;
            }
        }
    }

    let mut counts: HashMap<String, u64> = HashMap::new();
    for (secs, count) in per_second {
        if let Some(date) = DateTime::<Utc>::from_timestamp(secs, 0) {
            *counts.entry(date.format("%Y-%m").to_string()).or_default() += count;
        }
    }
    Ok(counts)
}

fn compute_facets(
    searcher: &Searcher,
    aggregations: &[Aggregation],
    segments: &BTreeMap<u32, Vec<DocId>>,
) -> Result<Facets> {
    let mut facets = Facets::new();
    for aggregation in aggregations {
        let buckets = match *aggregation {
            Aggregation::Terms { field, size, .. } => {
                let counts = count_terms(searcher, facet_column(field)?, segments)?;
                let mut buckets: Vec<FacetBucket> = counts
                    .into_iter()
                    .map(|(key, count)| FacetBucket { key, count })
                    .collect();
                buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
                buckets.truncate(size);
                buckets
            }
            Aggregation::MonthlyHistogram { .. } => {
                let mut buckets: Vec<FacetBucket> = count_months(searcher, segments)?
                    .into_iter()
                    .map(|(key, count)| FacetBucket { key, count })
                    .collect();
                buckets.sort_by(|a, b| a.key.cmp(&b.key));
                buckets
            }
        };
        facets.insert(aggregation.name().to_string(), buckets);
    }
    Ok(facets)
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    Int(i64),
    Unsigned(u64),
    Text(String),
}

/// A matching document with the value it is sorted on and its id for ties.
struct Keyed {
    addr: DocAddress,
    key: Option<SortKey>,
    id: String,
}

fn sort_keys(
    searcher: &Searcher,
    field: &str,
    segments: &BTreeMap<u32, Vec<DocId>>,
) -> Result<Vec<Keyed>> {
    let mut keyed = Vec::with_capacity(segments.values().map(Vec::len).sum());
    for (&segment, docs) in segments {
        let fast = searcher.segment_reader(segment).fast_fields();
        let ids = fast.str(ID)?;
        let keys: Vec<Option<SortKey>> = match field {
            fields::UPLOAD_DATE | fields::YEAR => {
                let column = fast.i64(field)?;
                docs.iter().map(|&doc| column.first(doc).map(SortKey::Int)).collect()
            }
            fields::SIZE => {
                let column = fast.u64(field)?;
                docs.iter()
                    .map(|&doc| column.first(doc).map(SortKey::Unsigned))
                    .collect()
            }
            fields::FILENAME => {
                let column = fast.str(field)?;
                docs.iter()
                    .map(|&doc| Ok(first_str(column.as_ref(), doc)?.map(SortKey::Text)))
                    .collect::<Result<_>>()?
            }
            other => return Err(Error::invalid(format!("cannot sort on {other}"))),
        };
        for (&doc, key) in docs.iter().zip(keys) {
            keyed.push(Keyed {
                addr: DocAddress::new(segment, doc),
                key,
                id: first_str(ids.as_ref(), doc)?.unwrap_or_default(),
            });
        }
    }
    Ok(keyed)
}

fn compare_keys(sort: FieldSort, a: &Keyed, b: &Keyed) -> Ordering {
    let ordering = a.key.cmp(&b.key);
    let ordering = match sort.order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    };
    ordering.then_with(|| a.id.cmp(&b.id))
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}
