//! docvault - an employee document archive with keyword extraction and
//! full-text search.
//!
//! Uploaded files are stored under a fixed per-employee directory layout,
//! their text is reduced to a ranked keyword list, and the record is indexed
//! either in an embedded [Tantivy](https://github.com/quickwit-oss/tantivy)
//! index or in an Elasticsearch cluster. Stored files can always be located
//! again from their record, even when the recorded paths have gone stale.
//!
//! # Quick start
//!
//! ```no_run
//! use docvault::{DocumentService, SearchExecutor};
//! use docvault::document::UploadMetadata;
//! use docvault::repository::MemoryRepository;
//! use docvault::resolver::PathResolver;
//! use docvault::search::SearchQuery;
//! use docvault::storage::StorageLayout;
//! use docvault::tantivy_index::TantivyBackend;
//!
//! let service = DocumentService::new(
//!     Box::new(MemoryRepository::new()),
//!     SearchExecutor::new(Box::new(TantivyBackend::open_in_ram().unwrap())),
//!     PathResolver::on_disk(StorageLayout::new("uploads")),
//! );
//!
//! let meta = UploadMetadata {
//!     original_name: "contrato.txt".into(),
//!     mimetype: "text/plain".into(),
//!     employee_uuid: "11111111-1111-4111-8111-111111111111".into(),
//!     document_type: Some("contratos".into()),
//!     ..Default::default()
//! };
//! let record = service
//!     .ingest(meta, b"Contrato laboral indefinido".to_vec())
//!     .unwrap();
//! println!("keywords: {:?}", record.keywords);
//!
//! let result = service.search(&SearchQuery::text("contrato"));
//! for doc in &result.documents {
//!     println!("{} ({:?})", doc.record.title, doc.score);
//! }
//! ```

pub mod backend;
pub mod config_db;
pub mod data_dir;
pub mod doc_id;
pub mod document;
pub mod elastic;
pub mod error;
pub mod executor;
pub mod extract;
pub mod ingestion;
pub mod keywords;
pub mod query;
pub mod repository;
pub mod resolver;
pub mod search;
pub mod service;
pub mod settings;
pub mod stopwords;
pub mod storage;
pub mod tantivy_index;
pub mod validate;
pub mod walker;

pub use backend::IndexBackend;
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use doc_id::DocumentId;
pub use document::{DocumentRecord, UploadMetadata};
pub use error::{Error, Result};
pub use executor::{SearchExecutor, SearchResult};
pub use resolver::{FileNotFound, PathResolver};
pub use search::SearchQuery;
pub use service::DocumentService;
pub use settings::Settings;
