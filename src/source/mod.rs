//! Data-Layer Boundary
//!
//! The engine never talks to a database directly. It requires a
//! [`DataSource`] that can answer page requests, and drives it through a
//! chunked [`RecordStream`]. Query results can be memoized in the
//! process-wide [`QueryCache`](crate::cache::QueryCache).

pub mod relationships;

use crate::cache::QueryCache;
use crate::value::Record;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub use relationships::{LoadSpec, LoadStrategy, RelationshipDef, RelationshipLoader};

/// Data-layer error. Bubbles up to the pipeline, which marks the stream
/// `failed`; other pipelines are unaffected.
#[derive(Debug, Clone, Error)]
pub enum DataSourceError {
    #[error("resource '{resource}' not found in domain '{domain}'")]
    ResourceNotFound { domain: String, resource: String },

    #[error("query rejected: {0}")]
    QueryRejected(String),

    #[error("data layer unavailable: {0}")]
    Unavailable(String),
}

/// Sort direction for query ordering and group output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

/// Declarative query sent to the data layer. Opaque to the engine except for
/// its fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Filter expression, in whatever syntax the data layer accepts
    #[serde(default)]
    pub filter: Option<String>,

    /// Sort fields, applied in order
    #[serde(default)]
    pub sort: Vec<(String, SortDir)>,

    /// Relationship load specification
    #[serde(default)]
    pub load: Vec<LoadSpec>,
}

impl QuerySpec {
    /// Deterministic identity of this query, used in cache keys. Two specs
    /// with the same content always produce the same fingerprint.
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A single page request against the data layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub domain: String,
    pub resource: String,
    pub query: QuerySpec,
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    pub fn cache_key(&self) -> String {
        QueryCache::generate_key(
            &self.domain,
            &self.resource,
            &self.query.fingerprint(),
            self.offset,
            self.limit,
        )
    }
}

/// The data-layer contract: given a page request, return records or fail.
/// Stateless from the engine's point of view; implementations may be shared
/// across pipelines.
pub trait DataSource: Send + Sync {
    fn fetch(&self, request: &PageRequest) -> Result<Vec<Record>, DataSourceError>;
}

/// In-memory data source over a fixed record set. Pages are slices of the
/// backing vector; used by tests, demos and the CLI.
pub struct VecSource {
    records: Vec<Record>,
}

impl VecSource {
    pub fn new(records: Vec<Record>) -> Self {
        VecSource { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl DataSource for VecSource {
    fn fetch(&self, request: &PageRequest) -> Result<Vec<Record>, DataSourceError> {
        let start = request.offset.min(self.records.len());
        let end = (request.offset + request.limit).min(self.records.len());
        Ok(self.records[start..end].to_vec())
    }
}

/// Iterator over chunks of records, pulling pages until the source returns a
/// short page. Restartable when the source supports range re-reads (every
/// chunk is an independent offset/limit fetch).
pub struct RecordStream {
    source: Arc<dyn DataSource>,
    request: PageRequest,
    use_cache: bool,
    exhausted: bool,
}

impl RecordStream {
    /// Stream `chunk_size`-record pages starting at `request.offset`.
    pub fn new(source: Arc<dyn DataSource>, request: PageRequest) -> Self {
        RecordStream {
            source,
            request,
            use_cache: false,
            exhausted: false,
        }
    }

    /// Memoize pages in the process-wide query cache.
    pub fn with_cache(mut self) -> Self {
        self.use_cache = true;
        self
    }

    fn fetch_page(&self) -> Result<Vec<Record>, DataSourceError> {
        if self.use_cache {
            let key = self.request.cache_key();
            if let Some(hit) = QueryCache::global().get(&key) {
                return Ok(hit.as_ref().clone());
            }
            let page = self.source.fetch(&self.request)?;
            QueryCache::global().put(&key, page.clone());
            return Ok(page);
        }
        self.source.fetch(&self.request)
    }
}

impl Iterator for RecordStream {
    type Item = Result<Vec<Record>, DataSourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        match self.fetch_page() {
            Ok(page) => {
                if page.len() < self.request.limit {
                    self.exhausted = true;
                }
                if page.is_empty() {
                    return None;
                }
                self.request.offset += page.len();
                Some(Ok(page))
            }
            Err(e) => {
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}
