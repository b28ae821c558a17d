//! Server side of the sync protocol
//!
//! Every operation is a stateless request/response scoped by
//! `(tenant_id, project_id)`. Derived results are shared across tenants
//! through the cache; vector records never are.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use codesync_domain::{
    CheckRootRequest, CheckRootResponse, ChunkError, ChunkMetadata, ChunkType, Deriver, DerivedResult, LineRange,
    Phase1Chunk, Phase1Request, Phase1Response, Phase2Chunk, Phase2Request, Phase2Response,
    ProtocolConfig, RegisterChunk, RegisterRequest, RegisterResponse, Scoped, SearchHit,
    SearchRequest, SearchResponse, SyncStatus, VectorFilter, VectorIndex, VectorMetadata,
    VectorRecord,
};
use codesync_domain::preprocessing::is_degenerate;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::cache::TieredCache;
use crate::deriver::derive_with_timeout;
use crate::errors::{Result, SyncError};
use crate::hasher::hash_content;
use crate::tenant::{TenantAuthorizer, composite_id, composite_prefix, validate_scope};
use crate::{log_operation_start, log_operation_success};

/// Where a chunk lives in one tenant's project
#[derive(Debug, Clone)]
struct ChunkPlacement {
    hash: String,
    chunk_type: ChunkType,
    name: Option<String>,
    language: String,
    file_path: String,
    line_range: LineRange,
    char_count: usize,
    chunk_metadata: Option<ChunkMetadata>,
}

impl ChunkPlacement {
    fn record(&self, tenant_id: &str, project_id: &str, derived: &DerivedResult) -> VectorRecord {
        VectorRecord {
            composite_id: composite_id(tenant_id, project_id, &self.hash),
            embedding: derived.embedding.clone(),
            metadata: VectorMetadata {
                tenant_id: tenant_id.to_string(),
                project_id: project_id.to_string(),
                content_hash: self.hash.clone(),
                file_path: self.file_path.clone(),
                summary: derived.summary.clone(),
                chunk_type: self.chunk_type,
                name: self.name.clone(),
                line_range: self.line_range,
                char_count: self.char_count,
                language: self.language.clone(),
                chunk_metadata: self.chunk_metadata.clone(),
            },
        }
    }
}

impl From<Phase1Chunk> for ChunkPlacement {
    fn from(chunk: Phase1Chunk) -> Self {
        Self {
            hash: chunk.hash,
            chunk_type: chunk.chunk_type,
            name: chunk.name,
            language: chunk.language,
            file_path: chunk.file_path,
            line_range: chunk.line_range,
            char_count: chunk.char_count,
            chunk_metadata: chunk.chunk_metadata,
        }
    }
}

/// A chunk that arrived with its content
#[derive(Debug, Clone)]
struct IncomingChunk {
    placement: ChunkPlacement,
    content: String,
}

impl From<RegisterChunk> for IncomingChunk {
    fn from(chunk: RegisterChunk) -> Self {
        Self {
            placement: ChunkPlacement {
                hash: chunk.hash,
                chunk_type: chunk.chunk_type,
                name: chunk.name,
                language: chunk.language,
                file_path: chunk.file_path,
                line_range: chunk.line_range,
                char_count: chunk.char_count,
                chunk_metadata: chunk.chunk_metadata,
            },
            content: chunk.content,
        }
    }
}

impl From<Phase2Chunk> for IncomingChunk {
    fn from(chunk: Phase2Chunk) -> Self {
        Self {
            placement: ChunkPlacement {
                hash: chunk.hash,
                chunk_type: chunk.chunk_type,
                name: chunk.name,
                language: chunk.language,
                file_path: chunk.metadata.file_path,
                line_range: chunk.metadata.line_range,
                char_count: chunk.metadata.char_count,
                chunk_metadata: chunk.metadata.chunk_metadata,
            },
            content: chunk.content,
        }
    }
}

#[derive(Debug, Default)]
struct IngestOutcome {
    stored: Vec<String>,
    derived_processed: usize,
    cache_hits: usize,
    duplicates: usize,
    errors: Vec<ChunkError>,
}

fn chunk_error(hash: &str, error: &SyncError) -> ChunkError {
    ChunkError::new(Some(hash), error.error_code(), error.to_string())
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SyncError::validation_error(field, "must not be empty"));
    }
    Ok(())
}

pub struct SyncService {
    cache: TieredCache,
    deriver: Arc<dyn Deriver>,
    index: Arc<dyn VectorIndex>,
    authorizer: TenantAuthorizer,
    config: ProtocolConfig,
}

impl SyncService {
    pub fn new(
        cache: TieredCache,
        deriver: Arc<dyn Deriver>,
        index: Arc<dyn VectorIndex>,
        authorizer: TenantAuthorizer,
        config: ProtocolConfig,
    ) -> Self {
        info!(
            deriver = deriver.name(),
            index = index.name(),
            store = cache.store_name(),
            "Sync service initialized"
        );
        Self { cache, deriver, index, authorizer, config }
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    pub fn deriver_name(&self) -> &str {
        self.deriver.name()
    }

    pub fn index_name(&self) -> &str {
        self.index.name()
    }

    /// Largest request body the HTTP layer should accept
    pub fn max_request_bytes(&self) -> usize {
        self.config.max_request_bytes
    }

    /// Authorization runs before validation and before any cache access
    fn admit(&self, api_key: Option<&str>, request: &impl Scoped) -> Result<()> {
        self.authorizer.authorize(api_key, request.tenant_id())?;
        validate_scope(request)
    }

    fn check_chunks<'a>(&self, hashes: impl ExactSizeIterator<Item = &'a str>) -> Result<()> {
        if hashes.len() > self.config.max_chunks_per_request {
            return Err(SyncError::validation_error(
                "chunks",
                format!("at most {} chunks per request", self.config.max_chunks_per_request),
            ));
        }
        for hash in hashes {
            require_non_empty("chunks.hash", hash)?;
        }
        Ok(())
    }

    /// First-time registration: every chunk arrives with its content
    pub async fn register(
        &self,
        api_key: Option<&str>,
        request: RegisterRequest,
    ) -> Result<RegisterResponse> {
        self.admit(api_key, &request)?;
        require_non_empty("root", &request.root)?;
        self.check_chunks(request.chunks.iter().map(|c| c.hash.as_str()))?;

        let RegisterRequest { tenant_id, project_id, root, chunks } = request;
        let started = Instant::now();
        log_operation_start!(
            "register",
            tenant_id = tenant_id.as_str(),
            project_id = project_id.as_str(),
            chunks = chunks.len()
        );

        let chunks = chunks.into_iter().map(IncomingChunk::from).collect();
        let outcome = self.ingest(&tenant_id, &project_id, chunks).await;
        if outcome.errors.is_empty() {
            self.publish_root(&tenant_id, &project_id, &root).await;
        }

        let status = SyncStatus::from_counts(outcome.stored.len(), outcome.errors.len());
        log_operation_success!(
            "register",
            started.elapsed(),
            outcome = status.to_string().as_str(),
            stored = outcome.stored.len(),
            derived = outcome.derived_processed,
            cache_hits = outcome.cache_hits
        );
        Ok(RegisterResponse {
            status,
            chunks_stored: outcome.stored.len(),
            chunks_skipped: outcome.duplicates,
            errors: outcome.errors,
        })
    }

    /// Compare a client root with the last one this service acknowledged.
    /// An unreadable root reads as unknown, which sends the client down the
    /// registration path.
    pub async fn check_root(
        &self,
        api_key: Option<&str>,
        request: CheckRootRequest,
    ) -> Result<CheckRootResponse> {
        self.admit(api_key, &request)?;
        require_non_empty("root", &request.root)?;

        let remote_root = match self
            .cache
            .remote_root(&request.tenant_id, &request.project_id)
            .await
        {
            Ok(root) => root,
            Err(e) => {
                warn!(tenant_id = %request.tenant_id, error = %e, "Remote root unavailable");
                None
            }
        };
        let changed = remote_root.as_deref() != Some(request.root.as_str());
        debug!(
            tenant_id = %request.tenant_id,
            project_id = %request.project_id,
            changed,
            "Checked root"
        );
        Ok(CheckRootResponse { changed, remote_root })
    }

    /// Partition hashes into `needed` and `cached`. A hash is cached when it
    /// was seen and its derived result is at hand, in which case the
    /// caller's own record is written right away.
    pub async fn sync_phase1(
        &self,
        api_key: Option<&str>,
        request: Phase1Request,
    ) -> Result<Phase1Response> {
        self.admit(api_key, &request)?;
        require_non_empty("root", &request.root)?;
        self.check_chunks(request.chunks.iter().map(|c| c.hash.as_str()))?;

        let Phase1Request { tenant_id, project_id, chunks, .. } = request;
        let started = Instant::now();

        let mut unique = HashSet::new();
        let placements: Vec<ChunkPlacement> = chunks
            .into_iter()
            .filter(|chunk| unique.insert(chunk.hash.clone()))
            .map(ChunkPlacement::from)
            .collect();
        let hashes: Vec<String> = placements.iter().map(|p| p.hash.clone()).collect();

        let seen = self.cache.seen_batch(&hashes).await;
        let seen_hashes: Vec<String> = hashes
            .iter()
            .filter(|hash| seen.get(*hash).copied().unwrap_or(false))
            .cloned()
            .collect();
        let derived = self.cache.derived_batch(&seen_hashes).await;

        let records = placements
            .iter()
            .filter_map(|p| derived.get(&p.hash).map(|d| p.record(&tenant_id, &project_id, d)))
            .collect();
        let (stored, errors) = self.store_records(records).await;
        if !errors.is_empty() {
            warn!(
                tenant_id = %tenant_id,
                failed = errors.len(),
                "Could not store records for cached hashes, requesting their content"
            );
        }

        let stored: HashSet<String> = stored.into_iter().collect();
        let (cached, needed): (Vec<String>, Vec<String>) =
            hashes.into_iter().partition(|hash| stored.contains(hash));

        metrics::counter!("codesync_phase1_hashes_total", "outcome" => "cached")
            .increment(cached.len() as u64);
        metrics::counter!("codesync_phase1_hashes_total", "outcome" => "needed")
            .increment(needed.len() as u64);
        log_operation_success!(
            "sync_phase1",
            started.elapsed(),
            tenant_id = tenant_id.as_str(),
            needed = needed.len(),
            cached = cached.len()
        );
        Ok(Phase1Response { needed, cached })
    }

    /// Accept content for needed hashes. The remote root only advances when
    /// every chunk was stored.
    pub async fn sync_phase2(
        &self,
        api_key: Option<&str>,
        request: Phase2Request,
    ) -> Result<Phase2Response> {
        self.admit(api_key, &request)?;
        require_non_empty("root", &request.root)?;
        self.check_chunks(request.chunks.iter().map(|c| c.hash.as_str()))?;

        let Phase2Request { tenant_id, project_id, root, chunks } = request;
        let started = Instant::now();
        log_operation_start!(
            "sync_phase2",
            tenant_id = tenant_id.as_str(),
            project_id = project_id.as_str(),
            chunks = chunks.len()
        );

        let chunks = chunks.into_iter().map(IncomingChunk::from).collect();
        let outcome = self.ingest(&tenant_id, &project_id, chunks).await;
        if outcome.errors.is_empty() {
            self.publish_root(&tenant_id, &project_id, &root).await;
        }

        let status = SyncStatus::from_counts(outcome.stored.len(), outcome.errors.len());
        log_operation_success!(
            "sync_phase2",
            started.elapsed(),
            outcome = status.to_string().as_str(),
            received = outcome.stored.len(),
            derived = outcome.derived_processed,
            cache_hits = outcome.cache_hits
        );
        Ok(Phase2Response {
            status,
            received: outcome.stored,
            derived_processed: outcome.derived_processed,
            cache_hits: outcome.cache_hits,
            errors: outcome.errors,
        })
    }

    /// Semantic search restricted to one tenant's project
    pub async fn search(&self, api_key: Option<&str>, request: SearchRequest) -> Result<SearchResponse> {
        self.admit(api_key, &request)?;
        require_non_empty("query", &request.query)?;
        if request.top_k == 0 || request.top_k > self.config.max_top_k {
            return Err(SyncError::validation_error(
                "topK",
                format!("must be between 1 and {}", self.config.max_top_k),
            ));
        }

        let vector = match tokio::time::timeout(
            self.config.derivation_timeout(),
            self.deriver.embed_query(&request.query),
        )
        .await
        {
            Ok(Ok(vector)) => vector,
            Ok(Err(e)) => return Err(SyncError::derivation_failure_with_source("embed query", e)),
            Err(_) => return Err(SyncError::derivation_failure("query embedding timed out")),
        };
        let dimension = self.deriver.embedding_dimension();
        if vector.len() != dimension || is_degenerate(&vector) {
            return Err(SyncError::derivation_failure(format!(
                "query embedding unusable: {} values, expected {dimension} finite non-zero",
                vector.len()
            )));
        }

        let filter = VectorFilter::new(&request.tenant_id, &request.project_id);
        let matches = self
            .index
            .query(&vector, &filter, request.top_k)
            .await
            .map_err(|e| SyncError::storage_failure_with_source("query vector index", e))?;

        let prefix = composite_prefix(&request.tenant_id, &request.project_id);
        let mut results = Vec::with_capacity(matches.len());
        for found in matches {
            if !found.composite_id.starts_with(&prefix) || !filter.matches(&found.metadata) {
                warn!(
                    tenant_id = %request.tenant_id,
                    composite_id = %found.composite_id,
                    "Dropping match outside the requested scope"
                );
                continue;
            }
            let metadata = found.metadata;
            results.push(SearchHit {
                hash: metadata.content_hash,
                score: found.score,
                summary: metadata.summary,
                chunk_type: metadata.chunk_type,
                name: metadata.name,
                line_range: metadata.line_range,
                file_path: metadata.file_path,
            });
        }
        Ok(SearchResponse { results })
    }

    async fn publish_root(&self, tenant_id: &str, project_id: &str, root: &str) {
        if let Err(e) = self.cache.set_remote_root(tenant_id, project_id, root).await {
            warn!(tenant_id, project_id, error = %e, "Could not record remote root");
        }
    }

    /// Verify, derive (or reuse) and store content-bearing chunks
    async fn ingest(
        &self,
        tenant_id: &str,
        project_id: &str,
        chunks: Vec<IncomingChunk>,
    ) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();

        let mut unique = HashSet::new();
        let mut accepted = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if !unique.insert(chunk.placement.hash.clone()) {
                outcome.duplicates += 1;
                continue;
            }
            if hash_content(&chunk.content) != chunk.placement.hash {
                let error =
                    SyncError::validation_error("content", "does not hash to the declared hash");
                outcome.errors.push(chunk_error(&chunk.placement.hash, &error));
                continue;
            }
            accepted.push(chunk);
        }

        let hashes: Vec<String> = accepted.iter().map(|c| c.placement.hash.clone()).collect();
        let mut derived = self.cache.derived_batch(&hashes).await;
        outcome.cache_hits = derived.len();

        let mut by_language: BTreeMap<&str, Vec<&IncomingChunk>> = BTreeMap::new();
        for chunk in accepted
            .iter()
            .filter(|c| !derived.contains_key(&c.placement.hash))
        {
            by_language
                .entry(chunk.placement.language.as_str())
                .or_default()
                .push(chunk);
        }

        for (language, pending) in by_language {
            for batch in pending.chunks(self.config.sub_batch_size.max(1)) {
                self.derive_sub_batch(language, batch, &mut derived, &mut outcome)
                    .await;
            }
        }

        let records = accepted
            .iter()
            .filter_map(|c| {
                derived
                    .get(&c.placement.hash)
                    .map(|d| c.placement.record(tenant_id, project_id, d))
            })
            .collect();
        let (stored, errors) = self.store_records(records).await;
        outcome.errors.extend(errors);

        join_all(stored.iter().map(|hash| self.cache.mark_seen(hash))).await;
        outcome.stored = stored;
        outcome
    }

    async fn derive_sub_batch(
        &self,
        language: &str,
        batch: &[&IncomingChunk],
        derived: &mut HashMap<String, DerivedResult>,
        outcome: &mut IngestOutcome,
    ) {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let derivation = match derive_with_timeout(
            self.deriver.as_ref(),
            &texts,
            language,
            self.config.derivation_timeout(),
        )
        .await
        {
            Ok(derivation) => derivation,
            Err(e) => {
                warn!(language, batch = batch.len(), error = %e, "Sub-batch derivation failed");
                outcome
                    .errors
                    .extend(batch.iter().map(|c| chunk_error(&c.placement.hash, &e)));
                return;
            }
        };

        let results = derivation.summaries.into_iter().zip(derivation.embeddings);
        for (chunk, (summary, embedding)) in batch.iter().zip(results) {
            let hash = &chunk.placement.hash;
            let result = DerivedResult::new(summary, embedding);
            if result.is_degenerate() {
                let error = SyncError::derivation_failure("degenerate embedding");
                outcome.errors.push(chunk_error(hash, &error));
                continue;
            }
            self.cache.store_derived(hash, &result).await;
            derived.insert(hash.clone(), result);
            outcome.derived_processed += 1;
        }
    }

    /// Upsert in sub-batches; returns the hashes stored and per-item errors
    /// for the sub-batches that failed
    async fn store_records(&self, records: Vec<VectorRecord>) -> (Vec<String>, Vec<ChunkError>) {
        let mut stored = Vec::with_capacity(records.len());
        let mut errors = Vec::new();

        for batch in records.chunks(self.config.sub_batch_size.max(1)) {
            match self.index.upsert(batch).await {
                Ok(()) => {
                    stored.extend(batch.iter().map(|r| r.metadata.content_hash.clone()));
                }
                Err(e) => {
                    let error = SyncError::storage_failure_with_source("upsert records", e);
                    warn!(batch = batch.len(), error = %error, "Vector upsert failed");
                    errors.extend(
                        batch
                            .iter()
                            .map(|r| chunk_error(&r.metadata.content_hash, &error)),
                    );
                }
            }
        }
        (stored, errors)
    }
}
