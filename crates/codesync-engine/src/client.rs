//! Client side of the sync protocol
//!
//! A round scans the project, rebuilds the change tree and asks the service
//! whether its root moved. A project the service has never seen is
//! registered in full; otherwise the relevant files go through the hash-only
//! phase and only the content the service asks for is re-read and sent.
//! Local state only advances when the round was fully acknowledged.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use codesync_domain::{
    CheckRootRequest, ChunkError, ContentMetadata, DEFAULT_MAX_REQUEST_BYTES, HashedChunk, Phase1Chunk, Phase1Request,
    Phase2Chunk, Phase2Request, RegisterChunk, RegisterRequest, SearchRequest, SearchResponse,
    SegmenterConfig, SyncStatus, detect_language_from_extension,
};
use ignore::WalkBuilder;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dirty::DirtyQueue;
use crate::errors::{Result, SyncError};
use crate::hasher::hash_file;
use crate::merkle::{MerkleLeaf, MerkleTree, TreeDiff, TreeState, empty_root};
use crate::persist::STATE_DIR;
use crate::segmenter::{Segmenter, read_chunk_content};
use crate::transport::SyncTransport;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;
pub const DEFAULT_REQUEST_BATCH_SIZE: usize = 1000;
/// Bytes kept free in every request for the ids, root and JSON framing
const REQUEST_ENVELOPE_BYTES: usize = 1024;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub tenant_id: String,
    pub project_id: String,
    pub project_root: PathBuf,
    /// Larger files are not tracked
    pub max_file_size: u64,
    /// Chunks per protocol request
    pub request_batch_size: usize,
    /// Serialized size cap per protocol request; match the server's limit
    pub max_request_bytes: usize,
    pub segmenter: SegmenterConfig,
}

impl ClientConfig {
    pub fn new(
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
        project_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            project_root: project_root.into(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            request_batch_size: DEFAULT_REQUEST_BATCH_SIZE,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            segmenter: SegmenterConfig::default(),
        }
    }
}

/// A tracked file and its leaf hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectFile {
    pub relative_path: String,
    pub language: String,
    pub hash: String,
}

/// `/`-separated path of `path` below `root`
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Language of a path the client tracks, `None` for everything else
pub fn tracked_language(relative_path: &str) -> Option<String> {
    if relative_path == STATE_DIR || relative_path.starts_with(&format!("{STATE_DIR}/")) {
        return None;
    }
    detect_language_from_extension(Path::new(relative_path))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Local and remote roots already matched
    Unchanged,
    /// The project was unknown remotely and was sent in full
    Registered,
    /// Hash-only negotiation followed by content for what was missing
    TwoPhase,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub root: String,
    pub status: SyncStatus,
    /// Chunks described to the service
    pub chunks: usize,
    pub needed: usize,
    pub cached: usize,
    pub stored: usize,
    /// Paths that stay dirty for the next round
    pub owed_paths: Vec<String>,
    pub errors: Vec<ChunkError>,
}

impl SyncReport {
    fn unchanged(root: &str) -> Self {
        Self {
            mode: SyncMode::Unchanged,
            root: root.to_string(),
            status: SyncStatus::Success,
            chunks: 0,
            needed: 0,
            cached: 0,
            stored: 0,
            owed_paths: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == SyncStatus::Success && self.owed_paths.is_empty()
    }
}

/// Local view of a project, for the `status` command
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub root: String,
    pub tracked_files: usize,
    pub synced_root: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
    pub dirty_paths: Vec<String>,
    /// Changes since the last synced tree, absent before the first sync
    pub diff: Option<TreeDiff>,
}

/// Split into batches of at most `max_items` whose serialized items fit in
/// `max_bytes` minus the request envelope. An item too large on its own goes
/// alone. Always yields at least one batch so that an empty round still
/// carries its root.
fn into_batches<T: Serialize>(items: Vec<T>, max_items: usize, max_bytes: usize) -> Vec<Vec<T>> {
    let max_items = max_items.max(1);
    let budget = max_bytes.saturating_sub(REQUEST_ENVELOPE_BYTES);

    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut current_bytes = 0;
    for item in items {
        // +1 for the separating comma
        let size = serde_json::to_vec(&item).map_or(0, |bytes| bytes.len()) + 1;
        if !current.is_empty() && (current.len() == max_items || current_bytes + size > budget) {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += size;
        current.push(item);
    }
    if !current.is_empty() || batches.is_empty() {
        batches.push(current);
    }
    batches
}

/// Root a batch carries: only the last batch of a round announces the new
/// root, earlier ones repeat the root already acknowledged
fn batch_root<'a>(index: usize, total: usize, final_root: &'a str, interim_root: &'a str) -> &'a str {
    if index + 1 == total { final_root } else { interim_root }
}

fn phase1_chunk(chunk: &HashedChunk) -> Phase1Chunk {
    Phase1Chunk {
        hash: chunk.content_hash.clone(),
        chunk_type: chunk.chunk_type,
        name: chunk.name.clone(),
        line_range: chunk.line_range(),
        char_count: chunk.char_count,
        file_path: chunk.relative_path().to_string(),
        language: chunk.language.clone(),
        chunk_metadata: Some(chunk.metadata.clone()),
    }
}

pub struct SyncClient {
    config: ClientConfig,
    transport: Arc<dyn SyncTransport>,
    segmenter: Segmenter,
}

impl SyncClient {
    pub fn new(config: ClientConfig, transport: Arc<dyn SyncTransport>) -> Self {
        let segmenter = Segmenter::new(config.segmenter.clone());
        Self { config, transport, segmenter }
    }

    fn root_dir(&self) -> &Path {
        &self.config.project_root
    }

    /// Tracked files in path order. Honors .gitignore and skips hidden
    /// entries, unknown extensions, oversized and non-UTF-8 files.
    pub fn scan(&self) -> Result<Vec<ProjectFile>> {
        let root = self.root_dir();
        if !root.is_dir() {
            return Err(SyncError::validation_error(
                "projectRoot",
                format!("{} is not a directory", root.display()),
            ));
        }

        let mut walker = WalkBuilder::new(root);
        walker
            .hidden(true)
            .git_ignore(true)
            .git_exclude(true)
            .parents(true)
            .require_git(false);

        let mut files = Vec::new();
        for entry in walker.build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let Some(relative) = relative_path(root, entry.path()) else {
                continue;
            };
            let Some(language) = tracked_language(&relative) else {
                continue;
            };
            let size = entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX);
            if size > self.config.max_file_size {
                debug!(path = %relative, size, "Skipping oversized file");
                continue;
            }
            let bytes = match std::fs::read(entry.path()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(path = %relative, error = %e, "Could not read file");
                    continue;
                }
            };
            if std::str::from_utf8(&bytes).is_err() {
                debug!(path = %relative, "Skipping non UTF-8 file");
                continue;
            }
            files.push(ProjectFile {
                hash: hash_file(&relative, &bytes),
                relative_path: relative,
                language,
            });
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(files)
    }

    fn build_tree(files: &[ProjectFile]) -> MerkleTree {
        MerkleTree::build(
            files
                .iter()
                .map(|f| MerkleLeaf::new(&f.relative_path, &f.hash)),
        )
    }

    fn segment(&mut self, files: &[&ProjectFile]) -> Vec<HashedChunk> {
        let mut chunks = Vec::new();
        for file in files {
            let path = self.config.project_root.join(&file.relative_path);
            match std::fs::read_to_string(&path) {
                Ok(content) => chunks.extend(self.segmenter.segment_file(
                    &file.relative_path,
                    &content,
                    &file.language,
                )),
                Err(e) => warn!(path = %file.relative_path, error = %e, "Could not read file"),
            }
        }
        chunks
    }

    /// Content of a chunk as it is on disk now, if it still hashes the same
    fn fresh_content(&self, chunk: &HashedChunk) -> Option<String> {
        match read_chunk_content(self.root_dir(), &chunk.reference) {
            Ok(read) if read.hash == chunk.content_hash => Some(read.content),
            Ok(_) => {
                debug!(path = chunk.relative_path(), "Chunk changed since it was hashed");
                None
            }
            Err(e) => {
                warn!(path = chunk.relative_path(), error = %e, "Could not re-read chunk");
                None
            }
        }
    }

    /// Files whose chunks a two-phase round must describe. An empty dirty
    /// queue means edits happened while nobody was watching, so every file
    /// is relevant; otherwise the dirty paths plus whatever the tree diff
    /// shows changed.
    fn relevant_files<'a>(
        files: &'a [ProjectFile],
        tree: &MerkleTree,
        previous: Option<&TreeState>,
        dirty: &DirtyQueue,
    ) -> Vec<&'a ProjectFile> {
        let Some(previous) = previous.filter(|_| !dirty.is_empty()) else {
            return files.iter().collect();
        };
        let diff = tree.diff(previous);
        let changed: HashSet<&str> = diff.changed_paths().map(String::as_str).collect();
        files
            .iter()
            .filter(|f| dirty.contains(&f.relative_path) || changed.contains(f.relative_path.as_str()))
            .collect()
    }

    /// Run one sync round
    pub async fn sync(&mut self) -> Result<SyncReport> {
        let started = Instant::now();
        let files = self.scan()?;
        let tree = Self::build_tree(&files);
        let root = tree.root();
        let previous = TreeState::load(self.root_dir())?;
        let mut dirty = DirtyQueue::load(self.root_dir())?;

        let check = self
            .transport
            .check_root(CheckRootRequest {
                tenant_id: self.config.tenant_id.clone(),
                project_id: self.config.project_id.clone(),
                root: root.clone(),
            })
            .await?;

        let report = match check.remote_root {
            None => {
                info!(files = files.len(), "Project unknown remotely, registering");
                let all: Vec<&ProjectFile> = files.iter().collect();
                self.register(&all, &root).await?
            }
            Some(_) if !check.changed => SyncReport::unchanged(&root),
            Some(remote_root) => {
                let relevant = Self::relevant_files(&files, &tree, previous.as_ref(), &dirty);
                info!(
                    files = relevant.len(),
                    dirty = dirty.len(),
                    "Root changed, starting two-phase sync"
                );
                self.two_phase(&relevant, &root, &remote_root).await?
            }
        };

        let now = Utc::now();
        if report.is_complete() {
            tree.to_state(now).save(self.root_dir())?;
            dirty.complete_round(now)?;
        } else {
            let owed: BTreeSet<String> = report.owed_paths.iter().cloned().collect();
            dirty.retain(&owed)?;
            dirty.mark_many(owed)?;
        }

        info!(
            mode = ?report.mode,
            status = %report.status,
            chunks = report.chunks,
            needed = report.needed,
            cached = report.cached,
            stored = report.stored,
            owed = report.owed_paths.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Sync round finished"
        );
        Ok(report)
    }

    async fn register(&mut self, files: &[&ProjectFile], root: &str) -> Result<SyncReport> {
        let chunks = self.segment(files);

        let mut deferred = BTreeSet::new();
        let mut payload = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            match self.fresh_content(chunk) {
                Some(content) => payload.push(RegisterChunk {
                    hash: chunk.content_hash.clone(),
                    chunk_type: chunk.chunk_type,
                    name: chunk.name.clone(),
                    line_range: chunk.line_range(),
                    char_count: chunk.char_count,
                    content,
                    language: chunk.language.clone(),
                    file_path: chunk.relative_path().to_string(),
                    chunk_metadata: Some(chunk.metadata.clone()),
                }),
                None => {
                    deferred.insert(chunk.relative_path().to_string());
                }
            }
        }

        let interim = empty_root();
        let final_root = if deferred.is_empty() { root } else { interim.as_str() };
        let batches = into_batches(payload, self.config.request_batch_size, self.config.max_request_bytes);
        let total = batches.len();

        let mut stored = 0;
        let mut errors = Vec::new();
        for (index, batch) in batches.into_iter().enumerate() {
            let response = self
                .transport
                .register(RegisterRequest {
                    tenant_id: self.config.tenant_id.clone(),
                    project_id: self.config.project_id.clone(),
                    root: batch_root(index, total, final_root, &interim).to_string(),
                    chunks: batch,
                })
                .await?;
            stored += response.chunks_stored;
            errors.extend(response.errors);
        }

        let failed: HashSet<&str> = errors.iter().filter_map(|e| e.hash.as_deref()).collect();
        let mut owed = deferred;
        owed.extend(
            chunks
                .iter()
                .filter(|c| failed.contains(c.content_hash.as_str()))
                .map(|c| c.relative_path().to_string()),
        );

        Ok(SyncReport {
            mode: SyncMode::Registered,
            root: root.to_string(),
            status: SyncStatus::from_counts(stored, errors.len() + owed.len()),
            chunks: chunks.len(),
            needed: chunks.len(),
            cached: 0,
            stored,
            owed_paths: owed.into_iter().collect(),
            errors,
        })
    }

    async fn two_phase(
        &mut self,
        files: &[&ProjectFile],
        root: &str,
        remote_root: &str,
    ) -> Result<SyncReport> {
        let chunks = self.segment(files);

        let mut needed = HashSet::new();
        let mut cached = 0;
        let described: Vec<Phase1Chunk> = chunks.iter().map(phase1_chunk).collect();
        for batch in into_batches(described, self.config.request_batch_size, self.config.max_request_bytes) {
            if batch.is_empty() {
                continue;
            }
            let response = self
                .transport
                .sync_phase1(Phase1Request {
                    tenant_id: self.config.tenant_id.clone(),
                    project_id: self.config.project_id.clone(),
                    root: root.to_string(),
                    chunks: batch,
                })
                .await?;
            cached += response.cached.len();
            needed.extend(response.needed);
        }
        debug!(needed = needed.len(), cached, "Phase 1 complete");

        let mut sent = HashSet::new();
        let mut deferred = BTreeSet::new();
        let mut payload = Vec::new();
        for chunk in chunks.iter().filter(|c| needed.contains(&c.content_hash)) {
            if !sent.insert(chunk.content_hash.as_str()) {
                continue;
            }
            match self.fresh_content(chunk) {
                Some(content) => payload.push(Phase2Chunk {
                    hash: chunk.content_hash.clone(),
                    content,
                    chunk_type: chunk.chunk_type,
                    name: chunk.name.clone(),
                    language: chunk.language.clone(),
                    metadata: ContentMetadata {
                        file_path: chunk.relative_path().to_string(),
                        line_range: chunk.line_range(),
                        char_count: chunk.char_count,
                        chunk_metadata: Some(chunk.metadata.clone()),
                    },
                }),
                None => {
                    deferred.insert(chunk.relative_path().to_string());
                }
            }
        }

        let final_root = if deferred.is_empty() { root } else { remote_root };
        let batches = into_batches(payload, self.config.request_batch_size, self.config.max_request_bytes);
        let total = batches.len();

        let mut received: HashSet<String> = HashSet::new();
        let mut errors = Vec::new();
        for (index, batch) in batches.into_iter().enumerate() {
            let response = self
                .transport
                .sync_phase2(Phase2Request {
                    tenant_id: self.config.tenant_id.clone(),
                    project_id: self.config.project_id.clone(),
                    root: batch_root(index, total, final_root, remote_root).to_string(),
                    chunks: batch,
                })
                .await?;
            received.extend(response.received);
            errors.extend(response.errors);
        }

        let mut owed = deferred;
        owed.extend(
            chunks
                .iter()
                .filter(|c| needed.contains(&c.content_hash) && !received.contains(&c.content_hash))
                .map(|c| c.relative_path().to_string()),
        );
        let missing = needed.iter().filter(|h| !received.contains(*h)).count();

        Ok(SyncReport {
            mode: SyncMode::TwoPhase,
            root: root.to_string(),
            status: SyncStatus::from_counts(received.len() + cached, missing),
            chunks: chunks.len(),
            needed: needed.len(),
            cached,
            stored: received.len(),
            owed_paths: owed.into_iter().collect(),
            errors,
        })
    }

    /// Search this client's project
    pub async fn search(&self, query: &str, top_k: usize) -> Result<SearchResponse> {
        self.transport
            .search(SearchRequest {
                tenant_id: self.config.tenant_id.clone(),
                project_id: self.config.project_id.clone(),
                query: query.to_string(),
                top_k,
            })
            .await
    }

    /// Local state only; does not contact the service
    pub fn status(&self) -> Result<StatusReport> {
        let files = self.scan()?;
        let tree = Self::build_tree(&files);
        let previous = TreeState::load(self.root_dir())?;
        let dirty = DirtyQueue::load(self.root_dir())?;

        Ok(StatusReport {
            root: tree.root(),
            tracked_files: files.len(),
            synced_root: previous.as_ref().map(|s| s.root.clone()),
            last_sync: dirty.last_sync(),
            dirty_paths: dirty.paths(),
            diff: previous.as_ref().map(|s| tree.diff(s)),
        })
    }
}

#[cfg(test)]
mod tests {
    use codesync_domain::{CacheConfig, ProtocolConfig};
    use codesync_services::{InMemoryVectorIndex, MemoryKeyValueStore, MockDeriver};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::cache::TieredCache;
    use crate::service::SyncService;
    use crate::tenant::TenantAuthorizer;
    use crate::transport::LocalTransport;

    const ADD_RS: &str = "pub fn add(left: u64, right: u64) -> u64 {\n    let total = left + right;\n    total\n}\n";
    const SCALE_RS: &str = "pub fn scale(value: f64, factor: f64) -> f64 {\n    let scaled = value * factor;\n    scaled\n}\n";
    const NEGATE_FN: &str = "\npub fn negate(value: i64) -> i64 {\n    let flipped = -value;\n    flipped\n}\n";

    struct Fixture {
        deriver: Arc<MockDeriver>,
        service: Arc<SyncService>,
    }

    impl Fixture {
        fn new() -> Self {
            let deriver = Arc::new(MockDeriver::new(8));
            let service = SyncService::new(
                TieredCache::new(Arc::new(MemoryKeyValueStore::new()), CacheConfig::default()),
                deriver.clone(),
                Arc::new(InMemoryVectorIndex::new()),
                TenantAuthorizer::default(),
                ProtocolConfig::default(),
            );
            Self { deriver, service: Arc::new(service) }
        }

        fn client(&self, tenant: &str, project: &str, root: &Path) -> SyncClient {
            let transport = Arc::new(LocalTransport::new(self.service.clone(), None));
            SyncClient::new(ClientConfig::new(tenant, project, root), transport)
        }
    }

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("add.rs"), ADD_RS).unwrap();
        std::fs::write(dir.path().join("scale.rs"), SCALE_RS).unwrap();
        dir
    }

    #[test]
    fn test_relative_path() {
        let root = Path::new("/work/project");

        assert_eq!(
            relative_path(root, Path::new("/work/project/src/lib.rs")),
            Some("src/lib.rs".to_string())
        );
        assert_eq!(relative_path(root, root), None);
        assert_eq!(relative_path(root, Path::new("/elsewhere/lib.rs")), None);
    }

    #[test]
    fn test_tracked_language() {
        assert_eq!(tracked_language("src/lib.rs"), Some("rust".to_string()));
        assert_eq!(tracked_language(".codesync/dirty.json"), None);
        assert_eq!(tracked_language("assets/logo.png"), None);
    }

    #[test]
    fn test_into_batches_keeps_one_empty_batch() {
        assert_eq!(into_batches(Vec::<u8>::new(), 2, 4096), vec![Vec::<u8>::new()]);
        assert_eq!(into_batches(vec![1, 2, 3], 2, 4096), vec![vec![1, 2], vec![3]]);
    }

    #[test]
    fn test_into_batches_respects_byte_budget() {
        // Each item serializes to 102 bytes with quotes, 103 with its comma
        let fixture: Vec<String> = (0..10).map(|i| format!("{i}").repeat(100)).collect();

        let actual = into_batches(fixture.clone(), 1000, REQUEST_ENVELOPE_BYTES + 350);

        let sizes: Vec<usize> = actual.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
        assert_eq!(actual.concat(), fixture);
    }

    #[test]
    fn test_phase1_chunk_carries_segmenter_detail() {
        let mut segmenter = Segmenter::new(SegmenterConfig::default());
        let fixture = segmenter.segment_file("add.rs", ADD_RS, "rust");

        let actual: Vec<Phase1Chunk> = fixture.iter().map(phase1_chunk).collect();

        assert!(!actual.is_empty());
        for (chunk, sent) in fixture.iter().zip(&actual) {
            assert_eq!(sent.chunk_metadata.as_ref(), Some(&chunk.metadata));
        }
    }

    #[test]
    fn test_oversized_item_travels_alone() {
        let fixture = vec!["a".repeat(10), "b".repeat(5000), "c".repeat(10)];

        let actual = into_batches(fixture, 1000, REQUEST_ENVELOPE_BYTES + 100);

        let sizes: Vec<usize> = actual.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![1, 1, 1]);
    }

    #[test]
    fn test_only_last_batch_announces_root() {
        let actual: Vec<&str> = (0..3).map(|i| batch_root(i, 3, "new", "old")).collect();
        assert_eq!(actual, vec!["old", "old", "new"]);
    }

    #[test]
    fn test_scan_skips_untracked_and_state_files() {
        let dir = project();
        std::fs::write(dir.path().join("logo.png"), [0u8, 159, 146, 150]).unwrap();
        DirtyQueue::load(dir.path()).unwrap().mark("add.rs").unwrap();
        let fixture = Fixture::new();
        let client = fixture.client("acme", "web", dir.path());

        let actual: Vec<String> = client
            .scan()
            .unwrap()
            .into_iter()
            .map(|f| f.relative_path)
            .collect();

        assert_eq!(actual, vec!["add.rs".to_string(), "scale.rs".to_string()]);
    }

    #[tokio::test]
    async fn test_first_sync_registers_then_settles() {
        let dir = project();
        let fixture = Fixture::new();
        let mut client = fixture.client("acme", "web", dir.path());

        let first = client.sync().await.unwrap();
        let second = client.sync().await.unwrap();

        assert_eq!(first.mode, SyncMode::Registered);
        assert_eq!(first.status, SyncStatus::Success);
        assert_eq!(first.chunks, 2);
        assert_eq!(first.stored, 2);
        assert!(first.is_complete());
        assert_eq!(second.mode, SyncMode::Unchanged);
        assert_eq!(second.root, first.root);

        let state = TreeState::load(dir.path()).unwrap().unwrap();
        assert_eq!(state.root, first.root);
    }

    #[tokio::test]
    async fn test_dirty_file_sends_only_new_content() {
        let dir = project();
        let fixture = Fixture::new();
        let mut client = fixture.client("acme", "web", dir.path());
        client.sync().await.unwrap();

        std::fs::write(dir.path().join("scale.rs"), format!("{SCALE_RS}{NEGATE_FN}")).unwrap();
        DirtyQueue::load(dir.path()).unwrap().mark("scale.rs").unwrap();
        let actual = client.sync().await.unwrap();

        assert_eq!(actual.mode, SyncMode::TwoPhase);
        assert_eq!(actual.status, SyncStatus::Success);
        assert_eq!(actual.chunks, 2);
        assert_eq!(actual.cached, 1);
        assert_eq!(actual.needed, 1);
        assert_eq!(actual.stored, 1);
        assert!(DirtyQueue::load(dir.path()).unwrap().is_empty());
        assert_eq!(client.sync().await.unwrap().mode, SyncMode::Unchanged);
    }

    #[tokio::test]
    async fn test_unwatched_edit_rescans_every_file() {
        let dir = project();
        let fixture = Fixture::new();
        let mut client = fixture.client("acme", "web", dir.path());
        client.sync().await.unwrap();

        std::fs::write(dir.path().join("add.rs"), format!("{ADD_RS}{NEGATE_FN}")).unwrap();
        let actual = client.sync().await.unwrap();

        assert_eq!(actual.mode, SyncMode::TwoPhase);
        assert_eq!(actual.chunks, 3);
        assert_eq!(actual.cached, 2);
        assert_eq!(actual.needed, 1);
        assert!(actual.is_complete());
    }

    #[tokio::test]
    async fn test_second_tenant_reuses_derived_content() {
        let dir = project();
        let fixture = Fixture::new();
        fixture.client("acme", "web", dir.path()).sync().await.unwrap();
        let calls = fixture.deriver.call_count();

        let other = project();
        let actual = fixture.client("globex", "site", other.path()).sync().await.unwrap();

        assert_eq!(actual.mode, SyncMode::Registered);
        assert_eq!(actual.stored, 2);
        assert_eq!(fixture.deriver.call_count(), calls);

        let hits = fixture
            .client("globex", "site", other.path())
            .search("add", 10)
            .await
            .unwrap();
        let mut files: Vec<String> = hits.results.into_iter().map(|h| h.file_path).collect();
        files.sort();
        assert_eq!(files, vec!["add.rs".to_string(), "scale.rs".to_string()]);
    }

    #[tokio::test]
    async fn test_status_reports_local_changes() {
        let dir = project();
        let fixture = Fixture::new();
        let mut client = fixture.client("acme", "web", dir.path());
        let synced = client.sync().await.unwrap();

        std::fs::write(dir.path().join("add.rs"), format!("{ADD_RS}{NEGATE_FN}")).unwrap();
        std::fs::write(dir.path().join("new.py"), "def fresh():\n    return 1\n").unwrap();
        std::fs::remove_file(dir.path().join("scale.rs")).unwrap();
        let actual = client.status().unwrap();

        assert_eq!(actual.synced_root, Some(synced.root.clone()));
        assert_ne!(actual.root, synced.root);
        assert_eq!(actual.tracked_files, 2);
        assert!(actual.last_sync.is_some());
        let expected = TreeDiff {
            added: vec!["new.py".to_string()],
            removed: vec!["scale.rs".to_string()],
            modified: vec!["add.rs".to_string()],
        };
        assert_eq!(actual.diff, Some(expected));
    }
}
