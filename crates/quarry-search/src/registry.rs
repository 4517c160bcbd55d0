//! Corpus registry and copy-then-swap snapshots.
//!
//! Each corpus holds an `Arc<CorpusSnapshot>` behind a read-write lock.
//! Searches clone the `Arc` and release the lock immediately; a rebuild
//! prepares a complete new snapshot off to the side and swaps it in with a
//! single write. Readers therefore see either the old snapshot or the new
//! one, never a half-built index.

use parking_lot::{Mutex, MutexGuard, RwLock};
use quarry_core::{Backend, Document};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::backend::RankedSource;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// State of one backend inside a snapshot.
#[derive(Clone)]
pub enum BackendState {
    Ready(Arc<dyn RankedSource>),
    /// Turned off by configuration or never given a provider.
    Disabled(String),
    /// The build failed; searches skip this backend.
    Failed(String),
}

impl BackendState {
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Why this backend cannot answer, if it cannot.
    #[must_use]
    pub fn unavailable_reason(&self) -> Option<&str> {
        match self {
            Self::Ready(_) => None,
            Self::Disabled(reason) | Self::Failed(reason) => Some(reason),
        }
    }
}

impl std::fmt::Debug for BackendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(source) => write!(f, "Ready({})", source.backend()),
            Self::Disabled(reason) => write!(f, "Disabled({reason})"),
            Self::Failed(reason) => write!(f, "Failed({reason})"),
        }
    }
}

/// Immutable view of a corpus: its documents plus the indexes built over
/// them.
#[derive(Debug, Clone)]
pub struct CorpusSnapshot {
    generation: u64,
    documents: Vec<Document>,
    positions: HashMap<String, usize>,
    lexical: BackendState,
    vector: BackendState,
}

impl CorpusSnapshot {
    /// The snapshot of a corpus that has no documents yet.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            generation: 0,
            documents: Vec::new(),
            positions: HashMap::new(),
            lexical: BackendState::Disabled("corpus has not been indexed".to_string()),
            vector: BackendState::Disabled("corpus has not been indexed".to_string()),
        }
    }

    /// Assemble a snapshot. `documents` must not repeat ids.
    #[must_use]
    pub fn new(
        generation: u64,
        documents: Vec<Document>,
        lexical: BackendState,
        vector: BackendState,
    ) -> Self {
        let positions = documents
            .iter()
            .enumerate()
            .map(|(i, doc)| (doc.id.clone(), i))
            .collect();
        Self {
            generation,
            documents,
            positions,
            lexical,
            vector,
        }
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    #[must_use]
    pub fn document(&self, doc_id: &str) -> Option<&Document> {
        self.positions.get(doc_id).map(|&i| &self.documents[i])
    }

    #[must_use]
    pub const fn backend(&self, backend: Backend) -> Option<&BackendState> {
        match backend {
            Backend::Lexical => Some(&self.lexical),
            Backend::Vector => Some(&self.vector),
            Backend::Reranker => None,
        }
    }

    /// Documents of this snapshot with `incoming` merged in. A document
    /// whose id already exists replaces the old one in place; new ids are
    /// appended in arrival order.
    #[must_use]
    pub fn merged_documents(&self, incoming: Vec<Document>) -> Vec<Document> {
        let mut documents = self.documents.clone();
        let mut positions = self.positions.clone();
        for doc in incoming {
            if let Some(&pos) = positions.get(&doc.id) {
                documents[pos] = doc;
            } else {
                positions.insert(doc.id.clone(), documents.len());
                documents.push(doc);
            }
        }
        documents
    }
}

// ---------------------------------------------------------------------------
// Corpus
// ---------------------------------------------------------------------------

/// One named corpus.
#[derive(Debug)]
pub struct Corpus {
    id: String,
    snapshot: RwLock<Arc<CorpusSnapshot>>,
    rebuild: Mutex<()>,
    lookups: AtomicU64,
    hits: AtomicU64,
}

impl Corpus {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            snapshot: RwLock::new(Arc::new(CorpusSnapshot::empty())),
            rebuild: Mutex::new(()),
            lookups: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The current snapshot. The read lock is held only for the clone.
    #[must_use]
    pub fn snapshot(&self) -> Arc<CorpusSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Serializes rebuilds of this corpus. Searches never take this lock.
    pub fn lock_rebuild(&self) -> MutexGuard<'_, ()> {
        self.rebuild.lock()
    }

    /// Replace the current snapshot.
    pub fn install(&self, next: CorpusSnapshot) {
        let generation = next.generation;
        *self.snapshot.write() = Arc::new(next);
        debug!(corpus = %self.id, generation, "installed corpus snapshot");
    }

    /// Count a query-result cache lookup.
    pub fn record_lookup(&self, hit: bool) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Fraction of this corpus's searches answered from the query cache.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.lookups.load(Ordering::Relaxed);
        if lookups == 0 {
            return 0.0;
        }
        self.hits.load(Ordering::Relaxed) as f64 / lookups as f64
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// All corpora known to a retriever, keyed by corpus id.
#[derive(Debug, Default)]
pub struct CorpusRegistry {
    corpora: Mutex<HashMap<String, Arc<Corpus>>>,
}

impl CorpusRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The corpus for `id`, created empty on first use. Concurrent callers
    /// for the same id get the same `Arc`.
    pub fn get_or_create(&self, id: &str) -> Arc<Corpus> {
        let mut corpora = self.corpora.lock();
        if let Some(corpus) = corpora.get(id) {
            return Arc::clone(corpus);
        }
        let corpus = Arc::new(Corpus::new(id));
        corpora.insert(id.to_string(), Arc::clone(&corpus));
        debug!(corpus = id, "registered corpus");
        corpus
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Corpus>> {
        self.corpora.lock().get(id).cloned()
    }

    /// Drop `id` from the registry. Searches already holding its snapshot
    /// finish normally.
    pub fn remove(&self, id: &str) -> Option<Arc<Corpus>> {
        self.corpora.lock().remove(id)
    }

    /// Registered corpus ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.corpora.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.corpora.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.corpora.lock().is_empty()
    }
}
