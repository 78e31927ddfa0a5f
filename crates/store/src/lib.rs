//! optmodel store: the in-RAM model repository, delta coalescing and ingest.
//!
//! Every `(type, id)` the application asks about gets one reactive cell. Cells
//! start as stubs and are filled by deltas produced by whatever fetches data.
//! The store never fetches on its own.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use metrics::{counter, gauge, histogram};
use optmodel_core::{
    Delta, DeltaKind, EntityType, LinkSpec, LoadState, ModelId, ModelKey, ModelState, Record, RepoError, Repository,
};
use optmodel_reactive::{Observable, ReadOnly};
use optmodel_schema::{ModelMetadata, SchemaRegistry};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Read-only reactive reference handed to selectors.
pub type ObservableModel = ReadOnly<ModelState>;

/// Coalescing queue keyed by `(type, id)` with FIFO order and fixed capacity.
/// Only the latest delta per key survives.
pub struct Coalescer {
    map: FxHashMap<ModelKey, Delta>,
    order: VecDeque<ModelKey>,
    cap: usize,
    dropped: u64,
}

impl Coalescer {
    pub fn with_capacity(cap: usize) -> Self {
        Self { map: FxHashMap::default(), order: VecDeque::new(), cap: cap.max(1), dropped: 0 }
    }

    pub fn len(&self) -> usize { self.map.len() }
    pub fn is_empty(&self) -> bool { self.map.is_empty() }
    pub fn dropped(&self) -> u64 { self.dropped }

    pub fn push(&mut self, d: Delta) {
        let key = d.key();
        if !self.map.contains_key(&key) {
            if self.order.len() >= self.cap {
                if let Some(old) = self.order.pop_front() {
                    self.map.remove(&old);
                    self.dropped += 1;
                    counter!("store_deltas_dropped_total", 1u64);
                }
            }
            self.order.push_back(key.clone());
        }
        self.map.insert(key, d);
    }

    /// Drain all coalesced deltas in first-seen order.
    pub fn drain_ready(&mut self) -> Vec<Delta> {
        let mut out = Vec::with_capacity(self.order.len());
        while let Some(key) = self.order.pop_front() {
            if let Some(d) = self.map.remove(&key) {
                out.push(d);
            }
        }
        out
    }
}

/// The repository: schema registry plus one reactive cell per known model.
///
/// The registry itself is reactive, so completeness judgments made inside a
/// memo invalidate when a type's metadata is re-registered.
///
/// Cells are read-modify-written, so every writer holds `writer` for its whole
/// update. Readers never take it.
pub struct MainRepository {
    schemas: Observable<SchemaRegistry>,
    models: RwLock<FxHashMap<ModelKey, Observable<ModelState>>>,
    writer: Mutex<()>,
    epoch: AtomicU64,
}

impl MainRepository {
    pub fn new(registry: SchemaRegistry) -> Self {
        Self {
            schemas: Observable::new(registry),
            models: RwLock::new(FxHashMap::default()),
            writer: Mutex::new(()),
            epoch: AtomicU64::new(0),
        }
    }

    /// Insert or replace metadata for one type. Returns whether anything changed.
    pub fn register_schema(&self, meta: ModelMetadata) -> bool {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.schemas.update(|reg| {
            let mut next = reg.clone();
            next.register(meta);
            next
        })
    }

    /// Tracked view of the registry.
    pub fn schemas(&self) -> Arc<SchemaRegistry> { self.schemas.get() }

    pub fn metadata(&self, model_type: &EntityType) -> Result<ModelMetadata, RepoError> {
        self.schemas
            .get()
            .get(model_type)
            .cloned()
            .ok_or_else(|| RepoError::UnknownModelType(model_type.clone()))
    }

    /// Reactive reference for `(model_type, id)`; a stub cell is created on the
    /// first request.
    pub fn observe(&self, model_type: &EntityType, id: &ModelId) -> Result<ObservableModel, RepoError> {
        self.ensure_known(model_type)?;
        Ok(self.cell(ModelKey::new(model_type.clone(), id.clone())).read_only())
    }

    /// Untracked snapshot of a cell, if one exists.
    pub fn peek(&self, model_type: &EntityType, id: &ModelId) -> Option<Arc<ModelState>> {
        let key = ModelKey::new(model_type.clone(), id.clone());
        self.models.read().unwrap_or_else(PoisonError::into_inner).get(&key).map(|c| c.peek())
    }

    pub fn len(&self) -> usize { self.models.read().unwrap_or_else(PoisonError::into_inner).len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
    pub fn epoch(&self) -> u64 { self.epoch.load(Ordering::Acquire) }

    /// Apply a batch of deltas to the cells and advance the epoch.
    /// Deltas for unknown types or with malformed payloads are skipped.
    pub fn apply(&self, batch: Vec<Delta>) -> u64 {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let started = std::time::Instant::now();
        let schemas = self.schemas.peek();
        let mut applied = 0u64;
        for d in batch {
            if !schemas.contains(&d.model_type) {
                warn!(key = %d.key(), "delta for unknown model type skipped");
                counter!("store_deltas_dropped_total", 1u64);
                continue;
            }
            let next = match d.kind {
                DeltaKind::Applied => match Record::from_raw(d.model_type.clone(), d.id.clone(), &d.raw) {
                    Ok(record) => ModelState { record: Arc::new(record), load: LoadState::Done },
                    Err(e) => {
                        // rejected before any cell exists for the key
                        warn!(error = %e, "malformed delta skipped");
                        counter!("store_deltas_dropped_total", 1u64);
                        continue;
                    }
                },
                DeltaKind::Pending => ModelState { record: self.current_record(&d), load: LoadState::Pending },
                DeltaKind::Failed => {
                    let message = d.raw.get("message").and_then(|m| m.as_str()).unwrap_or("fetch failed").to_string();
                    ModelState { record: self.current_record(&d), load: LoadState::Error(message) }
                }
                DeltaKind::Deleted => ModelState::stub(d.model_type.clone(), d.id.clone()),
            };
            let cell = self.cell(d.key());
            cell.set(next);
            applied += 1;
        }
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        counter!("store_deltas_applied_total", applied);
        gauge!("store_models", self.len() as f64);
        histogram!("store_apply_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(epoch, applied, "batch applied");
        epoch
    }

    fn current_record(&self, d: &Delta) -> Arc<Record> { Arc::clone(&self.cell(d.key()).peek().record) }

    fn ensure_known(&self, model_type: &EntityType) -> Result<(), RepoError> {
        if self.schemas.get().contains(model_type) {
            Ok(())
        } else {
            Err(RepoError::UnknownModelType(model_type.clone()))
        }
    }

    fn cell(&self, key: ModelKey) -> Observable<ModelState> {
        if let Some(c) = self.models.read().unwrap_or_else(PoisonError::into_inner).get(&key) {
            return c.clone();
        }
        let mut models = self.models.write().unwrap_or_else(PoisonError::into_inner);
        models
            .entry(key)
            .or_insert_with_key(|k| Observable::new(ModelState::stub(k.model_type.clone(), k.id.clone())))
            .clone()
    }
}

impl Repository for MainRepository {
    fn is_full_model(&self, record: &Record, model_type: &EntityType) -> Result<bool, RepoError> {
        let schemas = self.schemas.get();
        let meta = schemas.get(model_type).ok_or_else(|| RepoError::UnknownModelType(model_type.clone()))?;
        Ok(meta.is_full(record))
    }

    fn resolve(&self, model_type: &EntityType, id: &ModelId) -> Result<Arc<Record>, RepoError> {
        self.ensure_known(model_type)?;
        // creating the stub cell on a miss gives the reader something to depend on
        let state = self.cell(ModelKey::new(model_type.clone(), id.clone())).get();
        Ok(Arc::clone(&state.record))
    }

    fn links(&self, model_type: &EntityType) -> Result<SmallVec<[LinkSpec; 4]>, RepoError> {
        let schemas = self.schemas.get();
        let meta = schemas.get(model_type).ok_or_else(|| RepoError::UnknownModelType(model_type.clone()))?;
        Ok(meta.links())
    }
}

/// Handle for readers to reach the repository and follow applied epochs.
pub struct IngestHandle {
    repo: Arc<MainRepository>,
    epoch_rx: watch::Receiver<u64>,
}

impl IngestHandle {
    pub fn repository(&self) -> Arc<MainRepository> { Arc::clone(&self.repo) }
    pub fn current_epoch(&self) -> u64 { *self.epoch_rx.borrow() }
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }
}

/// Spawn an ingest loop that coalesces deltas and applies them to `repo` on
/// a short tick. Returns the delta sender and a reader handle. The loop drains
/// and exits once every sender is dropped.
pub fn spawn_ingest(repo: Arc<MainRepository>, cap: usize) -> (mpsc::Sender<Delta>, IngestHandle) {
    let (tx, mut rx) = mpsc::channel::<Delta>(cap.max(1));
    let (epoch_tx, epoch_rx) = watch::channel(repo.epoch());
    let target = Arc::clone(&repo);

    tokio::spawn(async move {
        let mut coalescer = Coalescer::with_capacity(cap);
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(8));
        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    match maybe {
                        Some(d) => coalescer.push(d),
                        None => {
                            debug!("delta channel closed; draining and exiting ingest loop");
                            let batch = coalescer.drain_ready();
                            if !batch.is_empty() {
                                let epoch = target.apply(batch);
                                let _ = epoch_tx.send(epoch);
                            }
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    let batch = coalescer.drain_ready();
                    if !batch.is_empty() {
                        let epoch = target.apply(batch);
                        let _ = epoch_tx.send(epoch);
                    }
                }
            }
        }
        info!(dropped = coalescer.dropped(), "ingest loop stopped");
    });

    (tx, IngestHandle { repo, epoch_rx })
}
