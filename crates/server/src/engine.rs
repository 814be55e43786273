#![forbid(unsafe_code)]

//! Reconciles job requests against the live cache, the durable store and the backend.

use crate::time::now_ms;
use dw_core::{Backend, BackendError, Fingerprint, JobHandle, JobRequest, JobStatus, fingerprint};
use dw_storage::{
    JobRefreshRequest, JobReplaceRequest, JobsPurgeRequest, RETENTION_MS, SqliteStore, StoreError,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

#[derive(Debug)]
pub enum EngineError {
    EmptyRequest,
    Backend(BackendError),
    Store(StoreError),
    Poisoned(&'static str),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "request carries no attributes"),
            Self::Backend(err) => write!(f, "backend: {err}"),
            Self::Store(err) => write!(f, "store: {err}"),
            Self::Poisoned(what) => write!(f, "{what} lock poisoned"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backend(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::EmptyRequest | Self::Poisoned(_) => None,
        }
    }
}

impl From<BackendError> for EngineError {
    fn from(value: BackendError) -> Self {
        Self::Backend(value)
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Outcome of polling a cached handle.
enum Poll {
    Resolved(JobStatus),
    Evicted,
}

pub struct Engine {
    backend: Arc<dyn Backend>,
    store: Mutex<SqliteStore>,
    cache: Mutex<HashMap<Fingerprint, JobHandle>>,
    locks: Mutex<HashMap<Fingerprint, Arc<Mutex<()>>>>,
}

impl Engine {
    /// Builds an engine after a (re)start: expired rows are purged, then every remaining
    /// non-terminal row is put back into the live cache. The backend is not queried.
    pub fn recover(
        backend: Arc<dyn Backend>,
        mut store: SqliteStore,
        now_ms: i64,
    ) -> Result<Self, EngineError> {
        let purged = store.jobs_purge_expired(JobsPurgeRequest {
            now_ms,
            retention_ms: RETENTION_MS,
        })?;
        let cache = store
            .jobs_list_live()?
            .into_iter()
            .map(|row| (row.fingerprint, row.backend_handle))
            .collect::<HashMap<_, _>>();
        info!(purged, recovered = cache.len(), "engine recovered");

        Ok(Self {
            backend,
            store: Mutex::new(store),
            cache: Mutex::new(cache),
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the current status for `request`, submitting it to the backend only when no
    /// record of its fingerprint exists. Never waits for the job to finish.
    pub fn submit(&self, request: &JobRequest) -> Result<JobStatus, EngineError> {
        if request.is_empty() {
            return Err(EngineError::EmptyRequest);
        }
        let fp = fingerprint(request);
        let slot = self.fingerprint_slot(&fp)?;
        let result = match slot.lock() {
            Ok(_guard) => self.submit_locked(&fp, request),
            Err(_) => Err(EngineError::Poisoned("fingerprint")),
        };
        self.release_fingerprint_slot(&fp, slot);
        result
    }

    pub fn cache_size(&self) -> Result<usize, EngineError> {
        Ok(self.cache()?.len())
    }

    pub fn store_size(&self) -> Result<u64, EngineError> {
        Ok(self.store()?.jobs_count()?)
    }

    /// Every attribute the backend accepts, mapped to `true` for vector attributes.
    pub fn attributes(&self) -> Result<BTreeMap<String, bool>, EngineError> {
        let mut out = BTreeMap::new();
        for name in self.backend.attribute_names()? {
            out.insert(name, false);
        }
        for name in self.backend.vector_attribute_names()? {
            out.insert(name, true);
        }
        Ok(out)
    }

    pub fn close(&self) -> Result<(), EngineError> {
        self.backend.close()?;
        Ok(())
    }

    fn submit_locked(&self, fp: &Fingerprint, request: &JobRequest) -> Result<JobStatus, EngineError> {
        let cached = self.cache()?.get(fp).cloned();
        if let Some(handle) = cached
            && let Poll::Resolved(status) = self.poll_cached(fp, &handle)?
        {
            return Ok(status);
        }

        let stored = self.store()?.job_get(fp)?;
        if let Some(row) = stored {
            return Ok(row.status);
        }

        self.submit_new(fp, request)
    }

    fn poll_cached(&self, fp: &Fingerprint, handle: &JobHandle) -> Result<Poll, EngineError> {
        match self.backend.try_reap(handle) {
            Ok(Some(exit)) => {
                let status = JobStatus::from_exit(&exit);
                info!(fingerprint = %fp, handle = %handle, ?exit, status = status.as_str(), "job finished");
                return Ok(Poll::Resolved(self.refresh(fp, handle, status)?));
            }
            Ok(None) => {}
            Err(err) if err.is_unknown_job() => return self.evict(fp, handle, &err),
            Err(err) => return Err(err.into()),
        }

        match self.backend.job_state(handle) {
            Ok(state) => {
                let status = JobStatus::from_backend_state(state);
                if status == JobStatus::Unknown {
                    warn!(fingerprint = %fp, handle = %handle, ?state, "backend state has no status mapping");
                }
                // An `Unknown` refresh only touches the row and reports the prior status.
                Ok(Poll::Resolved(self.refresh(fp, handle, status)?))
            }
            Err(err) if err.is_unknown_job() => self.evict(fp, handle, &err),
            Err(err) => Err(err.into()),
        }
    }

    fn refresh(
        &self,
        fp: &Fingerprint,
        handle: &JobHandle,
        status: JobStatus,
    ) -> Result<JobStatus, EngineError> {
        let row = self.store()?.job_refresh(JobRefreshRequest {
            fingerprint: fp.clone(),
            backend_handle: handle.clone(),
            status,
            now_ms: now_ms(),
        })?;
        Ok(row.status)
    }

    fn evict(
        &self,
        fp: &Fingerprint,
        handle: &JobHandle,
        err: &BackendError,
    ) -> Result<Poll, EngineError> {
        self.cache()?.remove(fp);
        warn!(fingerprint = %fp, handle = %handle, error = %err, "evicted handle unknown to backend");
        Ok(Poll::Evicted)
    }

    fn submit_new(&self, fp: &Fingerprint, request: &JobRequest) -> Result<JobStatus, EngineError> {
        let mut template = self.backend.allocate_template()?;
        for (name, value) in request.attributes() {
            template.set(name, value)?;
        }
        for (name, values) in request.vector_attributes() {
            template.set_vector(name, values)?;
        }
        let handle = self.backend.run_job(&template)?;

        self.cache()?.insert(fp.clone(), handle.clone());
        self.store()?.job_replace(JobReplaceRequest {
            fingerprint: fp.clone(),
            backend_handle: handle.clone(),
            status: JobStatus::Waiting,
            now_ms: now_ms(),
        })?;
        info!(fingerprint = %fp, handle = %handle, "job submitted");
        Ok(JobStatus::Queued)
    }

    fn fingerprint_slot(&self, fp: &Fingerprint) -> Result<Arc<Mutex<()>>, EngineError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| EngineError::Poisoned("fingerprint map"))?;
        Ok(locks.entry(fp.clone()).or_default().clone())
    }

    /// Drops the map entry once no other request holds or waits on it.
    fn release_fingerprint_slot(&self, fp: &Fingerprint, slot: Arc<Mutex<()>>) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        drop(slot);
        if locks
            .get(fp)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(fp);
        }
    }

    fn cache(&self) -> Result<MutexGuard<'_, HashMap<Fingerprint, JobHandle>>, EngineError> {
        self.cache.lock().map_err(|_| EngineError::Poisoned("cache"))
    }

    fn store(&self) -> Result<MutexGuard<'_, SqliteStore>, EngineError> {
        self.store.lock().map_err(|_| EngineError::Poisoned("store"))
    }
}
