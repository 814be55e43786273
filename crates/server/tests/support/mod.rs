#![allow(dead_code)]

use dw_core::{
    Backend, BackendError, BackendState, ControlAction, HoldReason, JobExit, JobHandle,
    JobTemplate,
};
use dw_server::Engine;
use dw_storage::SqliteStore;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

pub fn temp_dir(test_name: &str) -> PathBuf {
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "dw_server_{test_name}_{}_{nonce}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

struct ScriptedJob {
    state: BackendState,
    exit: Option<JobExit>,
}

#[derive(Default)]
struct Script {
    next_id: u64,
    jobs: HashMap<String, ScriptedJob>,
    submitted: Vec<JobTemplate>,
    fail_queries: bool,
    fail_submit: bool,
}

/// In-memory backend whose job states are driven by the test.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<Script>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn submissions(&self) -> usize {
        self.script.lock().expect("script").submitted.len()
    }

    pub fn last_template(&self) -> JobTemplate {
        self.script
            .lock()
            .expect("script")
            .submitted
            .last()
            .cloned()
            .expect("a submitted template")
    }

    /// Handle ids of every job the backend still knows, sorted.
    pub fn job_ids(&self) -> Vec<String> {
        let mut ids = self
            .script
            .lock()
            .expect("script")
            .jobs
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        ids.sort();
        ids
    }

    pub fn set_state(&self, id: &str, state: BackendState) {
        let mut script = self.script.lock().expect("script");
        script.jobs.get_mut(id).expect("known job").state = state;
    }

    pub fn finish(&self, id: &str, exit: JobExit) {
        let mut script = self.script.lock().expect("script");
        script.jobs.get_mut(id).expect("known job").exit = Some(exit);
    }

    /// Registers a job submitted before the engine started, as a surviving backend would hold it.
    pub fn adopt(&self, id: &str, state: BackendState) {
        self.script
            .lock()
            .expect("script")
            .jobs
            .insert(id.to_string(), ScriptedJob { state, exit: None });
    }

    /// Drops every job, as a backend restart would.
    pub fn forget_all(&self) {
        self.script.lock().expect("script").jobs.clear();
    }

    pub fn fail_queries(&self, fail: bool) {
        self.script.lock().expect("script").fail_queries = fail;
    }

    pub fn fail_submit(&self, fail: bool) {
        self.script.lock().expect("script").fail_submit = fail;
    }
}

impl Backend for ScriptedBackend {
    fn attribute_names(&self) -> Result<Vec<String>, BackendError> {
        Ok(vec![
            "drmaa_remote_command".to_string(),
            "drmaa_wd".to_string(),
        ])
    }

    fn vector_attribute_names(&self) -> Result<Vec<String>, BackendError> {
        Ok(vec!["drmaa_v_argv".to_string()])
    }

    fn run_job(&self, template: &JobTemplate) -> Result<JobHandle, BackendError> {
        let mut script = self.script.lock().expect("script");
        if script.fail_submit {
            return Err(BackendError::Internal("scheduler unavailable".to_string()));
        }
        script.next_id += 1;
        let id = format!("scripted.{}", script.next_id);
        script.jobs.insert(
            id.clone(),
            ScriptedJob {
                state: BackendState::Queued(HoldReason::None),
                exit: None,
            },
        );
        script.submitted.push(template.clone());
        Ok(JobHandle::from_stored(id))
    }

    fn try_reap(&self, handle: &JobHandle) -> Result<Option<JobExit>, BackendError> {
        let mut script = self.script.lock().expect("script");
        if script.fail_queries {
            return Err(BackendError::Internal("connection reset".to_string()));
        }
        let Some(job) = script.jobs.get(handle.id()) else {
            return Err(BackendError::UnknownJob(handle.id().to_string()));
        };
        if job.exit.is_none() {
            return Ok(None);
        }
        Ok(script.jobs.remove(handle.id()).and_then(|job| job.exit))
    }

    fn job_state(&self, handle: &JobHandle) -> Result<BackendState, BackendError> {
        let script = self.script.lock().expect("script");
        if script.fail_queries {
            return Err(BackendError::Internal("connection reset".to_string()));
        }
        script
            .jobs
            .get(handle.id())
            .map(|job| job.state)
            .ok_or_else(|| BackendError::UnknownJob(handle.id().to_string()))
    }

    fn control(&self, handle: &JobHandle, _action: ControlAction) -> Result<bool, BackendError> {
        let script = self.script.lock().expect("script");
        if script.jobs.contains_key(handle.id()) {
            Ok(false)
        } else {
            Err(BackendError::UnknownJob(handle.id().to_string()))
        }
    }

    fn close(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

pub fn open_engine(backend: &Arc<ScriptedBackend>, dir: &Path) -> Engine {
    let store = SqliteStore::open(dir).expect("open store");
    let backend: Arc<dyn Backend> = backend.clone();
    Engine::recover(backend, store, dw_server::now_ms()).expect("recover")
}
