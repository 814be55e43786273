#![forbid(unsafe_code)]

use crate::attributes::{SCALAR_ATTRIBUTES, VECTOR_ATTRIBUTES};
use crate::launch::{LaunchSpec, exit_from_status};
use dw_core::{
    Backend, BackendError, BackendState, ControlAction, HoldReason, JobExit, JobHandle,
    JobTemplate,
};
use std::collections::HashMap;
use std::process::Child;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

enum LocalJob {
    Held(LaunchSpec),
    Active { child: Child, suspended: bool },
    Finished(JobExit),
}

struct SessionState {
    open: bool,
    next_seq: u64,
    jobs: HashMap<String, LocalJob>,
}

/// Runs submitted templates as child processes of the current process.
///
/// Job ids embed the session pid, so handles persisted by an earlier process are reported as
/// unknown jobs.
pub struct LocalSession {
    session_pid: u32,
    state: Mutex<SessionState>,
}

impl LocalSession {
    pub fn open() -> Result<Self, BackendError> {
        let session_pid = std::process::id();
        info!(session_pid, "local session opened");
        Ok(Self {
            session_pid,
            state: Mutex::new(SessionState {
                open: true,
                next_seq: 1,
                jobs: HashMap::new(),
            }),
        })
    }

    pub fn job_count(&self) -> Result<usize, BackendError> {
        Ok(self.lock_open()?.jobs.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionState>, BackendError> {
        self.state
            .lock()
            .map_err(|_| BackendError::Internal("session state poisoned".to_string()))
    }

    fn lock_open(&self) -> Result<MutexGuard<'_, SessionState>, BackendError> {
        let state = self.lock()?;
        if !state.open {
            return Err(BackendError::NoSession);
        }
        Ok(state)
    }
}

fn unknown(handle: &JobHandle) -> BackendError {
    BackendError::UnknownJob(handle.id().to_string())
}

fn start(job_id: &str, spec: &LaunchSpec) -> LocalJob {
    match spec.spawn() {
        Ok(child) => {
            info!(job_id, pid = child.id(), program = %spec.program, "job started");
            LocalJob::Active {
                child,
                suspended: false,
            }
        }
        Err(err) => {
            warn!(job_id, program = %spec.program, error = %err, "job failed to start");
            LocalJob::Finished(JobExit::aborted())
        }
    }
}

/// Moves an active job to `Finished` once its process has exited.
fn poll_exit(job_id: &str, job: &mut LocalJob) -> Result<(), BackendError> {
    let LocalJob::Active { child, .. } = job else {
        return Ok(());
    };
    match child.try_wait() {
        Ok(Some(status)) => {
            let exit = exit_from_status(status);
            info!(job_id, ?exit, "job finished");
            *job = LocalJob::Finished(exit);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => Err(BackendError::Internal(format!("wait {job_id}: {err}"))),
    }
}

#[cfg(unix)]
fn signal_job(child: &Child, action: ControlAction) -> Result<(), BackendError> {
    use nix::sys::signal::Signal;

    let signal = match action {
        ControlAction::Suspend => Signal::SIGSTOP,
        ControlAction::Resume => Signal::SIGCONT,
        ControlAction::Terminate => Signal::SIGKILL,
        ControlAction::Hold | ControlAction::Release => {
            return Err(BackendError::Internal(format!(
                "{} is not a signal action",
                action.as_str()
            )));
        }
    };
    crate::launch::send_signal(child, signal)
}

#[cfg(not(unix))]
fn signal_job(_child: &Child, action: ControlAction) -> Result<(), BackendError> {
    Err(BackendError::Internal(format!(
        "{} is not supported on this platform",
        action.as_str()
    )))
}

impl Backend for LocalSession {
    fn attribute_names(&self) -> Result<Vec<String>, BackendError> {
        let _state = self.lock_open()?;
        Ok(SCALAR_ATTRIBUTES.iter().map(|s| s.to_string()).collect())
    }

    fn vector_attribute_names(&self) -> Result<Vec<String>, BackendError> {
        let _state = self.lock_open()?;
        Ok(VECTOR_ATTRIBUTES.iter().map(|s| s.to_string()).collect())
    }

    fn run_job(&self, template: &JobTemplate) -> Result<JobHandle, BackendError> {
        let mut state = self.lock_open()?;
        let seq = state.next_seq;
        let spec = LaunchSpec::from_template(template, seq)?;
        state.next_seq += 1;

        let job_id = format!("local.{}.{seq}", self.session_pid);
        let job = if spec.hold {
            info!(job_id = %job_id, program = %spec.program, "job submitted on hold");
            LocalJob::Held(spec)
        } else {
            start(&job_id, &spec)
        };
        state.jobs.insert(job_id.clone(), job);
        Ok(JobHandle::from_stored(job_id))
    }

    fn try_reap(&self, handle: &JobHandle) -> Result<Option<JobExit>, BackendError> {
        let mut state = self.lock_open()?;
        let Some(job) = state.jobs.get_mut(handle.id()) else {
            return Err(unknown(handle));
        };
        poll_exit(handle.id(), job)?;
        if !matches!(job, LocalJob::Finished(_)) {
            return Ok(None);
        }
        match state.jobs.remove(handle.id()) {
            Some(LocalJob::Finished(exit)) => Ok(Some(exit)),
            _ => Err(unknown(handle)),
        }
    }

    fn job_state(&self, handle: &JobHandle) -> Result<BackendState, BackendError> {
        let mut state = self.lock_open()?;
        let Some(job) = state.jobs.get_mut(handle.id()) else {
            return Err(unknown(handle));
        };
        poll_exit(handle.id(), job)?;
        Ok(match job {
            LocalJob::Held(_) => BackendState::Queued(HoldReason::User),
            LocalJob::Active {
                suspended: true, ..
            } => BackendState::Suspended(HoldReason::User),
            LocalJob::Active { .. } => BackendState::Running,
            LocalJob::Finished(exit) if exit.exited && exit.exit_code == 0 => BackendState::Done,
            LocalJob::Finished(_) => BackendState::Failed,
        })
    }

    fn control(&self, handle: &JobHandle, action: ControlAction) -> Result<bool, BackendError> {
        let mut state = self.lock_open()?;
        let Some(job) = state.jobs.get_mut(handle.id()) else {
            return Err(unknown(handle));
        };
        poll_exit(handle.id(), job)?;

        let applied = match (action, &mut *job) {
            (ControlAction::Suspend, LocalJob::Active { child, suspended }) if !*suspended => {
                signal_job(child, action)?;
                *suspended = true;
                true
            }
            (ControlAction::Resume, LocalJob::Active { child, suspended }) if *suspended => {
                signal_job(child, action)?;
                *suspended = false;
                true
            }
            (ControlAction::Hold, LocalJob::Held(_)) => true,
            (ControlAction::Release, LocalJob::Held(spec)) => {
                let spec = spec.clone();
                *job = start(handle.id(), &spec);
                true
            }
            (ControlAction::Terminate, LocalJob::Held(_)) => {
                *job = LocalJob::Finished(JobExit::aborted());
                true
            }
            (ControlAction::Terminate, LocalJob::Active { child, .. }) => {
                signal_job(child, action)?;
                true
            }
            _ => false,
        };
        info!(job_id = handle.id(), action = action.as_str(), applied, "job control");
        Ok(applied)
    }

    fn close(&self) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        if state.open {
            state.open = false;
            let abandoned = state.jobs.len();
            let mut killed = Vec::new();
            for (job_id, job) in state.jobs.drain() {
                let LocalJob::Active { mut child, .. } = job else {
                    continue;
                };
                let pid = child.id();
                if let Err(err) = child.kill() {
                    warn!(job_id = %job_id, pid, error = %err, "failed to kill job on close");
                }
                // Reap so no zombie outlives the session.
                if let Err(err) = child.wait() {
                    warn!(job_id = %job_id, pid, error = %err, "failed to reap job on close");
                }
                killed.push(pid);
            }
            info!(abandoned, ?killed, "local session closed");
        }
        Ok(())
    }
}
