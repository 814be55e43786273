#![forbid(unsafe_code)]

//! Contract between the reconciliation engine and a DRMAA-style job-management session.

use std::collections::{BTreeMap, BTreeSet};

/// Prefix carried by every standard DRMAA attribute name.
pub const DRMAA_PREFIX: &str = "drmaa_";

#[derive(Debug)]
pub enum BackendError {
    /// The session does not know the job (never submitted here, or already reaped).
    UnknownJob(String),
    InvalidAttribute(String),
    InvalidValue { name: String, message: String },
    NoSession,
    Internal(String),
}

impl BackendError {
    pub fn is_unknown_job(&self) -> bool {
        matches!(self, Self::UnknownJob(_))
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownJob(id) => write!(f, "invalid job: {id}"),
            Self::InvalidAttribute(name) => write!(f, "invalid attribute: {name}"),
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
            Self::NoSession => write!(f, "no active session"),
            Self::Internal(message) => write!(f, "internal error: {message}"),
        }
    }
}

impl std::error::Error for BackendError {}

/// Opaque reference to a submitted job. Only its textual id is persisted; a stored id is
/// re-wrapped with [`JobHandle::from_stored`] on restart.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn from_stored(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HoldReason {
    None,
    User,
    System,
    UserAndSystem,
}

/// Instantaneous job state as reported by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendState {
    Unknown,
    Queued(HoldReason),
    Running,
    Suspended(HoldReason),
    Done,
    Failed,
}

/// Exit report of a finished job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobExit {
    pub exited: bool,
    pub exit_code: i32,
    pub signalled: bool,
    pub signal: String,
    pub aborted: bool,
}

impl JobExit {
    pub fn exited(exit_code: i32) -> Self {
        Self {
            exited: true,
            exit_code,
            signalled: false,
            signal: String::new(),
            aborted: false,
        }
    }

    pub fn signalled(signal: impl Into<String>) -> Self {
        Self {
            exited: false,
            exit_code: 0,
            signalled: true,
            signal: signal.into(),
            aborted: false,
        }
    }

    pub fn aborted() -> Self {
        Self {
            exited: false,
            exit_code: 0,
            signalled: false,
            signal: String::new(),
            aborted: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlAction {
    Suspend,
    Resume,
    Hold,
    Release,
    Terminate,
}

impl ControlAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Suspend => "suspend",
            Self::Resume => "resume",
            Self::Hold => "hold",
            Self::Release => "release",
            Self::Terminate => "terminate",
        }
    }
}

/// A job template allocated from a session. It only accepts the attribute names the session
/// advertised, with or without the `drmaa_` prefix.
#[derive(Clone, Debug, Default)]
pub struct JobTemplate {
    scalar_names: BTreeSet<String>,
    vector_names: BTreeSet<String>,
    attributes: BTreeMap<String, String>,
    vector_attributes: BTreeMap<String, Vec<String>>,
}

impl JobTemplate {
    pub fn new<S, V>(scalar_names: S, vector_names: V) -> Self
    where
        S: IntoIterator<Item = String>,
        V: IntoIterator<Item = String>,
    {
        Self {
            scalar_names: scalar_names.into_iter().collect(),
            vector_names: vector_names.into_iter().collect(),
            attributes: BTreeMap::new(),
            vector_attributes: BTreeMap::new(),
        }
    }

    fn resolve(names: &BTreeSet<String>, name: &str) -> Result<String, BackendError> {
        if names.contains(name) {
            return Ok(name.to_string());
        }
        let prefixed = format!("{DRMAA_PREFIX}{name}");
        if names.contains(&prefixed) {
            return Ok(prefixed);
        }
        Err(BackendError::InvalidAttribute(name.to_string()))
    }

    pub fn set(&mut self, name: &str, value: &str) -> Result<(), BackendError> {
        let name = Self::resolve(&self.scalar_names, name)?;
        self.attributes.insert(name, value.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Option<&str>, BackendError> {
        let name = Self::resolve(&self.scalar_names, name)?;
        Ok(self.attributes.get(&name).map(String::as_str))
    }

    pub fn set_vector(&mut self, name: &str, values: &[String]) -> Result<(), BackendError> {
        let name = Self::resolve(&self.vector_names, name)?;
        self.vector_attributes.insert(name, values.to_vec());
        Ok(())
    }

    pub fn get_vector(&self, name: &str) -> Result<&[String], BackendError> {
        let name = Self::resolve(&self.vector_names, name)?;
        Ok(self
            .vector_attributes
            .get(&name)
            .map(Vec::as_slice)
            .unwrap_or(&[]))
    }

}

/// A job-management session. Opening the session is the implementor's constructor.
///
/// Every query is non-blocking: `try_reap` reports a finish at most once and the session
/// forgets the job afterwards, so later queries on that handle fail with
/// [`BackendError::UnknownJob`].
pub trait Backend: Send + Sync {
    fn attribute_names(&self) -> Result<Vec<String>, BackendError>;

    fn vector_attribute_names(&self) -> Result<Vec<String>, BackendError>;

    fn allocate_template(&self) -> Result<JobTemplate, BackendError> {
        Ok(JobTemplate::new(
            self.attribute_names()?,
            self.vector_attribute_names()?,
        ))
    }

    fn run_job(&self, template: &JobTemplate) -> Result<JobHandle, BackendError>;

    fn try_reap(&self, handle: &JobHandle) -> Result<Option<JobExit>, BackendError>;

    fn job_state(&self, handle: &JobHandle) -> Result<BackendState, BackendError>;

    /// Returns `Ok(false)` when the job is in a state where `action` does not apply.
    fn control(&self, handle: &JobHandle, action: ControlAction) -> Result<bool, BackendError>;

    fn close(&self) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> JobTemplate {
        JobTemplate::new(
            ["drmaa_remote_command".to_string(), "drmaa_wd".to_string()],
            ["drmaa_v_argv".to_string()],
        )
    }

    #[test]
    fn accepts_prefixed_and_bare_names() {
        let mut tmpl = template();
        tmpl.set("remote_command", "/bin/true").expect("bare");
        tmpl.set("drmaa_wd", "/tmp").expect("prefixed");
        assert_eq!(
            tmpl.get("drmaa_remote_command").expect("get"),
            Some("/bin/true")
        );
        assert_eq!(tmpl.get("wd").expect("get"), Some("/tmp"));
    }

    #[test]
    fn rejects_unsupported_and_wrong_kind() {
        let mut tmpl = template();
        assert!(matches!(
            tmpl.set("drmaa_bogus", "x"),
            Err(BackendError::InvalidAttribute(_))
        ));
        assert!(matches!(
            tmpl.set("drmaa_v_argv", "x"),
            Err(BackendError::InvalidAttribute(_))
        ));
        assert!(matches!(
            tmpl.set_vector("drmaa_wd", &["x".to_string()]),
            Err(BackendError::InvalidAttribute(_))
        ));
    }

    #[test]
    fn vector_defaults_to_empty() {
        let mut tmpl = template();
        assert!(tmpl.get_vector("v_argv").expect("get").is_empty());
        tmpl.set_vector("v_argv", &["a".to_string(), "b".to_string()])
            .expect("set");
        assert_eq!(tmpl.get_vector("drmaa_v_argv").expect("get"), ["a", "b"]);
    }
}
