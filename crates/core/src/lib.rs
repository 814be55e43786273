#![forbid(unsafe_code)]

pub mod backend;
pub mod fingerprint;
pub mod request;
pub mod status;

pub use backend::{
    Backend, BackendError, BackendState, ControlAction, HoldReason, JobExit, JobHandle,
    JobTemplate,
};
pub use fingerprint::{Fingerprint, fingerprint};
pub use request::{JobRequest, RequestError};
pub use status::JobStatus;
