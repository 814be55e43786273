#![forbid(unsafe_code)]

use dw_core::{Fingerprint, JobHandle, JobStatus};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobReplaceRequest {
    pub fingerprint: Fingerprint,
    pub backend_handle: JobHandle,
    pub status: JobStatus,
    pub now_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobRefreshRequest {
    pub fingerprint: Fingerprint,
    pub backend_handle: JobHandle,
    pub status: JobStatus,
    pub now_ms: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobsPurgeRequest {
    pub now_ms: i64,
    pub retention_ms: i64,
}
