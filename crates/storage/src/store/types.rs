#![forbid(unsafe_code)]

use dw_core::{Fingerprint, JobHandle, JobStatus};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobRecordRow {
    pub fingerprint: Fingerprint,
    pub backend_handle: JobHandle,
    pub status: JobStatus,
    pub updated_at_ms: i64,
}
