#![forbid(unsafe_code)]

//! A single-host DRMAA-style session: job templates run as child processes of this process.

mod attributes;
mod launch;
mod session;

pub use attributes::*;
pub use session::LocalSession;
