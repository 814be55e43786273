#![forbid(unsafe_code)]

use crate::http::{DEFAULT_MAX_BODY_BYTES, HttpOptions};
use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_BIND: &str = "0.0.0.0:9080";
pub const DEFAULT_STORAGE_DIR: &str = ".drmaaws";

/// Idempotent job submission over HTTP, backed by a local DRMAA-style session.
#[derive(Clone, Debug, Parser)]
#[command(name = "drmaaws", version)]
pub struct ServerConfig {
    /// Listen address.
    #[arg(long, env = "DRMAAWS_BIND", default_value = DEFAULT_BIND)]
    pub bind: String,

    /// Directory holding the job database.
    #[arg(long, env = "DRMAAWS_STORAGE_DIR", default_value = DEFAULT_STORAGE_DIR)]
    pub storage_dir: PathBuf,

    /// Shared secret for the X-Signature header. Unset or empty disables signing.
    #[arg(long, env = "DRMAAWS_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    #[arg(long, env = "DRMAAWS_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,
}

impl ServerConfig {
    pub fn http_options(&self) -> HttpOptions {
        HttpOptions {
            secret: self.secret.clone().filter(|secret| !secret.is_empty()),
            max_body_bytes: self.max_body_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let config = ServerConfig::try_parse_from([
            "drmaaws",
            "--bind",
            "127.0.0.1:1",
            "--storage-dir",
            "/tmp/dw",
            "--secret",
            "s3",
            "--max-body-bytes",
            "42",
        ])
        .expect("parse");
        assert_eq!(config.bind, "127.0.0.1:1");
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/dw"));
        let options = config.http_options();
        assert_eq!(options.secret.as_deref(), Some("s3"));
        assert_eq!(options.max_body_bytes, 42);
    }

    #[test]
    fn empty_secret_disables_signing() {
        let config = ServerConfig::try_parse_from(["drmaaws", "--secret", ""]).expect("parse");
        assert_eq!(config.http_options().secret, None);
    }
}
