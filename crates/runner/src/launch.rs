#![forbid(unsafe_code)]

use crate::attributes::*;
use dw_core::{BackendError, JobExit, JobTemplate};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

/// Everything needed to start one job, resolved from a template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct LaunchSpec {
    pub(crate) program: String,
    pub(crate) args: Vec<String>,
    pub(crate) env: Vec<(String, String)>,
    pub(crate) wd: Option<PathBuf>,
    pub(crate) input: Option<PathBuf>,
    pub(crate) output: Option<PathBuf>,
    pub(crate) error: Option<PathBuf>,
    pub(crate) join_files: bool,
    pub(crate) hold: bool,
}

fn invalid(name: &str, message: &str) -> BackendError {
    BackendError::InvalidValue {
        name: name.to_string(),
        message: message.to_string(),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Expands DRMAA placeholders. `$drmaa_wd_ph$` is left alone when no working directory is set.
fn expand_placeholders(raw: &str, seq: u64, wd: Option<&Path>) -> String {
    let mut out = raw.replace(PLACEHOLDER_INCR, &seq.to_string());
    if out.contains(PLACEHOLDER_HOME)
        && let Some(home) = std::env::var_os("HOME")
    {
        out = out.replace(PLACEHOLDER_HOME, &home.to_string_lossy());
    }
    if let Some(wd) = wd {
        out = out.replace(PLACEHOLDER_WD, &wd.to_string_lossy());
    }
    out
}

/// Parses a DRMAA `[hostname]:file_path` value. Only a prefix without `/` counts as a host, so
/// a bare path may itself contain colons.
fn parse_transfer_path(
    name: &str,
    raw: &str,
    seq: u64,
    wd: Option<&Path>,
) -> Result<PathBuf, BackendError> {
    let path = match raw.split_once(':') {
        Some((host, path)) if !host.contains('/') => path,
        _ => raw,
    };
    if path.trim().is_empty() {
        return Err(invalid(name, "path must not be empty"));
    }
    Ok(PathBuf::from(expand_placeholders(path, seq, wd)))
}

impl LaunchSpec {
    pub(crate) fn from_template(template: &JobTemplate, seq: u64) -> Result<Self, BackendError> {
        let Some(program) = non_empty(template.get(REMOTE_COMMAND)?) else {
            return Err(invalid(REMOTE_COMMAND, "must be set"));
        };

        let hold = match non_empty(template.get(JS_STATE)?) {
            None | Some(JS_STATE_ACTIVE) => false,
            Some(JS_STATE_HOLD) => true,
            Some(_) => {
                return Err(invalid(
                    JS_STATE,
                    "expected drmaa_active or drmaa_hold",
                ));
            }
        };

        let wd = non_empty(template.get(WD)?)
            .map(|raw| PathBuf::from(expand_placeholders(raw, seq, None)));

        let mut env = Vec::new();
        for entry in template.get_vector(V_ENV)? {
            let Some((key, value)) = entry.split_once('=') else {
                return Err(invalid(V_ENV, "entries must be NAME=value"));
            };
            if key.is_empty() {
                return Err(invalid(V_ENV, "entry name must not be empty"));
            }
            env.push((key.to_string(), value.to_string()));
        }

        let input = non_empty(template.get(INPUT_PATH)?)
            .map(|raw| parse_transfer_path(INPUT_PATH, raw, seq, wd.as_deref()))
            .transpose()?;
        let output = non_empty(template.get(OUTPUT_PATH)?)
            .map(|raw| parse_transfer_path(OUTPUT_PATH, raw, seq, wd.as_deref()))
            .transpose()?;
        let error = non_empty(template.get(ERROR_PATH)?)
            .map(|raw| parse_transfer_path(ERROR_PATH, raw, seq, wd.as_deref()))
            .transpose()?;

        let join_files = match non_empty(template.get(JOIN_FILES)?) {
            None => false,
            Some(v) if v.eq_ignore_ascii_case("y") => true,
            Some(v) if v.eq_ignore_ascii_case("n") => false,
            Some(_) => return Err(invalid(JOIN_FILES, "expected y or n")),
        };

        Ok(Self {
            program: program.to_string(),
            args: template.get_vector(V_ARGV)?.to_vec(),
            env,
            wd,
            input,
            output,
            error,
            join_files,
            hold,
        })
    }

    pub(crate) fn spawn(&self) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(wd) = &self.wd {
            cmd.current_dir(wd);
        }

        let stdin = match &self.input {
            Some(path) => Stdio::from(File::open(path)?),
            None => Stdio::null(),
        };
        let (stdout, stderr) = match &self.output {
            Some(path) => {
                let out = File::create(path)?;
                let err = if self.join_files {
                    Stdio::from(out.try_clone()?)
                } else {
                    self.error_stdio()?
                };
                (Stdio::from(out), err)
            }
            None => (Stdio::null(), self.error_stdio()?),
        };

        cmd.stdin(stdin).stdout(stdout).stderr(stderr).spawn()
    }

    fn error_stdio(&self) -> std::io::Result<Stdio> {
        match &self.error {
            Some(path) => Ok(Stdio::from(File::create(path)?)),
            None => Ok(Stdio::null()),
        }
    }
}

pub(crate) fn exit_from_status(status: ExitStatus) -> JobExit {
    if let Some(code) = status.code() {
        return JobExit::exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return JobExit::signalled(signal_name(signal));
        }
    }
    JobExit::aborted()
}

#[cfg(unix)]
fn signal_name(signal: i32) -> String {
    nix::sys::signal::Signal::try_from(signal)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| format!("SIG{signal}"))
}

#[cfg(unix)]
pub(crate) fn send_signal(child: &Child, signal: nix::sys::signal::Signal) -> Result<(), BackendError> {
    let pid = i32::try_from(child.id())
        .map_err(|_| BackendError::Internal(format!("pid out of range: {}", child.id())))?;
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), signal)
        .map_err(|err| BackendError::Internal(format!("kill({pid}, {}): {err}", signal.as_str())))
}
