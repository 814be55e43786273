#![forbid(unsafe_code)]

pub const REMOTE_COMMAND: &str = "drmaa_remote_command";
pub const JS_STATE: &str = "drmaa_js_state";
pub const WD: &str = "drmaa_wd";
pub const JOB_NAME: &str = "drmaa_job_name";
pub const INPUT_PATH: &str = "drmaa_input_path";
pub const OUTPUT_PATH: &str = "drmaa_output_path";
pub const ERROR_PATH: &str = "drmaa_error_path";
pub const JOIN_FILES: &str = "drmaa_join_files";

pub const V_ARGV: &str = "drmaa_v_argv";
pub const V_ENV: &str = "drmaa_v_env";

/// `drmaa_js_state` value that submits a job on user hold.
pub const JS_STATE_HOLD: &str = "drmaa_hold";
pub const JS_STATE_ACTIVE: &str = "drmaa_active";

pub const PLACEHOLDER_INCR: &str = "$drmaa_incr_ph$";
pub const PLACEHOLDER_HOME: &str = "$drmaa_hd_ph$";
pub const PLACEHOLDER_WD: &str = "$drmaa_wd_ph$";

pub const SCALAR_ATTRIBUTES: &[&str] = &[
    REMOTE_COMMAND,
    JS_STATE,
    WD,
    JOB_NAME,
    INPUT_PATH,
    OUTPUT_PATH,
    ERROR_PATH,
    JOIN_FILES,
];

pub const VECTOR_ATTRIBUTES: &[&str] = &[V_ARGV, V_ENV];
