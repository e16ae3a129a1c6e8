//! YAML configuration: a `default` section of recorder options, a
//! `recorders` list of per-instance overrides, and an optional `logger`
//! section.
//!
//! Every option is optional in the file; the matched recorder entry is
//! merged leaf-by-leaf over the `default` section, which is itself merged
//! over built-in defaults. Paths may carry `$VAR` / `${VAR}` environment
//! interpolation and the `<INST>` placeholder.

use std::env;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::codec::{DEFAULT_COMPRESSION_LEVEL, USE_DEFAULT_BUF_SIZE};
use crate::core::errors::{LmcrecError, Result};

/// Placeholder replaced with the recorder instance in path options.
pub const INST_PLACEHOLDER: &str = "<INST>";
/// Root under which default paths are anchored.
pub const RUNTIME_ENV_VAR: &str = "LMCREC_RUNTIME";
/// Fallback when [`RUNTIME_ENV_VAR`] is unset.
pub const RUNTIME_DEFAULT: &str = "$HOME/runtime/lmcrec";
/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "LMCREC_CONFIG";
/// Fallback config file name.
pub const CONFIG_FILE_DEFAULT: &str = "lmcrec-config.yaml";

/// `security_key` prefix: read the key from a file.
pub const SECURITY_KEY_FILE_PREFIX: &str = "file:";
/// `security_key` prefix: read the key from an environment variable.
pub const SECURITY_KEY_ENV_PREFIX: &str = "env:";

#[allow(missing_docs)]
pub const SCAN_INTERVAL_DEFAULT: f64 = 5.0;
#[allow(missing_docs)]
pub const FLUSH_INTERVAL_DEFAULT: f64 = 300.0;
#[allow(missing_docs)]
pub const CHECKPOINT_INTERVAL_DEFAULT: f64 = 1800.0;
#[allow(missing_docs)]
pub const ROLLOVER_INTERVAL_DEFAULT: f64 = 21600.0;
#[allow(missing_docs)]
pub const MIDNIGHT_ROLLOVER_DEFAULT: bool = true;
#[allow(missing_docs)]
pub const PARSE_ERROR_THRESHOLD_DEFAULT: u32 = 5;
#[allow(missing_docs)]
pub const URL_DEFAULT: &str = "http://localhost:8080/sharedmem";
#[allow(missing_docs)]
pub const COMPRESSED_REQUESTS_DEFAULT: &str = "remote_only";
#[allow(missing_docs)]
pub const REQUEST_TIMEOUT_DEFAULT: f64 = 2.0;
#[allow(missing_docs)]
pub const TCP_CONN_TIMEOUT_DEFAULT: f64 = 1.0;
#[allow(missing_docs)]
pub const RECORD_FILES_DIR_DEFAULT: &str = "$LMCREC_RUNTIME/rec/<INST>";
/// Default recorder log file.
pub const LOG_FILE_DEFAULT: &str = "$LMCREC_RUNTIME/log/<INST>/lmcrec.jsonl";

/// Recorder options as they appear in the file. Intervals and timeouts are
/// seconds; negative values disable where the option allows it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Recorder instance label; when unset the URL is used to derive one.
    pub inst: Option<String>,
    /// Scan cadence, seconds.
    pub scan_interval: Option<f64>,
    /// `< 0`: never flush on a timer, `0`: flush every scan, `> 0`: flush
    /// once the interval has elapsed.
    pub flush_interval: Option<f64>,
    /// `<= 0`: checkpoints disabled.
    pub checkpoint_interval: Option<f64>,
    /// `<= 0`: interval rollover disabled.
    pub rollover_interval: Option<f64>,
    #[allow(missing_docs)]
    pub midnight_rollover: Option<bool>,
    /// Parse errors raise a gauge; at this value the recorder stops. `0`
    /// disables the threshold. Guards against persistent failures filling
    /// the filesystem with stub files.
    pub parse_error_threshold: Option<u32>,
    /// REST URL.
    pub url: Option<String>,
    /// `file:PATH` (env + `<INST>` interpolated), `env:VAR`, or the
    /// literal value. Literal keys in a world-readable config are
    /// discouraged.
    pub security_key: Option<String>,
    /// `true`, `false` or `remote_only`.
    pub compressed_requests: Option<String>,
    /// Total request timeout, seconds.
    pub request_timeout: Option<f64>,
    /// Accept self-signed certificates.
    pub ignore_tls_verify: Option<bool>,
    /// TCP connect timeout, seconds.
    pub tcp_conn_timeout: Option<f64>,
    /// TCP keep-alive, seconds; unset leaves keep-alive off.
    pub tcp_keep_alive: Option<f64>,
    /// Records directory; `<INST>` and `$VAR` interpolated.
    pub record_files_dir: Option<String>,
    /// Write buffer for plain streams: `-1` default, `0` unbuffered,
    /// `> 0` explicit size.
    pub buf_size: Option<i32>,
    /// Gzip level: `0` plain, `-1` default level, `1..=9` explicit.
    pub compression_level: Option<i32>,
}

impl RecorderConfig {
    /// Fill every unset leaf from `other`.
    pub fn apply_defaults(&mut self, other: &Self) {
        fn merge<T: Clone>(to: &mut Option<T>, from: &Option<T>) {
            if to.is_none() && from.is_some() {
                to.clone_from(from);
            }
        }
        merge(&mut self.inst, &other.inst);
        merge(&mut self.scan_interval, &other.scan_interval);
        merge(&mut self.flush_interval, &other.flush_interval);
        merge(&mut self.checkpoint_interval, &other.checkpoint_interval);
        merge(&mut self.rollover_interval, &other.rollover_interval);
        merge(&mut self.midnight_rollover, &other.midnight_rollover);
        merge(&mut self.parse_error_threshold, &other.parse_error_threshold);
        merge(&mut self.url, &other.url);
        merge(&mut self.security_key, &other.security_key);
        merge(&mut self.compressed_requests, &other.compressed_requests);
        merge(&mut self.request_timeout, &other.request_timeout);
        merge(&mut self.ignore_tls_verify, &other.ignore_tls_verify);
        merge(&mut self.tcp_conn_timeout, &other.tcp_conn_timeout);
        merge(&mut self.tcp_keep_alive, &other.tcp_keep_alive);
        merge(&mut self.record_files_dir, &other.record_files_dir);
        merge(&mut self.buf_size, &other.buf_size);
        merge(&mut self.compression_level, &other.compression_level);
    }
}

/// Built-in defaults; `inst`, `security_key` and `tcp_keep_alive` stay
/// unset.
#[must_use]
pub fn default_recorder_config() -> RecorderConfig {
    RecorderConfig {
        inst: None,
        scan_interval: Some(SCAN_INTERVAL_DEFAULT),
        flush_interval: Some(FLUSH_INTERVAL_DEFAULT),
        checkpoint_interval: Some(CHECKPOINT_INTERVAL_DEFAULT),
        rollover_interval: Some(ROLLOVER_INTERVAL_DEFAULT),
        midnight_rollover: Some(MIDNIGHT_ROLLOVER_DEFAULT),
        parse_error_threshold: Some(PARSE_ERROR_THRESHOLD_DEFAULT),
        url: Some(URL_DEFAULT.to_string()),
        security_key: None,
        compressed_requests: Some(COMPRESSED_REQUESTS_DEFAULT.to_string()),
        request_timeout: Some(REQUEST_TIMEOUT_DEFAULT),
        ignore_tls_verify: Some(false),
        tcp_conn_timeout: Some(TCP_CONN_TIMEOUT_DEFAULT),
        tcp_keep_alive: None,
        record_files_dir: Some(RECORD_FILES_DIR_DEFAULT.to_string()),
        buf_size: Some(USE_DEFAULT_BUF_SIZE),
        compression_level: Some(DEFAULT_COMPRESSION_LEVEL),
    }
}

/// `logger` section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Log file path; `<INST>` and `$VAR` interpolated. Unset uses
    /// [`LOG_FILE_DEFAULT`].
    pub log_file: Option<String>,
    /// Rotate after this many bytes.
    pub max_size_bytes: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    default: Option<RecorderConfig>,
    recorders: Vec<RecorderConfig>,
    logger: Option<LoggerConfig>,
}

/// Parse a config document and resolve the entry for `inst`.
///
/// A recorder entry matches `inst` by its `inst` field first, then by its
/// `url` field. The matched entry is completed from the `default` section
/// and the built-in defaults.
pub fn parse_config(buf: &str, inst: &str) -> Result<(RecorderConfig, LoggerConfig)> {
    let file_config: FileConfig = serde_yaml::from_str(buf)?;

    let mut effective_default = file_config.default.unwrap_or_default();
    effective_default.apply_defaults(&default_recorder_config());

    let by_inst = file_config
        .recorders
        .iter()
        .find(|cfg| cfg.inst.as_deref() == Some(inst));
    let matched = by_inst.or_else(|| {
        file_config
            .recorders
            .iter()
            .find(|cfg| cfg.url.as_deref() == Some(inst))
    });
    let Some(matched) = matched else {
        return Err(LmcrecError::NoConfigMatch {
            inst: inst.to_string(),
        });
    };

    let mut config = matched.clone();
    config.apply_defaults(&effective_default);
    Ok((config, file_config.logger.unwrap_or_default()))
}

/// Load the config file and resolve the entry for `inst`.
pub fn load_config(config_file: &Path, inst: &str) -> Result<(RecorderConfig, LoggerConfig)> {
    let buf =
        fs::read_to_string(config_file).map_err(|e| LmcrecError::io(config_file, e))?;
    parse_config(&buf, inst)
}

fn lookup_env(name: &str) -> String {
    match env::var(name) {
        Ok(value) => value,
        // The runtime root has an internal default so path options resolve
        // even on a bare environment.
        Err(_) if name == RUNTIME_ENV_VAR => expand_env(RUNTIME_DEFAULT),
        Err(_) => String::new(),
    }
}

/// Interpolate `$VAR` and `${VAR}` references; unset variables expand to
/// the empty string.
#[must_use]
pub fn expand_env(spec: &str) -> String {
    let mut out = String::with_capacity(spec.len());
    let mut rest = spec;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        if let Some(braced) = after.strip_prefix('{') {
            if let Some(end) = braced.find('}') {
                out.push_str(&lookup_env(&braced[..end]));
                rest = &braced[end + 1..];
            } else {
                out.push('$');
                rest = after;
            }
        } else {
            let name_len = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            if name_len == 0 {
                out.push('$');
                rest = after;
            } else {
                out.push_str(&lookup_env(&after[..name_len]));
                rest = &after[name_len..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Replace [`INST_PLACEHOLDER`] and interpolate environment variables.
#[must_use]
pub fn expand_inst_env(spec: &str, inst: &str) -> String {
    expand_env(&spec.replace(INST_PLACEHOLDER, inst))
}

/// Resolve the `security_key` option to a header value.
pub fn resolve_security_key(spec: &str, inst: &str) -> Result<Option<String>> {
    let resolved = if let Some(file_spec) = spec.strip_prefix(SECURITY_KEY_FILE_PREFIX) {
        let path = expand_inst_env(file_spec, inst);
        fs::read_to_string(&path)
            .map_err(|e| LmcrecError::io(&path, e))?
            .trim()
            .to_string()
    } else if let Some(var) = spec.strip_prefix(SECURITY_KEY_ENV_PREFIX) {
        env::var(var).unwrap_or_default()
    } else {
        spec.to_string()
    };
    Ok(if resolved.is_empty() {
        None
    } else {
        Some(resolved)
    })
}
