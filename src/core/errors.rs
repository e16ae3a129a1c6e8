//! LMC-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, LmcrecError>;

/// Top-level error type for the lmcrec recorder.
///
/// Codes are grouped by subsystem: 1xxx config, 2xxx snapshot parsing,
/// 3xxx codec, 4xxx transport, 5xxx file IO / encoder lifecycle,
/// 6xxx task loop.
#[derive(Debug, Error)]
pub enum LmcrecError {
    #[error("[LMC-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[LMC-1002] no recorder config match for {inst:?}")]
    NoConfigMatch { inst: String },

    #[error("[LMC-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[LMC-2001] malformed snapshot: {details}")]
    MalformedSnapshot { details: String },

    #[error(
        "[LMC-2002] invalid variable type {token:?} for inst {inst:?}, class {class:?}, var {var:?}"
    )]
    UnknownVarType {
        token: String,
        inst: String,
        class: String,
        var: String,
    },

    #[error(
        "[LMC-2003] inconsistent variable type for inst {inst:?}, class {class:?}, var {var:?}: want {want}, got {got}"
    )]
    VarTypeMismatch {
        inst: String,
        class: String,
        var: String,
        want: String,
        got: String,
    },

    #[error("[LMC-2004] duplicate inst {inst:?}")]
    DuplicateInstance { inst: String },

    #[error("[LMC-2005] invalid value for inst {inst:?}, var {var:?}: {details}")]
    InvalidValue {
        inst: String,
        var: String,
        details: String,
    },

    #[error("[LMC-3001] malformed record stream: {details}")]
    MalformedRecord { details: String },

    #[error("[LMC-4001] transport failure: {details}")]
    Transport { details: String },

    #[error("[LMC-5001] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[LMC-5002] {op}: encoder is already closed")]
    AlreadyClosed { op: &'static str },

    #[error("[LMC-5003] record write failure in {op}: {source}")]
    WriteRecord {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("[LMC-6001] task {id:?} already running")]
    TaskExists { id: String },

    #[error("[LMC-6002] shutdown timeout after {wait_ms}ms")]
    ShutdownTimeout { wait_ms: u64 },
}

impl LmcrecError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "LMC-1001",
            Self::NoConfigMatch { .. } => "LMC-1002",
            Self::ConfigParse { .. } => "LMC-1003",
            Self::MalformedSnapshot { .. } => "LMC-2001",
            Self::UnknownVarType { .. } => "LMC-2002",
            Self::VarTypeMismatch { .. } => "LMC-2003",
            Self::DuplicateInstance { .. } => "LMC-2004",
            Self::InvalidValue { .. } => "LMC-2005",
            Self::MalformedRecord { .. } => "LMC-3001",
            Self::Transport { .. } => "LMC-4001",
            Self::Io { .. } => "LMC-5001",
            Self::AlreadyClosed { .. } => "LMC-5002",
            Self::WriteRecord { .. } => "LMC-5003",
            Self::TaskExists { .. } => "LMC-6001",
            Self::ShutdownTimeout { .. } => "LMC-6002",
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for LmcrecError {
    fn from(value: serde_json::Error) -> Self {
        Self::MalformedSnapshot {
            details: value.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for LmcrecError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::ConfigParse {
            context: "yaml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_errors() -> Vec<LmcrecError> {
        vec![
            LmcrecError::InvalidConfig {
                details: String::new(),
            },
            LmcrecError::NoConfigMatch {
                inst: String::new(),
            },
            LmcrecError::ConfigParse {
                context: "",
                details: String::new(),
            },
            LmcrecError::MalformedSnapshot {
                details: String::new(),
            },
            LmcrecError::UnknownVarType {
                token: String::new(),
                inst: String::new(),
                class: String::new(),
                var: String::new(),
            },
            LmcrecError::VarTypeMismatch {
                inst: String::new(),
                class: String::new(),
                var: String::new(),
                want: String::new(),
                got: String::new(),
            },
            LmcrecError::DuplicateInstance {
                inst: String::new(),
            },
            LmcrecError::InvalidValue {
                inst: String::new(),
                var: String::new(),
                details: String::new(),
            },
            LmcrecError::MalformedRecord {
                details: String::new(),
            },
            LmcrecError::Transport {
                details: String::new(),
            },
            LmcrecError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            LmcrecError::AlreadyClosed { op: "flush" },
            LmcrecError::WriteRecord {
                op: "eor",
                source: std::io::Error::other("test"),
            },
            LmcrecError::TaskExists { id: String::new() },
            LmcrecError::ShutdownTimeout { wait_ms: 0 },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = sample_errors();
        let codes: Vec<&str> = errors.iter().map(LmcrecError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn error_display_includes_code() {
        for err in sample_errors() {
            let msg = err.to_string();
            assert!(
                msg.contains(err.code()),
                "display should contain error code {}: {msg}",
                err.code()
            );
        }
    }

    #[test]
    fn io_convenience_constructor() {
        let err = LmcrecError::io(
            "/tmp/rec/x.lmcrec",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code(), "LMC-5001");
        assert!(err.to_string().contains("/tmp/rec/x.lmcrec"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: LmcrecError = json_err.into();
        assert_eq!(err.code(), "LMC-2001");
    }

    #[test]
    fn from_serde_yaml_error() {
        let yaml_err = serde_yaml::from_str::<serde_yaml::Value>(": bad :").unwrap_err();
        let err: LmcrecError = yaml_err.into();
        assert_eq!(err.code(), "LMC-1003");
    }
}
