//! Binary record codec: a self-delimited, varint-oriented record stream with
//! a dictionary discipline.
//!
//! Names (classes, instances, variables) are issued once as `CLASS_INFO` /
//! `INST_INFO` / `VAR_INFO` records; values thereafter reference small numeric
//! IDs. Each record starts with an unsigned varint tag followed by varint
//! fields and optional raw bytes for strings. Two sidecar files accompany a
//! record file: `.info` (rewritable summary) and `.index` (append-only
//! checkpoint pairs, present when checkpoints are enabled).

pub mod decoder;
pub mod encoder;
pub mod varint;

pub use decoder::{
    Checkpoint, CheckpointReader, FileRecordDecoder, RecordDecoder, RecordFileInfo, load_info,
    load_info_file,
};
pub use encoder::{RecordFileEncoder, StreamEncoder};

use crate::core::errors::{LmcrecError, Result};

/// Primary record file suffix.
pub const RECORD_FILE_SUFFIX: &str = ".lmcrec";
/// Appended when the stream is gzip compressed.
pub const GZIP_FILE_SUFFIX: &str = ".gz";
/// Summary sidecar suffix.
pub const INFO_FILE_SUFFIX: &str = ".info";
/// Checkpoint sidecar suffix.
pub const INDEX_FILE_SUFFIX: &str = ".index";

/// Sentinel for "use the default write buffer size".
pub const USE_DEFAULT_BUF_SIZE: i32 = -1;
/// Sentinel for "use the default gzip compression level".
pub const DEFAULT_COMPRESSION_LEVEL: i32 = -1;
/// Compression level meaning "no compression" (plain buffered stream).
pub const NO_COMPRESSION: i32 = 0;

/// Info file `state` byte values.
pub const INFO_STATE_UNINITIALIZED: u8 = 0;
#[allow(missing_docs)]
pub const INFO_STATE_ACTIVE: u8 = 1;
#[allow(missing_docs)]
pub const INFO_STATE_CLOSED: u8 = 2;

/// Record type tags. `Undefined` (0) is reserved and never written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum RecordTag {
    Undefined = 0,
    ClassInfo = 1,
    InstInfo = 2,
    VarInfo = 3,
    SetInstId = 4,
    VarBoolFalse = 5,
    VarBoolTrue = 6,
    VarUintVal = 7,
    VarSintVal = 8,
    VarZeroVal = 9,
    VarStringVal = 10,
    VarEmptyString = 11,
    DeleteInstId = 12,
    ScanTally = 13,
    TimestampUsec = 14,
    DurationUsec = 15,
    Eor = 16,
}

impl TryFrom<u64> for RecordTag {
    type Error = LmcrecError;

    fn try_from(value: u64) -> Result<Self> {
        Ok(match value {
            1 => Self::ClassInfo,
            2 => Self::InstInfo,
            3 => Self::VarInfo,
            4 => Self::SetInstId,
            5 => Self::VarBoolFalse,
            6 => Self::VarBoolTrue,
            7 => Self::VarUintVal,
            8 => Self::VarSintVal,
            9 => Self::VarZeroVal,
            10 => Self::VarStringVal,
            11 => Self::VarEmptyString,
            12 => Self::DeleteInstId,
            13 => Self::ScanTally,
            14 => Self::TimestampUsec,
            15 => Self::DurationUsec,
            16 => Self::Eor,
            other => {
                return Err(LmcrecError::MalformedRecord {
                    details: format!("unknown record type: {other}"),
                });
            }
        })
    }
}

/// A variable value as stored in the cache and written to the stream.
///
/// The encoder picks the most compact wire variant automatically: numeric
/// zero becomes `VAR_ZERO_VAL`, the empty string `VAR_EMPTY_STRING`, and
/// booleans the dedicated true/false tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarValue {
    /// Boolean variable value.
    Bool(bool),
    /// Unsigned 64-bit numeric value.
    Uint(u64),
    /// Signed 64-bit numeric value.
    Sint(i64),
    /// String value.
    Str(String),
}

impl std::fmt::Display for VarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}"),
            Self::Sint(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

/// Per-scan byte/instance/variable counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanTally {
    /// Response body size on the wire (verbatim `Content-Length`).
    pub in_byte_count: u64,
    /// Instances seen in the scan.
    pub in_inst_count: u64,
    /// Variables seen in the scan.
    pub in_var_count: u64,
    /// Value records written for the scan.
    pub out_var_count: u64,
}

/// A decoded record.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Record {
    ClassInfo {
        class_id: u32,
        name: String,
    },
    InstInfo {
        class_id: u32,
        inst_id: u32,
        parent_inst_id: u32,
        name: String,
    },
    VarInfo {
        class_id: u32,
        var_id: u32,
        var_type: u32,
        name: String,
    },
    SetInstId {
        inst_id: u32,
    },
    VarValue {
        var_id: u32,
        value: VarValue,
    },
    DeleteInstId {
        inst_id: u32,
    },
    ScanTally(ScanTally),
    /// Microseconds since the Unix epoch.
    TimestampUsec(i64),
    /// Scan duration in microseconds.
    DurationUsec(i64),
    Eor,
}

/// Record stream writer interface.
///
/// Implemented by the in-memory [`StreamEncoder`] and, via delegation, by
/// [`RecordFileEncoder`]. The recorder drives it through the projection in
/// `recorder::recordable`.
pub trait Encoder {
    /// Write a `CLASS_INFO` dictionary record.
    fn class_info(&mut self, name: &str, class_id: u32) -> Result<()>;
    /// Write an `INST_INFO` dictionary record.
    fn inst_info(&mut self, name: &str, class_id: u32, inst_id: u32, parent_inst_id: u32)
    -> Result<()>;
    /// Write a `VAR_INFO` dictionary record.
    fn var_info(&mut self, name: &str, var_id: u32, class_id: u32, var_type: u32) -> Result<()>;
    /// Select the instance subsequent `VAR_*` values belong to.
    fn set_inst_id(&mut self, inst_id: u32) -> Result<()>;
    /// Record an instance deletion.
    fn delete_inst_id(&mut self, inst_id: u32) -> Result<()>;
    /// Write a value record, choosing the most compact variant.
    fn var_value(&mut self, var_id: u32, value: &VarValue) -> Result<()>;
    /// Write the per-scan tally.
    fn scan_tally(&mut self, tally: &ScanTally) -> Result<()>;
    /// Write a scan timestamp (microseconds since the Unix epoch).
    fn timestamp_usec(&mut self, ts_usec: i64) -> Result<()>;
    /// Write a scan duration (microseconds).
    fn duration_usec(&mut self, usec: i64) -> Result<()>;
    /// Write the end-of-recording marker.
    fn eor(&mut self) -> Result<()>;

    /// Re-encode a decoded record.
    fn record(&mut self, record: &Record) -> Result<()> {
        match record {
            Record::ClassInfo { class_id, name } => self.class_info(name, *class_id),
            Record::InstInfo {
                class_id,
                inst_id,
                parent_inst_id,
                name,
            } => self.inst_info(name, *class_id, *inst_id, *parent_inst_id),
            Record::VarInfo {
                class_id,
                var_id,
                var_type,
                name,
            } => self.var_info(name, *var_id, *class_id, *var_type),
            Record::SetInstId { inst_id } => self.set_inst_id(*inst_id),
            Record::VarValue { var_id, value } => self.var_value(*var_id, value),
            Record::DeleteInstId { inst_id } => self.delete_inst_id(*inst_id),
            Record::ScanTally(tally) => self.scan_tally(tally),
            Record::TimestampUsec(ts) => self.timestamp_usec(*ts),
            Record::DurationUsec(d) => self.duration_usec(*d),
            Record::Eor => self.eor(),
        }
    }
}

/// File-backed encoder interface: the record stream plus sidecar lifecycle.
///
/// This is the seam the recorder's encoder factory produces, so tests can
/// substitute in-memory implementations.
pub trait FileEncoder: Encoder + Send {
    /// The actual file name (a `.gz` suffix may have been appended).
    fn file_name(&self) -> &std::path::Path;
    /// Flush buffered data and rewrite the info sidecar.
    fn flush(&mut self) -> Result<()>;
    /// Append a checkpoint for `ts_usec` at the current byte offset.
    fn checkpoint(&mut self, ts_usec: i64) -> Result<()>;
    /// Write `EOR`, finalize the info sidecar, and release all file handles.
    fn close(&mut self) -> Result<()>;
}
