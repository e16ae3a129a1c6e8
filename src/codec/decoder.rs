//! Record stream decoder, plus loaders for the `.info` and `.index`
//! sidecars.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;

use crate::codec::varint::{read_uvarint, read_varint, try_read_uvarint, try_read_varint};
use crate::codec::{GZIP_FILE_SUFFIX, Record, RecordTag, ScanTally, VarValue};
use crate::core::errors::{LmcrecError, Result};

/// Record stream reader over an arbitrary byte source.
///
/// `next_record` returns `Ok(None)` at a clean end of stream (record
/// boundary); a truncated record or an unknown tag is a malformed-stream
/// error. The decoder tracks the most recent `class_id` / `inst_id` purely
/// as a convenience for downstream consumers.
pub struct RecordDecoder<R: Read> {
    reader: R,
    most_recent_class_id: u32,
    most_recent_inst_id: u32,
}

/// Decoder over a record file, transparently un-gzipping by file suffix.
pub type FileRecordDecoder = RecordDecoder<Box<dyn Read + Send>>;

impl<R: Read> RecordDecoder<R> {
    /// Wrap `reader` in a fresh decoder.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            most_recent_class_id: 0,
            most_recent_inst_id: 0,
        }
    }

    /// The `class_id` of the most recent `CLASS_INFO` record.
    pub fn most_recent_class_id(&self) -> u32 {
        self.most_recent_class_id
    }

    /// The `inst_id` of the most recent `INST_INFO` / `SET_INST_ID` record.
    pub fn most_recent_inst_id(&self) -> u32 {
        self.most_recent_inst_id
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(read_uvarint(&mut self.reader)? as u32)
    }

    fn read_string(&mut self) -> Result<String> {
        let len = read_uvarint(&mut self.reader)? as usize;
        let mut bytes = vec![0u8; len];
        self.reader
            .read_exact(&mut bytes)
            .map_err(|e| LmcrecError::MalformedRecord {
                details: format!("truncated string: {e}"),
            })?;
        String::from_utf8(bytes).map_err(|e| LmcrecError::MalformedRecord {
            details: format!("invalid utf-8 in string: {e}"),
        })
    }

    /// Decode the next record, or `None` at a clean end of stream.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        let Some(tag_value) = try_read_uvarint(&mut self.reader)? else {
            return Ok(None);
        };
        let tag = RecordTag::try_from(tag_value)?;

        let record = match tag {
            RecordTag::Undefined => {
                return Err(LmcrecError::MalformedRecord {
                    details: format!("unknown record type: {tag_value}"),
                });
            }

            RecordTag::ClassInfo => {
                let class_id = self.read_u32()?;
                let name = self.read_string()?;
                self.most_recent_class_id = class_id;
                Record::ClassInfo { class_id, name }
            }

            RecordTag::InstInfo => {
                let class_id = self.read_u32()?;
                let inst_id = self.read_u32()?;
                let parent_inst_id = self.read_u32()?;
                let name = self.read_string()?;
                self.most_recent_inst_id = inst_id;
                Record::InstInfo {
                    class_id,
                    inst_id,
                    parent_inst_id,
                    name,
                }
            }

            RecordTag::VarInfo => {
                let class_id = self.read_u32()?;
                let var_id = self.read_u32()?;
                let var_type = self.read_u32()?;
                let name = self.read_string()?;
                Record::VarInfo {
                    class_id,
                    var_id,
                    var_type,
                    name,
                }
            }

            RecordTag::SetInstId => {
                let inst_id = self.read_u32()?;
                self.most_recent_inst_id = inst_id;
                Record::SetInstId { inst_id }
            }

            RecordTag::VarBoolFalse | RecordTag::VarBoolTrue => Record::VarValue {
                var_id: self.read_u32()?,
                value: VarValue::Bool(tag == RecordTag::VarBoolTrue),
            },

            RecordTag::VarUintVal => {
                let var_id = self.read_u32()?;
                Record::VarValue {
                    var_id,
                    value: VarValue::Uint(read_uvarint(&mut self.reader)?),
                }
            }

            RecordTag::VarZeroVal => Record::VarValue {
                var_id: self.read_u32()?,
                value: VarValue::Uint(0),
            },

            RecordTag::VarSintVal => {
                let var_id = self.read_u32()?;
                Record::VarValue {
                    var_id,
                    value: VarValue::Sint(read_varint(&mut self.reader)?),
                }
            }

            RecordTag::VarStringVal => {
                let var_id = self.read_u32()?;
                Record::VarValue {
                    var_id,
                    value: VarValue::Str(self.read_string()?),
                }
            }

            RecordTag::VarEmptyString => Record::VarValue {
                var_id: self.read_u32()?,
                value: VarValue::Str(String::new()),
            },

            RecordTag::DeleteInstId => Record::DeleteInstId {
                inst_id: self.read_u32()?,
            },

            RecordTag::ScanTally => Record::ScanTally(ScanTally {
                in_byte_count: read_uvarint(&mut self.reader)?,
                in_inst_count: read_uvarint(&mut self.reader)?,
                in_var_count: read_uvarint(&mut self.reader)?,
                out_var_count: read_uvarint(&mut self.reader)?,
            }),

            RecordTag::TimestampUsec => Record::TimestampUsec(read_varint(&mut self.reader)?),

            RecordTag::DurationUsec => Record::DurationUsec(read_varint(&mut self.reader)?),

            RecordTag::Eor => Record::Eor,
        };

        Ok(Some(record))
    }
}

impl FileRecordDecoder {
    /// Open a record file for decoding. A `.gz` suffix selects transparent
    /// gzip decompression. `buf_size <= 0` uses the default read buffer.
    pub fn open_file(file_name: impl AsRef<Path>, buf_size: i32) -> Result<Self> {
        let file_name = file_name.as_ref();
        let file = File::open(file_name).map_err(|e| LmcrecError::io(file_name, e))?;

        let raw: Box<dyn Read + Send> = if file_name
            .to_string_lossy()
            .ends_with(GZIP_FILE_SUFFIX)
        {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };

        let buffered: Box<dyn Read + Send> = if buf_size > 0 {
            Box::new(BufReader::with_capacity(buf_size as usize, raw))
        } else {
            Box::new(BufReader::new(raw))
        };

        Ok(Self::new(buffered))
    }
}

// ──────────────────── info sidecar ────────────────────

/// Decoded contents of a `.info` sidecar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFileInfo {
    /// Recorder version that produced the file.
    pub version: String,
    /// Basename of the previous file in a rollover chain, if any.
    pub prev_file_name: String,
    /// One of the `INFO_STATE_*` values.
    pub state: u8,
    /// First scan timestamp in the file (microseconds since epoch).
    pub start_ts_usec: i64,
    /// Most recent scan timestamp (microseconds since epoch).
    pub most_recent_ts_usec: i64,
    #[allow(missing_docs)]
    pub total_in_num_bytes: u64,
    #[allow(missing_docs)]
    pub total_in_num_inst: u64,
    #[allow(missing_docs)]
    pub total_in_num_var: u64,
    #[allow(missing_docs)]
    pub total_out_num_var: u64,
}

fn read_len_prefixed_string<R: Read + ?Sized>(r: &mut R) -> Result<String> {
    let len = read_uvarint(r)? as usize;
    let mut bytes = vec![0u8; len];
    if len > 0 {
        r.read_exact(&mut bytes).map_err(|e| LmcrecError::MalformedRecord {
            details: format!("truncated info string: {e}"),
        })?;
    }
    String::from_utf8(bytes).map_err(|e| LmcrecError::MalformedRecord {
        details: format!("invalid utf-8 in info string: {e}"),
    })
}

/// Decode an info sidecar from `r`.
pub fn load_info<R: Read>(mut r: R) -> Result<RecordFileInfo> {
    let mut info = RecordFileInfo {
        version: read_len_prefixed_string(&mut r)?,
        prev_file_name: read_len_prefixed_string(&mut r)?,
        ..RecordFileInfo::default()
    };
    info.start_ts_usec = read_varint(&mut r)?;

    let mut state = [0u8; 1];
    r.read_exact(&mut state).map_err(|e| LmcrecError::MalformedRecord {
        details: format!("truncated info state: {e}"),
    })?;
    info.state = state[0];

    info.most_recent_ts_usec = read_varint(&mut r)?;
    info.total_in_num_bytes = read_uvarint(&mut r)?;
    info.total_in_num_inst = read_uvarint(&mut r)?;
    info.total_in_num_var = read_uvarint(&mut r)?;
    info.total_out_num_var = read_uvarint(&mut r)?;
    Ok(info)
}

/// Load and decode a `.info` sidecar by path.
pub fn load_info_file(file_name: impl AsRef<Path>) -> Result<RecordFileInfo> {
    let file_name = file_name.as_ref();
    let f = File::open(file_name).map_err(|e| LmcrecError::io(file_name, e))?;
    load_info(BufReader::new(f))
}

// ──────────────────── index sidecar ────────────────────

/// One checkpoint: a safe resume point for readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Scan timestamp the checkpoint covers (microseconds since epoch).
    pub ts_usec: i64,
    /// Pre-compression byte offset of a record boundary in the main file.
    pub offset: u64,
}

/// Reader for the append-only `.index` sidecar.
pub struct CheckpointReader<R: Read> {
    reader: R,
}

impl<R: Read> CheckpointReader<R> {
    /// Wrap `reader` in a checkpoint reader.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Decode the next checkpoint pair, or `None` at end of file.
    pub fn next_checkpoint(&mut self) -> Result<Option<Checkpoint>> {
        let Some(ts_usec) = try_read_varint(&mut self.reader)? else {
            return Ok(None);
        };
        let offset = read_varint(&mut self.reader)? as u64;
        Ok(Some(Checkpoint { ts_usec, offset }))
    }
}

impl CheckpointReader<BufReader<File>> {
    /// Open a `.index` sidecar by path.
    pub fn open_file(file_name: impl AsRef<Path>) -> Result<Self> {
        let file_name = file_name.as_ref();
        let f = File::open(file_name).map_err(|e| LmcrecError::io(file_name, e))?;
        Ok(Self::new(BufReader::new(f)))
    }
}
