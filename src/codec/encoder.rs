//! Record stream encoder and its file-backed variant.
//!
//! [`StreamEncoder`] writes records to any `io::Write` and keeps the
//! authoritative byte counter: it is advanced by the length of each slice
//! handed to the underlying writer, so for compressed streams it counts
//! pre-compression bytes. [`RecordFileEncoder`] adds the `.info` and
//! `.index` sidecars, buffering/gzip selection, and the close lifecycle.

use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::codec::varint::{MAX_VARINT_LEN, put_uvarint, put_varint};
use crate::codec::{
    DEFAULT_COMPRESSION_LEVEL, Encoder, FileEncoder, GZIP_FILE_SUFFIX, INDEX_FILE_SUFFIX,
    INFO_FILE_SUFFIX, INFO_STATE_ACTIVE, INFO_STATE_CLOSED, INFO_STATE_UNINITIALIZED,
    NO_COMPRESSION, RecordTag, ScanTally, USE_DEFAULT_BUF_SIZE, VarValue,
};
use crate::core::errors::{LmcrecError, Result};

// Varint field slots in the info buffer (see decoder::load_info for layout).
const INFO_VARINT_FIELDS: usize = 9;

/// Running input/output totals, persisted into the info sidecar.
#[derive(Debug, Clone, Copy, Default)]
struct Totals {
    in_num_bytes: u64,
    in_num_inst: u64,
    in_num_var: u64,
    out_num_var: u64,
}

/// Record encoder over an arbitrary writer.
pub struct StreamEncoder<W: Write> {
    closed: bool,
    writer: W,
    byte_count: u64,
    buf: Vec<u8>,
    // Needed only by the file encoder for the info sidecar:
    start_ts_usec: Option<i64>,
    most_recent_ts_usec: i64,
    totals: Totals,
}

impl<W: Write> StreamEncoder<W> {
    /// Wrap `writer` in a fresh encoder.
    pub fn new(writer: W) -> Self {
        Self {
            closed: false,
            writer,
            byte_count: 0,
            buf: Vec::new(),
            start_ts_usec: None,
            most_recent_ts_usec: 0,
            totals: Totals::default(),
        }
    }

    /// Bytes handed to the underlying writer so far (pre-compression).
    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    /// Consume the encoder, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn ensure_open(&self, op: &'static str) -> Result<()> {
        if self.closed {
            Err(LmcrecError::AlreadyClosed { op })
        } else {
            Ok(())
        }
    }

    fn write_frame(&mut self, op: &'static str, tail: Option<&[u8]>) -> Result<()> {
        self.writer
            .write_all(&self.buf)
            .map_err(|e| LmcrecError::WriteRecord { op, source: e })?;
        self.byte_count += self.buf.len() as u64;
        if let Some(bytes) = tail
            && !bytes.is_empty()
        {
            self.writer
                .write_all(bytes)
                .map_err(|e| LmcrecError::WriteRecord { op, source: e })?;
            self.byte_count += bytes.len() as u64;
        }
        Ok(())
    }
}

impl<W: Write> Encoder for StreamEncoder<W> {
    fn class_info(&mut self, name: &str, class_id: u32) -> Result<()> {
        self.ensure_open("class_info")?;
        self.buf.clear();
        put_uvarint(&mut self.buf, RecordTag::ClassInfo as u64);
        put_uvarint(&mut self.buf, u64::from(class_id));
        put_uvarint(&mut self.buf, name.len() as u64);
        self.write_frame("class_info", Some(name.as_bytes()))
    }

    fn inst_info(
        &mut self,
        name: &str,
        class_id: u32,
        inst_id: u32,
        parent_inst_id: u32,
    ) -> Result<()> {
        self.ensure_open("inst_info")?;
        self.buf.clear();
        put_uvarint(&mut self.buf, RecordTag::InstInfo as u64);
        put_uvarint(&mut self.buf, u64::from(class_id));
        put_uvarint(&mut self.buf, u64::from(inst_id));
        put_uvarint(&mut self.buf, u64::from(parent_inst_id));
        put_uvarint(&mut self.buf, name.len() as u64);
        self.write_frame("inst_info", Some(name.as_bytes()))
    }

    fn var_info(&mut self, name: &str, var_id: u32, class_id: u32, var_type: u32) -> Result<()> {
        self.ensure_open("var_info")?;
        self.buf.clear();
        put_uvarint(&mut self.buf, RecordTag::VarInfo as u64);
        put_uvarint(&mut self.buf, u64::from(class_id));
        put_uvarint(&mut self.buf, u64::from(var_id));
        put_uvarint(&mut self.buf, u64::from(var_type));
        put_uvarint(&mut self.buf, name.len() as u64);
        self.write_frame("var_info", Some(name.as_bytes()))
    }

    fn set_inst_id(&mut self, inst_id: u32) -> Result<()> {
        self.ensure_open("set_inst_id")?;
        self.buf.clear();
        put_uvarint(&mut self.buf, RecordTag::SetInstId as u64);
        put_uvarint(&mut self.buf, u64::from(inst_id));
        self.write_frame("set_inst_id", None)
    }

    fn delete_inst_id(&mut self, inst_id: u32) -> Result<()> {
        self.ensure_open("delete_inst_id")?;
        self.buf.clear();
        put_uvarint(&mut self.buf, RecordTag::DeleteInstId as u64);
        put_uvarint(&mut self.buf, u64::from(inst_id));
        self.write_frame("delete_inst_id", None)
    }

    fn var_value(&mut self, var_id: u32, value: &VarValue) -> Result<()> {
        self.ensure_open("var_value")?;
        self.buf.clear();
        let mut tail: Option<&[u8]> = None;
        match value {
            VarValue::Uint(0) | VarValue::Sint(0) => {
                put_uvarint(&mut self.buf, RecordTag::VarZeroVal as u64);
                put_uvarint(&mut self.buf, u64::from(var_id));
            }
            VarValue::Uint(v) => {
                put_uvarint(&mut self.buf, RecordTag::VarUintVal as u64);
                put_uvarint(&mut self.buf, u64::from(var_id));
                put_uvarint(&mut self.buf, *v);
            }
            VarValue::Sint(v) => {
                put_uvarint(&mut self.buf, RecordTag::VarSintVal as u64);
                put_uvarint(&mut self.buf, u64::from(var_id));
                put_varint(&mut self.buf, *v);
            }
            VarValue::Str(s) if s.is_empty() => {
                put_uvarint(&mut self.buf, RecordTag::VarEmptyString as u64);
                put_uvarint(&mut self.buf, u64::from(var_id));
            }
            VarValue::Str(s) => {
                put_uvarint(&mut self.buf, RecordTag::VarStringVal as u64);
                put_uvarint(&mut self.buf, u64::from(var_id));
                put_uvarint(&mut self.buf, s.len() as u64);
                tail = Some(s.as_bytes());
            }
            VarValue::Bool(v) => {
                let tag = if *v {
                    RecordTag::VarBoolTrue
                } else {
                    RecordTag::VarBoolFalse
                };
                put_uvarint(&mut self.buf, tag as u64);
                put_uvarint(&mut self.buf, u64::from(var_id));
            }
        }
        self.write_frame("var_value", tail)
    }

    fn scan_tally(&mut self, tally: &ScanTally) -> Result<()> {
        self.ensure_open("scan_tally")?;
        self.buf.clear();
        put_uvarint(&mut self.buf, RecordTag::ScanTally as u64);
        put_uvarint(&mut self.buf, tally.in_byte_count);
        put_uvarint(&mut self.buf, tally.in_inst_count);
        put_uvarint(&mut self.buf, tally.in_var_count);
        put_uvarint(&mut self.buf, tally.out_var_count);
        self.write_frame("scan_tally", None)?;
        self.totals.in_num_bytes += tally.in_byte_count;
        self.totals.in_num_inst += tally.in_inst_count;
        self.totals.in_num_var += tally.in_var_count;
        self.totals.out_num_var += tally.out_var_count;
        Ok(())
    }

    fn timestamp_usec(&mut self, ts_usec: i64) -> Result<()> {
        self.ensure_open("timestamp_usec")?;
        self.buf.clear();
        put_uvarint(&mut self.buf, RecordTag::TimestampUsec as u64);
        put_varint(&mut self.buf, ts_usec);
        self.write_frame("timestamp_usec", None)?;
        if self.start_ts_usec.is_none() {
            self.start_ts_usec = Some(ts_usec);
        }
        self.most_recent_ts_usec = ts_usec;
        Ok(())
    }

    fn duration_usec(&mut self, usec: i64) -> Result<()> {
        self.ensure_open("duration_usec")?;
        self.buf.clear();
        put_uvarint(&mut self.buf, RecordTag::DurationUsec as u64);
        put_varint(&mut self.buf, usec);
        self.write_frame("duration_usec", None)
    }

    fn eor(&mut self) -> Result<()> {
        self.ensure_open("eor")?;
        self.buf.clear();
        put_uvarint(&mut self.buf, RecordTag::Eor as u64);
        self.write_frame("eor", None)
    }
}

// ──────────────────── file-backed encoder ────────────────────

/// The writer stack under a file encoder: plain, buffered, or gzip.
enum FileStream {
    Plain(File),
    Buffered(BufWriter<File>),
    Gzip(GzEncoder<File>),
}

impl Write for FileStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(f) => f.write(buf),
            Self::Buffered(w) => w.write(buf),
            Self::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(f) => f.flush(),
            Self::Buffered(w) => w.flush(),
            Self::Gzip(w) => w.flush(),
        }
    }
}

/// Map a compression level to a flate2 setting. Callers have already ruled
/// out [`NO_COMPRESSION`].
fn gzip_level(compression_level: i32) -> Compression {
    if compression_level == DEFAULT_COMPRESSION_LEVEL {
        Compression::default()
    } else if compression_level <= 0 {
        // A `.gz` suffix with level 0 still yields a valid (stored) gzip
        // stream.
        Compression::none()
    } else {
        Compression::new(compression_level.min(9) as u32)
    }
}

/// File-backed record encoder with `.info` and `.index` sidecars.
pub struct RecordFileEncoder {
    inner: StreamEncoder<FileStream>,
    file_name: PathBuf,
    // The byte count at the last data flush, used to skip no-op flushes:
    last_flush_byte_count: u64,
    // The info sidecar. The header (version + previous file name + start
    // timestamp) is written once; every later update seeks back to the state
    // byte and rewrites only the tail.
    info_file: Option<File>,
    version: String,
    prev_file_name: String,
    info_buf: Vec<u8>,
    info_state: u8,
    state_off: usize,
    // The index sidecar, used only when checkpoints are enabled:
    use_checkpoint: bool,
    index_file: Option<File>,
}

impl RecordFileEncoder {
    /// Create a record file (and its directory) and the encoder over it.
    ///
    /// A `.gz` suffix on `file_name`, or any `compression_level` other than
    /// [`NO_COMPRESSION`], selects a gzip stream; the suffix is appended if
    /// only the level asked for compression. `buf_size` applies to plain
    /// streams: [`USE_DEFAULT_BUF_SIZE`] for the default `BufWriter`
    /// capacity, `0` for unbuffered, `> 0` for an explicit capacity.
    pub fn open(
        file_name: impl Into<PathBuf>,
        buf_size: i32,
        compression_level: i32,
        use_checkpoint: bool,
        prev_file_name: &str,
        version: &str,
    ) -> Result<Self> {
        let mut file_name: PathBuf = file_name.into();

        let has_gz_suffix = file_name
            .to_string_lossy()
            .ends_with(GZIP_FILE_SUFFIX);
        let compressed = has_gz_suffix || compression_level != NO_COMPRESSION;
        if compressed && !has_gz_suffix {
            let mut with_gz = file_name.into_os_string();
            with_gz.push(GZIP_FILE_SUFFIX);
            file_name = with_gz.into();
        }

        if let Some(dir) = file_name.parent() {
            fs::create_dir_all(dir).map_err(|e| LmcrecError::io(dir, e))?;
        }
        let file = File::create(&file_name).map_err(|e| LmcrecError::io(&file_name, e))?;

        let stream = if compressed {
            FileStream::Gzip(GzEncoder::new(file, gzip_level(compression_level)))
        } else if buf_size == USE_DEFAULT_BUF_SIZE {
            FileStream::Buffered(BufWriter::new(file))
        } else if buf_size > 0 {
            FileStream::Buffered(BufWriter::with_capacity(buf_size as usize, file))
        } else {
            FileStream::Plain(file)
        };

        Ok(Self {
            inner: StreamEncoder::new(stream),
            file_name,
            last_flush_byte_count: 0,
            info_file: None,
            version: version.to_string(),
            prev_file_name: prev_file_name.to_string(),
            info_buf: Vec::new(),
            info_state: INFO_STATE_UNINITIALIZED,
            state_off: 0,
            use_checkpoint,
            index_file: None,
        })
    }

    /// Bytes written into the record stream so far (pre-compression).
    pub fn byte_count(&self) -> u64 {
        self.inner.byte_count()
    }

    /// Flush the data stream if anything was written since the last flush.
    fn flush_data(&mut self) -> Result<()> {
        if self.inner.closed {
            return Err(LmcrecError::AlreadyClosed { op: "flush" });
        }
        if self.last_flush_byte_count == self.inner.byte_count {
            return Ok(());
        }
        self.inner
            .writer
            .flush()
            .map_err(|e| LmcrecError::io(&self.file_name, e))?;
        self.last_flush_byte_count = self.inner.byte_count;
        Ok(())
    }

    /// Rebuild the rewritable part of the info buffer. Returns the buffer
    /// length and the offset the write should start at (0 for the first
    /// update, the state byte offset afterwards).
    fn update_info_buf(&mut self) -> (usize, usize) {
        let mut write_off = self.state_off;
        if self.info_buf.is_empty() {
            let cap =
                INFO_VARINT_FIELDS * MAX_VARINT_LEN + self.version.len() + self.prev_file_name.len();
            self.info_buf.reserve(cap);
            put_uvarint(&mut self.info_buf, self.version.len() as u64);
            self.info_buf.extend_from_slice(self.version.as_bytes());
            put_uvarint(&mut self.info_buf, self.prev_file_name.len() as u64);
            self.info_buf
                .extend_from_slice(self.prev_file_name.as_bytes());
            put_varint(&mut self.info_buf, self.inner.start_ts_usec.unwrap_or(0));
            if self.inner.start_ts_usec.is_some() && self.info_state == INFO_STATE_UNINITIALIZED {
                self.info_state = INFO_STATE_ACTIVE;
            }
            self.state_off = self.info_buf.len();
            write_off = 0;
        }

        self.info_buf.truncate(self.state_off);
        self.info_buf.push(self.info_state);
        put_varint(&mut self.info_buf, self.inner.most_recent_ts_usec);
        put_uvarint(&mut self.info_buf, self.inner.totals.in_num_bytes);
        put_uvarint(&mut self.info_buf, self.inner.totals.in_num_inst);
        put_uvarint(&mut self.info_buf, self.inner.totals.in_num_var);
        put_uvarint(&mut self.info_buf, self.inner.totals.out_num_var);
        (self.info_buf.len(), write_off)
    }

    /// Rewrite the info sidecar in place, creating it on first use.
    fn update_info(&mut self) -> Result<()> {
        let (buf_len, write_off) = self.update_info_buf();
        let info_path = sidecar_path(&self.file_name, INFO_FILE_SUFFIX);
        if self.info_file.is_none() {
            let f = File::create(&info_path).map_err(|e| LmcrecError::io(&info_path, e))?;
            self.info_file = Some(f);
        }
        let Some(f) = self.info_file.as_mut() else {
            return Ok(());
        };
        f.seek(SeekFrom::Start(write_off as u64))
            .map_err(|e| LmcrecError::io(&info_path, e))?;
        f.write_all(&self.info_buf[write_off..buf_len])
            .map_err(|e| LmcrecError::io(&info_path, e))?;
        Ok(())
    }

    fn close_inner(&mut self) -> Result<()> {
        self.eor()?;
        self.flush_data()?;
        self.info_state = INFO_STATE_CLOSED;
        self.update_info()?;
        if let FileStream::Gzip(w) = &mut self.inner.writer {
            w.try_finish()
                .map_err(|e| LmcrecError::io(&self.file_name, e))?;
        }
        Ok(())
    }

    /// Release all file handles without writing anything further.
    fn force_close(&mut self) {
        if let FileStream::Gzip(w) = &mut self.inner.writer {
            let _ = w.try_finish();
        }
        self.info_file = None;
        self.index_file = None;
        self.inner.closed = true;
    }
}

/// `<file>.info` / `<file>.index` path alongside the record file.
fn sidecar_path(file_name: &Path, suffix: &str) -> PathBuf {
    let mut p = file_name.to_path_buf().into_os_string();
    p.push(suffix);
    p.into()
}

impl Encoder for RecordFileEncoder {
    fn class_info(&mut self, name: &str, class_id: u32) -> Result<()> {
        self.inner.class_info(name, class_id)
    }

    fn inst_info(
        &mut self,
        name: &str,
        class_id: u32,
        inst_id: u32,
        parent_inst_id: u32,
    ) -> Result<()> {
        self.inner.inst_info(name, class_id, inst_id, parent_inst_id)
    }

    fn var_info(&mut self, name: &str, var_id: u32, class_id: u32, var_type: u32) -> Result<()> {
        self.inner.var_info(name, var_id, class_id, var_type)
    }

    fn set_inst_id(&mut self, inst_id: u32) -> Result<()> {
        self.inner.set_inst_id(inst_id)
    }

    fn delete_inst_id(&mut self, inst_id: u32) -> Result<()> {
        self.inner.delete_inst_id(inst_id)
    }

    fn var_value(&mut self, var_id: u32, value: &VarValue) -> Result<()> {
        self.inner.var_value(var_id, value)
    }

    fn scan_tally(&mut self, tally: &ScanTally) -> Result<()> {
        self.inner.scan_tally(tally)
    }

    fn timestamp_usec(&mut self, ts_usec: i64) -> Result<()> {
        self.inner.timestamp_usec(ts_usec)
    }

    fn duration_usec(&mut self, usec: i64) -> Result<()> {
        self.inner.duration_usec(usec)
    }

    fn eor(&mut self) -> Result<()> {
        self.inner.eor()
    }
}

impl FileEncoder for RecordFileEncoder {
    fn file_name(&self) -> &Path {
        &self.file_name
    }

    fn flush(&mut self) -> Result<()> {
        self.flush_data()?;
        self.update_info()
    }

    fn checkpoint(&mut self, ts_usec: i64) -> Result<()> {
        if self.inner.closed {
            return Err(LmcrecError::AlreadyClosed { op: "checkpoint" });
        }
        if !self.use_checkpoint {
            return Ok(());
        }

        let index_path = sidecar_path(&self.file_name, INDEX_FILE_SUFFIX);
        if self.index_file.is_none() {
            let f = File::create(&index_path).map_err(|e| LmcrecError::io(&index_path, e))?;
            self.index_file = Some(f);
        }

        // Everything up to the recorded offset must be durable before the
        // index names it as a resume point.
        self.flush()?;

        let Some(index_file) = self.index_file.as_mut() else {
            return Ok(());
        };
        let buf = &mut self.inner.buf;
        buf.clear();
        put_varint(buf, ts_usec);
        put_varint(buf, self.inner.byte_count as i64);
        // One write call per pair: a concurrent reader sees both fields or
        // neither.
        index_file
            .write_all(buf)
            .map_err(|e| LmcrecError::io(&index_path, e))
    }

    fn close(&mut self) -> Result<()> {
        if self.inner.closed {
            return Ok(());
        }
        let result = self.close_inner();
        self.force_close();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Record;

    #[test]
    fn byte_count_matches_bytes_written() {
        let mut enc = StreamEncoder::new(Vec::new());
        enc.class_info("SomeClass", 1).unwrap();
        enc.inst_info("inst", 1, 1, 0).unwrap();
        enc.var_info("var", 0, 1, 7).unwrap();
        enc.set_inst_id(1).unwrap();
        enc.var_value(0, &VarValue::Uint(12345)).unwrap();
        enc.var_value(1, &VarValue::Str("hello".to_string())).unwrap();
        enc.scan_tally(&ScanTally {
            in_byte_count: 100,
            in_inst_count: 1,
            in_var_count: 2,
            out_var_count: 2,
        })
        .unwrap();
        enc.timestamp_usec(1_700_000_000_000_000).unwrap();
        enc.duration_usec(1234).unwrap();
        enc.eor().unwrap();

        let count = enc.byte_count();
        let written = enc.into_inner();
        assert_eq!(count, written.len() as u64);
    }

    #[test]
    fn compact_variants_are_selected() {
        fn first_tag(enc_bytes: &[u8]) -> u8 {
            enc_bytes[0]
        }

        let cases: Vec<(VarValue, RecordTag)> = vec![
            (VarValue::Uint(0), RecordTag::VarZeroVal),
            (VarValue::Sint(0), RecordTag::VarZeroVal),
            (VarValue::Uint(7), RecordTag::VarUintVal),
            (VarValue::Sint(-7), RecordTag::VarSintVal),
            (VarValue::Str(String::new()), RecordTag::VarEmptyString),
            (VarValue::Str("x".to_string()), RecordTag::VarStringVal),
            (VarValue::Bool(false), RecordTag::VarBoolFalse),
            (VarValue::Bool(true), RecordTag::VarBoolTrue),
        ];
        for (value, want_tag) in cases {
            let mut enc = StreamEncoder::new(Vec::new());
            enc.var_value(3, &value).unwrap();
            let bytes = enc.into_inner();
            assert_eq!(first_tag(&bytes), want_tag as u8, "value {value:?}");
        }
    }

    #[test]
    fn closed_encoder_rejects_all_operations() {
        let mut enc = StreamEncoder::new(Vec::new());
        enc.closed = true;

        let results = [
            enc.class_info("c", 1),
            enc.inst_info("i", 1, 1, 0),
            enc.var_info("v", 0, 1, 7),
            enc.set_inst_id(1),
            enc.delete_inst_id(1),
            enc.var_value(0, &VarValue::Uint(1)),
            enc.scan_tally(&ScanTally::default()),
            enc.timestamp_usec(0),
            enc.duration_usec(0),
            enc.eor(),
        ];
        for result in results {
            let err = result.unwrap_err();
            assert_eq!(err.code(), "LMC-5002");
        }
    }

    struct FailingWriter {
        call_count: usize,
        fail_at: usize,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.call_count += 1;
            if self.call_count >= self.fail_at {
                Err(std::io::Error::other("mock write failure"))
            } else {
                Ok(buf.len())
            }
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failure_surfaces_and_byte_count_stops() {
        // class_info issues two writes (head + name); fail the second.
        let mut enc = StreamEncoder::new(FailingWriter {
            call_count: 0,
            fail_at: 2,
        });
        let before = enc.byte_count();
        let err = enc.class_info("SomeClass", 1).unwrap_err();
        assert_eq!(err.code(), "LMC-5003");
        // Only the head made it through.
        assert!(enc.byte_count() > before);
        assert!(enc.byte_count() < before + 9 + 3);
    }

    #[test]
    fn record_dispatch_round_trips_every_kind() {
        let records = vec![
            Record::ClassInfo {
                class_id: 1,
                name: "C".to_string(),
            },
            Record::InstInfo {
                class_id: 1,
                inst_id: 2,
                parent_inst_id: 1,
                name: "i".to_string(),
            },
            Record::VarInfo {
                class_id: 1,
                var_id: 0,
                var_type: 7,
                name: "v".to_string(),
            },
            Record::SetInstId { inst_id: 2 },
            Record::VarValue {
                var_id: 0,
                value: VarValue::Sint(-42),
            },
            Record::DeleteInstId { inst_id: 2 },
            Record::ScanTally(ScanTally {
                in_byte_count: 9,
                in_inst_count: 1,
                in_var_count: 1,
                out_var_count: 1,
            }),
            Record::TimestampUsec(1_000_000_000),
            Record::DurationUsec(-1),
            Record::Eor,
        ];

        let mut enc = StreamEncoder::new(Vec::new());
        for rec in &records {
            enc.record(rec).unwrap();
        }
        let bytes = enc.into_inner();
        let mut dec = crate::codec::RecordDecoder::new(bytes.as_slice());
        for want in &records {
            let got = dec.next_record().unwrap().expect("record");
            assert_eq!(&got, want);
        }
        assert!(dec.next_record().unwrap().is_none());
    }
}
