//! File-level codec behavior: sidecar lifecycle, gzip streams, checkpoint
//! offsets, byte counter fidelity.

use std::io::Read;

use lmcrec::codec::{
    CheckpointReader, Encoder, FileEncoder, FileRecordDecoder, INFO_STATE_ACTIVE,
    INFO_STATE_CLOSED, Record, RecordDecoder, RecordFileEncoder, ScanTally, VarValue,
    load_info_file,
};

fn drain_file(path: &std::path::Path) -> Vec<Record> {
    let mut decoder = FileRecordDecoder::open_file(path, -1).unwrap();
    let mut records = Vec::new();
    while let Some(record) = decoder.next_record().unwrap() {
        records.push(record);
    }
    records
}

fn info_path(path: &std::path::Path) -> std::path::PathBuf {
    let mut p = path.to_path_buf().into_os_string();
    p.push(".info");
    p.into()
}

fn index_path(path: &std::path::Path) -> std::path::PathBuf {
    let mut p = path.to_path_buf().into_os_string();
    p.push(".index");
    p.into()
}

#[test]
fn empty_session_is_one_eor_and_closed_info() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("empty.lmcrec");
    let mut encoder = RecordFileEncoder::open(&file, 0, 0, false, "", "1.0.0").unwrap();
    encoder.close().unwrap();

    assert_eq!(drain_file(&file), vec![Record::Eor]);

    let info = load_info_file(info_path(&file)).unwrap();
    assert_eq!(info.state, INFO_STATE_CLOSED);
    assert_eq!(info.version, "1.0.0");
    assert_eq!(info.prev_file_name, "");
    assert_eq!(info.total_in_num_bytes, 0);
    assert_eq!(info.total_in_num_inst, 0);
    assert_eq!(info.total_in_num_var, 0);
    assert_eq!(info.total_out_num_var, 0);
}

#[test]
fn info_goes_active_on_first_timestamp_and_tracks_totals() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.lmcrec");
    let mut encoder = RecordFileEncoder::open(&file, 0, 0, false, "prev.lmcrec", "2.0").unwrap();

    encoder.timestamp_usec(1_000_000).unwrap();
    encoder
        .scan_tally(&ScanTally {
            in_byte_count: 100,
            in_inst_count: 2,
            in_var_count: 20,
            out_var_count: 20,
        })
        .unwrap();
    encoder.flush().unwrap();

    let info = load_info_file(info_path(&file)).unwrap();
    assert_eq!(info.state, INFO_STATE_ACTIVE);
    assert_eq!(info.version, "2.0");
    assert_eq!(info.prev_file_name, "prev.lmcrec");
    assert_eq!(info.start_ts_usec, 1_000_000);
    assert_eq!(info.most_recent_ts_usec, 1_000_000);
    assert_eq!(info.total_in_num_bytes, 100);

    // The rewritable tail updates in place; the header stays put.
    encoder.timestamp_usec(2_000_000).unwrap();
    encoder
        .scan_tally(&ScanTally {
            in_byte_count: 50,
            in_inst_count: 2,
            in_var_count: 20,
            out_var_count: 3,
        })
        .unwrap();
    encoder.flush().unwrap();

    let info = load_info_file(info_path(&file)).unwrap();
    assert_eq!(info.state, INFO_STATE_ACTIVE);
    assert_eq!(info.version, "2.0");
    assert_eq!(info.prev_file_name, "prev.lmcrec");
    assert_eq!(info.start_ts_usec, 1_000_000);
    assert_eq!(info.most_recent_ts_usec, 2_000_000);
    assert_eq!(info.total_in_num_bytes, 150);
    assert_eq!(info.total_out_num_var, 23);

    encoder.close().unwrap();
    let info = load_info_file(info_path(&file)).unwrap();
    assert_eq!(info.state, INFO_STATE_CLOSED);

    // The info sidecar stays within its fixed small layout.
    let info_len = std::fs::metadata(info_path(&file)).unwrap().len();
    assert!(info_len <= 128, "info file should be small: {info_len}");
}

#[test]
fn close_is_idempotent_and_later_writes_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("b.lmcrec");
    let mut encoder = RecordFileEncoder::open(&file, -1, 0, false, "", "v").unwrap();
    encoder.timestamp_usec(1).unwrap();
    encoder.close().unwrap();
    encoder.close().unwrap();

    let err = encoder.timestamp_usec(2).unwrap_err();
    assert_eq!(err.code(), "LMC-5002");
    let err = encoder.flush().unwrap_err();
    assert_eq!(err.code(), "LMC-5002");
    let err = encoder.checkpoint(3).unwrap_err();
    assert_eq!(err.code(), "LMC-5002");
}

#[test]
fn gzip_stream_by_compression_level_appends_suffix_and_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("c.lmcrec");
    let mut encoder = RecordFileEncoder::open(&file, -1, -1, false, "", "v").unwrap();
    let actual_name = encoder.file_name().to_path_buf();
    assert!(actual_name.to_string_lossy().ends_with(".lmcrec.gz"));

    let records: Vec<Record> = (0..200)
        .map(|i| Record::VarValue {
            var_id: i,
            value: VarValue::Str(format!("value-{i}")),
        })
        .collect();
    encoder.timestamp_usec(42).unwrap();
    for record in &records {
        encoder.record(record).unwrap();
    }
    let pre_compression = encoder.byte_count();
    encoder.close().unwrap();

    // Pre-compression byte counter vs the compressed artifact.
    let on_disk = std::fs::metadata(&actual_name).unwrap().len();
    assert!(on_disk < pre_compression, "{on_disk} vs {pre_compression}");

    let mut decoded = drain_file(&actual_name);
    assert_eq!(decoded.remove(0), Record::TimestampUsec(42));
    assert_eq!(decoded.pop(), Some(Record::Eor));
    assert_eq!(decoded, records);
}

#[test]
fn byte_count_equals_plain_file_size() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("d.lmcrec");
    let mut encoder = RecordFileEncoder::open(&file, 0, 0, false, "", "v").unwrap();
    encoder.timestamp_usec(7).unwrap();
    encoder.class_info("SomeClass", 1).unwrap();
    encoder
        .var_value(0, &VarValue::Str("payload".to_string()))
        .unwrap();
    let counted = encoder.byte_count();
    encoder.flush().unwrap();

    assert_eq!(std::fs::metadata(&file).unwrap().len(), counted);
    encoder.close().unwrap();
}

#[test]
fn checkpoint_offsets_land_on_record_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("e.lmcrec");
    let mut encoder = RecordFileEncoder::open(&file, 0, 0, true, "", "v").unwrap();

    // Simulate scans; a checkpoint lands right before a timestamp record.
    let mut checkpoint_ts = Vec::new();
    for scan in 0..5i64 {
        let ts = 1_000_000 * (scan + 1);
        if scan == 2 || scan == 4 {
            encoder.checkpoint(ts).unwrap();
            checkpoint_ts.push(ts);
        }
        encoder.timestamp_usec(ts).unwrap();
        encoder.set_inst_id(1).unwrap();
        encoder.var_value(0, &VarValue::Uint(scan as u64)).unwrap();
        encoder
            .scan_tally(&ScanTally {
                in_byte_count: 10,
                in_inst_count: 1,
                in_var_count: 1,
                out_var_count: 1,
            })
            .unwrap();
        encoder.duration_usec(5).unwrap();
    }
    encoder.close().unwrap();

    let mut reader = CheckpointReader::open_file(index_path(&file)).unwrap();
    let mut checkpoints = Vec::new();
    while let Some(checkpoint) = reader.next_checkpoint().unwrap() {
        checkpoints.push(checkpoint);
    }
    assert_eq!(checkpoints.len(), checkpoint_ts.len());

    for (checkpoint, want_ts) in checkpoints.iter().zip(&checkpoint_ts) {
        assert_eq!(checkpoint.ts_usec, *want_ts);
        // Raw-read to the offset; the next record must be the checkpoint's
        // timestamp.
        let mut f = std::fs::File::open(&file).unwrap();
        let mut skip = vec![0u8; checkpoint.offset as usize];
        f.read_exact(&mut skip).unwrap();
        let mut decoder = RecordDecoder::new(f);
        let record = decoder.next_record().unwrap().unwrap();
        assert_eq!(record, Record::TimestampUsec(*want_ts));
    }
}

#[test]
fn checkpoint_is_a_no_op_without_index_support() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("f.lmcrec");
    let mut encoder = RecordFileEncoder::open(&file, 0, 0, false, "", "v").unwrap();
    encoder.timestamp_usec(1).unwrap();
    encoder.checkpoint(1).unwrap();
    encoder.close().unwrap();
    assert!(!index_path(&file).exists());
}

#[test]
fn explicit_gz_suffix_selects_compression() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("g.lmcrec.gz");
    let mut encoder = RecordFileEncoder::open(&file, -1, 0, false, "", "v").unwrap();
    assert_eq!(encoder.file_name(), file.as_path());
    encoder.timestamp_usec(9).unwrap();
    encoder.close().unwrap();

    let records = drain_file(&file);
    assert_eq!(records, vec![Record::TimestampUsec(9), Record::Eor]);
}
