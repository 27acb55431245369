mod common;

use common::*;
use revealer::{RecordError, RecordWriter, StringRecord, TypeRecord, WriteJob};

fn string_job(path: &std::path::Path, index: u32, value: &str) -> WriteJob {
    WriteJob {
        path: path.to_path_buf(),
        index,
        record: SymbolRecord::String(StringRecord::new(value)),
    }
}

#[test]
fn jobs_are_appended_in_submission_order() {
    let dir = tempfile::tempdir().expect("tempdir should succeed");
    let path = dir.path().join("1_000001_7_string.dat");
    let writer = RecordWriter::spawn().expect("writer spawn should succeed");

    for (index, value) in ["alpha", "beta", "gamma"].iter().enumerate() {
        writer.submit(string_job(&path, index as u32, value));
    }
    writer.flush();

    let bytes = std::fs::read(&path).expect("table read should succeed");
    let records = decode_records(SymbolKind::String, &bytes).expect("decode should succeed");
    let values: Vec<_> = records
        .iter()
        .map(|decoded| match &decoded.record {
            SymbolRecord::String(record) => record.value.as_str(),
            other => panic!("unexpected record {other:?}"),
        })
        .collect();
    assert_eq!(values, vec!["alpha", "beta", "gamma"]);
    assert_eq!(records[2].index, Some(2));
    writer.shutdown();
}

#[test]
fn unopenable_path_drops_the_job_and_keeps_running() {
    let dir = tempfile::tempdir().expect("tempdir should succeed");
    let good = dir.path().join("good_type.dat");
    let writer = RecordWriter::spawn().expect("writer spawn should succeed");

    writer.submit(string_job(dir.path(), 0, "lost"));
    writer.submit(WriteJob {
        path: good.clone(),
        index: 0,
        record: SymbolRecord::Type(TypeRecord { descriptor_idx: 9 }),
    });
    writer.flush();

    assert!(writer.is_running());
    let bytes = std::fs::read(&good).expect("table read should succeed");
    let records = decode_records(SymbolKind::Type, &bytes).expect("decode should succeed");
    assert_eq!(records.len(), 1);
    writer.shutdown();
}

#[test]
fn submissions_after_shutdown_are_dropped() {
    let dir = tempfile::tempdir().expect("tempdir should succeed");
    let path = dir.path().join("late_string.dat");
    let writer = RecordWriter::spawn().expect("writer spawn should succeed");
    writer.shutdown();
    assert!(!writer.is_running());

    writer.submit(string_job(&path, 0, "late"));
    writer.flush();
    assert!(!path.exists());
}

#[test]
fn truncated_table_fails_to_decode() {
    let mut bytes = Vec::new();
    SymbolRecord::String(StringRecord::new("truncate me")).encode(0, &mut bytes);
    bytes.truncate(bytes.len() - 4);

    assert!(matches!(
        decode_records(SymbolKind::String, &bytes),
        Err(RecordError::UnexpectedEof { .. } | RecordError::MissingTerminator { .. })
    ));
}
