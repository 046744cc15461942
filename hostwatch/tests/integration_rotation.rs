//! Integration tests for the rotating log sink.
//!
//! These exercise the size bound and the backup retention bound over long
//! write sequences, including the fixed threshold/backups scenario from the
//! rotation design notes.

use std::fs;
use std::path::Path;

use hostwatch::rotating::backup_path;
use hostwatch::{RotatingLogSink, RotationPolicy};
use tempfile::tempdir;

fn line(len: usize) -> String {
    "x".repeat(len)
}

/// Counts `<path>.N` files for any N, not just those within the policy.
fn backup_files(active: &Path) -> usize {
    let dir = active.parent().unwrap();
    let prefix = format!("{}.", active.file_name().unwrap().to_str().unwrap());
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_str()
                .and_then(|n| n.strip_prefix(prefix.as_str()))
                .is_some_and(|suffix| suffix.parse::<u32>().is_ok())
        })
        .count()
}

#[test]
fn test_four_rotations_keep_two_backups() {
    let temp_dir = tempdir().unwrap();
    let log = temp_dir.path().join("log");

    let mut sink = RotatingLogSink::open(&log, RotationPolicy::new(1000, 2).unwrap()).unwrap();

    // 399 chars + newline = 400 bytes per record; two fit per file.
    while sink.rotations() < 4 {
        sink.append_line(&line(399)).unwrap();
    }

    assert!(log.is_file());
    assert!(backup_path(&log, 1).is_file());
    assert!(backup_path(&log, 2).is_file());
    assert!(!backup_path(&log, 3).exists());
    assert_eq!(backup_files(&log), 2);

    assert_eq!(fs::metadata(&log).unwrap().len(), 400);
    assert_eq!(fs::metadata(backup_path(&log, 1)).unwrap().len(), 800);
    assert_eq!(fs::metadata(backup_path(&log, 2)).unwrap().len(), 800);
}

#[test]
fn test_size_and_retention_bounds_hold_after_every_write() {
    let temp_dir = tempdir().unwrap();
    let log = temp_dir.path().join("bounded.log");
    let threshold = 1000u64;
    let max_backups = 3u32;

    let mut sink =
        RotatingLogSink::open(&log, RotationPolicy::new(threshold, max_backups).unwrap()).unwrap();

    // Deterministic pseudo-random line lengths, some longer than the threshold.
    let mut seed = 0x2545_f491_4f6c_dd1du64;
    for _ in 0..2000 {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        let len = usize::try_from(seed % 1200).unwrap() + 1;
        let text = line(len);
        let record_len = len as u64 + 1;

        sink.append_line(&text).unwrap();

        let on_disk = fs::metadata(&log).unwrap().len();
        assert_eq!(on_disk, sink.state().active_size);
        assert!(
            on_disk <= threshold || on_disk == record_len,
            "active file {on_disk} bytes exceeds threshold without being a single oversized line"
        );
        assert!(on_disk <= threshold + record_len);

        assert!(sink.state().generations <= max_backups);
        assert!(backup_files(&log) <= max_backups as usize);
    }

    assert!(sink.rotations() > 0);
    assert_eq!(sink.state().generations, max_backups);
}

#[test]
fn test_every_line_lands_in_exactly_one_generation() {
    let temp_dir = tempdir().unwrap();
    let log = temp_dir.path().join("ordered.log");

    // Large enough retention that nothing is discarded.
    let mut sink = RotatingLogSink::open(&log, RotationPolicy::new(64, 50).unwrap()).unwrap();
    for i in 0..100 {
        sink.append_line(&format!("line-{i:04}")).unwrap();
    }

    // Oldest generation first, then the active file.
    let mut contents = String::new();
    for generation in (1..=sink.state().generations).rev() {
        contents.push_str(&fs::read_to_string(backup_path(&log, generation)).unwrap());
    }
    contents.push_str(&fs::read_to_string(&log).unwrap());

    let lines: Vec<&str> = contents.lines().collect();
    let expected: Vec<String> = (0..100).map(|i| format!("line-{i:04}")).collect();
    assert_eq!(lines, expected);
}

#[test]
fn test_reopen_continues_rotation_sequence() {
    let temp_dir = tempdir().unwrap();
    let log = temp_dir.path().join("restart.log");
    let policy = RotationPolicy::new(100, 2).unwrap();

    {
        let mut sink = RotatingLogSink::open(&log, policy).unwrap();
        for _ in 0..5 {
            sink.append_line(&line(29)).unwrap();
        }
        assert_eq!(sink.rotations(), 1);
    }

    let mut sink = RotatingLogSink::open(&log, policy).unwrap();
    assert_eq!(sink.state().active_size, 60);
    assert_eq!(sink.state().generations, 1);

    sink.append_line(&line(29)).unwrap();
    assert_eq!(sink.rotations(), 0);
    sink.append_line(&line(29)).unwrap();
    assert_eq!(sink.rotations(), 1);
    assert_eq!(sink.state().generations, 2);
}
