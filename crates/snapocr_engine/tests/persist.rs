use std::fs;
use snapocr_engine::{ensure_output_dir, AtomicFileWriter};
use tempfile::TempDir;

#[test]
fn creates_missing_output_dir() {
    let temp = TempDir::new().unwrap();
    let new_dir = temp.path().join("out").join("images");
    assert!(!new_dir.exists());
    ensure_output_dir(&new_dir).unwrap();
    assert!(new_dir.is_dir());
    // A second call on an existing directory is a no-op.
    ensure_output_dir(&new_dir).unwrap();
}

#[test]
fn atomic_write_replaces_existing_and_is_atomic() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().to_path_buf());

    let first = writer.write("scan.md", "hello").unwrap();
    assert_eq!(first.file_name().unwrap(), "scan.md");
    assert_eq!(fs::read_to_string(&first).unwrap(), "hello");

    // Replace existing
    let second = writer.write("scan.md", "world").unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read_to_string(&second).unwrap(), "world");
}

#[test]
fn writes_binary_content() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().to_path_buf());
    let path = writer.write_bytes("table.xlsx", &[0x50, 0x4b, 0x03, 0x04]).unwrap();
    assert_eq!(fs::read(path).unwrap(), vec![0x50, 0x4b, 0x03, 0x04]);
}

#[test]
fn no_partial_file_on_error() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("not_a_dir");
    fs::write(&file_path, "x").unwrap();

    let writer = AtomicFileWriter::new(file_path.clone());
    let result = writer.write("scan.md", "data");
    assert!(result.is_err());
    assert!(!file_path.with_file_name("scan.md").exists());
}
