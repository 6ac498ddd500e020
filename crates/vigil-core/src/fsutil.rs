//! Atomic file helpers shared by the record store, ledger, audit log and
//! heartbeat writers.
//!
//! Every write goes to a temporary file first and is then renamed into
//! place, so a concurrent reader never observes a partially written file.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::Result;

/// Atomically replace `target` with `bytes`.
///
/// The temporary file is created in `tmp_dir`, which must be on the same
/// filesystem as `target` for the rename to be atomic.
pub fn write_atomic(tmp_dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(tmp_dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

/// Atomically create `target` with `bytes`, refusing to overwrite.
///
/// Returns `Ok(false)` if `target` already exists.
pub fn create_atomic(tmp_dir: &Path, target: &Path, bytes: &[u8]) -> Result<bool> {
    let mut tmp = NamedTempFile::new_in(tmp_dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    match tmp.persist_noclobber(target) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error.into()),
    }
}

/// Append a single line to `path` using `O_APPEND`.
///
/// Lines shorter than the pipe buffer are written with one `write` call,
/// so concurrent readers see either the whole line or none of it.
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    file.write_all(buf.as_bytes())?;
    file.sync_data()?;
    Ok(())
}

/// Whether a directory entry name is a scratch or hidden file.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("file.txt");

        write_atomic(dir.path(), &target, b"first").unwrap();
        write_atomic(dir.path(), &target, b"second").unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "second");
    }

    #[test]
    fn test_create_atomic_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("file.txt");

        assert!(create_atomic(dir.path(), &target, b"original").unwrap());
        assert!(!create_atomic(dir.path(), &target, b"clobber").unwrap());
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "original");
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("file.txt");
        write_atomic(dir.path(), &target, b"x").unwrap();
        create_atomic(dir.path(), &target, b"y").unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["file.txt".to_string()]);
    }

    #[test]
    fn test_append_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        append_line(&path, "one").unwrap();
        append_line(&path, "two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn test_is_hidden() {
        assert!(is_hidden(".tmpA1b2"));
        assert!(!is_hidden("a1b2c3d4e5f60718.md"));
    }
}
