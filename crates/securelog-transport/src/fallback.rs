//! On-disk fallback storage for frames that could not be shipped to the
//! broker. Filenames are millisecond-precision sortable timestamps so a
//! directory listing walk replays records in the order they were written.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

static TIEBREAK: AtomicU64 = AtomicU64::new(0);

/// `log-YYYYMMDD-HHMMSS-SSS-NNNN.zst`. The trailing counter disambiguates
/// frames written within the same millisecond by concurrent producers while
/// preserving lexicographic = chronological sort order.
fn fallback_filename() -> String {
    let now = Utc::now();
    let tiebreak = TIEBREAK.fetch_add(1, Ordering::Relaxed) % 10_000;
    format!(
        "log-{}-{:03}-{:04}.zst",
        now.format("%Y%m%d-%H%M%S"),
        now.timestamp_subsec_millis(),
        tiebreak
    )
}

pub fn write_fallback_file(directory: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
    fs::create_dir_all(directory)?;
    let path = directory.join(fallback_filename());
    fs::write(&path, bytes)?;
    Ok(path)
}

/// Sorted ascending by filename, which is sorted ascending by write time.
pub fn list_fallback_files(directory: &Path) -> io::Result<Vec<PathBuf>> {
    if !directory.exists() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(directory)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("zst"))
        .collect();
    paths.sort();
    Ok(paths)
}

/// Best-effort secure delete: overwrite with zeros before unlinking, so a
/// crash between the two steps still leaves no plaintext-adjacent content
/// recoverable from the file's old bytes.
pub fn secure_delete(path: &Path) -> io::Result<()> {
    let len = fs::metadata(path)?.len();
    fs::write(path, vec![0u8; len as usize])?;
    fs::remove_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_files_sort_in_write_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for i in 0..5 {
            paths.push(write_fallback_file(dir.path(), format!("frame-{i}").as_bytes()).unwrap());
        }
        let listed = list_fallback_files(dir.path()).unwrap();
        assert_eq!(listed.len(), 5);
        let mut sorted_paths = paths.clone();
        sorted_paths.sort();
        assert_eq!(listed, sorted_paths);
    }

    #[test]
    fn secure_delete_removes_file_and_zeroes_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fallback_file(dir.path(), b"sensitive contents").unwrap();
        secure_delete(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn missing_directory_lists_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        assert_eq!(list_fallback_files(&missing).unwrap(), Vec::<PathBuf>::new());
    }
}
