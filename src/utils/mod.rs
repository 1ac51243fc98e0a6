//! Small filesystem helpers shared by the snapshot writers.

use std::io::Write;
use std::path::Path;

/// Write `data` to `path` via a temp file in the same directory, then rename.
///
/// Readers never observe a half-written snapshot. Parent directories are
/// created as needed.
pub fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// First `n` characters of a key, for log fields.
pub fn short(key: &str, n: usize) -> &str {
    match key.char_indices().nth(n) {
        Some((idx, _)) => &key[..idx],
        None => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_parents() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a").join("b").join("snap.json");
        atomic_write(&path, b"{}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn test_atomic_write_replaces_existing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("snap.json");
        atomic_write(&path, b"old").unwrap();
        atomic_write(&path, b"new").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }

    #[test]
    fn test_short() {
        assert_eq!(short("abcdef0123", 8), "abcdef01");
        assert_eq!(short("abc", 8), "abc");
    }
}
