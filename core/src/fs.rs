//! Small filesystem capability so the engine can be exercised against an
//! in-memory fake. The real implementation is a thin veneer over `std::fs`;
//! all suspension happens at the call sites that use it.

use std::collections::BTreeMap;
use std::io;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::DateTime;
use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileStat {
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

pub trait Fs: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<String>;
    fn write(&self, path: &Path, content: &str) -> io::Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    fn stat(&self, path: &Path) -> io::Result<FileStat>;
    fn ensure_dir(&self, path: &Path) -> io::Result<()>;
    fn remove(&self, path: &Path) -> io::Result<()>;
    /// Resolve symlinks for the deepest existing ancestor of `path` and
    /// re-append the remaining components lexically. Must not require the
    /// full path to exist: candidates routinely name files not yet created.
    fn canonicalize_ancestor(&self, path: &Path) -> io::Result<PathBuf>;
}

/// Production implementation over the real filesystem.
#[derive(Debug, Default)]
pub struct RealFs;

impl Fs for RealFs {
    fn read(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn write(&self, path: &Path, content: &str) -> io::Result<()> {
        std::fs::write(path, content)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let meta = std::fs::metadata(path)?;
        let modified = meta.modified().ok().map(DateTime::<Utc>::from);
        Ok(FileStat {
            size_bytes: meta.len(),
            modified,
        })
    }

    fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn canonicalize_ancestor(&self, path: &Path) -> io::Result<PathBuf> {
        let mut existing = path.to_path_buf();
        let mut tail: Vec<std::ffi::OsString> = Vec::new();
        loop {
            if existing.exists() {
                let mut resolved = existing.canonicalize()?;
                for part in tail.iter().rev() {
                    resolved = lexical_push(resolved, Path::new(part));
                }
                return Ok(resolved);
            }
            match (existing.file_name(), existing.parent()) {
                (Some(name), Some(parent)) => {
                    tail.push(name.to_os_string());
                    existing = parent.to_path_buf();
                }
                _ => {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("no existing ancestor for {}", path.display()),
                    ));
                }
            }
        }
    }
}

/// Append `part` to `base`, resolving `.` and `..` lexically. `..` past the
/// root saturates at the root, which the caller's prefix check then rejects.
fn lexical_push(mut base: PathBuf, part: &Path) -> PathBuf {
    for component in part.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                base.pop();
            }
            other => base.push(other),
        }
    }
    base
}

/// In-memory fake keyed by lexically-normalized absolute paths. Good enough
/// for engine unit tests; symlinks are out of its world.
#[derive(Debug, Default)]
pub struct MemFs {
    files: Mutex<BTreeMap<PathBuf, (String, DateTime<Utc>)>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(entries: &[(&str, &str)]) -> Self {
        let fs = Self::new();
        for (path, content) in entries {
            #[expect(clippy::expect_used)]
            fs.write(Path::new(path), content).expect("mem write");
        }
        fs
    }

    fn normalize(path: &Path) -> PathBuf {
        let mut out = PathBuf::new();
        for component in path.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    out.pop();
                }
                other => out.push(other),
            }
        }
        out
    }

    fn not_found(path: &Path) -> io::Error {
        io::Error::new(io::ErrorKind::NotFound, format!("{}", path.display()))
    }
}

impl Fs for MemFs {
    fn read(&self, path: &Path) -> io::Result<String> {
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        files
            .get(&Self::normalize(path))
            .map(|(content, _)| content.clone())
            .ok_or_else(|| Self::not_found(path))
    }

    fn write(&self, path: &Path, content: &str) -> io::Result<()> {
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        files.insert(Self::normalize(path), (content.to_string(), Utc::now()));
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        let normalized = Self::normalize(path);
        files.contains_key(&normalized)
            || files.keys().any(|k| k.starts_with(&normalized))
    }

    fn is_dir(&self, path: &Path) -> bool {
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        let normalized = Self::normalize(path);
        files
            .keys()
            .any(|k| k != &normalized && k.starts_with(&normalized))
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        files
            .get(&Self::normalize(path))
            .map(|(content, modified)| FileStat {
                size_bytes: content.len() as u64,
                modified: Some(*modified),
            })
            .ok_or_else(|| Self::not_found(path))
    }

    fn ensure_dir(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        files
            .remove(&Self::normalize(path))
            .map(|_| ())
            .ok_or_else(|| Self::not_found(path))
    }

    fn canonicalize_ancestor(&self, path: &Path) -> io::Result<PathBuf> {
        Ok(Self::normalize(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn mem_fs_round_trips_content() {
        let fs = MemFs::new();
        fs.write(Path::new("/repo/a.txt"), "hello").expect("write");
        assert_eq!(fs.read(Path::new("/repo/a.txt")).expect("read"), "hello");
        assert!(fs.exists(Path::new("/repo/a.txt")));
        assert!(fs.exists(Path::new("/repo")));

        fs.remove(Path::new("/repo/a.txt")).expect("remove");
        assert!(!fs.exists(Path::new("/repo/a.txt")));
    }

    #[test]
    fn mem_fs_normalizes_dot_segments() {
        let fs = MemFs::with_files(&[("/repo/src/lib.rs", "x")]);
        assert!(fs.exists(Path::new("/repo/./src/../src/lib.rs")));
        assert_eq!(
            fs.canonicalize_ancestor(Path::new("/repo/src/../escape.txt"))
                .expect("canonicalize"),
            PathBuf::from("/repo/escape.txt")
        );
    }

    #[test]
    fn real_fs_canonicalizes_missing_leaf() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = RealFs;
        let target = dir.path().join("not_yet/created.txt");
        let resolved = fs.canonicalize_ancestor(&target).expect("resolve");
        assert!(resolved.ends_with("not_yet/created.txt"));
    }

    #[test]
    fn real_fs_resolves_parent_escapes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = RealFs;
        let inside = dir.path().join("sub/../other.txt");
        let resolved = fs.canonicalize_ancestor(&inside).expect("resolve");
        assert!(resolved.ends_with("other.txt"));
        assert!(!resolved.to_string_lossy().contains(".."));
    }
}
