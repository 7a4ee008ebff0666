//! Filesystem capability

use crate::error::{PlatformError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Options for [`FileSystem::converge_file_contents`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvergeOpts {
    /// Report whether the file would change without touching it
    pub dry_run: bool,
}

impl ConvergeOpts {
    pub fn dry_run() -> Self {
        Self { dry_run: true }
    }
}

/// The file operations the reconciliation core needs
pub trait FileSystem: Send + Sync {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write the file, creating parent directories as needed
    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()>;

    fn file_exists(&self, path: &Path) -> bool;

    /// Direct entries of a directory
    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Follow symlinks to the final target; a regular file resolves to itself
    fn read_and_follow_link(&self, path: &Path) -> Result<PathBuf>;

    /// Point `link` at `target`, replacing whatever `link` was
    fn symlink(&self, target: &Path, link: &Path) -> Result<()>;

    fn copy_file(&self, from: &Path, to: &Path) -> Result<()>;

    fn read_file_string(&self, path: &Path) -> Result<String> {
        let bytes = self.read_file(path)?;
        String::from_utf8(bytes).map_err(|e| {
            PlatformError::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }

    /// Make `path` hold exactly `contents`, returning whether it changed.
    ///
    /// A missing file counts as changed.
    fn converge_file_contents(&self, path: &Path, contents: &[u8], opts: ConvergeOpts) -> Result<bool> {
        if self.file_exists(path) {
            if let Ok(existing) = self.read_file(path) {
                if existing == contents {
                    return Ok(false);
                }
            }
        }
        if opts.dry_run {
            return Ok(true);
        }
        self.write_file(path, contents)?;
        Ok(true)
    }
}

/// The real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| PlatformError::io(path, e))
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| PlatformError::io(parent, e))?;
            }
        }
        fs::write(path, contents).map_err(|e| PlatformError::io(path, e))
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.symlink_metadata().is_ok()
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(path)
            .map_err(|e| PlatformError::io(path, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect::<Vec<_>>();
        entries.sort();
        Ok(entries)
    }

    fn read_and_follow_link(&self, path: &Path) -> Result<PathBuf> {
        fs::canonicalize(path).map_err(|e| PlatformError::io(path, e))
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        if let Ok(existing) = fs::read_link(link) {
            if existing == target {
                return Ok(());
            }
        }
        if link.symlink_metadata().is_ok() {
            fs::remove_file(link).map_err(|e| PlatformError::io(link, e))?;
        }
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent).map_err(|e| PlatformError::io(parent, e))?;
        }
        std::os::unix::fs::symlink(target, link).map_err(|e| PlatformError::io(link, e))
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|e| PlatformError::io(parent, e))?;
        }
        fs::copy(from, to)
            .map(|_| ())
            .map_err(|e| PlatformError::io(from, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_converge_file_contents() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("etc/network/interfaces");
        let fs = OsFileSystem;

        assert!(fs.converge_file_contents(&path, b"auto lo\n", ConvergeOpts::dry_run()).unwrap());
        assert!(!path.exists());

        assert!(fs.converge_file_contents(&path, b"auto lo\n", ConvergeOpts::default()).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "auto lo\n");

        assert!(!fs.converge_file_contents(&path, b"auto lo\n", ConvergeOpts::default()).unwrap());
        assert!(!fs.converge_file_contents(&path, b"auto lo\n", ConvergeOpts::dry_run()).unwrap());
    }

    #[test]
    fn test_symlink_replaces_regular_file() {
        let temp = tempdir().unwrap();
        let target = temp.path().join("run/resolv.conf");
        let link = temp.path().join("resolv.conf");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, "nameserver 8.8.8.8\n").unwrap();
        std::fs::write(&link, "old").unwrap();

        let fs = OsFileSystem;
        fs.symlink(&target, &link).unwrap();

        assert_eq!(std::fs::read_link(&link).unwrap(), target);
        assert_eq!(fs.read_and_follow_link(&link).unwrap(), target.canonicalize().unwrap());
    }

    #[test]
    fn test_list_dir_sorted() {
        let temp = tempdir().unwrap();
        std::fs::create_dir(temp.path().join("eth1")).unwrap();
        std::fs::create_dir(temp.path().join("eth0")).unwrap();

        let entries = OsFileSystem.list_dir(temp.path()).unwrap();
        assert_eq!(entries, vec![temp.path().join("eth0"), temp.path().join("eth1")]);
    }
}
