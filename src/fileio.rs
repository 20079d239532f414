//! Small file-handling pieces shared by the codecs: cooperative cancellation and
//! all-or-nothing file writes.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cheap cancellation flag checked by codec operations at record boundaries.
/// Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// A file written to a sibling path and renamed into place on commit. The sibling is
/// removed on every other exit path, including panics, errors and cancellation.
#[derive(Debug)]
pub struct AtomicFile {
    tmp: PathBuf,
    dest: PathBuf,
    file: Option<File>,
}

impl AtomicFile {
    pub fn create(dest: impl AsRef<Path>) -> io::Result<Self> {
        let dest = dest.as_ref().to_path_buf();
        let mut name = dest
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?
            .to_os_string();
        name.push(format!(".tmp{}", std::process::id()));
        let tmp = dest.with_file_name(name);
        let file = File::create(&tmp)?;
        Ok(Self { tmp, dest, file: Some(file) })
    }

    pub fn writer(&mut self) -> &mut File {
        self.file.as_mut().expect("writer after commit")
    }

    /// Flushes, fsyncs and renames into place.
    pub fn commit(mut self) -> io::Result<()> {
        let file = self.file.take().expect("double commit");
        file.sync_all()?;
        drop(file);
        std::fs::rename(&self.tmp, &self.dest)
    }

    /// Drops the sibling file without touching the destination.
    pub fn discard(mut self) {
        self.file.take();
        let _ = std::fs::remove_file(&self.tmp);
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            let _ = std::fs::remove_file(&self.tmp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use tempdir::TempDir;

    #[test]
    fn test_commit_replaces_file() {
        let dir = TempDir::new("fileio").unwrap();
        let dest = dir.path().join("out.dat");
        std::fs::write(&dest, b"old").unwrap();

        let mut af = AtomicFile::create(&dest).unwrap();
        af.writer().write_all(b"new contents").unwrap();
        af.commit().unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"new contents");
        // No stray siblings remain.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_drop_without_commit_leaves_destination() {
        let dir = TempDir::new("fileio").unwrap();
        let dest = dir.path().join("out.dat");
        std::fs::write(&dest, b"old").unwrap();

        {
            let mut af = AtomicFile::create(&dest).unwrap();
            af.writer().write_all(b"half-written").unwrap();
            // dropped here
        }
        assert_eq!(std::fs::read(&dest).unwrap(), b"old");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let shared = token.clone();
        assert!(!token.is_cancelled());
        shared.cancel();
        assert!(token.is_cancelled());
    }
}
