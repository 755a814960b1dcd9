//! Local filesystem backend.
//!
//! Layout under `<root>/<archive name>/`:
//! - `.settings` — settings record
//! - `.index.gz.encrypted` — the encrypted, gzip-wrapped index
//! - `<hash[0:2]>/<hash[2:4]>/<hash>` — backup objects
//!
//! Deleting a backup object also best-effort removes its now-possibly-empty
//! enclosing directories; failures there (directory not empty, or already
//! gone) are silently ignored, matching the original's cleanup behavior.

use std::fs::{self, File};
use std::io::{self};
use std::path::{Path, PathBuf};

use super::{object_rel_path, StorageError, StorageProvider, StorageWriter};

const FILENAME_SETTINGS: &str = ".settings";
const FILENAME_INDEX: &str = ".index.gz.encrypted";

pub struct LocalFilesystemProvider {
    root: PathBuf,
}

impl LocalFilesystemProvider {
    /// `target_root` is the archive's own directory (already including the
    /// archive name); it is created with the archive owner as sole reader
    /// if it doesn't exist yet.
    pub fn new(target_root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = target_root.into();
        fs::create_dir_all(&root)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&root, fs::Permissions::from_mode(0o700))?;
        }
        Ok(Self { root })
    }

    fn settings_path(&self) -> PathBuf {
        self.root.join(FILENAME_SETTINGS)
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(FILENAME_INDEX)
    }

    fn backup_path(&self, hash: &str) -> PathBuf {
        self.root.join(object_rel_path(hash))
    }

    fn open_read(path: &Path, not_found: StorageError) -> Result<Box<dyn io::Read + Send>, StorageError> {
        match File::open(path) {
            Ok(f) => Ok(Box::new(f)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(not_found),
            Err(e) => Err(e.into()),
        }
    }

    fn create_write(path: &Path) -> Result<Box<dyn StorageWriter>, StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let f = File::create(path)?;
        Ok(Box::new(LocalWriter(f)))
    }

    fn remove_if_present(path: &Path) -> Result<(), StorageError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// A plain file write handle; `finish` is a flush, matching the local
/// backend's synchronous nature (nothing to join).
struct LocalWriter(File);

impl io::Write for LocalWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl StorageWriter for LocalWriter {
    fn finish(self: Box<Self>) -> Result<(), StorageError> {
        let mut inner = self.0;
        io::Write::flush(&mut inner)?;
        Ok(())
    }
}

impl StorageProvider for LocalFilesystemProvider {
    fn read_settings(&self) -> Result<Box<dyn io::Read + Send>, StorageError> {
        Self::open_read(&self.settings_path(), StorageError::SettingsNotFound)
    }

    fn write_settings(&self) -> Result<Box<dyn StorageWriter>, StorageError> {
        Self::create_write(&self.settings_path())
    }

    fn delete_settings(&self) -> Result<(), StorageError> {
        Self::remove_if_present(&self.settings_path())
    }

    fn read_index(&self) -> Result<Box<dyn io::Read + Send>, StorageError> {
        Self::open_read(&self.index_path(), StorageError::IndexNotFound)
    }

    fn write_index(&self) -> Result<Box<dyn StorageWriter>, StorageError> {
        Self::create_write(&self.index_path())
    }

    fn delete_index(&self) -> Result<(), StorageError> {
        Self::remove_if_present(&self.index_path())
    }

    fn read_backup_file(&self, hash: &str) -> Result<Box<dyn io::Read + Send>, StorageError> {
        Self::open_read(&self.backup_path(hash), StorageError::BackupFileNotFound(hash.to_string()))
    }

    fn write_backup_file(&self, hash: &str, data: &mut dyn io::Read) -> Result<(), StorageError> {
        let path = self.backup_path(hash);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(parent, fs::Permissions::from_mode(0o700))?;
            }
        }
        let mut f = File::create(&path)?;
        io::copy(data, &mut f)?;
        Ok(())
    }

    fn delete_backup_file(&self, hash: &str) -> Result<(), StorageError> {
        let path = self.backup_path(hash);
        Self::remove_if_present(&path)?;
        // Best-effort cleanup of the two enclosing hash-prefix directories.
        // Ignore failures: non-empty (other objects still live there) or
        // already gone are both fine outcomes.
        if let Some(leaf_dir) = path.parent() {
            let _ = fs::remove_dir(leaf_dir);
            if let Some(mid_dir) = leaf_dir.parent() {
                let _ = fs::remove_dir(mid_dir);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write as _};

    #[test]
    fn settings_round_trip_and_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalFilesystemProvider::new(dir.path().join("backup")).unwrap();

        assert!(matches!(provider.read_settings(), Err(StorageError::SettingsNotFound)));

        let mut w = provider.write_settings().unwrap();
        w.write_all(b"salt-bytes").unwrap();
        w.finish().unwrap();

        let mut r = provider.read_settings().unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"salt-bytes");
    }

    #[test]
    fn backup_file_round_trip_and_directory_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalFilesystemProvider::new(dir.path().join("backup")).unwrap();
        let hash = "0123456789abcdef0123456789abcdef01234567";

        provider.write_backup_file(hash, &mut &b"payload"[..]).unwrap();
        let mut r = provider.read_backup_file(hash).unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"payload");

        provider.delete_backup_file(hash).unwrap();
        assert!(matches!(
            provider.read_backup_file(hash),
            Err(StorageError::BackupFileNotFound(_))
        ));
        // Enclosing hash-prefix directories should have been cleaned up.
        assert!(!dir.path().join("backup").join(&hash[0..2]).exists());
    }
}
