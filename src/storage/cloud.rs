//! S3-compatible object store backend (feature `s3`).
//!
//! One bucket per deployment, one key prefix per archive name. The AWS SDK
//! is async; this backend owns a small multi-thread [`tokio::runtime::Runtime`]
//! and blocks on it, since [`super::StorageProvider`] is a synchronous
//! contract end to end. Settings reads carry a short fixed timeout — a
//! missing settings object just means "brand-new archive" and callers
//! shouldn't stall on it; index and backup-object reads have none.
//!
//! Writes spool to a real temporary file first (mirroring the local
//! backend's own temp-file discipline) and upload in one shot on
//! [`super::StorageWriter::finish`] — the moment analogous to the
//! original's piped writer whose `Close` joins the background upload task.

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::Duration;

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tempfile::NamedTempFile;
use tokio::runtime::Runtime;

use super::{object_rel_path, StorageError, StorageProvider, StorageWriter};

const SETTINGS_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of [`CloudStorageProvider::get_object`]: kept separate from
/// [`StorageError`] so callers are forced to decide, at each call site,
/// which sentinel "not found" error the object kind in question wants —
/// rather than a generic I/O failure silently collapsing into one.
enum CloudGetError {
    NotFound,
    Other(StorageError),
}

struct Inner {
    client: Client,
    bucket: String,
    prefix: String,
    rt: Runtime,
}

#[derive(Clone)]
pub struct CloudStorageProvider {
    inner: Arc<Inner>,
}

impl CloudStorageProvider {
    pub fn new(bucket: impl Into<String>, archive_name: impl Into<String>, endpoint: Option<String>) -> Result<Self, StorageError> {
        let rt = Runtime::new().map_err(|e| StorageError::ObjectStore(e.to_string()))?;
        let client = rt.block_on(async {
            let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
            if let Some(ref endpoint) = endpoint {
                loader = loader.endpoint_url(endpoint);
            }
            let config = loader.load().await;
            Client::new(&config)
        });
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                bucket: bucket.into(),
                prefix: archive_name.into(),
                rt,
            }),
        })
    }

    fn key(&self, name: &str) -> String {
        format!("{}/{}", self.inner.prefix, name)
    }

    fn backup_key(&self, hash: &str) -> String {
        self.key(&object_rel_path(hash))
    }

    /// Fetches `key`'s bytes. Distinguishes "object genuinely absent" (the
    /// SDK's `NoSuchKey` service error) from everything else — a network
    /// failure, a timeout, a permission error — so callers can tell a brand
    /// new archive apart from a transient backend hiccup instead of treating
    /// both as "not found".
    fn get_object(&self, key: &str, timeout: Option<Duration>) -> Result<Vec<u8>, CloudGetError> {
        let inner = &self.inner;
        let fut = async { inner.client.get_object().bucket(&inner.bucket).key(key).send().await };
        let result = inner.rt.block_on(async {
            match timeout {
                Some(d) => tokio::time::timeout(d, fut).await.map_err(|_| "timed out".to_string())?,
                None => Ok(fut.await),
            }
        });
        let output = match result {
            Ok(Ok(o)) => o,
            Ok(Err(e)) => {
                if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) {
                    return Err(CloudGetError::NotFound);
                }
                return Err(CloudGetError::Other(StorageError::ObjectStore(e.to_string())));
            }
            Err(msg) => return Err(CloudGetError::Other(StorageError::ObjectStore(msg))),
        };
        let bytes = inner
            .rt
            .block_on(output.body.collect())
            .map_err(|e| CloudGetError::Other(StorageError::ObjectStore(e.to_string())))?;
        Ok(bytes.into_bytes().to_vec())
    }

    fn put_object_from_file(&self, key: &str, path: &std::path::Path) -> Result<(), StorageError> {
        let inner = &self.inner;
        inner.rt.block_on(async {
            let body = ByteStream::from_path(path)
                .await
                .map_err(|e| StorageError::ObjectStore(e.to_string()))?;
            inner
                .client
                .put_object()
                .bucket(&inner.bucket)
                .key(key)
                .body(body)
                .send()
                .await
                .map_err(|e| StorageError::ObjectStore(e.to_string()))?;
            Ok(())
        })
    }

    fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        let inner = &self.inner;
        inner.rt.block_on(async {
            inner
                .client
                .delete_object()
                .bucket(&inner.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| StorageError::ObjectStore(e.to_string()))?;
            Ok(())
        })
    }

    fn spooling_writer(&self, key: String) -> Result<Box<dyn StorageWriter>, StorageError> {
        Ok(Box::new(CloudWriter {
            file: NamedTempFile::new()?,
            provider: self.clone(),
            key,
        }))
    }
}

/// Spools writes to a temp file; [`StorageWriter::finish`] uploads it and
/// joins, exactly where the original's `blobWriteCloser.Close` blocks on its
/// background upload goroutine's `sync.WaitGroup`.
struct CloudWriter {
    file: NamedTempFile,
    provider: CloudStorageProvider,
    key: String,
}

impl Write for CloudWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl StorageWriter for CloudWriter {
    fn finish(mut self: Box<Self>) -> Result<(), StorageError> {
        self.file.flush()?;
        self.provider.put_object_from_file(&self.key, self.file.path())
    }
}

impl StorageProvider for CloudStorageProvider {
    fn read_settings(&self) -> Result<Box<dyn Read + Send>, StorageError> {
        match self.get_object(&self.key("settings"), Some(SETTINGS_READ_TIMEOUT)) {
            Ok(bytes) => Ok(Box::new(std::io::Cursor::new(bytes))),
            Err(CloudGetError::NotFound) => Err(StorageError::SettingsNotFound),
            Err(CloudGetError::Other(e)) => Err(e),
        }
    }

    fn write_settings(&self) -> Result<Box<dyn StorageWriter>, StorageError> {
        self.spooling_writer(self.key("settings"))
    }

    fn delete_settings(&self) -> Result<(), StorageError> {
        self.delete_object(&self.key("settings"))
    }

    fn read_index(&self) -> Result<Box<dyn Read + Send>, StorageError> {
        match self.get_object(&self.key("index"), None) {
            Ok(bytes) => Ok(Box::new(std::io::Cursor::new(bytes))),
            Err(CloudGetError::NotFound) => Err(StorageError::IndexNotFound),
            Err(CloudGetError::Other(e)) => Err(e),
        }
    }

    fn write_index(&self) -> Result<Box<dyn StorageWriter>, StorageError> {
        self.spooling_writer(self.key("index"))
    }

    fn delete_index(&self) -> Result<(), StorageError> {
        self.delete_object(&self.key("index"))
    }

    fn read_backup_file(&self, hash: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        match self.get_object(&self.backup_key(hash), None) {
            Ok(bytes) => Ok(Box::new(std::io::Cursor::new(bytes))),
            Err(CloudGetError::NotFound) => Err(StorageError::BackupFileNotFound(hash.to_string())),
            Err(CloudGetError::Other(e)) => Err(e),
        }
    }

    fn write_backup_file(&self, hash: &str, data: &mut dyn Read) -> Result<(), StorageError> {
        let mut tmp = NamedTempFile::new()?;
        std::io::copy(data, &mut tmp)?;
        tmp.flush()?;
        tmp.as_file_mut().seek(SeekFrom::Start(0))?;
        self.put_object_from_file(&self.backup_key(hash), tmp.path())
    }

    fn delete_backup_file(&self, hash: &str) -> Result<(), StorageError> {
        self.delete_object(&self.backup_key(hash))
    }
}
