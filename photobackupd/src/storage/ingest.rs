use std::fmt::Display;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use axum::body::Bytes;
use axum::extract::Multipart;
use chrono::Local;
use futures::{Stream, StreamExt};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use shared::protocol::UPLOAD_FIELD;
use crate::error::{Error, Result};
use crate::storage::layout::{FileName, StorageLayout};

/// One incoming file, before anything has touched the disk
pub struct UploadRequest<S> {
    /// Name from the `X-File-Name` header, if the client sent one
    pub declared_file_name: Option<String>,
    /// Name from the multipart part
    pub original_file_name: String,
    pub content_type: String,
    pub body: S,
}

/// A file that made it to disk
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub absolute_path: PathBuf,
    /// Relative to the backup root; the only path ever shown to clients
    pub relative_path: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
}

/// Validates uploads and streams them into the storage layout
#[derive(Debug, Clone)]
pub struct UploadIngestor {
    layout: StorageLayout,
    max_bytes: u64,
}

impl UploadIngestor {
    pub fn new(layout: StorageLayout, max_bytes: u64) -> Self {
        Self { layout, max_bytes }
    }

    /// Pull the single `photo` part out of a multipart body and store it
    pub async fn ingest_multipart(
        &self,
        mut multipart: Multipart,
        declared_file_name: Option<String>,
    ) -> Result<StoredFile> {
        // The guard keeps an accepted photo deletable until the whole body has been read
        let mut stored: Option<(StoredFile, PartialFile)> = None;

        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(e) => return Err(Error::validation(e.body_text())),
            };

            let name = field.name().unwrap_or_default().to_string();
            if name != UPLOAD_FIELD {
                if field.file_name().is_some() {
                    tracing::debug!("Rejecting upload with extra file field {:?}", name);
                    return Err(Error::validation("unexpected field"));
                }
                // Plain text fields are ignored
                continue;
            }

            if stored.is_some() {
                tracing::debug!("Rejecting upload with more than one {:?} part", name);
                return Err(Error::validation("unexpected field"));
            }

            let request = UploadRequest {
                declared_file_name: declared_file_name.clone(),
                original_file_name: field.file_name().unwrap_or_default().to_string(),
                content_type: field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string(),
                body: field,
            };

            let file = self.store(request).await?;
            let guard = PartialFile::new(file.absolute_path.clone());
            stored = Some((file, guard));
        }

        match stored {
            Some((file, guard)) => {
                guard.keep();
                Ok(file)
            }
            None => Err(Error::validation("no file received")),
        }
    }

    /// Validate and write one upload. Leaves nothing behind on failure.
    pub async fn store<S, E>(&self, request: UploadRequest<S>) -> Result<StoredFile>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Display,
    {
        if !request.content_type.to_ascii_lowercase().starts_with("image/") {
            return Err(Error::validation("unsupported content type"));
        }

        let now = Local::now();
        let dir = self.layout.resolve_destination(&now).await?;
        let name = FileName::plan(
            request.declared_file_name.as_deref(),
            &request.original_file_name,
            now.timestamp_millis(),
        );
        let (file, path, file_name) = create_unique(&dir, &name).await?;

        // Removes the file on every early return, and when this future is dropped mid-stream.
        // Rebinding `file` after the guard closes the handle before the guard unlinks.
        let guard = PartialFile::new(path.clone());
        let mut file = file;

        tracing::debug!("Writing upload to {}", path.display());

        let body = request.body;
        futures::pin_mut!(body);

        let mut size_bytes: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk
                .map_err(|e| Error::validation(format!("Failed to read upload: {}", e)))?;

            size_bytes += chunk.len() as u64;
            if size_bytes > self.max_bytes {
                return Err(Error::validation("too large"));
            }

            file.write_all(&chunk).await.map_err(|e| Error::storage(&path, e))?;
        }

        file.flush().await.map_err(|e| Error::storage(&path, e))?;
        drop(file);
        guard.keep();

        let stored = StoredFile {
            relative_path: self.layout.relative_path(&path),
            absolute_path: path,
            file_name,
            size_bytes,
            mime_type: request.content_type,
        };

        tracing::info!(
            "Stored {} ({} bytes, {})",
            stored.relative_path,
            stored.size_bytes,
            stored.mime_type
        );

        Ok(stored)
    }
}

/// Create the file with create-new semantics, bumping the suffix on collision
async fn create_unique(dir: &Path, name: &FileName) -> Result<(File, PathBuf, String)> {
    let mut attempt = 0u32;
    loop {
        let file_name = name.render(attempt);
        let path = dir.join(&file_name);
        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => return Ok((file, path, file_name)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::debug!("{} exists, retrying with suffix", file_name);
                attempt += 1;
            }
            Err(e) => return Err(Error::storage(&path, e)),
        }
    }
}

/// Deletes a file that never became a complete backup.
///
/// Cleanup runs in `Drop` so it also fires when the upload future is dropped
/// mid-stream, e.g. when shutdown gives up on a stalled client.
struct PartialFile {
    path: Option<PathBuf>,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    /// The file is complete; leave it on disk
    fn keep(mut self) {
        self.path = None;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!("Removed partial upload {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove partial upload {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn ingestor(root: &Path, max_bytes: u64) -> UploadIngestor {
        UploadIngestor::new(StorageLayout::open(root).unwrap(), max_bytes)
    }

    fn request(
        content_type: &str,
        chunks: Vec<std::result::Result<Bytes, String>>,
    ) -> UploadRequest<impl Stream<Item = std::result::Result<Bytes, String>>> {
        UploadRequest {
            declared_file_name: None,
            original_file_name: "IMG_0001.jpg".to_string(),
            content_type: content_type.to_string(),
            body: futures::stream::iter(chunks),
        }
    }

    fn count_files(root: &Path) -> usize {
        let mut count = 0;
        for entry in std::fs::read_dir(root).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                count += count_files(&path);
            } else {
                count += 1;
            }
        }
        count
    }

    #[tokio::test]
    async fn test_store_writes_under_todays_partition() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path(), 1024);

        let stored = ingestor
            .store(request("image/jpeg", vec![Ok(Bytes::from_static(b"abc")), Ok(Bytes::from_static(b"def"))]))
            .await
            .unwrap();

        let today = Local::now().format("%Y-%m-%d").to_string();
        assert!(stored.absolute_path.starts_with(dir.path().join(&today)));
        assert!(stored.relative_path.starts_with(&format!("{}/", today)));
        assert!(stored.file_name.ends_with("-IMG_0001.jpg"));
        assert_eq!(stored.size_bytes, 6);
        assert_eq!(std::fs::read(&stored.absolute_path).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_rejects_non_image() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path(), 1024);

        let err = ingestor
            .store(request("text/plain", vec![Ok(Bytes::from_static(b"hello"))]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(ref m) if m == "unsupported content type"));
        assert_eq!(count_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_exact_limit_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path(), 8);

        let stored = ingestor
            .store(request("image/png", vec![Ok(Bytes::from(vec![0u8; 5])), Ok(Bytes::from(vec![1u8; 3]))]))
            .await
            .unwrap();

        assert_eq!(stored.size_bytes, 8);
    }

    #[tokio::test]
    async fn test_over_limit_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path(), 8);

        let err = ingestor
            .store(request("image/png", vec![Ok(Bytes::from(vec![0u8; 5])), Ok(Bytes::from(vec![1u8; 4]))]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(ref m) if m == "too large"));
        assert_eq!(count_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_stream_error_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path(), 1024);

        let err = ingestor
            .store(request("image/jpeg", vec![Ok(Bytes::from_static(b"abc")), Err("connection reset".to_string())]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(count_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_dropped_upload_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path(), 1024);

        // First chunk arrives, then the client goes quiet forever
        let body = futures::stream::iter(vec![Ok::<_, Infallible>(Bytes::from_static(b"half a photo"))])
            .chain(futures::stream::pending());
        let upload = tokio::spawn(async move {
            ingestor
                .store(UploadRequest {
                    declared_file_name: None,
                    original_file_name: "stalled.jpg".to_string(),
                    content_type: "image/jpeg".to_string(),
                    body,
                })
                .await
        });

        for _ in 0..200 {
            if count_files(dir.path()) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(count_files(dir.path()), 1, "upload should be in progress");

        upload.abort();
        assert!(upload.await.unwrap_err().is_cancelled());
        assert_eq!(count_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_same_name_same_millisecond_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let name = FileName::plan(None, "IMG_0001.jpg", 1700000000000);

        let (_, first, _) = create_unique(dir.path(), &name).await.unwrap();
        let (_, second, second_name) = create_unique(dir.path(), &name).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(second_name, "1700000000000-IMG_0001-1.jpg");
    }

    #[tokio::test]
    async fn test_concurrent_uploads_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path(), 1024);

        let uploads = (0..8).map(|_| {
            let ingestor = ingestor.clone();
            tokio::spawn(async move {
                let body = futures::stream::iter(vec![Ok::<_, Infallible>(Bytes::from_static(b"pixels"))]);
                ingestor
                    .store(UploadRequest {
                        declared_file_name: Some("same.jpg".to_string()),
                        original_file_name: String::new(),
                        content_type: "image/jpeg".to_string(),
                        body,
                    })
                    .await
            })
        }).collect::<Vec<_>>();

        let mut paths = Vec::new();
        for upload in uploads {
            paths.push(upload.await.unwrap().unwrap().absolute_path);
        }
        paths.sort();
        paths.dedup();

        assert_eq!(paths.len(), 8);
        assert_eq!(count_files(dir.path()), 8);
    }
}
