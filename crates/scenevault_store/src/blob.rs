//! Content-addressed blob storage.
//!
//! Blobs live at `<root>/<hash[0..2]>/<hash>`. Writes stream into
//! `<root>/.tmp/<uuid>` and are renamed into place once the hash is known,
//! so a blob path is either absent or complete.

use crate::error::{Result, StoreError};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::debug;

const TMP_DIR: &str = ".tmp";
const CHUNK_SIZE: usize = 64 * 1024;

/// Result of storing a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub hash: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open (and create if needed) a blob store rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(TMP_DIR)).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Hash of `bytes` as stored by this blob store.
    pub fn hash_bytes(bytes: &[u8]) -> String {
        blake3::hash(bytes).to_hex().to_string()
    }

    /// Path a blob with this hash is stored at.
    pub fn path_for(&self, hash: &str) -> Result<PathBuf> {
        validate_hash(hash)?;
        Ok(self.root.join(&hash[..2]).join(hash))
    }

    /// Stream `reader` into the store and return its hash.
    ///
    /// Storing content that is already present leaves the existing blob untouched.
    pub async fn put<R>(&self, mut reader: R) -> Result<BlobInfo>
    where
        R: AsyncRead + Unpin,
    {
        let tmp_path = self.root.join(TMP_DIR).join(uuid::Uuid::new_v4().to_string());
        let written = async {
            let mut file = fs::File::create(&tmp_path).await?;
            let mut hasher = blake3::Hasher::new();
            let mut buf = vec![0u8; CHUNK_SIZE];
            let mut size = 0u64;
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                file.write_all(&buf[..n]).await?;
                size += n as u64;
            }
            file.sync_all().await?;
            Ok::<_, std::io::Error>(BlobInfo {
                hash: hasher.finalize().to_hex().to_string(),
                size,
            })
        }
        .await;

        let info = match written {
            Ok(info) => info,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(e.into());
            }
        };

        let dest = self.path_for(&info.hash)?;
        if fs::try_exists(&dest).await? {
            fs::remove_file(&tmp_path).await?;
            debug!(hash = %info.hash, "Blob already stored");
            return Ok(info);
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        if let Err(e) = fs::rename(&tmp_path, &dest).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        debug!(hash = %info.hash, size = info.size, "Blob stored");
        Ok(info)
    }

    pub async fn put_bytes(&self, bytes: &[u8]) -> Result<BlobInfo> {
        self.put(bytes).await
    }

    /// Open a blob for reading.
    pub async fn open(&self, hash: &str) -> Result<fs::File> {
        let path = self.path_for(hash)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::not_found(format!("Blob {} not found", hash)))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read(&self, hash: &str) -> Result<Vec<u8>> {
        let mut file = self.open(hash).await?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).await?;
        Ok(bytes)
    }

    pub async fn exists(&self, hash: &str) -> Result<bool> {
        Ok(fs::try_exists(self.path_for(hash)?).await?)
    }

    /// Delete a blob. Returns false if it was not there.
    pub async fn remove(&self, hash: &str) -> Result<bool> {
        match fs::remove_file(self.path_for(hash)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// All stored hashes, in no particular order.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut hashes = Vec::new();
        let mut shards = fs::read_dir(&self.root).await?;
        while let Some(shard) = shards.next_entry().await? {
            let shard_name = shard.file_name();
            let Some(shard_name) = shard_name.to_str() else {
                continue;
            };
            if shard_name == TMP_DIR || !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut entries = fs::read_dir(shard.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                if let Some(name) = entry.file_name().to_str() {
                    if validate_hash(name).is_ok() && name.starts_with(shard_name) {
                        hashes.push(name.to_string());
                    }
                }
            }
        }
        Ok(hashes)
    }

    /// Remove temporary upload files older than `max_age`.
    pub async fn remove_stale_temp(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        let mut entries = fs::read_dir(self.root.join(TMP_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let modified = entry.metadata().await?.modified()?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age >= max_age {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn validate_hash(hash: &str) -> Result<()> {
    if blake3::Hash::from_hex(hash).is_err() {
        return Err(StoreError::bad_request(format!("Invalid blob hash: {}", hash)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path()).await.unwrap();

        let first = store.put_bytes(b"hello world").await.unwrap();
        let second = store.put_bytes(b"hello world").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.hash, BlobStore::hash_bytes(b"hello world"));
        assert_eq!(store.list().await.unwrap(), vec![first.hash.clone()]);
        assert_eq!(store.read(&first.hash).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path()).await.unwrap();
        store.put_bytes(b"a").await.unwrap();
        store.put_bytes(b"a").await.unwrap();

        let mut tmp = std::fs::read_dir(dir.path().join(TMP_DIR)).unwrap();
        assert!(tmp.next().is_none());
    }

    #[tokio::test]
    async fn test_open_missing_blob() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path()).await.unwrap();
        let hash = BlobStore::hash_bytes(b"never stored");

        assert!(!store.exists(&hash).await.unwrap());
        let err = store.open(&hash).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_hash_rejected() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path()).await.unwrap();
        let err = store.open("../../etc/passwd").await.unwrap_err();
        assert!(matches!(err, StoreError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_concurrent_identical_writes() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path()).await.unwrap();
        let payload = vec![7u8; 200_000];

        let (a, b) = tokio::join!(store.put_bytes(&payload), store.put_bytes(&payload));
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_stale_temp() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path()).await.unwrap();
        std::fs::write(dir.path().join(TMP_DIR).join("partial"), b"xx").unwrap();

        assert_eq!(store.remove_stale_temp(Duration::ZERO).await.unwrap(), 1);
    }
}
