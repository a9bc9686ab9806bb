//! Document byte sources + hash-addressed on-disk document storage for ACF.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "acf-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no document stored for {url}")]
    NotFound { url: String },
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Supplies raw document bytes by url. The fusion core only ever reads through this.
pub trait DocumentSource: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryDocuments {
    docs: HashMap<String, Vec<u8>>,
}

impl InMemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: impl AsRef<str>, bytes: impl Into<Vec<u8>>) {
        self.docs.insert(canonical_url(url.as_ref()), bytes.into());
    }

    pub fn with(mut self, url: impl AsRef<str>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(url, bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

impl DocumentSource for InMemoryDocuments {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        self.docs
            .get(&canonical_url(url))
            .cloned()
            .ok_or_else(|| StorageError::NotFound { url: url.to_string() })
    }
}

/// Trimmed url without fragment; two links differing only by `#page=2` are the same document.
pub fn canonical_url(url: &str) -> String {
    let trimmed = url.trim();
    match trimmed.split_once('#') {
        Some((base, _)) => base.to_string(),
        None => trimmed.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub url_key: String,
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn url_key(url: &str) -> String {
        Self::sha256_hex(canonical_url(url).as_bytes())
    }

    pub fn document_relative_path(&self, url: &str) -> PathBuf {
        let key = Self::url_key(url);
        let ext = extension_for_url(url);
        PathBuf::from(&key[..2]).join(format!("{key}.{ext}"))
    }

    /// Store bytes under the url's hash path using an atomic temp-file rename.
    /// Identical content already on disk is reported as deduplicated and left untouched.
    pub async fn store_document(&self, url: &str, bytes: &[u8]) -> anyhow::Result<StoredDocument> {
        let url_key = Self::url_key(url);
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = self.document_relative_path(url);
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating document directory {}", parent.display()))?;

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking document path {}", absolute_path.display()))?
        {
            let existing = fs::read(&absolute_path)
                .await
                .with_context(|| format!("reading stored document {}", absolute_path.display()))?;
            if Self::sha256_hex(&existing) == content_hash {
                return Ok(StoredDocument {
                    url_key,
                    content_hash,
                    relative_path,
                    absolute_path,
                    byte_size: bytes.len(),
                    deduplicated: true,
                });
            }
            warn!(url, path = %absolute_path.display(), "document content changed; replacing stored copy");
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp document file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp document file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp document file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp document {} -> {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }

        debug!(url, path = %absolute_path.display(), bytes = bytes.len(), "stored document");
        Ok(StoredDocument {
            url_key,
            content_hash,
            relative_path,
            absolute_path,
            byte_size: bytes.len(),
            deduplicated: false,
        })
    }

    pub async fn load_document(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.root.join(self.document_relative_path(url));
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                url: url.to_string(),
            }),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    /// Reads every url with at most `concurrency` files open at once.
    /// Missing documents are logged and left out; the fusion core treats them as unreadable candidates.
    pub async fn load_many(&self, urls: &[String], concurrency: usize) -> InMemoryDocuments {
        let limit = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for url in urls {
            let store = self.clone();
            let limit = Arc::clone(&limit);
            let url = url.clone();
            tasks.spawn(async move {
                let _permit = limit.acquire_owned().await.ok();
                let result = store.load_document(&url).await;
                (url, result)
            });
        }

        let mut docs = InMemoryDocuments::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((url, Ok(bytes))) => docs.insert(&url, bytes),
                Ok((url, Err(err))) => warn!(url, error = %err, "document unavailable"),
                Err(err) => warn!(error = %err, "document load task failed"),
            }
        }
        docs
    }
}

fn extension_for_url(url: &str) -> String {
    let path = canonical_url(url);
    let path = path.split('?').next().unwrap_or_default();
    let last = path.rsplit('/').next().unwrap_or_default();
    match last.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            ext.to_ascii_lowercase()
        }
        _ => "bin".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn url_hashing_is_stable_and_ignores_fragments() {
        let hash = DocumentStore::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(
            DocumentStore::url_key("https://ucv.ro/a.pdf#page=2"),
            DocumentStore::url_key(" https://ucv.ro/a.pdf ")
        );
    }

    #[test]
    fn extension_follows_url_path() {
        assert_eq!(extension_for_url("https://ucv.ro/docs/Cifra.PDF?v=3"), "pdf");
        assert_eq!(extension_for_url("https://ucv.ro/download"), "bin");
    }

    #[tokio::test]
    async fn atomic_writes_deduplicate_identical_content() {
        let dir = tempdir().expect("tempdir");
        let store = DocumentStore::new(dir.path());
        let url = "https://ace.ucv.ro/admitere/cifra.pdf";

        let first = store.store_document(url, b"%PDF-1.4 same").await.expect("first store");
        let second = store.store_document(url, b"%PDF-1.4 same").await.expect("second store");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.relative_path, second.relative_path);
        assert!(first.absolute_path.exists());
        assert_eq!(store.load_document(url).await.unwrap(), b"%PDF-1.4 same".to_vec());
    }

    #[tokio::test]
    async fn changed_content_replaces_stored_copy() {
        let dir = tempdir().expect("tempdir");
        let store = DocumentStore::new(dir.path());
        let url = "https://ace.ucv.ro/admitere/cifra.pdf";

        store.store_document(url, b"v1").await.unwrap();
        let second = store.store_document(url, b"v2").await.unwrap();
        assert!(!second.deduplicated);
        assert_eq!(store.load_document(url).await.unwrap(), b"v2".to_vec());
    }

    #[tokio::test]
    async fn load_many_skips_missing_documents() {
        let dir = tempdir().expect("tempdir");
        let store = DocumentStore::new(dir.path());
        store.store_document("https://x.test/a.pdf", b"a").await.unwrap();

        let docs = store
            .load_many(
                &["https://x.test/a.pdf".to_string(), "https://x.test/missing.pdf".to_string()],
                2,
            )
            .await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs.fetch("https://x.test/a.pdf").unwrap(), b"a".to_vec());
        assert!(matches!(
            docs.fetch("https://x.test/missing.pdf"),
            Err(StorageError::NotFound { .. })
        ));
    }
}
