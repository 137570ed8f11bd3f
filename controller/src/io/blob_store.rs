//! Durable storage for screenshots and saved session documents.
//!
//! Screenshots are content-addressed blobs keyed by their SHA-256 digest.
//! Session documents (the event log and its summary) are stored under
//! relative keys such as `sessions/<id>/session.json` and are write-once.
//! Document keys live under [`DOCUMENT_PREFIX`] and never overlap blob paths.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Hex SHA-256 digest of `data`.
pub fn content_digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Opaque blob store contract used by the capture service and recorder.
pub trait BlobStore: Send + Sync {
    /// Store `data` and return its digest. Storing identical bytes twice is a no-op.
    fn put(&self, data: &[u8]) -> Result<String>;
    fn get(&self, digest: &str) -> Result<Vec<u8>>;
    fn exists(&self, digest: &str) -> Result<bool>;

    /// Write a document under `key`. Rewriting identical bytes succeeds; any
    /// other overwrite is rejected.
    fn put_document(&self, key: &str, data: &[u8]) -> Result<()>;
    fn get_document(&self, key: &str) -> Result<Vec<u8>>;
    fn document_exists(&self, key: &str) -> Result<bool>;
}

/// First path component of every document key.
pub const DOCUMENT_PREFIX: &str = "sessions";

/// Reject keys that could escape the store root or land outside
/// [`DOCUMENT_PREFIX`].
pub fn validate_document_key(key: &str) -> Result<()> {
    let path = Path::new(key);
    if key.is_empty()
        || !path
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
    {
        bail!("invalid document key '{key}'");
    }
    let mut components = path.components();
    if components.next() != Some(Component::Normal(DOCUMENT_PREFIX.as_ref()))
        || components.next().is_none()
    {
        bail!("document key '{key}' must be under {DOCUMENT_PREFIX}/");
    }
    Ok(())
}

fn validate_digest(digest: &str) -> Result<()> {
    if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        bail!("invalid blob digest '{digest}'");
    }
    Ok(())
}

/// Filesystem-backed store.
///
/// Layout:
/// - `<root>/objects/<first 2 hex chars>/<remaining hex chars>`
/// - `<root>/<document key>`
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let objects = root.join("objects");
        fs::create_dir_all(&objects)
            .with_context(|| format!("create blob directory {}", objects.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        self.root
            .join("objects")
            .join(&digest[..2])
            .join(&digest[2..])
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, data: &[u8]) -> Result<String> {
        let digest = content_digest(data);
        let path = self.blob_path(&digest);
        if path.exists() {
            debug!(%digest, "blob already stored");
            return Ok(digest);
        }
        write_atomic(&path, data)?;
        debug!(%digest, bytes = data.len(), "blob stored");
        Ok(digest)
    }

    fn get(&self, digest: &str) -> Result<Vec<u8>> {
        validate_digest(digest)?;
        let path = self.blob_path(digest);
        fs::read(&path).with_context(|| format!("read blob {digest}"))
    }

    fn exists(&self, digest: &str) -> Result<bool> {
        validate_digest(digest)?;
        Ok(self.blob_path(digest).is_file())
    }

    fn put_document(&self, key: &str, data: &[u8]) -> Result<()> {
        validate_document_key(key)?;
        let path = self.root.join(key);
        if path.exists() {
            let existing =
                fs::read(&path).with_context(|| format!("read document {}", path.display()))?;
            if existing == data {
                return Ok(());
            }
            return Err(anyhow!("document {key} already exists with different content"));
        }
        write_atomic(&path, data)
    }

    fn get_document(&self, key: &str) -> Result<Vec<u8>> {
        validate_document_key(key)?;
        let path = self.root.join(key);
        fs::read(&path).with_context(|| format!("read document {}", path.display()))
    }

    fn document_exists(&self, key: &str) -> Result<bool> {
        validate_document_key(key)?;
        Ok(self.root.join(key).is_file())
    }
}

/// Write via a temp file in the destination directory, then rename.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("store path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;
    std::io::Write::write_all(&mut tmp, data)
        .with_context(|| format!("write temp file for {}", path.display()))?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("persist {}", path.display()))?;
    Ok(())
}
