//! The content-addressed store proper

use std::io::ErrorKind;
use std::path::PathBuf;

use skiff_core::crypto::{self, EncryptionKey};
use skiff_core::{Error, Result};
use tokio::io::AsyncRead;
use tracing::info;

use crate::path::{cas_path_transform, PathKey};

/// Root directory used when none is configured.
pub const DEFAULT_ROOT: &str = "dfs-net";

/// Disk store addressing files by the digest of their key, scoped per
/// node ID. The store holds whatever bytes it is handed; whether an
/// object is plaintext or ciphertext is the caller's contract.
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Create a store rooted at `root`; an empty root falls back to
    /// [`DEFAULT_ROOT`].
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let root = if root.is_empty() {
            DEFAULT_ROOT.to_string()
        } else {
            root
        };
        Self {
            root: PathBuf::from(root),
        }
    }

    /// The configured root directory.
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn object_path(&self, id: &str, path_key: &PathKey) -> PathBuf {
        self.root
            .join(id)
            .join(&path_key.path_name)
            .join(&path_key.file_name)
    }

    /// Whether an object exists for `(id, key)`. Stat errors collapse to
    /// `false`.
    pub fn has(&self, id: &str, key: &str) -> bool {
        let path_key = cas_path_transform(key);
        self.object_path(id, &path_key).exists()
    }

    /// Copy `src` into the object for `(id, key)`, creating the
    /// directory chain as needed. Returns bytes copied.
    pub async fn write<R>(&self, id: &str, key: &str, src: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut file = self.open_for_writing(id, key).await?;
        let n = tokio::io::copy(src, &mut file).await?;
        Ok(n)
    }

    /// As [`Store::write`], but pipe `src` through AES-256-CTR
    /// decryption. Returns the decrypt count (IV accounting included).
    pub async fn write_decrypt<R>(
        &self,
        enc_key: &EncryptionKey,
        id: &str,
        key: &str,
        src: &mut R,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut file = self.open_for_writing(id, key).await?;
        crypto::copy_decrypt(enc_key, src, &mut file).await
    }

    async fn open_for_writing(&self, id: &str, key: &str) -> Result<tokio::fs::File> {
        let path_key = cas_path_transform(key);
        let dir = self.root.join(id).join(&path_key.path_name);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(tokio::fs::File::create(dir.join(&path_key.file_name)).await?)
    }

    /// Open the object for `(id, key)` and return its size and a
    /// readable handle.
    pub async fn read(&self, id: &str, key: &str) -> Result<(u64, tokio::fs::File)> {
        let path_key = cas_path_transform(key);
        let path = self.object_path(id, &path_key);
        let file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();
        Ok((size, file))
    }

    /// Remove the first-level bucket containing `(id, key)`. This is a
    /// coarse delete: every object sharing the first digest segment goes
    /// with it. Removing a missing bucket is not an error.
    pub async fn delete(&self, id: &str, key: &str) -> Result<()> {
        let path_key = cas_path_transform(key);
        let bucket = self.root.join(id).join(path_key.first_segment());
        match tokio::fs::remove_dir_all(&bucket).await {
            Ok(()) => {
                info!("deleted [{}] from disk", path_key.file_name);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the entire root directory.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
