//! Key material and streaming AES-256-CTR
//!
//! Replica traffic is encrypted with a per-mesh 32-byte key. Every
//! ciphertext starts with a fresh 16-byte IV, so the same plaintext never
//! repeats on the wire under one key.

use aes::cipher::{KeyIvInit, StreamCipher};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Error, Result};

/// A 32-byte AES-256 key, fixed for the life of a node.
pub type EncryptionKey = [u8; 32];

/// Length of [`EncryptionKey`] in bytes.
pub const KEY_SIZE: usize = 32;

/// AES block size; every ciphertext is prefixed by an IV this long.
pub const IV_SIZE: usize = 16;

/// Chunk size for the streaming copies.
const COPY_BUF_SIZE: usize = 32 * 1024;

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// Generate a node identifier: 32 random bytes, lowercase hex.
pub fn generate_id() -> Result<String> {
    let mut buf = [0u8; 32];
    fill_random(&mut buf)?;
    Ok(hex::encode(buf))
}

/// Hash a user key for the wire. Only this digest ever leaves the node.
pub fn hash_key(key: &str) -> String {
    use md5::{Digest, Md5};
    hex::encode(Md5::digest(key.as_bytes()))
}

/// Generate a fresh 32-byte encryption key.
pub fn new_encryption_key() -> Result<EncryptionKey> {
    let mut key = [0u8; KEY_SIZE];
    fill_random(&mut key)?;
    Ok(key)
}

fn fill_random(buf: &mut [u8]) -> Result<()> {
    getrandom::getrandom(buf).map_err(|e| Error::Cipher(format!("rng failure: {e}")))
}

/// Encrypt `src` into `dst`: a random IV first, then the AES-256-CTR
/// ciphertext. Returns total bytes written including the IV.
pub async fn copy_encrypt<R, W>(key: &EncryptionKey, src: &mut R, dst: &mut W) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut iv = [0u8; IV_SIZE];
    fill_random(&mut iv)?;
    dst.write_all(&iv).await?;

    let cipher = Aes256Ctr::new(key.into(), (&iv).into());
    copy_stream(cipher, src, dst).await
}

/// Decrypt `src` into `dst`, reading the 16-byte IV off the front.
/// Returns `16 + plaintext` to mirror [`copy_encrypt`]; callers compare
/// the two counts directly when accounting replica sizes.
pub async fn copy_decrypt<R, W>(key: &EncryptionKey, src: &mut R, dst: &mut W) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut iv = [0u8; IV_SIZE];
    src.read_exact(&mut iv)
        .await
        .map_err(|e| Error::Cipher(format!("short IV read: {e}")))?;

    let cipher = Aes256Ctr::new(key.into(), (&iv).into());
    copy_stream(cipher, src, dst).await
}

async fn copy_stream<R, W>(mut cipher: Aes256Ctr, src: &mut R, dst: &mut W) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut written = IV_SIZE as u64;
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        // XOR in place, then hand the chunk on
        cipher.apply_keystream(&mut buf[..n]);
        dst.write_all(&buf[..n]).await?;
        written += n as u64;
    }
    dst.flush().await?;
    Ok(written)
}
