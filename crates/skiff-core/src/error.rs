//! Error types for skiff

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("invalid frame discriminator: {0:#04x}")]
    InvalidDiscriminator(u8),

    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("cipher error: {0}")]
    Cipher(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, Error>;
