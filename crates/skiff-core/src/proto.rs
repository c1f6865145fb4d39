//! Wire protocol: frame discriminators and control messages
//!
//! Control messages are manually defined prost messages, avoiding the
//! need for protoc at build time. On the wire every frame starts with a
//! one-byte discriminator; control payloads follow [`INCOMING_MESSAGE`],
//! opaque byte streams are announced by [`INCOMING_STREAM`] and carried
//! outside the codec.

use crate::Result;
use prost::Message;

/// Discriminator for a discrete, buffered control payload.
pub const INCOMING_MESSAGE: u8 = 0x01;

/// Discriminator announcing that raw stream bytes follow.
pub const INCOMING_STREAM: u8 = 0x02;

/// Upper bound for a single control payload. Control messages are a few
/// dozen bytes; anything near this limit is a protocol violation.
pub const MAX_MESSAGE_SIZE: usize = 1028;

/// Envelope wrapping every control message.
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    /// The actual message payload
    #[prost(oneof = "Payload", tags = "1, 2")]
    pub payload: Option<Payload>,
}

/// Payload variants for the envelope.
#[derive(Clone, PartialEq, prost::Oneof)]
pub enum Payload {
    #[prost(message, tag = "1")]
    StoreFile(StoreFile),
    #[prost(message, tag = "2")]
    GetFile(GetFile),
}

/// Announces that the ciphertext of a file follows as a stream.
#[derive(Clone, PartialEq, Message)]
pub struct StoreFile {
    /// Node ID of the originating server
    #[prost(string, tag = "1")]
    pub id: String,
    /// MD5 hex of the user key; the clear key never leaves the origin
    #[prost(string, tag = "2")]
    pub key: String,
    /// Bytes the replica must consume: plaintext plus the 16-byte IV
    #[prost(int64, tag = "3")]
    pub size: i64,
}

/// Asks the mesh for a file; holders reply with a size-prefixed stream.
#[derive(Clone, PartialEq, Message)]
pub struct GetFile {
    /// Node ID the file was stored under
    #[prost(string, tag = "1")]
    pub id: String,
    /// MD5 hex of the user key
    #[prost(string, tag = "2")]
    pub key: String,
}

impl Envelope {
    /// Create a new envelope around a payload
    pub fn new(payload: Payload) -> Self {
        Self {
            payload: Some(payload),
        }
    }

    /// Encode the envelope to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Decode an envelope from bytes
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        Ok(Self::decode(buf)?)
    }
}

/// Helper functions to create the two message kinds

pub fn store_file(id: String, key: String, size: i64) -> Envelope {
    Envelope::new(Payload::StoreFile(StoreFile { id, key, size }))
}

pub fn get_file(id: String, key: String) -> Envelope {
    Envelope::new(Payload::GetFile(GetFile { id, key }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_file_roundtrip() {
        let original = store_file(
            "a".repeat(64),
            "987bcab01b929eb2c07877b224215c92".to_string(),
            4096 + 16,
        );
        let bytes = original.to_bytes();
        let decoded = Envelope::from_bytes(&bytes).unwrap();

        match decoded.payload {
            Some(Payload::StoreFile(msg)) => {
                assert_eq!(msg.id, "a".repeat(64));
                assert_eq!(msg.key, "987bcab01b929eb2c07877b224215c92");
                assert_eq!(msg.size, 4112);
            }
            other => panic!("expected StoreFile, got {other:?}"),
        }
    }

    #[test]
    fn test_get_file_roundtrip() {
        let original = get_file("node-1".to_string(), "f".repeat(32));
        let decoded = Envelope::from_bytes(&original.to_bytes()).unwrap();

        match decoded.payload {
            Some(Payload::GetFile(msg)) => {
                assert_eq!(msg.id, "node-1");
                assert_eq!(msg.key, "f".repeat(32));
            }
            other => panic!("expected GetFile, got {other:?}"),
        }
    }

    #[test]
    fn test_control_payloads_stay_small() {
        // both variants must fit the single-read contract with room to spare
        let msg = store_file("a".repeat(64), "b".repeat(32), i64::MAX);
        assert!(msg.to_bytes().len() < MAX_MESSAGE_SIZE);
    }
}
