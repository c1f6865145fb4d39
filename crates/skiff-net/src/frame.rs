//! Frame decoding
//!
//! A frame is one discriminator byte followed by either a buffered
//! control payload or nothing at all: stream frames only announce that
//! raw bytes follow, and those bytes are consumed outside the decoder.

use skiff_core::{proto, Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

/// A control payload delivered to the server's event loop, stamped with
/// the sender's remote address.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub from: String,
    pub payload: Vec<u8>,
}

/// What the decoder saw on the wire.
#[derive(Debug)]
pub(crate) enum WireFrame {
    /// A complete control payload
    Message(Vec<u8>),
    /// Raw stream bytes follow; the decoder does not touch them
    Stream,
}

/// Decode one frame. Message payloads are taken with a single read of up
/// to [`proto::MAX_MESSAGE_SIZE`] bytes; senders write the whole payload
/// in one write, and control messages are small enough that one read
/// suffices on the links this targets.
pub(crate) async fn decode_frame<R>(r: &mut R) -> Result<WireFrame>
where
    R: AsyncRead + Unpin,
{
    let mut discriminator = [0u8; 1];
    r.read_exact(&mut discriminator).await?;

    match discriminator[0] {
        proto::INCOMING_MESSAGE => {
            let mut buf = vec![0u8; proto::MAX_MESSAGE_SIZE];
            let n = r.read(&mut buf).await?;
            if n == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before message payload",
                )));
            }
            buf.truncate(n);
            Ok(WireFrame::Message(buf))
        }
        proto::INCOMING_STREAM => Ok(WireFrame::Stream),
        other => Err(Error::InvalidDiscriminator(other)),
    }
}
