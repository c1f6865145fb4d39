//! A live peer connection and its stream synchronization

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use skiff_core::{proto, Error, Result};
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard, Semaphore};

/// A connected remote node.
///
/// The read half is shared between the connection's read loop and
/// whichever task consumes an announced stream; a pair of per-peer gates
/// keeps the two from racing. The read loop releases `stream_begun` when
/// it parks behind a stream frame and waits on `stream_done`; the
/// consumer acquires the former via [`TcpPeer::begin_stream`] and
/// releases the latter via [`TcpPeer::close_stream`].
pub struct TcpPeer {
    remote_addr: String,
    outbound: bool,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    stream_begun: Semaphore,
    stream_done: Semaphore,
}

impl TcpPeer {
    pub(crate) fn new(stream: TcpStream, outbound: bool) -> Result<Arc<Self>> {
        let remote_addr = stream.peer_addr()?.to_string();
        let (reader, writer) = stream.into_split();
        Ok(Arc::new(Self {
            remote_addr,
            outbound,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            stream_begun: Semaphore::new(0),
            stream_done: Semaphore::new(0),
        }))
    }

    /// Remote address this peer is keyed by.
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Whether this end dialed the connection.
    pub fn is_outbound(&self) -> bool {
        self.outbound
    }

    /// Send raw bytes to the peer.
    pub async fn send(&self, buf: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(buf).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Frame and send one control payload. Discriminator and payload go
    /// out in a single write so the receiver's one-read decode holds.
    pub async fn send_message(&self, payload: &[u8]) -> Result<()> {
        let mut framed = Vec::with_capacity(1 + payload.len());
        framed.push(proto::INCOMING_MESSAGE);
        framed.extend_from_slice(payload);
        self.send(&framed).await
    }

    /// Announce a stream and copy `body` into it, optionally preceded by
    /// a little-endian size header. The writer lock is held for the
    /// whole sequence so no other sender can interleave the stream.
    pub async fn send_stream<R>(&self, size: Option<i64>, body: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut writer = self.writer.lock().await;
        writer.write_u8(proto::INCOMING_STREAM).await?;
        if let Some(size) = size {
            writer.write_i64_le(size).await?;
        }
        let n = tokio::io::copy(body, &mut *writer).await?;
        writer.flush().await?;
        Ok(n)
    }

    /// Wait until the read loop has parked behind an announced stream,
    /// then take the read half. The caller owns the raw stream bytes
    /// until it calls [`TcpPeer::close_stream`].
    pub async fn begin_stream(&self) -> Result<StreamReader<'_>> {
        let permit = self
            .stream_begun
            .acquire()
            .await
            .map_err(|_| Error::Transport(format!("peer {} connection closed", self.remote_addr)))?;
        permit.forget();
        Ok(StreamReader {
            guard: self.reader.lock().await,
        })
    }

    /// Release the read loop to decode the next frame.
    pub fn close_stream(&self) {
        self.stream_done.add_permits(1);
    }

    // Read-loop side of the gates.

    pub(crate) fn arm_stream(&self) {
        self.stream_begun.add_permits(1);
    }

    pub(crate) async fn wait_stream_done(&self) -> Result<()> {
        let permit = self
            .stream_done
            .acquire()
            .await
            .map_err(|_| Error::Transport(format!("peer {} connection closed", self.remote_addr)))?;
        permit.forget();
        Ok(())
    }

    /// Fail any task parked on the gates once the read loop is gone.
    pub(crate) fn shutdown_gates(&self) {
        self.stream_begun.close();
        self.stream_done.close();
    }

    pub(crate) async fn lock_reader(&self) -> MutexGuard<'_, OwnedReadHalf> {
        self.reader.lock().await
    }
}

impl std::fmt::Debug for TcpPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpPeer")
            .field("remote_addr", &self.remote_addr)
            .field("outbound", &self.outbound)
            .finish()
    }
}

/// Exclusive access to a peer's in-flight stream bytes.
pub struct StreamReader<'a> {
    guard: MutexGuard<'a, OwnedReadHalf>,
}

impl AsyncRead for StreamReader<'_> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut *self.get_mut().guard).poll_read(cx, buf)
    }
}
