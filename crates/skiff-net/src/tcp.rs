//! TCP transport: listener, dialer, and per-connection read loops

use std::sync::{Arc, Mutex};

use skiff_core::Result;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::frame::{decode_frame, Frame, WireFrame};
use crate::peer::TcpPeer;

/// Capacity of the inbound frame channel shared across all peers.
const INBOUND_BUFFER: usize = 1024;

/// Hook run on every new connection before it is adopted; rejecting it
/// closes the connection. The default is a no-op, the hook exists so an
/// embedding server can install authentication.
pub type HandshakeFn = Arc<dyn Fn(&TcpPeer) -> Result<()> + Send + Sync>;

/// Capability injected by the embedding server: called with every
/// adopted peer. The transport holds no other knowledge of the server.
pub type OnPeerFn = Arc<dyn Fn(Arc<TcpPeer>) -> Result<()> + Send + Sync>;

/// Called with a peer's remote address once its read loop has exited,
/// so the embedding server can forget it.
pub type OnPeerDropFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Configuration for a [`TcpTransport`].
pub struct TcpTransportOpts {
    /// Address to listen on; a bare `:port` binds all interfaces
    pub listen_addr: String,
    /// Optional pre-adoption hook; `None` accepts every connection
    pub handshake: Option<HandshakeFn>,
    /// Peer adoption callback
    pub on_peer: Option<OnPeerFn>,
    /// Peer teardown callback
    pub on_peer_drop: Option<OnPeerDropFn>,
}

/// TCP-based peer links: accepts inbound connections, dials outbound
/// ones, and runs one read loop per connection. Control frames from all
/// peers funnel into a single bounded channel.
pub struct TcpTransport {
    opts: TcpTransportOpts,
    inbound_tx: mpsc::Sender<Frame>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Frame>>>,
    shutdown: Notify,
}

impl TcpTransport {
    pub fn new(opts: TcpTransportOpts) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        Arc::new(Self {
            opts,
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            shutdown: Notify::new(),
        })
    }

    /// The configured listen address.
    pub fn addr(&self) -> &str {
        &self.opts.listen_addr
    }

    /// Take the inbound frame receiver. Yields `None` after the first
    /// call; there is exactly one consumer.
    pub fn take_inbound(&self) -> Option<mpsc::Receiver<Frame>> {
        self.inbound_rx.lock().unwrap().take()
    }

    /// Bind the listener and spawn the accept loop.
    pub async fn listen_and_accept(self: Arc<Self>) -> Result<()> {
        let bind_addr = if self.opts.listen_addr.starts_with(':') {
            format!("0.0.0.0{}", self.opts.listen_addr)
        } else {
            self.opts.listen_addr.clone()
        };
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("TCP transport listening on {}", self.opts.listen_addr);

        tokio::spawn(async move { self.accept_loop(listener).await });
        Ok(())
    }

    /// Dial a remote node. Connect failures surface here; everything
    /// after the handoff to the read loop is fire-and-forget.
    pub async fn dial(self: Arc<Self>, addr: &str) -> Result<()> {
        let stream = TcpStream::connect(addr).await?;
        tokio::spawn(async move { self.handle_conn(stream, true).await });
        Ok(())
    }

    /// Stop accepting new connections. Existing read loops run until
    /// their own sockets error out.
    pub fn close(&self) {
        self.shutdown.notify_one();
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    debug!("accept loop shutting down");
                    return;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("new incoming connection from {addr}");
                        let transport = Arc::clone(&self);
                        tokio::spawn(async move { transport.handle_conn(stream, false).await });
                    }
                    Err(e) => {
                        error!("TCP accept error: {e}");
                        return;
                    }
                }
            }
        }
    }

    async fn handle_conn(&self, stream: TcpStream, outbound: bool) {
        let peer = match TcpPeer::new(stream, outbound) {
            Ok(peer) => peer,
            Err(e) => {
                warn!("failed to adopt connection: {e}");
                return;
            }
        };
        let addr = peer.remote_addr().to_string();

        if let Some(handshake) = &self.opts.handshake {
            if let Err(e) = handshake(&peer) {
                error!("handshake with {addr} failed: {e}");
                return;
            }
        }

        if let Some(on_peer) = &self.opts.on_peer {
            if let Err(e) = on_peer(Arc::clone(&peer)) {
                error!("peer callback rejected {addr}: {e}");
                return;
            }
        }

        if let Err(e) = self.read_loop(&peer).await {
            debug!("dropping peer connection {addr}: {e}");
        }

        // fail anything still parked on this peer's gates, then let the
        // server forget it
        peer.shutdown_gates();
        if let Some(on_peer_drop) = &self.opts.on_peer_drop {
            on_peer_drop(&addr);
        }
    }

    async fn read_loop(&self, peer: &TcpPeer) -> Result<()> {
        loop {
            let frame = {
                let mut reader = peer.lock_reader().await;
                decode_frame(&mut *reader).await?
            };
            match frame {
                WireFrame::Stream => {
                    debug!("[{}] incoming stream, waiting...", peer.remote_addr());
                    peer.arm_stream();
                    peer.wait_stream_done().await?;
                    debug!("[{}] stream closed, resuming read loop", peer.remote_addr());
                }
                WireFrame::Message(payload) => {
                    let frame = Frame {
                        from: peer.remote_addr().to_string(),
                        payload,
                    };
                    if self.inbound_tx.send(frame).await.is_err() {
                        // consumer gone: the transport is shutting down
                        return Ok(());
                    }
                }
            }
        }
    }
}
