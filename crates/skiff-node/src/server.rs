//! The file server: peer set, local store, replication and fetch

use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use skiff_core::crypto::{self, EncryptionKey, IV_SIZE};
use skiff_core::proto::{self, Envelope, Payload};
use skiff_core::{Error, Result};
use skiff_net::{Frame, OnPeerDropFn, OnPeerFn, TcpPeer, TcpTransport, TcpTransportOpts};
use skiff_store::Store;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, Notify};
use tracing::{error, info, warn};

/// How long `get` waits for any single peer to start its reply stream.
const FETCH_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause between a STORE control frame and its ciphertext stream, so
/// peers observe the control frame first.
const BROADCAST_GRACE: Duration = Duration::from_millis(5);

/// Options for configuring a [`FileServer`].
pub struct FileServerOpts {
    /// Node identifier; generated when absent
    pub id: Option<String>,
    /// Mesh encryption key
    pub enc_key: EncryptionKey,
    /// Root path for file storage; empty uses the store default
    pub storage_root: String,
    /// TCP listen address
    pub listen_addr: String,
    /// Nodes to dial at startup
    pub bootstrap_nodes: Vec<String>,
}

/// A node in the mesh: owns the peer set, the local store, the
/// encryption key, and the event loop.
pub struct FileServer {
    id: String,
    enc_key: EncryptionKey,
    storage: Store,
    transport: Arc<TcpTransport>,
    peers: Arc<Mutex<HashMap<String, Arc<TcpPeer>>>>,
    bootstrap_nodes: Vec<String>,
    quit: Notify,
}

impl FileServer {
    pub fn new(opts: FileServerOpts) -> Result<Arc<Self>> {
        let id = match opts.id {
            Some(id) if !id.is_empty() => id,
            _ => crypto::generate_id()?,
        };

        let peers: Arc<Mutex<HashMap<String, Arc<TcpPeer>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let on_peer: OnPeerFn = {
            let peers = Arc::clone(&peers);
            Arc::new(move |peer: Arc<TcpPeer>| -> Result<()> {
                let addr = peer.remote_addr().to_string();
                peers.lock().unwrap().insert(addr.clone(), peer);
                info!("connected to remote {addr}");
                Ok(())
            })
        };
        let on_peer_drop: OnPeerDropFn = {
            let peers = Arc::clone(&peers);
            Arc::new(move |addr: &str| {
                peers.lock().unwrap().remove(addr);
            })
        };

        let transport = TcpTransport::new(TcpTransportOpts {
            listen_addr: opts.listen_addr,
            handshake: None,
            on_peer: Some(on_peer),
            on_peer_drop: Some(on_peer_drop),
        });

        Ok(Arc::new(Self {
            id,
            enc_key: opts.enc_key,
            storage: Store::new(opts.storage_root),
            transport,
            peers,
            bootstrap_nodes: opts.bootstrap_nodes,
            quit: Notify::new(),
        }))
    }

    /// This node's identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The local store.
    pub fn storage(&self) -> &Store {
        &self.storage
    }

    /// Number of currently connected peers.
    pub fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    /// Start listening, dial the bootstrap nodes, and run the event loop
    /// until [`FileServer::stop`].
    pub async fn start(&self) -> Result<()> {
        info!("[{}] starting file server", self.transport.addr());
        Arc::clone(&self.transport).listen_and_accept().await?;
        self.bootstrap_network();

        let inbound = self.transport.take_inbound().ok_or_else(|| {
            Error::Transport("file server already started".to_string())
        })?;
        self.event_loop(inbound).await;
        Ok(())
    }

    /// Signal the event loop to exit.
    pub fn stop(&self) {
        self.quit.notify_one();
    }

    fn bootstrap_network(&self) {
        for addr in &self.bootstrap_nodes {
            if addr.is_empty() {
                continue;
            }
            let addr = addr.clone();
            let local = self.transport.addr().to_string();
            let transport = Arc::clone(&self.transport);
            tokio::spawn(async move {
                info!("[{local}] attempting to connect with remote {addr}");
                if let Err(e) = transport.dial(&addr).await {
                    warn!("dial error for {addr}: {e}");
                }
            });
        }
    }

    async fn event_loop(&self, mut inbound: mpsc::Receiver<Frame>) {
        loop {
            tokio::select! {
                _ = self.quit.notified() => break,
                frame = inbound.recv() => {
                    let Some(frame) = frame else { break };
                    let envelope = match Envelope::from_bytes(&frame.payload) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            error!("decoding error from {}: {e}", frame.from);
                            continue;
                        }
                    };
                    if let Err(e) = self.handle_message(&frame.from, envelope).await {
                        error!("error handling message from {}: {e}", frame.from);
                    }
                }
            }
        }
        info!("file server stopped");
        self.transport.close();
    }

    async fn handle_message(&self, from: &str, envelope: Envelope) -> Result<()> {
        match envelope.payload {
            Some(Payload::StoreFile(msg)) => self.handle_store_file(from, msg).await,
            Some(Payload::GetFile(msg)) => self.handle_get_file(from, msg).await,
            None => {
                warn!("empty envelope payload from {from}");
                Ok(())
            }
        }
    }

    /// Store a file locally, then replicate its ciphertext to every
    /// connected peer.
    pub async fn store<R>(&self, key: &str, src: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut file_buf = Vec::new();
        src.read_to_end(&mut file_buf).await?;
        let size = self.storage.write(&self.id, key, &mut &file_buf[..]).await?;

        // announce the replica: the stated size covers the IV the
        // ciphertext will carry
        let msg = proto::store_file(
            self.id.clone(),
            crypto::hash_key(key),
            size as i64 + IV_SIZE as i64,
        );
        self.broadcast(&msg).await?;

        tokio::time::sleep(BROADCAST_GRACE).await;

        let peers = self.peer_snapshot();
        if peers.is_empty() {
            return Ok(());
        }

        let mut ciphertext = Vec::new();
        let n = crypto::copy_encrypt(&self.enc_key, &mut &file_buf[..], &mut ciphertext).await?;
        for peer in peers {
            peer.send_stream(None, &mut &ciphertext[..]).await?;
        }
        info!(
            "[{}] replicated ({n}) bytes to the mesh",
            self.transport.addr()
        );
        Ok(())
    }

    /// Retrieve a file by key: from local disk when present, otherwise
    /// from whichever peer holds it.
    pub async fn get(&self, key: &str) -> Result<(u64, tokio::fs::File)> {
        if self.storage.has(&self.id, key) {
            info!(
                "[{}] serving file ({key}) from local disk",
                self.transport.addr()
            );
            return self.storage.read(&self.id, key).await;
        }

        info!(
            "[{}] file ({key}) not found locally, fetching from the mesh",
            self.transport.addr()
        );
        let msg = proto::get_file(self.id.clone(), crypto::hash_key(key));
        self.broadcast(&msg).await?;

        let mut timed_out = 0usize;
        for peer in self.peer_snapshot() {
            let mut reader = match tokio::time::timeout(FETCH_TIMEOUT, peer.begin_stream()).await {
                Ok(Ok(reader)) => reader,
                Ok(Err(e)) => {
                    warn!("[{}] {e}", self.transport.addr());
                    continue;
                }
                Err(_) => {
                    warn!(
                        "[{}] no reply from ({}) in time",
                        self.transport.addr(),
                        peer.remote_addr()
                    );
                    timed_out += 1;
                    continue;
                }
            };

            let file_size = reader.read_i64_le().await?;
            if file_size == 0 {
                // this peer does not hold the file
                drop(reader);
                peer.close_stream();
                continue;
            }

            let n = {
                let mut limited = (&mut reader).take(file_size as u64);
                self.storage
                    .write_decrypt(&self.enc_key, &self.id, key, &mut limited)
                    .await?
            };
            drop(reader);
            peer.close_stream();
            info!(
                "[{}] received ({n}) bytes over the network from ({})",
                self.transport.addr(),
                peer.remote_addr()
            );
        }

        if self.storage.has(&self.id, key) {
            self.storage.read(&self.id, key).await
        } else if timed_out > 0 {
            Err(Error::Timeout(format!(
                "waiting for file {key} from the mesh"
            )))
        } else {
            Err(Error::NotFound(format!("file {key} not found on any peer")))
        }
    }

    /// A peer announced a replica: consume exactly the stated number of
    /// ciphertext bytes into the local store, verbatim.
    async fn handle_store_file(&self, from: &str, msg: proto::StoreFile) -> Result<()> {
        let peer = self.lookup_peer(from)?;

        let mut reader = peer.begin_stream().await?;
        let n = {
            let mut limited = (&mut reader).take(msg.size as u64);
            self.storage.write(&msg.id, &msg.key, &mut limited).await?
        };
        drop(reader);
        peer.close_stream();

        if n != msg.size as u64 {
            return Err(Error::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("short replica stream: got {n} of {} bytes", msg.size),
            )));
        }
        info!("[{}] written {n} bytes to disk", self.transport.addr());
        Ok(())
    }

    /// A peer asked for a file. Holders reply with a size-prefixed
    /// stream; everyone else replies with size zero so the requester's
    /// drain never stalls.
    async fn handle_get_file(&self, from: &str, msg: proto::GetFile) -> Result<()> {
        let peer = self.lookup_peer(from)?;

        if !self.storage.has(&msg.id, &msg.key) {
            peer.send_stream(Some(0), &mut tokio::io::empty()).await?;
            return Err(Error::NotFound(format!(
                "[{}] file ({}) not on disk",
                self.transport.addr(),
                msg.key
            )));
        }

        info!(
            "[{}] serving file ({}) over the network",
            self.transport.addr(),
            msg.key
        );
        let (size, mut file) = self.storage.read(&msg.id, &msg.key).await?;
        let n = peer.send_stream(Some(size as i64), &mut file).await?;
        info!(
            "[{}] written {n} bytes over the network to {from}",
            self.transport.addr()
        );
        Ok(())
    }

    fn lookup_peer(&self, from: &str) -> Result<Arc<TcpPeer>> {
        self.peers
            .lock()
            .unwrap()
            .get(from)
            .cloned()
            .ok_or_else(|| Error::UnknownPeer(from.to_string()))
    }

    fn peer_snapshot(&self) -> Vec<Arc<TcpPeer>> {
        self.peers.lock().unwrap().values().cloned().collect()
    }

    async fn broadcast(&self, envelope: &Envelope) -> Result<()> {
        let payload = envelope.to_bytes();
        for peer in self.peer_snapshot() {
            peer.send_message(&payload).await?;
        }
        Ok(())
    }
}
