//! Integration tests over real loopback TCP meshes
//!
//! Each test runs its own mesh on dedicated 127.0.0.1 ports, with every
//! node's storage rooted in a scratch directory.

use std::sync::Arc;
use std::time::Duration;

use skiff_core::crypto::{self, copy_decrypt, EncryptionKey, IV_SIZE};
use skiff_core::proto;
use skiff_node::{FileServer, FileServerOpts};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

fn listen(port: u16) -> String {
    format!("127.0.0.1:{port}")
}

async fn spawn_node(
    port: u16,
    enc_key: EncryptionKey,
    scratch: &TempDir,
    bootstrap_nodes: Vec<String>,
) -> Arc<FileServer> {
    let server = FileServer::new(FileServerOpts {
        id: None,
        enc_key,
        storage_root: scratch
            .path()
            .join(format!("node-{port}"))
            .to_string_lossy()
            .into_owned(),
        listen_addr: listen(port),
        bootstrap_nodes,
    })
    .unwrap();

    let runner = Arc::clone(&server);
    tokio::spawn(async move { runner.start().await });
    // let the listener come up before anyone dials it
    sleep(Duration::from_millis(50)).await;
    server
}

async fn wait_until(mut cond: impl FnMut() -> bool, what: &str) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn read_back(server: &FileServer, key: &str) -> Vec<u8> {
    let (size, mut file) = server.get(key).await.unwrap();
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await.unwrap();
    assert_eq!(size, buf.len() as u64);
    buf
}

#[tokio::test]
async fn single_node_round_trip() {
    let scratch = TempDir::new().unwrap();
    let node = spawn_node(42401, [0u8; 32], &scratch, vec![]).await;

    node.store("alpha", &mut &b"hello"[..]).await.unwrap();
    assert_eq!(read_back(&node, "alpha").await, b"hello");

    node.stop();
}

#[tokio::test]
async fn store_to_empty_peer_set() {
    let scratch = TempDir::new().unwrap();
    let node = spawn_node(42403, [0u8; 32], &scratch, vec![]).await;
    assert_eq!(node.peer_count(), 0);

    node.store("delta", &mut &b"solo"[..]).await.unwrap();
    assert_eq!(read_back(&node, "delta").await, b"solo");

    node.stop();
}

#[tokio::test]
async fn two_node_replication() {
    let scratch = TempDir::new().unwrap();
    // distinct keys: the replica must hold A's ciphertext verbatim,
    // decryptable only with A's key
    let key_a: EncryptionKey = [1u8; 32];
    let key_b: EncryptionKey = [2u8; 32];

    let node_a = spawn_node(42405, key_a, &scratch, vec![]).await;
    let node_b = spawn_node(42406, key_b, &scratch, vec![listen(42405)]).await;

    wait_until(|| node_a.peer_count() == 1 && node_b.peer_count() == 1, "mesh to form").await;

    node_a.store("beta", &mut &b"world"[..]).await.unwrap();

    let wire_key = crypto::hash_key("beta");
    {
        let node_b = Arc::clone(&node_b);
        let origin = node_a.id().to_string();
        let wire_key = wire_key.clone();
        wait_until(
            move || node_b.storage().has(&origin, &wire_key),
            "replica to land on node B",
        )
        .await;
    }

    // the replica is ciphertext under the originator's node ID
    let (size, mut file) = node_b.storage().read(node_a.id(), &wire_key).await.unwrap();
    assert_eq!(size as usize, b"world".len() + IV_SIZE);

    let mut ciphertext = Vec::new();
    file.read_to_end(&mut ciphertext).await.unwrap();
    let mut plaintext = Vec::new();
    copy_decrypt(&key_a, &mut &ciphertext[..], &mut plaintext)
        .await
        .unwrap();
    assert_eq!(plaintext, b"world");

    node_a.stop();
    node_b.stop();
}

#[tokio::test]
async fn remote_fetch_after_local_delete() {
    let scratch = TempDir::new().unwrap();
    // one shared mesh key, as deployment requires
    let mesh_key: EncryptionKey = [7u8; 32];

    let node_a = spawn_node(42408, mesh_key, &scratch, vec![]).await;
    let node_b = spawn_node(42409, mesh_key, &scratch, vec![listen(42408)]).await;
    wait_until(|| node_a.peer_count() == 1 && node_b.peer_count() == 1, "mesh to form").await;

    node_a.store("gamma", &mut &b"world-2"[..]).await.unwrap();

    {
        let node_b = Arc::clone(&node_b);
        let origin = node_a.id().to_string();
        let wire_key = crypto::hash_key("gamma");
        wait_until(
            move || node_b.storage().has(&origin, &wire_key),
            "replica to land on node B",
        )
        .await;
    }

    node_a.storage().delete(node_a.id(), "gamma").await.unwrap();
    assert!(!node_a.storage().has(node_a.id(), "gamma"));

    // the fetch broadcasts, B answers, A decrypts back into its store
    assert_eq!(read_back(&node_a, "gamma").await, b"world-2");
    assert!(node_a.storage().has(node_a.id(), "gamma"));

    node_a.stop();
    node_b.stop();
}

#[tokio::test]
async fn get_local_hit_skips_the_network() {
    let scratch = TempDir::new().unwrap();
    let node = spawn_node(42411, [0u8; 32], &scratch, vec![]).await;

    let mut client = TcpStream::connect(listen(42411)).await.unwrap();
    wait_until(|| node.peer_count() == 1, "client adoption").await;

    node.storage()
        .write(node.id(), "hit", &mut &b"local bytes"[..])
        .await
        .unwrap();
    assert_eq!(read_back(&node, "hit").await, b"local bytes");

    // nothing may have been broadcast to the connected peer
    let mut probe = [0u8; 1];
    let silent = timeout(Duration::from_millis(200), client.read(&mut probe)).await;
    assert!(silent.is_err(), "local hit must not touch the network");

    node.stop();
}

#[tokio::test]
async fn stream_gate_orders_frames() {
    let scratch = TempDir::new().unwrap();
    let node = spawn_node(42413, [0u8; 32], &scratch, vec![]).await;

    let mut client = TcpStream::connect(listen(42413)).await.unwrap();
    wait_until(|| node.peer_count() == 1, "client adoption").await;

    let origin = "a".repeat(64);
    let wire_key = crypto::hash_key("gated");

    // control frame announcing 5 stream bytes
    let store_msg = proto::store_file(origin.clone(), wire_key.clone(), 5).to_bytes();
    let mut framed = vec![proto::INCOMING_MESSAGE];
    framed.extend_from_slice(&store_msg);
    client.write_all(&framed).await.unwrap();
    sleep(Duration::from_millis(20)).await;

    // the announced stream, then a second control frame right behind it
    client.write_all(&[proto::INCOMING_STREAM]).await.unwrap();
    client.write_all(b"abcde").await.unwrap();
    sleep(Duration::from_millis(20)).await;

    let get_msg = proto::get_file(origin.clone(), wire_key.clone()).to_bytes();
    let mut framed = vec![proto::INCOMING_MESSAGE];
    framed.extend_from_slice(&get_msg);
    client.write_all(&framed).await.unwrap();

    // the stream bytes landed under the announced key, never mis-framed
    {
        let node = Arc::clone(&node);
        let origin = origin.clone();
        let wire_key = wire_key.clone();
        wait_until(move || node.storage().has(&origin, &wire_key), "stream to land").await;
    }

    // and the GetFile was dispatched after the stream: the reply carries
    // exactly the 5 stored bytes
    let mut reply = [0u8; 1 + 8 + 5];
    timeout(Duration::from_secs(2), client.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply[0], proto::INCOMING_STREAM);
    assert_eq!(i64::from_le_bytes(reply[1..9].try_into().unwrap()), 5);
    assert_eq!(&reply[9..], b"abcde");

    node.stop();
}

#[tokio::test]
async fn vanished_peer_does_not_wedge_the_server() {
    let scratch = TempDir::new().unwrap();
    let node = spawn_node(42415, [0u8; 32], &scratch, vec![]).await;

    // a peer announces a replica and vanishes without sending the stream
    let mut client = TcpStream::connect(listen(42415)).await.unwrap();
    wait_until(|| node.peer_count() == 1, "client adoption").await;

    let store_msg =
        proto::store_file("b".repeat(64), crypto::hash_key("phantom"), 64).to_bytes();
    let mut framed = vec![proto::INCOMING_MESSAGE];
    framed.extend_from_slice(&store_msg);
    client.write_all(&framed).await.unwrap();
    drop(client);

    wait_until(|| node.peer_count() == 0, "peer teardown").await;

    // the phantom replica never landed, and the server still works
    assert!(!node.storage().has(&"b".repeat(64), &crypto::hash_key("phantom")));
    node.store("after", &mut &b"still alive"[..]).await.unwrap();
    assert_eq!(read_back(&node, "after").await, b"still alive");

    node.stop();
}
