//! End-to-end connection lifecycle tests over loopback sockets and
//! in-memory transmissions.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use murk_core::defaults::KEEPALIVE_PAYLOAD;
use murk_core::transmission::{pair, ChannelTransmission};
use murk_core::Resolve;
use murk_core::Transmission;
use murk_tunnel::{Connection, EndpointConfig, TunnelConfig, TunnelError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_test_writer()
        .try_init();
}

/// Resolver double that always yields the same endpoint.
#[derive(Debug)]
struct StaticResolver(SocketAddr);

#[async_trait]
impl Resolve for StaticResolver {
    async fn resolve(&self, _host: &str, _port: u16) -> Option<SocketAddr> {
        Some(self.0)
    }
}

/// Resolver double that never finds an endpoint.
#[derive(Debug)]
struct EmptyResolver;

#[async_trait]
impl Resolve for EmptyResolver {
    async fn resolve(&self, _host: &str, _port: u16) -> Option<SocketAddr> {
        None
    }
}

fn config(peer: SocketAddr, keep_alived: bool, resolve_as_domain: bool) -> Arc<TunnelConfig> {
    Arc::new(TunnelConfig {
        remote_ip: peer.ip().to_string(),
        remote_port: peer.port(),
        resolve_as_domain,
        turbo: true,
        fast_open: false,
        keep_alived,
        alignment: 1024,
        inbound: EndpointConfig {
            ip: peer.ip().to_string(),
            port: peer.port(),
        },
    })
}

struct Harness {
    conn: Connection,
    inbound_peer: Arc<ChannelTransmission>,
    outbound_peer: Arc<ChannelTransmission>,
    disposed: Arc<AtomicU32>,
}

fn harness(config: Arc<TunnelConfig>, resolver: Arc<dyn Resolve>) -> Harness {
    let (inbound, inbound_peer) = pair();
    let (outbound, outbound_peer) = pair();
    let conn = Connection::new(config, 7, resolver, inbound, outbound);
    let disposed = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&disposed);
    conn.on_disposed(move |id| {
        assert_eq!(id, 7);
        counter.fetch_add(1, Ordering::SeqCst);
    });
    Harness {
        conn,
        inbound_peer,
        outbound_peer,
        disposed,
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached within 2s");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn literal_connect_relays_both_directions() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer = listener.local_addr().unwrap();
    let h = harness(config(peer, false, false), Arc::new(EmptyResolver));

    h.conn.listen(None).unwrap();
    let (mut remote, _) = listener.accept().await.unwrap();
    let conn = h.conn.clone();
    wait_until(move || conn.available()).await;

    // inbound frame reaches the remote byte stream
    assert!(h.inbound_peer.write_frame(Bytes::from_static(b"hello")).await);
    let mut buf = [0u8; 5];
    remote.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");

    // remote bytes come back as one outbound frame
    remote.write_all(b"world").await.unwrap();
    let frame = h.outbound_peer.read_frame().await.unwrap();
    assert_eq!(frame, Bytes::from_static(b"world"));

    // remote EOF tears the session down exactly once
    drop(remote);
    let conn = h.conn.clone();
    wait_until(move || conn.is_disposed()).await;
    assert_eq!(h.disposed.load(Ordering::SeqCst), 1);
    assert!(!h.conn.available());
}

#[tokio::test]
async fn adopted_socket_arms_synchronously() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer = listener.local_addr().unwrap();
    let client = TcpStream::connect(peer).await.unwrap();
    let (mut remote, _) = listener.accept().await.unwrap();

    let h = harness(config(peer, false, false), Arc::new(EmptyResolver));
    h.conn.listen(Some(client)).unwrap();
    assert!(h.conn.available());

    assert!(h.inbound_peer.write_frame(Bytes::from_static(b"adopt")).await);
    let mut buf = [0u8; 5];
    remote.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"adopt");

    h.conn.close();
    assert_eq!(h.disposed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn domain_resolution_connects_through_resolver() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer = listener.local_addr().unwrap();
    // The configured name is irrelevant; the resolver double answers.
    let mut cfg = config(peer, false, true).as_ref().clone();
    cfg.remote_ip = "relay.example.net".into();
    let h = harness(Arc::new(cfg), Arc::new(StaticResolver(peer)));

    h.conn.listen(None).unwrap();
    let (mut remote, _) = listener.accept().await.unwrap();
    let conn = h.conn.clone();
    wait_until(move || conn.available()).await;

    assert!(h.inbound_peer.write_frame(Bytes::from_static(b"dns")).await);
    let mut buf = [0u8; 3];
    remote.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"dns");
}

#[tokio::test]
async fn failed_resolution_leaves_session_unarmed() {
    let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
    let mut cfg = config(peer, false, true).as_ref().clone();
    cfg.remote_ip = "nonexistent.invalid".into();
    let h = harness(Arc::new(cfg), Arc::new(EmptyResolver));

    h.conn.listen(None).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!h.conn.available());
    assert_eq!(h.disposed.load(Ordering::SeqCst), 0);

    // The owner reaps it explicitly.
    h.conn.close();
    assert_eq!(h.disposed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn refused_connect_tears_down() {
    // Grab a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer = listener.local_addr().unwrap();
    drop(listener);

    let h = harness(config(peer, false, false), Arc::new(EmptyResolver));
    h.conn.listen(None).unwrap();

    let conn = h.conn.clone();
    wait_until(move || conn.is_disposed()).await;
    assert_eq!(h.disposed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn second_listen_is_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer = listener.local_addr().unwrap();
    let h = harness(config(peer, false, false), Arc::new(EmptyResolver));

    h.conn.listen(None).unwrap();
    assert!(matches!(
        h.conn.listen(None),
        Err(TunnelError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn concurrent_dispose_fires_hook_once() {
    let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
    let h = harness(config(peer, false, false), Arc::new(EmptyResolver));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let conn = h.conn.clone();
        tasks.push(tokio::spawn(async move { conn.close() }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(h.disposed.load(Ordering::SeqCst), 1);
    assert!(h.conn.is_disposed());
}

#[tokio::test]
async fn keepalive_writes_junk_and_drains() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer = listener.local_addr().unwrap();
    let client = TcpStream::connect(peer).await.unwrap();
    let (_remote, _) = listener.accept().await.unwrap();

    let h = harness(config(peer, true, false), Arc::new(EmptyResolver));
    h.conn.listen(Some(client)).unwrap();

    // At least one junk write within 600 ms, sized 8..=64 printable bytes.
    let junk = tokio::time::timeout(Duration::from_millis(600), h.inbound_peer.read_frame())
        .await
        .expect("no keep-alive write within 600ms")
        .expect("inbound closed before keep-alive");
    assert!(KEEPALIVE_PAYLOAD.contains(&junk.len()));
    assert!(junk.iter().all(|b| (b' '..=b'~').contains(b)));

    // Closing the outbound transport stops the drain and disposes.
    h.outbound_peer.close();
    let conn = h.conn.clone();
    wait_until(move || conn.is_disposed()).await;
    assert_eq!(h.disposed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn tracker_drains_through_disposed_hook() {
    let tracker = murk_tunnel::ConnectionTracker::new();
    let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();

    let (inbound, _inbound_peer) = pair();
    let (outbound, _outbound_peer) = pair();
    let conn = Connection::new(
        config(peer, false, false),
        11,
        Arc::new(EmptyResolver),
        inbound,
        outbound,
    );
    let guard = tracker.guard();
    conn.on_disposed(move |_| drop(guard));
    assert_eq!(tracker.count(), 1);

    conn.close();
    assert!(tracker.wait_for_zero(Duration::from_millis(100)).await);
}
