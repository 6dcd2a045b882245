//! Per-connection relay lifecycle.
//!
//! A [`Connection`] owns one tunneled session: two framed transmissions
//! on the obfuscated side, one raw TCP socket to the remote peer, and up
//! to four relay legs binding them together. Each leg is a spawned task
//! with exactly one operation in flight, so bytes are never reordered
//! within a direction and backpressure falls out of the loop shape: the
//! next read is not issued until the previous write completed.
//!
//! Teardown is a single-firing barrier. Whichever leg or caller loses the
//! race through the `disposed` flag cancels the shared token, closes both
//! transmissions, and fires the one-shot disposed hook; every other
//! caller and every late completion observes the flag and backs out
//! without re-arming. The remote socket's halves live inside the two
//! relay legs and drop (closing the descriptor) as those legs observe the
//! cancellation.
//!
//! `Connection` is a cheap-clone handle; leg tasks carry clones of it and
//! never keep the session alive beyond its disposal.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use murk_core::defaults::{KEEPALIVE_DELAY_MS, KEEPALIVE_PAYLOAD};
use murk_core::{Resolve, Transmission};
use parking_lot::Mutex;
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::TunnelConfig;
use crate::error::TunnelError;
use crate::socket;

type DisposedHook = Box<dyn FnOnce(u32) + Send>;

/// One tunneled session: inbound ↔ remote ↔ outbound.
///
/// Cheaply cloneable; all clones refer to the same session.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    id: u32,
    config: Arc<TunnelConfig>,
    /// Relay buffer size, fixed from the config snapshot at construction.
    mss: usize,
    resolver: Arc<dyn Resolve>,
    /// Transmission cells. Emptied exactly once by `dispose`; a leg that
    /// finds one empty treats the session as gone.
    inbound: Mutex<Option<Arc<dyn Transmission>>>,
    outbound: Mutex<Option<Arc<dyn Transmission>>>,
    /// Single-firing disposal barrier.
    disposed: AtomicBool,
    /// Latched by the first `listen`; a second `listen` must not
    /// reallocate the relay buffer.
    listening: AtomicBool,
    /// True once both relay directions are armed.
    available: AtomicBool,
    /// Cancels resolve/connect jobs, relay legs, and keep-alive timers.
    shutdown: CancellationToken,
    on_disposed: Mutex<Option<DisposedHook>>,
}

impl Connection {
    /// Create a session over the given transmissions. The configuration
    /// snapshot is immutable for the session's lifetime.
    pub fn new(
        config: Arc<TunnelConfig>,
        id: u32,
        resolver: Arc<dyn Resolve>,
        inbound: Arc<dyn Transmission>,
        outbound: Arc<dyn Transmission>,
    ) -> Self {
        let mss = config.mss();
        Self {
            inner: Arc::new(Inner {
                id,
                config,
                mss,
                resolver,
                inbound: Mutex::new(Some(inbound)),
                outbound: Mutex::new(Some(outbound)),
                disposed: AtomicBool::new(false),
                listening: AtomicBool::new(false),
                available: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                on_disposed: Mutex::new(None),
            }),
        }
    }

    /// Opaque session correlator, as assigned by the owner.
    pub fn id(&self) -> u32 {
        self.inner.id
    }

    /// Relay buffer size in effect for this session.
    pub fn mss(&self) -> usize {
        self.inner.mss
    }

    /// Install the one-shot hook fired by disposal with the session id.
    pub fn on_disposed(&self, hook: impl FnOnce(u32) + Send + 'static) {
        *self.inner.on_disposed.lock() = Some(Box::new(hook));
    }

    /// Whether teardown has begun or any owned collaborator is gone.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
            || self.inner.inbound.lock().is_none()
            || self.inner.outbound.lock().is_none()
    }

    /// Whether both relay directions are armed and the session is live.
    pub fn available(&self) -> bool {
        self.inner.available.load(Ordering::Acquire) && !self.is_disposed()
    }

    /// Start the session.
    ///
    /// With `network` present, adopts it as the remote socket and arms the
    /// relay synchronously. Without it, dials `remote_ip:remote_port`
    /// (resolving the name first when `resolve_as_domain` is set) and arms
    /// the relay from the connect completion. A resolution that yields no
    /// endpoint leaves the session un-armed; the owner reaps it by the
    /// continued absence of [`available`](Self::available).
    ///
    /// Must be called exactly once per session.
    pub fn listen(&self, network: Option<TcpStream>) -> Result<(), TunnelError> {
        let inner = &self.inner;
        if inner.disposed.load(Ordering::Acquire) {
            return Err(TunnelError::Disposed);
        }
        if inner
            .listening
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TunnelError::InvalidArgument("listen already called"));
        }

        let buffers = vec![0u8; inner.mss].into_boxed_slice();
        match network {
            Some(stream) => {
                if !self.establish_relay(stream, buffers) {
                    return Err(TunnelError::Disposed);
                }
                inner.available.store(true, Ordering::Release);
                debug!(id = inner.id, "relay armed on adopted socket");
                Ok(())
            }
            None => {
                if inner.inbound.lock().is_none() || inner.outbound.lock().is_none() {
                    return Err(TunnelError::InvalidArgument("transmission missing"));
                }
                if inner.config.resolve_as_domain {
                    let conn = self.clone();
                    tokio::spawn(async move { conn.resolve_and_connect(buffers).await });
                    Ok(())
                } else {
                    let ip: IpAddr = inner.config.remote_ip.parse()?;
                    self.connect_remote(SocketAddr::new(ip, inner.config.remote_port), buffers)
                }
            }
        }
    }

    /// Tear the session down. Alias for [`dispose`](Self::dispose).
    pub fn close(&self) {
        self.dispose();
    }

    /// The disposal barrier. The first caller cancels every pending
    /// operation, closes both transmissions, and fires the disposed hook;
    /// later callers and racing completions are no-ops.
    pub fn dispose(&self) {
        let inner = &self.inner;
        if inner
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        inner.shutdown.cancel();
        if let Some(transmission) = inner.inbound.lock().take() {
            transmission.close();
        }
        if let Some(transmission) = inner.outbound.lock().take() {
            transmission.close();
        }

        let hook = inner.on_disposed.lock().take();
        if let Some(hook) = hook {
            hook(inner.id);
        }
        debug!(id = inner.id, "connection disposed");
    }

    async fn resolve_and_connect(self, buffers: Box<[u8]>) {
        let inner = &self.inner;
        let endpoint = tokio::select! {
            _ = inner.shutdown.cancelled() => return,
            ep = inner
                .resolver
                .resolve(&inner.config.remote_ip, inner.config.remote_port) => ep,
        };
        match endpoint {
            Some(peer) => {
                // A dial that cannot even get a socket leaves the session
                // un-armed, same as an empty resolution.
                if let Err(e) = self.connect_remote(peer, buffers) {
                    debug!(id = inner.id, error = %e, "remote socket unavailable");
                }
            }
            None => {
                debug!(
                    id = inner.id,
                    host = %inner.config.remote_ip,
                    "resolution returned no endpoint"
                );
            }
        }
    }

    fn connect_remote(&self, peer: SocketAddr, buffers: Box<[u8]>) -> Result<(), TunnelError> {
        if self.inner.disposed.load(Ordering::Acquire) {
            return Err(TunnelError::Disposed);
        }
        let sock = socket::remote_socket(&self.inner.config, peer)?;

        let conn = self.clone();
        tokio::spawn(async move {
            let inner = &conn.inner;
            let connected = tokio::select! {
                _ = inner.shutdown.cancelled() => return,
                res = sock.connect(peer) => res,
            };
            match connected {
                Ok(stream) => {
                    if conn.establish_relay(stream, buffers) {
                        inner.available.store(true, Ordering::Release);
                        debug!(id = inner.id, peer = %peer, "remote connected, relay armed");
                    } else {
                        conn.close();
                    }
                }
                Err(e) => {
                    debug!(id = inner.id, peer = %peer, error = %e, "remote connect failed");
                    conn.close();
                }
            }
        });
        Ok(())
    }

    /// Arm both relay directions, plus the keep-alive legs when enabled.
    fn establish_relay(&self, stream: TcpStream, buffers: Box<[u8]>) -> bool {
        let inner = &self.inner;
        if inner.disposed.load(Ordering::Acquire) {
            return false;
        }
        let inbound = match inner.inbound.lock().clone() {
            Some(transmission) => transmission,
            None => return false,
        };
        let outbound = match inner.outbound.lock().clone() {
            Some(transmission) => transmission,
            None => return false,
        };

        let (remote_rx, remote_tx) = stream.into_split();
        self.spawn_inbound_to_remote(Arc::clone(&inbound), remote_tx);
        self.spawn_remote_to_outbound(remote_rx, Arc::clone(&outbound), buffers);
        if inner.config.keep_alived {
            self.spawn_keepalive_drain(outbound);
            self.spawn_keepalive_send(inbound);
        }
        true
    }

    /// Leg 1: inbound frames onto the remote byte stream.
    fn spawn_inbound_to_remote(&self, inbound: Arc<dyn Transmission>, mut remote: OwnedWriteHalf) {
        let conn = self.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = conn.inner.shutdown.cancelled() => return,
                    frame = inbound.read_frame() => frame,
                };
                let frame = match frame {
                    Some(frame) if !frame.is_empty() => frame,
                    _ => break,
                };
                let wrote = tokio::select! {
                    _ = conn.inner.shutdown.cancelled() => return,
                    res = remote.write_all(&frame) => res,
                };
                if wrote.is_err() {
                    break;
                }
            }
            conn.close();
        });
    }

    /// Leg 2: remote bytes onto the outbound transmission, one relay
    /// buffer reused across reads. The next read is only issued after the
    /// previous frame's write completed.
    fn spawn_remote_to_outbound(
        &self,
        mut remote: OwnedReadHalf,
        outbound: Arc<dyn Transmission>,
        mut buffers: Box<[u8]>,
    ) {
        let conn = self.clone();
        tokio::spawn(async move {
            loop {
                let read = tokio::select! {
                    _ = conn.inner.shutdown.cancelled() => return,
                    res = remote.read(&mut buffers[..]) => res,
                };
                let len = match read {
                    Ok(len) if len > 0 => len,
                    _ => break,
                };
                let frame = Bytes::copy_from_slice(&buffers[..len]);
                let wrote = tokio::select! {
                    _ = conn.inner.shutdown.cancelled() => return,
                    ok = outbound.write_frame(frame) => ok,
                };
                if !wrote {
                    break;
                }
            }
            conn.close();
        });
    }

    /// Leg 3: keep the outbound read side moving, discarding the peer's
    /// keep-alive junk. A closed read still tears the session down.
    fn spawn_keepalive_drain(&self, outbound: Arc<dyn Transmission>) {
        let conn = self.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = conn.inner.shutdown.cancelled() => return,
                    frame = outbound.read_frame() => frame,
                };
                match frame {
                    Some(frame) if !frame.is_empty() => continue,
                    _ => break,
                }
            }
            conn.close();
        });
    }

    /// Leg 4: write random junk to the inbound transmission on a jittered
    /// timer. Only one timer is ever pending; the next is scheduled after
    /// the write completes.
    fn spawn_keepalive_send(&self, inbound: Arc<dyn Transmission>) {
        let conn = self.clone();
        tokio::spawn(async move {
            loop {
                let delay = rand::thread_rng().gen_range(KEEPALIVE_DELAY_MS);
                tokio::select! {
                    _ = conn.inner.shutdown.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                }
                let wrote = tokio::select! {
                    _ = conn.inner.shutdown.cancelled() => return,
                    ok = inbound.write_frame(junk_frame()) => ok,
                };
                if !wrote {
                    break;
                }
            }
            conn.close();
        });
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("mss", &self.inner.mss)
            .field("disposed", &self.inner.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

/// A keep-alive payload: 8..=64 random printable-ASCII bytes.
fn junk_frame() -> Bytes {
    let mut rng = rand::thread_rng();
    let len = rng.gen_range(KEEPALIVE_PAYLOAD);
    let payload: Vec<u8> = (0..len).map(|_| rng.gen_range(b' '..=b'~')).collect();
    Bytes::from(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    #[derive(Debug)]
    struct NoResolve;

    #[async_trait]
    impl Resolve for NoResolve {
        async fn resolve(&self, _host: &str, _port: u16) -> Option<SocketAddr> {
            None
        }
    }

    fn test_config() -> Arc<TunnelConfig> {
        Arc::new(
            toml::from_str(
                r#"
remote_ip = "127.0.0.1"
remote_port = 1
alignment = 1024
"#,
            )
            .unwrap(),
        )
    }

    fn test_connection() -> Connection {
        let (inbound, _) = murk_core::transmission::pair();
        let (outbound, _) = murk_core::transmission::pair();
        Connection::new(test_config(), 5, Arc::new(NoResolve), inbound, outbound)
    }

    #[tokio::test]
    async fn dispose_fires_hook_exactly_once() {
        let conn = test_connection();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        conn.on_disposed(move |id| {
            assert_eq!(id, 5);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        conn.dispose();
        conn.dispose();
        conn.close();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(conn.is_disposed());
        assert!(!conn.available());
    }

    #[tokio::test]
    async fn listen_rejects_after_dispose() {
        let conn = test_connection();
        conn.dispose();
        assert!(matches!(conn.listen(None), Err(TunnelError::Disposed)));
    }

    #[tokio::test]
    async fn mss_comes_from_alignment() {
        let conn = test_connection();
        assert_eq!(conn.mss(), 1024);
    }

    #[tokio::test]
    async fn junk_frames_are_printable_and_bounded() {
        for _ in 0..64 {
            let frame = junk_frame();
            assert!(KEEPALIVE_PAYLOAD.contains(&frame.len()));
            assert!(frame.iter().all(|b| (b' '..=b'~').contains(b)));
        }
    }
}
