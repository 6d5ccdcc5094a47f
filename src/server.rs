use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use event_listener::{Event, Listener};
use tracing::{debug, info, warn};

use crate::cgi::response::{CanonicalReasons, ReasonPhrase};
use crate::conn::{self, CancelToken, Connection, Handler};
use crate::Config;


/// Pause between failed `accept` calls, e.g. while out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);


#[derive(Debug, Default)]
struct Slots {
    next_id: u64,
    active: HashMap<u64, CancelToken>,
    threads: Vec<JoinHandle<()>>,
}

/// Connection bookkeeping shared between the accept loop and its workers.
#[derive(Debug, Default)]
struct Registry {
    slots: Mutex<Slots>,
    freed: Event,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}


/// A reserved connection slot. Dropping it frees the slot again.
#[derive(Debug)]
struct ConnToken {
    id: u64,
    cancel: CancelToken,
    registry: Arc<Registry>,
}

impl Drop for ConnToken {
    fn drop(&mut self) {
        self.registry.lock().active.remove(&self.id);
        self.registry.freed.notify(usize::MAX);
    }
}


/// Accepts FastCGI connections on a [`TcpListener`] and serves each on its
/// own thread.
///
/// At most [`Config::max_conns`] connections are served at the same time.
/// Further connections are not accepted until a slot frees up.
pub struct Runner<H> {
    config: Arc<Config>,
    handler: Arc<H>,
    reasons: Arc<dyn ReasonPhrase + Send + Sync>,
    shutdown: CancelToken,
    registry: Arc<Registry>,
    local: Mutex<Option<SocketAddr>>,
}

impl<H> Runner<H>
where
    H: Handler + Send + Sync + 'static,
{
    /// Creates a [`Runner`] which uses the [`CanonicalReasons`] phrases.
    #[must_use]
    pub fn new(config: Config, handler: H) -> Self {
        Self {
            config: Arc::new(config),
            handler: Arc::new(handler),
            reasons: Arc::new(CanonicalReasons),
            shutdown: CancelToken::new(),
            registry: Arc::default(),
            local: Mutex::new(None),
        }
    }

    /// Replaces the reason phrase lookup for status lines.
    #[must_use]
    pub fn with_reasons(mut self, reasons: impl ReasonPhrase + Send + Sync + 'static) -> Self {
        self.reasons = Arc::new(reasons);
        self
    }

    /// Returns the number of connection threads that are still running.
    #[must_use]
    pub fn active_conns(&self) -> usize {
        self.registry.lock().threads.iter().filter(|t| !t.is_finished()).count()
    }

    /// Tests whether `Runner::shutdown` was called.
    #[inline]
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Accepts and serves connections until `Runner::shutdown` is called.
    ///
    /// # Errors
    /// Returns an error if the listener's local address is unavailable.
    /// Failures to accept or set up a single connection are logged and
    /// skipped.
    pub fn serve(&self, listener: &TcpListener) -> io::Result<()> {
        let local = listener.local_addr()?;
        *self.local.lock().unwrap_or_else(PoisonError::into_inner) = Some(local);
        info!(protocol = "tcp", %local, "server created");

        loop {
            // Reserve a slot *before* accepting to respect max_conns
            let Some(token) = self.get_token() else { break; };
            let (stream, remote) = match listener.accept() {
                Ok(c) => c,
                Err(e) => {
                    let error: &dyn std::error::Error = &e;
                    info!(protocol = "tcp", %local, error, "accept failed");
                    drop(token);
                    if self.shutdown.wait_timeout(ACCEPT_BACKOFF) {
                        break;
                    }
                    continue;
                },
            };
            if self.shutdown.is_cancelled() {
                break;
            }

            if let Err(e) = self.spawn(token, stream, local, remote) {
                let error: &dyn std::error::Error = &e;
                warn!(protocol = "tcp", %local, %remote, error, "failed to start connection");
            }
        }

        debug!(protocol = "tcp", %local, "accept loop stopped");
        Ok(())
    }

    /// Blocks until fewer than `max_conns` connections are active, then
    /// reserves a slot. Returns [`None`] once the runner is shut down.
    fn get_token(&self) -> Option<ConnToken> {
        let max_conns = self.config.max_conns.get();
        let mut slots = self.registry.lock();
        while slots.active.len() >= max_conns && !self.shutdown.is_cancelled() {
            // Listen while still locked, so no freed slot is missed
            let listener = self.registry.freed.listen();
            drop(slots);
            listener.wait();
            slots = self.registry.lock();
        }
        if self.shutdown.is_cancelled() {
            return None;
        }

        slots.threads.retain(|t| !t.is_finished());
        let id = slots.next_id;
        slots.next_id += 1;
        let cancel = CancelToken::new();
        slots.active.insert(id, cancel.clone());
        Some(ConnToken { id, cancel, registry: Arc::clone(&self.registry) })
    }

    fn spawn(&self, token: ConnToken, stream: TcpStream, local: SocketAddr, remote: SocketAddr) -> io::Result<()> {
        let output = stream.try_clone()?;
        let closer = stream.try_clone()?;
        token.cancel.on_cancel(move || {
            if let Err(e) = closer.shutdown(Shutdown::Both) {
                debug!(error = %e, "socket shutdown on cancellation failed");
            }
        });

        let config = Arc::clone(&self.config);
        let handler = Arc::clone(&self.handler);
        let reasons = Arc::clone(&self.reasons);
        let span = tracing::error_span!("fastcgi_connection", protocol = "tcp", %local, %remote);

        let handle = thread::Builder::new()
            .name(format!("fastcgi-conn-{}", token.id))
            .spawn(move || {
                let _entered = span.enter();
                debug!("new connection accepted");
                let mut conn = Connection::new(stream, output, &config, &*handler, &*reasons)
                    .with_cancel(token.cancel.clone());
                match conn.run() {
                    Ok(()) => debug!("connection closed"),
                    Err(conn::Error::Cancelled) => debug!("connection cancelled"),
                    Err(e) => {
                        let error: &dyn std::error::Error = &e;
                        warn!(error, "connection failed");
                    },
                }
                drop(token);
            })?;

        self.registry.lock().threads.push(handle);
        Ok(())
    }

    /// Stops accepting connections, cancels all active connections, and
    /// waits for their threads to finish.
    ///
    /// A blocked `Runner::serve` call is woken up by a connection to its own
    /// listener, using the loopback address if it is bound to a wildcard.
    pub fn shutdown(&self) {
        info!("shutting down");
        self.shutdown.cancel();
        let threads = {
            let mut slots = self.registry.lock();
            for cancel in slots.active.values() {
                cancel.cancel();
            }
            std::mem::take(&mut slots.threads)
        };
        self.registry.freed.notify(usize::MAX);

        let local = *self.local.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(local) = local.map(wake_addr) {
            if let Err(e) = TcpStream::connect(local) {
                debug!(%local, error = %e, "waking the accept loop failed");
            }
        }

        for t in threads {
            if t.join().is_err() {
                warn!("connection thread panicked");
            }
        }
    }
}

/// Returns an address that reaches a listener bound to `local`.
fn wake_addr(mut local: SocketAddr) -> SocketAddr {
    if local.ip().is_unspecified() {
        let loopback: IpAddr = match local {
            SocketAddr::V4(_) => Ipv4Addr::LOCALHOST.into(),
            SocketAddr::V6(_) => Ipv6Addr::LOCALHOST.into(),
        };
        local.set_ip(loopback);
    }
    local
}

impl<H> std::fmt::Debug for Runner<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("config", &self.config)
            .field("shutdown", &self.shutdown)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
