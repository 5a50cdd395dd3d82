//! Dual-stack UDP datagram channel.
//!
//! This module provides [`DatagramChannel`], the Tokio-driven implementation
//! of the [`Channel`] contract. One read task runs per owned socket; writes
//! go through a [`SendQueue`] drained by at most one send task at a time.
//!
//! Every start opens a fresh generation ([`Active`]) with its own sockets and
//! queue. Stop closes that generation's sockets before it returns, so a task
//! of an old generation can neither reach the network nor a newer queue.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::ChannelConfig;
use crate::endpoint::{AddressFamily, Endpoint};
use crate::queue::{OutboundItem, SendQueue};
use crate::socket::{self, SocketHandle, SocketMode, SocketProvider, SocketSet, SystemSockets};
use crate::transport::{
    Channel, ChannelId, Datagram, ReceiveHandler, StatsCounters, SubscriptionId, TransportError,
    TransportResult, TransportStats,
};

const STOPPED: u8 = 0;
const STARTING: u8 = 1;
const RUNNING: u8 = 2;

/// Builder for a [`DatagramChannel`] with a custom socket provider or span.
pub struct ChannelBuilder {
    config: ChannelConfig,
    provider: Arc<dyn SocketProvider>,
    span: Option<tracing::Span>,
}

impl ChannelBuilder {
    /// Start from `config` with host sockets and a default span.
    #[must_use]
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            provider: Arc::new(SystemSockets),
            span: None,
        }
    }

    /// Open sockets through `provider` instead of the host defaults.
    #[must_use]
    pub fn provider(mut self, provider: impl SocketProvider) -> Self {
        self.provider = Arc::new(provider);
        self
    }

    /// Record all channel diagnostics inside `span`.
    #[must_use]
    pub fn span(mut self, span: tracing::Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Create the (stopped) channel.
    #[must_use]
    pub fn build(self) -> DatagramChannel {
        let id = ChannelId::next();
        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("channel", id = %id));

        DatagramChannel {
            inner: Arc::new(Inner {
                id,
                config: self.config,
                provider: self.provider,
                span,
                state: AtomicU8::new(STOPPED),
                active: RwLock::new(None),
                handlers: RwLock::new(Vec::new()),
                next_subscription: AtomicU64::new(1),
                tasks: Mutex::new(Vec::new()),
                stats: StatsCounters::default(),
            }),
        }
    }
}

/// UDP channel over one dual-stack socket, or an IPv4/IPv6 pair when the
/// host cannot map IPv4 onto IPv6.
///
/// `start` must be called from within a Tokio runtime; the channel spawns its
/// read and send tasks there. Dropping the channel stops it.
///
/// # Examples
///
/// ```no_run
/// use mote_transport::{DatagramChannel, Endpoint};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let channel = DatagramChannel::with_port(5683);
/// let (_, mut incoming) = channel.subscribe_channel();
/// channel.start()?;
///
/// channel.send(b"ping".to_vec(), "127.0.0.1:5684".parse::<Endpoint>()?);
/// if let Some(datagram) = incoming.recv().await {
///     println!("{} bytes from {}", datagram.payload.len(), datagram.source);
/// }
/// # Ok(())
/// # }
/// ```
pub struct DatagramChannel {
    inner: Arc<Inner>,
}

/// One start-to-stop generation.
struct Active {
    sockets: SocketSet,
    runtime: Handle,
    queue: SendQueue,
}

struct Inner {
    id: ChannelId,
    config: ChannelConfig,
    provider: Arc<dyn SocketProvider>,
    span: tracing::Span,
    state: AtomicU8,
    active: RwLock<Option<Arc<Active>>>,
    handlers: RwLock<Vec<(SubscriptionId, Arc<dyn ReceiveHandler>)>>,
    next_subscription: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stats: StatsCounters,
}

impl DatagramChannel {
    /// Create a channel from `config`.
    #[must_use]
    pub fn new(config: ChannelConfig) -> Self {
        ChannelBuilder::new(config).build()
    }

    /// Create a channel listening on `port` on every available family.
    #[must_use]
    pub fn with_port(port: u16) -> Self {
        Self::new(ChannelConfig::default().with_port(port))
    }

    /// Create a channel bound to exactly `addr`.
    #[must_use]
    pub fn bind_to(addr: SocketAddr) -> Self {
        Self::new(ChannelConfig::default().bind_to(addr))
    }

    /// Builder for a channel with a custom provider or span.
    #[must_use]
    pub fn builder(config: ChannelConfig) -> ChannelBuilder {
        ChannelBuilder::new(config)
    }

    /// Channel identity carried on received datagrams.
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    /// Configuration the channel was built with.
    #[must_use]
    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Whether the channel is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Socket setup mode, while running.
    #[must_use]
    pub fn mode(&self) -> Option<SocketMode> {
        read(&self.inner.active)
            .as_ref()
            .map(|active| active.sockets.mode())
    }

    /// Bound primary address while running, otherwise the configured one.
    #[must_use]
    pub fn local_endpoint(&self) -> Endpoint {
        if let Some(active) = read(&self.inner.active).as_ref() {
            return Endpoint::new(active.sockets.primary().local_addr());
        }
        let config = &self.inner.config;
        Endpoint::new(
            config
                .local_endpoint
                .unwrap_or_else(|| AddressFamily::Ipv6.unspecified(config.port)),
        )
    }

    /// Bound address of the backup IPv4 socket, if there is one.
    #[must_use]
    pub fn backup_endpoint(&self) -> Option<Endpoint> {
        read(&self.inner.active)
            .as_ref()
            .and_then(|active| active.sockets.backup())
            .map(|backup| Endpoint::new(backup.local_addr()))
    }

    /// Whether delivery is guaranteed. It never is.
    #[must_use]
    pub fn is_reliable(&self) -> bool {
        false
    }

    /// Number of datagrams waiting to be written.
    #[must_use]
    pub fn queued(&self) -> usize {
        read(&self.inner.active)
            .as_ref()
            .map_or(0, |active| active.queue.len())
    }

    /// Snapshot of the channel counters.
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        self.inner.stats.snapshot()
    }

    /// Open sockets and start reading.
    ///
    /// A second call while running is a no-op. A failed start leaves the
    /// channel stopped, with every socket it opened closed again.
    ///
    /// # Errors
    /// Returns `TransportError::NoRuntime` outside a Tokio runtime, otherwise
    /// the socket setup error
    pub fn start(&self) -> TransportResult<()> {
        let inner = &self.inner;
        if inner
            .state
            .compare_exchange(STOPPED, STARTING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let _entered = inner.span.enter();
        match inner.open() {
            Ok(()) => {
                let _ = inner.state.compare_exchange(
                    STARTING,
                    RUNNING,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                Ok(())
            }
            Err(e) => {
                let _ = inner.state.compare_exchange(
                    STARTING,
                    STOPPED,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                tracing::error!(error = %e, "channel failed to start");
                Err(e)
            }
        }
    }

    /// Close every socket and discard queued datagrams.
    ///
    /// The sockets are closed when this returns: their ports can be bound
    /// again and no further reads or writes reach them. Safe to call from any
    /// thread and any number of times.
    pub fn stop(&self) {
        let inner = &self.inner;
        loop {
            match inner.state.compare_exchange(
                RUNNING,
                STOPPED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                // Setup is synchronous and short; wait for it to settle.
                Err(STARTING) => std::thread::yield_now(),
                Err(_) => return,
            }
        }

        let _entered = inner.span.enter();
        inner.close();
    }

    /// Queue `payload` for `destination`.
    ///
    /// Never waits on the network. If no write is in flight this call starts
    /// the send task. Datagrams sent while stopped are dropped.
    pub fn send(&self, payload: impl Into<Vec<u8>>, destination: impl Into<Endpoint>) {
        let inner = &self.inner;
        let destination = destination.into();

        let active = if inner.is_running() {
            read(&inner.active).clone()
        } else {
            None
        };
        let Some(active) = active else {
            let _entered = inner.span.enter();
            tracing::debug!(%destination, "channel not running, dropping datagram");
            return;
        };

        active.queue.push(OutboundItem {
            payload: payload.into(),
            destination,
        });
        if !inner.is_current(&active) {
            // Stopped between the lookup and the push.
            active.queue.clear();
            return;
        }
        if active.queue.try_acquire_writer() {
            inner.spawn_writer(active);
        }
    }

    /// Register a receive handler.
    pub fn subscribe(&self, handler: impl ReceiveHandler) -> SubscriptionId {
        self.inner.add_handler(Arc::new(handler))
    }

    /// Register a handler that forwards every datagram into a Tokio channel.
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<Datagram>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.subscribe(tx), rx)
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.remove_handler(id)
    }
}

impl Channel for DatagramChannel {
    fn start(&self) -> TransportResult<()> {
        DatagramChannel::start(self)
    }

    fn stop(&self) {
        DatagramChannel::stop(self);
    }

    fn send(&self, payload: Vec<u8>, destination: Endpoint) {
        DatagramChannel::send(self, payload, destination);
    }

    fn subscribe(&self, handler: Arc<dyn ReceiveHandler>) -> SubscriptionId {
        self.inner.add_handler(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        DatagramChannel::unsubscribe(self, id)
    }

    fn local_endpoint(&self) -> Endpoint {
        DatagramChannel::local_endpoint(self)
    }

    fn is_reliable(&self) -> bool {
        DatagramChannel::is_reliable(self)
    }

    fn stats(&self) -> TransportStats {
        DatagramChannel::stats(self)
    }
}

impl Default for DatagramChannel {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}

impl Drop for DatagramChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for DatagramChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatagramChannel")
            .field("id", &self.inner.id)
            .field("running", &self.inner.is_running())
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }

    fn is_current(&self, active: &Arc<Active>) -> bool {
        read(&self.active)
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, active))
    }

    fn open(self: &Arc<Self>) -> TransportResult<()> {
        self.config.validate()?;
        let runtime = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        let sockets = socket::setup(self.provider.as_ref(), &self.config)?;

        tracing::info!(
            mode = ?sockets.mode(),
            local = %sockets.primary().local_addr(),
            backup = ?sockets.backup().map(SocketHandle::local_addr),
            "channel started"
        );

        let active = Arc::new(Active {
            sockets,
            runtime,
            queue: SendQueue::new(),
        });
        {
            let mut tasks = lock(&self.tasks);
            for handle in active.sockets.handles() {
                let task = read_loop(Arc::clone(self), handle.clone()).instrument(self.span.clone());
                tasks.push(active.runtime.spawn(task));
            }
        }
        *write(&self.active) = Some(active);
        Ok(())
    }

    fn close(&self) {
        let Some(active) = write(&self.active).take() else {
            return;
        };
        active.sockets.close();
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        let discarded = active.queue.clear();

        tracing::info!(discarded, "channel stopped");
    }

    fn spawn_writer(self: &Arc<Self>, active: Arc<Active>) {
        let task = send_loop(Arc::clone(self), Arc::clone(&active)).instrument(self.span.clone());
        let handle = active.runtime.spawn(task);

        let mut tasks = lock(&self.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    fn add_handler(&self, handler: Arc<dyn ReceiveHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        write(&self.handlers).push((id, handler));
        id
    }

    fn remove_handler(&self, id: SubscriptionId) -> bool {
        let mut handlers = write(&self.handlers);
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    fn notify(&self, datagram: &Datagram) {
        // Handlers may subscribe or send re-entrantly, so call them unlocked.
        let handlers: Vec<Arc<dyn ReceiveHandler>> = read(&self.handlers)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        if handlers.is_empty() {
            tracing::trace!(source = %datagram.source, "no receive handler, datagram dropped");
        }
        for handler in handlers {
            handler.on_datagram(datagram);
        }
    }
}

async fn read_loop(inner: Arc<Inner>, socket: SocketHandle) {
    let max = inner.config.max_datagram_size;
    let mut buf = vec![0u8; max + 1];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((0, from)) => {
                tracing::trace!(%from, "ignoring empty datagram");
            }
            Ok((len, from)) => {
                inner.stats.record_recv(len);
                let datagram = Datagram {
                    payload: buf[..len].to_vec(),
                    source: Endpoint::new(from),
                    channel: inner.id,
                    truncated: len > max,
                };
                if datagram.truncated {
                    tracing::debug!(source = %datagram.source, max, "datagram exceeds maximum size");
                }
                inner.notify(&datagram);
            }
            Err(_) if socket.is_closed() => return,
            Err(e) => {
                inner.stats.record_recv_error();
                tracing::debug!(error = %e, local = %socket.local_addr(), "receive failed, re-arming read");
                tokio::task::yield_now().await;
            }
        }
    }
}

async fn send_loop(inner: Arc<Inner>, active: Arc<Active>) {
    while let Some(item) = active.queue.next_or_release() {
        if !inner.is_current(&active) {
            active.queue.clear();
            return;
        }

        let (socket, target) = active.sockets.route(&item.destination);
        match socket.send_to(&item.payload, target).await {
            Ok(sent) => {
                inner.stats.record_send(sent);
                tracing::trace!(bytes = sent, %target, "datagram sent");
            }
            Err(e) => {
                inner.stats.record_send_error();
                tracing::debug!(
                    error = %e,
                    destination = %item.destination,
                    "send failed, dropping datagram"
                );
            }
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
