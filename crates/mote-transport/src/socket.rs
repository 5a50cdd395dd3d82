//! UDP socket setup for the datagram channel.
//!
//! This module opens and binds the one or two sockets a channel owns, and
//! decides which of them an outbound datagram leaves through.
//!
//! Setup modes, exactly one of which is chosen on start:
//! - IPv6 socket accepting IPv4-mapped traffic (dual-stack)
//! - IPv4 socket only, when the host has no IPv6 support
//! - IPv6 socket plus a backup IPv4 socket on the same port, when the host
//!   refuses IPv4-mapped addresses on IPv6 sockets
//! - a single socket pinned to an explicit local endpoint

use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::Poll;

use socket2::{Protocol, Socket, Type};
use tokio::io::ReadBuf;
use tokio::net::UdpSocket;

use crate::ChannelConfig;
use crate::endpoint::{AddressFamily, Endpoint};
use crate::transport::{TransportError, TransportResult};

/// Source of raw OS sockets.
///
/// The default [`SystemSockets`] asks the host; other implementations let a
/// channel be exercised against host capabilities it does not actually have.
pub trait SocketProvider: Send + Sync + 'static {
    /// Open an unbound UDP socket of `family`.
    ///
    /// # Errors
    /// Returns the OS error; `EAFNOSUPPORT` for IPv6 triggers IPv4 fallback.
    fn open(&self, family: AddressFamily) -> io::Result<Socket>;

    /// Let an IPv6 socket also carry IPv4 through mapped addresses.
    ///
    /// # Errors
    /// Returns an error if the host rejects the option.
    fn enable_dual_stack(&self, socket: &Socket) -> io::Result<()>;
}

/// Host sockets via `socket2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSockets;

impl SocketProvider for SystemSockets {
    fn open(&self, family: AddressFamily) -> io::Result<Socket> {
        Socket::new(family.domain(), Type::DGRAM, Some(Protocol::UDP))
    }

    fn enable_dual_stack(&self, socket: &Socket) -> io::Result<()> {
        socket.set_only_v6(false)
    }
}

/// Which sockets a running channel owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketMode {
    /// One IPv6 socket carrying both families
    DualStack,
    /// One IPv4 socket; the host has no IPv6
    Ipv4Only,
    /// IPv6 socket plus a separate IPv4 socket on the same port
    Ipv6WithIpv4Backup,
    /// One socket bound to a configured endpoint
    Pinned(AddressFamily),
}

/// One bound, non-blocking UDP socket.
///
/// Clones share one slot. [`SocketHandle::close`] empties it, which closes
/// the OS socket at once for every clone; later I/O fails with
/// `ErrorKind::NotConnected`.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    slot: Arc<Mutex<Option<UdpSocket>>>,
    family: AddressFamily,
    local: SocketAddr,
}

impl SocketHandle {
    /// Wrap a bound `socket2` socket for use on the current Tokio runtime.
    fn from_bound(socket: Socket, family: AddressFamily) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;
        let local = socket.local_addr()?;

        Ok(Self {
            slot: Arc::new(Mutex::new(Some(socket))),
            family,
            local,
        })
    }

    /// Family of the socket itself (not of the traffic it may carry).
    #[must_use]
    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Bound local address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Whether the socket has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.slot().is_none()
    }

    /// Close the OS socket now, for this handle and every clone.
    ///
    /// The slot lock is held for each poll, so once this returns no further
    /// system call reaches the socket.
    pub fn close(&self) {
        drop(self.slot().take());
    }

    /// Receive one datagram into `buf`.
    ///
    /// # Errors
    /// Returns the OS receive error, or `NotConnected` once closed
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        poll_fn(|cx| {
            let slot = self.slot();
            let Some(socket) = slot.as_ref() else {
                return Poll::Ready(Err(closed()));
            };
            let mut read = ReadBuf::new(&mut *buf);
            socket
                .poll_recv_from(cx, &mut read)
                .map_ok(|from| (read.filled().len(), from))
        })
        .await
    }

    /// Send one datagram.
    ///
    /// # Errors
    /// Returns the OS send error, or `NotConnected` once closed
    pub async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        poll_fn(|cx| match self.slot().as_ref() {
            Some(socket) => socket.poll_send_to(cx, buf, target),
            None => Poll::Ready(Err(closed())),
        })
        .await
    }

    fn slot(&self) -> MutexGuard<'_, Option<UdpSocket>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket closed")
}

/// The sockets owned by a running channel.
#[derive(Debug)]
pub struct SocketSet {
    primary: SocketHandle,
    backup: Option<SocketHandle>,
    mode: SocketMode,
}

impl SocketSet {
    /// Setup mode that produced this set.
    #[must_use]
    pub fn mode(&self) -> SocketMode {
        self.mode
    }

    /// Primary socket.
    #[must_use]
    pub fn primary(&self) -> &SocketHandle {
        &self.primary
    }

    /// Backup IPv4 socket, present only in [`SocketMode::Ipv6WithIpv4Backup`].
    #[must_use]
    pub fn backup(&self) -> Option<&SocketHandle> {
        self.backup.as_ref()
    }

    /// Every owned socket, primary first.
    pub fn handles(&self) -> impl Iterator<Item = &SocketHandle> {
        std::iter::once(&self.primary).chain(self.backup.iter())
    }

    /// Close every owned socket.
    pub fn close(&self) {
        for handle in self.handles() {
            handle.close();
        }
    }

    /// Pick the socket and on-the-wire target for `destination`.
    ///
    /// IPv4 destinations use the backup socket when there is one; otherwise
    /// an IPv6 primary reaches them through their IPv4-mapped form.
    #[must_use]
    pub fn route(&self, destination: &Endpoint) -> (&SocketHandle, SocketAddr) {
        match (destination.family(), &self.backup) {
            (AddressFamily::Ipv4, Some(backup)) => (backup, destination.socket_addr()),
            (AddressFamily::Ipv4, None) if self.primary.family == AddressFamily::Ipv6 => {
                (&self.primary, destination.to_ipv4_mapped())
            }
            _ => (&self.primary, destination.socket_addr()),
        }
    }
}

/// Open, configure and bind the channel's sockets.
///
/// Sockets opened before a failing step are dropped, and so closed, before
/// the error is returned.
///
/// # Errors
/// Returns `TransportError` for any setup failure other than the host
/// lacking IPv6, which is handled by falling back to IPv4.
pub fn setup(provider: &dyn SocketProvider, config: &ChannelConfig) -> TransportResult<SocketSet> {
    if let Some(local) = config.local_endpoint {
        let family = AddressFamily::of(&local.ip());
        let socket = open_configured(provider, family, config)?;
        bind(&socket, local)?;
        return Ok(SocketSet {
            primary: SocketHandle::from_bound(socket, family)?,
            backup: None,
            mode: SocketMode::Pinned(family),
        });
    }

    let v6 = match open_configured(provider, AddressFamily::Ipv6, config) {
        Ok(socket) => socket,
        Err(TransportError::Io(e)) if is_family_unsupported(&e) => {
            tracing::warn!("IPv6 unsupported by host, falling back to IPv4 only");
            let v4 = open_configured(provider, AddressFamily::Ipv4, config)?;
            bind(&v4, AddressFamily::Ipv4.unspecified(config.port))?;
            return Ok(SocketSet {
                primary: SocketHandle::from_bound(v4, AddressFamily::Ipv4)?,
                backup: None,
                mode: SocketMode::Ipv4Only,
            });
        }
        Err(e) => return Err(e),
    };

    let backup = match provider.enable_dual_stack(&v6) {
        Ok(()) => None,
        Err(e) => {
            tracing::warn!(error = %e, "IPv4-mapped addresses rejected, opening backup IPv4 socket");
            Some(open_configured(provider, AddressFamily::Ipv4, config)?)
        }
    };

    bind(&v6, AddressFamily::Ipv6.unspecified(config.port))?;
    let primary = SocketHandle::from_bound(v6, AddressFamily::Ipv6)?;

    let (backup, mode) = match backup {
        Some(v4) => {
            // Share the IPv6 socket's port, which matters when it was ephemeral.
            bind(&v4, AddressFamily::Ipv4.unspecified(primary.local.port()))?;
            (
                Some(SocketHandle::from_bound(v4, AddressFamily::Ipv4)?),
                SocketMode::Ipv6WithIpv4Backup,
            )
        }
        None => (None, SocketMode::DualStack),
    };

    Ok(SocketSet {
        primary,
        backup,
        mode,
    })
}

fn open_configured(
    provider: &dyn SocketProvider,
    family: AddressFamily,
    config: &ChannelConfig,
) -> TransportResult<Socket> {
    let socket = provider.open(family)?;

    if let Err(e) = suppress_connection_reset(&socket) {
        tracing::debug!(error = %e, "could not disable ICMP connection-reset reporting");
    }
    if let Some(size) = config.recv_buffer_size {
        socket.set_recv_buffer_size(size)?;
    }
    if let Some(size) = config.send_buffer_size {
        socket.set_send_buffer_size(size)?;
    }

    Ok(socket)
}

fn bind(socket: &Socket, addr: SocketAddr) -> TransportResult<()> {
    socket
        .bind(&addr.into())
        .map_err(|source| TransportError::BindFailed { addr, source })
}

/// Whether `err` means the host does not implement the address family.
pub(crate) fn is_family_unsupported(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::EAFNOSUPPORT)
    }
    #[cfg(windows)]
    {
        // WSAEAFNOSUPPORT
        err.raw_os_error() == Some(10047)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = err;
        false
    }
}

/// Error a host without the requested address family reports.
#[cfg(unix)]
pub(crate) fn family_unsupported_error() -> io::Error {
    io::Error::from_raw_os_error(libc::EAFNOSUPPORT)
}

/// Keep ICMP port-unreachable replies from surfacing as receive errors.
#[cfg(windows)]
fn suppress_connection_reset(socket: &Socket) -> io::Result<()> {
    use std::os::windows::io::AsRawSocket;
    use windows_sys::Win32::Networking::WinSock::{SOCKET_ERROR, WSAIoctl};

    const SIO_UDP_CONNRESET: u32 = 0x9800_000C;

    let disabled: u32 = 0;
    let mut returned: u32 = 0;
    // SAFETY: the socket is open for the duration of the call, the input
    // buffer is a live u32, and no output buffer or overlapped I/O is used.
    let rc = unsafe {
        WSAIoctl(
            socket.as_raw_socket() as _,
            SIO_UDP_CONNRESET,
            std::ptr::from_ref(&disabled).cast(),
            std::mem::size_of::<u32>() as u32,
            std::ptr::null_mut(),
            0,
            &mut returned,
            std::ptr::null_mut(),
            None,
        )
    };
    if rc == SOCKET_ERROR {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Unconnected UDP sockets on Unix never report ICMP errors; nothing to do.
#[cfg(not(windows))]
#[allow(clippy::unnecessary_wraps)]
fn suppress_connection_reset(_socket: &Socket) -> io::Result<()> {
    Ok(())
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;

    /// Host without IPv6.
    pub(crate) struct NoIpv6;

    impl SocketProvider for NoIpv6 {
        fn open(&self, family: AddressFamily) -> io::Result<Socket> {
            match family {
                AddressFamily::Ipv6 => Err(family_unsupported_error()),
                AddressFamily::Ipv4 => SystemSockets.open(family),
            }
        }

        fn enable_dual_stack(&self, _socket: &Socket) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::Unsupported))
        }
    }

    /// Host with IPv6 that refuses IPv4-mapped addresses.
    pub(crate) struct NoMappedAddresses;

    impl SocketProvider for NoMappedAddresses {
        fn open(&self, family: AddressFamily) -> io::Result<Socket> {
            SystemSockets.open(family)
        }

        fn enable_dual_stack(&self, socket: &Socket) -> io::Result<()> {
            // Make the refusal real so the IPv4 port stays free for the backup.
            socket.set_only_v6(true)?;
            Err(io::Error::from(io::ErrorKind::Unsupported))
        }
    }

    /// Host whose IPv6 fails for a reason other than missing support.
    struct BrokenIpv6;

    impl SocketProvider for BrokenIpv6 {
        fn open(&self, family: AddressFamily) -> io::Result<Socket> {
            match family {
                AddressFamily::Ipv6 => Err(io::Error::from(io::ErrorKind::PermissionDenied)),
                AddressFamily::Ipv4 => SystemSockets.open(family),
            }
        }

        fn enable_dual_stack(&self, _socket: &Socket) -> io::Result<()> {
            Ok(())
        }
    }

    /// Host that refuses mapped addresses and then fails to open IPv4.
    struct NoSecondSocket;

    impl SocketProvider for NoSecondSocket {
        fn open(&self, family: AddressFamily) -> io::Result<Socket> {
            match family {
                AddressFamily::Ipv6 => SystemSockets.open(family),
                AddressFamily::Ipv4 => Err(io::Error::from(io::ErrorKind::OutOfMemory)),
            }
        }

        fn enable_dual_stack(&self, _socket: &Socket) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::Unsupported))
        }
    }

    pub(crate) fn host_has_ipv6() -> bool {
        std::net::UdpSocket::bind("[::]:0").is_ok()
    }

    fn v4(addr: &str) -> Endpoint {
        addr.parse().unwrap()
    }

    #[tokio::test]
    async fn test_ipv4_only_mode() {
        let set = setup(&NoIpv6, &ChannelConfig::default()).unwrap();

        assert_eq!(set.mode(), SocketMode::Ipv4Only);
        assert!(set.backup().is_none());
        assert_eq!(set.primary().family(), AddressFamily::Ipv4);
        assert_ne!(set.primary().local_addr().port(), 0);
        assert!(set.primary().local_addr().ip().is_unspecified());
    }

    #[tokio::test]
    async fn test_ipv4_only_routes() {
        let set = setup(&NoIpv6, &ChannelConfig::default()).unwrap();
        let dest = v4("127.0.0.1:5683");

        let (socket, target) = set.route(&dest);
        assert_eq!(socket.family(), AddressFamily::Ipv4);
        assert_eq!(target, dest.socket_addr());
    }

    #[tokio::test]
    async fn test_dual_stack_mode() {
        if !host_has_ipv6() {
            return;
        }
        let set = setup(&SystemSockets, &ChannelConfig::default()).unwrap();

        assert_eq!(set.mode(), SocketMode::DualStack);
        assert_eq!(set.handles().count(), 1);
        assert_eq!(set.primary().family(), AddressFamily::Ipv6);
    }

    #[tokio::test]
    async fn test_dual_stack_routes() {
        if !host_has_ipv6() {
            return;
        }
        let set = setup(&SystemSockets, &ChannelConfig::default()).unwrap();

        let dest = v4("192.0.2.1:5683");
        let (socket, target) = set.route(&dest);
        assert_eq!(socket.family(), AddressFamily::Ipv6);
        assert_eq!(target.to_string(), "[::ffff:192.0.2.1]:5683");

        let dest: Endpoint = "[2001:db8::1]:5683".parse().unwrap();
        let (socket, target) = set.route(&dest);
        assert_eq!(socket.family(), AddressFamily::Ipv6);
        assert_eq!(target, dest.socket_addr());
    }

    #[tokio::test]
    async fn test_backup_mode() {
        if !host_has_ipv6() {
            return;
        }
        let set = setup(&NoMappedAddresses, &ChannelConfig::default()).unwrap();

        assert_eq!(set.mode(), SocketMode::Ipv6WithIpv4Backup);
        let backup = set.backup().unwrap();
        assert_eq!(backup.family(), AddressFamily::Ipv4);
        assert_eq!(
            backup.local_addr().port(),
            set.primary().local_addr().port()
        );
        assert_eq!(set.handles().count(), 2);
    }

    #[tokio::test]
    async fn test_backup_routes() {
        if !host_has_ipv6() {
            return;
        }
        let set = setup(&NoMappedAddresses, &ChannelConfig::default()).unwrap();

        let dest = v4("192.0.2.1:5683");
        let (socket, target) = set.route(&dest);
        assert_eq!(socket.family(), AddressFamily::Ipv4);
        assert_eq!(target, dest.socket_addr());

        let dest: Endpoint = "[2001:db8::1]:5683".parse().unwrap();
        let (socket, target) = set.route(&dest);
        assert_eq!(socket.family(), AddressFamily::Ipv6);
        assert_eq!(target, dest.socket_addr());
    }

    #[tokio::test]
    async fn test_pinned_mode() {
        let config = ChannelConfig::default().bind_to("127.0.0.1:0".parse().unwrap());
        let set = setup(&SystemSockets, &config).unwrap();

        assert_eq!(set.mode(), SocketMode::Pinned(AddressFamily::Ipv4));
        assert_eq!(set.primary().local_addr().ip().to_string(), "127.0.0.1");

        let dest = v4("127.0.0.1:5683");
        let (_, target) = set.route(&dest);
        assert_eq!(target, dest.socket_addr());
    }

    #[tokio::test]
    async fn test_buffer_sizes_applied() {
        let config = ChannelConfig::default().with_buffer_sizes(64 * 1024, 64 * 1024);
        let set = setup(&NoIpv6, &config).unwrap();
        assert_eq!(set.mode(), SocketMode::Ipv4Only);
    }

    #[tokio::test]
    async fn test_other_ipv6_errors_propagate() {
        let result = setup(&BrokenIpv6, &ChannelConfig::default());
        assert!(matches!(
            result,
            Err(TransportError::Io(e)) if e.kind() == io::ErrorKind::PermissionDenied
        ));
    }

    #[tokio::test]
    async fn test_backup_open_failure_propagates() {
        if !host_has_ipv6() {
            return;
        }
        let result = setup(&NoSecondSocket, &ChannelConfig::default());
        assert!(matches!(
            result,
            Err(TransportError::Io(e)) if e.kind() == io::ErrorKind::OutOfMemory
        ));
    }

    #[tokio::test]
    async fn test_bind_conflict_reported() {
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();

        let config = ChannelConfig::default().bind_to(addr);
        let result = setup(&SystemSockets, &config);

        assert!(matches!(
            result,
            Err(TransportError::BindFailed { addr: a, .. }) if a == addr
        ));
    }

    #[tokio::test]
    async fn test_close_releases_port_for_every_clone() {
        let config = ChannelConfig::default().bind_to("127.0.0.1:0".parse().unwrap());
        let set = setup(&SystemSockets, &config).unwrap();
        let clone = set.primary().clone();
        let addr = clone.local_addr();

        set.close();

        assert!(clone.is_closed());
        let mut buf = [0u8; 8];
        let err = clone.recv_from(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        let err = clone.send_to(b"late", addr).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);

        // The clone is still alive, yet the port is free again.
        std::net::UdpSocket::bind(addr).unwrap();
    }

    #[tokio::test]
    async fn test_close_with_pending_receive() {
        let config = ChannelConfig::default().bind_to("127.0.0.1:0".parse().unwrap());
        let set = setup(&SystemSockets, &config).unwrap();
        let handle = set.primary().clone();

        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            handle.recv_from(&mut buf).await
        });
        tokio::task::yield_now().await;

        set.close();
        reader.abort();
        assert!(reader.await.unwrap_err().is_cancelled());
        assert!(set.primary().is_closed());
    }

    #[test]
    fn test_family_unsupported_detection() {
        assert!(is_family_unsupported(&family_unsupported_error()));
        assert!(!is_family_unsupported(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
    }
}
