use std::io;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

/// Binds a non-blocking UDP socket. IPv6 sockets are restricted to IPv6 so that a separate IPv4
///  socket can share the port.
pub fn bind_udp(addr: SocketAddr) -> anyhow::Result<UdpSocket> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    }
    else {
        Domain::IPV4
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;

    let socket = UdpSocket::from_std(socket.into())?;
    info!("bound UDP socket to {:?}", socket.local_addr()?);
    Ok(socket)
}

/// A pair of UDP sockets listening on the same port for IPv4 and IPv6. A family that cannot be
///  bound is logged and left out, the other one still works.
#[derive(Debug, Clone, Default)]
pub struct DualStackUdp {
    pub v4: Option<Arc<UdpSocket>>,
    pub v6: Option<Arc<UdpSocket>>,
}
impl DualStackUdp {
    pub fn bind(port_v4: u16, port_v6: u16) -> DualStackUdp {
        let bind = |addr: SocketAddr| match bind_udp(addr) {
            Ok(socket) => Some(Arc::new(socket)),
            Err(e) => {
                error!("cannot bind UDP socket to {:?}: {}", addr, e);
                None
            }
        };

        DualStackUdp {
            v4: bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port_v4))),
            v6: bind(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port_v6))),
        }
    }

    fn socket_for(&self, to: SocketAddr) -> Option<&Arc<UdpSocket>> {
        if to.is_ipv6() {
            self.v6.as_ref()
        }
        else {
            self.v4.as_ref()
        }
    }

    /// Sends without waiting: a datagram that cannot be sent right away is dropped.
    pub fn try_send_to(&self, to: SocketAddr, buf: &[u8]) {
        let Some(socket) = self.socket_for(to)
        else {
            debug!("no socket for sending to {:?} - dropping datagram", to);
            return;
        };

        trace!("sending {} bytes to {:?}", buf.len(), to);
        match socket.try_send_to(buf, to) {
            Ok(n) if n != buf.len() => warn!("partial write of {} out of {} bytes to {:?}", n, buf.len(), to),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => warn!("UDP socket not ready - dropping datagram to {:?}", to),
            Err(e) => error!("error sending UDP packet to {:?}: {}", to, e),
        }
    }

    pub async fn send_to(&self, to: SocketAddr, buf: &[u8]) {
        let Some(socket) = self.socket_for(to)
        else {
            debug!("no socket for sending to {:?} - dropping datagram", to);
            return;
        };

        trace!("sending {} bytes to {:?}", buf.len(), to);
        if let Err(e) = socket.send_to(buf, to).await {
            error!("error sending UDP packet to {:?}: {}", to, e);
        }
    }

    /// Spawns a receive loop per bound socket, mapping each datagram to an event.
    pub fn spawn_receivers<E: Send + 'static>(&self, events: mpsc::Sender<E>, to_event: fn(Vec<u8>, SocketAddr) -> E) {
        for socket in self.v4.iter().chain(self.v6.iter()) {
            tokio::spawn(recv_loop(socket.clone(), events.clone(), to_event));
        }
    }
}

const MAX_DATAGRAM_LEN: usize = 2048;

/// pause after a receive error that is not tied to a single datagram
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Errors caused by a single datagram or by a signal, after which the next receive can be
///  attempted right away. ICMP port unreachable shows up as a reset on some platforms.
fn is_transient(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused)
}

async fn recv_loop<E: Send + 'static>(socket: Arc<UdpSocket>, events: mpsc::Sender<E>, to_event: fn(Vec<u8>, SocketAddr) -> E) {
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    loop {
        let (num_read, from) = match socket.recv_from(&mut buf).await {
            Ok(x) => x,
            Err(e) if is_transient(&e) => {
                debug!("transient socket error: {}", e);
                continue;
            }
            Err(e) => {
                error!("socket error - pausing for {:?}: {}", RECV_ERROR_BACKOFF, e);
                sleep(RECV_ERROR_BACKOFF).await;
                continue;
            }
        };
        trace!("received datagram from {:?}: {:?}", from, &buf[..num_read]);

        if events.send(to_event(buf[..num_read].to_vec(), from)).await.is_err() {
            debug!("event loop is gone - stopping receive loop");
            return;
        }
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::interrupted(ErrorKind::Interrupted, true)]
    #[case::port_unreachable(ErrorKind::ConnectionRefused, true)]
    #[case::reset(ErrorKind::ConnectionReset, true)]
    #[case::permission(ErrorKind::PermissionDenied, false)]
    #[case::other(ErrorKind::Other, false)]
    fn test_is_transient(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(is_transient(&io::Error::from(kind)), expected);
    }

    #[tokio::test]
    async fn test_bind_and_receive() {
        let receiver = DualStackUdp {
            v4: Some(Arc::new(bind_udp("127.0.0.1:0".parse().unwrap()).unwrap())),
            v6: None,
        };
        let to = receiver.v4.as_ref().unwrap().local_addr().unwrap();

        let (send, mut recv) = mpsc::channel(4);
        receiver.spawn_receivers(send, |buf, from| (buf, from));

        let sender = DualStackUdp {
            v4: Some(Arc::new(bind_udp("127.0.0.1:0".parse().unwrap()).unwrap())),
            v6: None,
        };
        sender.try_send_to(to, b"DSVT");

        let (buf, from) = tokio::time::timeout(Duration::from_secs(5), recv.recv()).await
            .unwrap()
            .unwrap();
        assert_eq!(buf, b"DSVT");
        assert_eq!(from, sender.v4.as_ref().unwrap().local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_missing_family_is_skipped() {
        let udp = DualStackUdp::default();
        udp.try_send_to("[::1]:9011".parse().unwrap(), b"x");
        udp.send_to("127.0.0.1:40000".parse().unwrap(), b"x").await;
    }
}
