use std::io;
use std::io::Read;
use std::path::{Path, PathBuf};

use socket2::{Domain, SockAddr, Socket, Type};
use tokio::io::unix::AsyncFd;
use tracing::{debug, info};

/// Listening side of a Unix domain socket of type SOCK_SEQPACKET: connection oriented, but every
///  send arrives as exactly one record.
pub struct SeqPacketListener {
    fd: AsyncFd<Socket>,
    path: PathBuf,
}

impl SeqPacketListener {
    pub fn bind(path: &Path, backlog: i32) -> anyhow::Result<SeqPacketListener> {
        if path.exists() {
            debug!("removing stale socket file {:?}", path);
            std::fs::remove_file(path)?;
        }

        let socket = Socket::new(Domain::UNIX, Type::SEQPACKET, None)?;
        socket.bind(&SockAddr::unix(path)?)?;
        socket.listen(backlog)?;
        socket.set_nonblocking(true)?;

        info!("listening for local clients on {:?}", path);
        Ok(SeqPacketListener {
            fd: AsyncFd::new(socket)?,
            path: path.to_path_buf(),
        })
    }

    pub async fn accept(&self) -> io::Result<SeqPacketConn> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| inner.get_ref().accept()) {
                Ok(Ok((socket, _))) => return SeqPacketConn::new(socket),
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
    }
}

impl Drop for SeqPacketListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[derive(Debug)]
pub struct SeqPacketConn {
    fd: AsyncFd<Socket>,
}

impl SeqPacketConn {
    fn new(socket: Socket) -> io::Result<SeqPacketConn> {
        socket.set_nonblocking(true)?;
        Ok(SeqPacketConn {
            fd: AsyncFd::new(socket)?,
        })
    }

    pub fn connect(path: &Path) -> anyhow::Result<SeqPacketConn> {
        let socket = Socket::new(Domain::UNIX, Type::SEQPACKET, None)?;
        socket.connect(&SockAddr::unix(path)?)?;
        Ok(SeqPacketConn::new(socket)?)
    }

    /// two connected ends, without a listener
    pub fn pair() -> io::Result<(SeqPacketConn, SeqPacketConn)> {
        let (a, b) = Socket::pair(Domain::UNIX, Type::SEQPACKET, None)?;
        Ok((SeqPacketConn::new(a)?, SeqPacketConn::new(b)?))
    }

    /// Reads a single record. A record longer than `buf` is truncated, 0 means the peer closed the
    ///  connection.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| (&mut inner.get_ref()).read(buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Non-blocking send, returning `WouldBlock` if the peer is not keeping up.
    pub fn try_send(&self, buf: &[u8]) -> io::Result<usize> {
        self.fd.get_ref().send(buf)
    }

    pub async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| inner.get_ref().send(buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}
