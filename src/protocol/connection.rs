//! Per-connection state: auth gate and the read/write halves of the socket.

use std::net::SocketAddr;

use tokio::io::{AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

use crate::error::Result;
use crate::protocol::frame::Reply;

/// One client connection's auth state, matching §4.6: `Unauthenticated`
/// until a password is configured and matched, or always-authenticated
/// when no password is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated,
}

pub struct Connection {
    pub reader: BufReader<ReadHalf<TcpStream>>,
    writer: WriteHalf<TcpStream>,
    pub peer: SocketAddr,
    auth: AuthState,
}

impl Connection {
    /// Wrap an accepted socket. `requires_auth` starts the connection in
    /// [`AuthState::Unauthenticated`] when a password is configured.
    pub fn new(stream: TcpStream, peer: SocketAddr, requires_auth: bool) -> Connection {
        let _ = stream.set_nodelay(true);
        let (read_half, writer) = tokio::io::split(stream);
        Connection {
            reader: BufReader::new(read_half),
            writer,
            peer,
            auth: if requires_auth {
                AuthState::Unauthenticated
            } else {
                AuthState::Authenticated
            },
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth == AuthState::Authenticated
    }

    pub fn authenticate(&mut self) {
        self.auth = AuthState::Authenticated;
    }

    pub async fn send(&mut self, reply: Reply) -> Result<()> {
        self.writer.write_all(&reply.encode()).await?;
        Ok(())
    }
}
