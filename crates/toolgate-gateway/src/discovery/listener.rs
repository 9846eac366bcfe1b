//! Listening sockets behind a seam
//!
//! Discovery binds through a [`ListenerSource`] so hosts and tests can
//! substitute the socket layer. The default is plain tokio TCP.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

#[async_trait]
pub trait Listener: Send {
    fn local_addr(&self) -> io::Result<SocketAddr>;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)>;
}

#[async_trait]
impl Listener for TcpListener {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

#[async_trait]
pub trait ListenerSource: Send + Sync {
    async fn bind(&self, addr: SocketAddr) -> io::Result<Box<dyn Listener>>;
}

/// Binds real TCP listeners
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpListenerSource;

#[async_trait]
impl ListenerSource for TcpListenerSource {
    async fn bind(&self, addr: SocketAddr) -> io::Result<Box<dyn Listener>> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Box::new(listener))
    }
}
