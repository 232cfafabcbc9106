//! Socket transport: Unix-domain path, or loopback INET/IPv6 port.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;

use tokio::net::{TcpStream, UnixStream};
use tracing::debug;

use crate::error::Result;

use super::FrameStream;

/// Connect to an agent listening on a Unix-domain socket.
pub async fn connect_unix(path: &Path, pid: u32) -> Result<FrameStream> {
    let stream = UnixStream::connect(path).await?;
    debug!(path = %path.display(), "connected to unix socket agent");
    let (reader, writer) = stream.into_split();
    Ok(FrameStream::new(Box::new(reader), Box::new(writer), pid))
}

/// Connect to an agent on the IPv4 loopback address.
pub async fn connect_inet(port: u16, pid: u32) -> Result<FrameStream> {
    let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await?;
    debug!(port, "connected to inet agent");
    let (reader, writer) = stream.into_split();
    Ok(FrameStream::new(Box::new(reader), Box::new(writer), pid))
}

/// Connect to an agent on the IPv6 loopback address.
pub async fn connect_inet6(port: u16, pid: u32) -> Result<FrameStream> {
    let stream = TcpStream::connect((Ipv6Addr::LOCALHOST, port)).await?;
    debug!(port, "connected to inet6 agent");
    let (reader, writer) = stream.into_split();
    Ok(FrameStream::new(Box::new(reader), Box::new(writer), pid))
}
