//! Blocking sender helpers.
//!
//! These drive a receiver from ordinary blocking sockets: stream a file over
//! a connection window by window, or fire off a single timestamped datagram.

use crate::runtime::FileSource;
use chrono::Local;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::path::Path;
use tracing::debug;

/// Stream `path` to `addr` in windows of `buffer_size` bytes.
///
/// With `await_ack`, the write side is shut down once the file is sent and
/// everything the receiver writes back before closing is returned.
pub fn send_file(
    addr: SocketAddr,
    path: impl AsRef<Path>,
    buffer_size: usize,
    await_ack: bool,
) -> io::Result<Option<String>> {
    let source = FileSource::open(path.as_ref(), buffer_size)?;
    let mut stream = TcpStream::connect(addr)?;

    let mut sent = 0usize;
    for window in source {
        let window = window?;
        stream.write_all(window.readable())?;
        sent += window.remaining();
    }
    stream.flush()?;
    debug!(addr = %addr, bytes = sent, "File sent");

    if !await_ack {
        return Ok(None);
    }

    stream.shutdown(Shutdown::Write)?;
    let mut reply = String::new();
    stream.read_to_string(&mut reply)?;
    Ok(Some(reply))
}

/// Send `text` to `addr` as one datagram, prefixed with the local time.
pub fn send_datagram(addr: SocketAddr, text: &str) -> io::Result<usize> {
    let bind: SocketAddr = match addr {
        SocketAddr::V4(_) => ([0, 0, 0, 0], 0).into(),
        SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(bind)?;
    let payload = format_datagram(text);
    socket.send_to(payload.as_bytes(), addr)
}

fn format_datagram(text: &str) -> String {
    format!("{}\n{}", Local::now().format("%Y-%m-%d %H:%M:%S"), text)
}
