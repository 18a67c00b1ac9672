//! Full-duplex socket shutdown for a shared `TcpStream`.
//!
//! `tokio::net::TcpStream` only exposes `AsyncWriteExt::shutdown`, which
//! half-closes the write side. The `drop` fault (§4.4) needs to fully close
//! both directions of an `Arc<TcpStream>` shared between the request and
//! response pumps, so this borrows the raw fd through `socket2` to issue a
//! real `shutdown(2)` without taking ownership away from tokio.

use std::os::unix::io::{AsRawFd, FromRawFd};

use tokio::net::TcpStream;

/// Shuts down both directions of `stream`'s underlying socket, unblocking
/// any in-flight read on it with an EOF/error and causing the peer to see
/// the connection close.
pub fn shutdown_both(stream: &TcpStream) -> std::io::Result<()> {
    let raw = stream.as_raw_fd();
    // SAFETY: `raw` is borrowed from `stream`, which keeps the fd alive for
    // the duration of this call. `forget` below prevents the temporary
    // `Socket` from closing it on drop.
    let borrowed = unsafe { socket2::Socket::from_raw_fd(raw) };
    let result = borrowed.shutdown(std::net::Shutdown::Both);
    std::mem::forget(borrowed);
    result
}

/// Reads at least one byte into `buf`, using the `readable`/`try_read` pair
/// so `stream` only needs a shared reference — this is what lets the
/// request and response pumps read and write the same `Arc<TcpStream>`
/// concurrently without an owned-half split (§5).
pub async fn read_some(stream: &TcpStream, buf: &mut [u8]) -> std::io::Result<usize> {
    loop {
        stream.readable().await?;
        match stream.try_read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Writes the entirety of `data` to `stream`, the `&self`-based counterpart
/// to [`read_some`].
pub async fn write_all(stream: &TcpStream, mut data: &[u8]) -> std::io::Result<()> {
    while !data.is_empty() {
        stream.writable().await?;
        match stream.try_write(data) {
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
