// Copyright (c) 2017 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The recv/transmit capability object (§6, Design Note "Function-pointer
//! recv/send swap"): a plain TCP implementation ships in the core; the
//! `tls` feature adds a second implementation over the same trait, mirroring
//! how `socket_handler/rustls.rs` implements the teacher's `SocketHandler`
//! trait for a rustls session rather than special-casing TLS in the socket
//! handling loop itself.

use std::io;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};

/// A bidirectional byte transport a `Connection` reads from and writes to.
/// `WouldBlock`/`Interrupted` are ordinary `io::ErrorKind`s rather than
/// encoded negative return values, since Rust's `io::Result` already
/// distinguishes them.
pub trait Transport: Send {
    fn recv(&mut self, dst: &mut [u8]) -> io::Result<usize>;
    fn send(&mut self, src: &[u8]) -> io::Result<usize>;

    /// The raw descriptor the reactor registers with whichever readiness
    /// backend (select/poll/epoll, §4.5) is active. All three backends
    /// operate on `RawFd` rather than a `mio`-specific registration type, so
    /// a `Transport` only needs to expose this one thing regardless of which
    /// backend is driving it.
    fn raw_fd(&self) -> RawFd;
}

/// Plain TCP, no encryption.
pub struct PlainTransport {
    stream: TcpStream,
}

impl PlainTransport {
    pub fn from_std(stream: TcpStream) -> io::Result<PlainTransport> {
        stream.set_nonblocking(true)?;
        Ok(PlainTransport { stream })
    }
}

impl Transport for PlainTransport {
    fn recv(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        self.stream.read(dst)
    }

    fn send(&mut self, src: &[u8]) -> io::Result<usize> {
        self.stream.write(src)
    }

    fn raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

#[cfg(feature = "tls")]
pub mod tls {
    use super::Transport;
    use std::io;
    use std::sync::Arc;

    /// A rustls session layered over a plain transport. TLS handshake and
    /// record framing are out of the core's scope (§1); this only satisfies
    /// the `Transport` trait boundary so a host can plug in encryption
    /// without the reactor or FSM knowing the difference.
    pub struct RustlsTransport {
        inner: super::PlainTransport,
        session: rustls::ServerConnection,
    }

    impl RustlsTransport {
        pub fn new(inner: super::PlainTransport, config: Arc<rustls::ServerConfig>) -> io::Result<RustlsTransport> {
            let session = rustls::ServerConnection::new(config).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            Ok(RustlsTransport { inner, session })
        }
    }

    impl Transport for RustlsTransport {
        fn recv(&mut self, dst: &mut [u8]) -> io::Result<usize> {
            self.session.read_tls(&mut ReadAdapter(&mut self.inner))?;
            let state = self.session.process_new_packets().map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            if state.plaintext_bytes_to_read() == 0 {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            self.session.reader().read(dst)
        }

        fn send(&mut self, src: &[u8]) -> io::Result<usize> {
            let n = self.session.writer().write(src)?;
            self.session.write_tls(&mut WriteAdapter(&mut self.inner))?;
            Ok(n)
        }

        fn raw_fd(&self) -> super::RawFd {
            self.inner.raw_fd()
        }
    }

    struct ReadAdapter<'a>(&'a mut super::PlainTransport);
    impl<'a> io::Read for ReadAdapter<'a> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.recv(buf)
        }
    }

    struct WriteAdapter<'a>(&'a mut super::PlainTransport);
    impl<'a> io::Write for WriteAdapter<'a> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.send(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    #[test]
    fn plain_transport_round_trips_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();

        let mut server_transport = PlainTransport::from_std(server).unwrap();
        let mut client_transport = PlainTransport::from_std(client).unwrap();

        let n = client_transport.send(b"hello").unwrap();
        assert_eq!(n, 5);

        let mut buf = [0u8; 16];
        // A fresh non-blocking socket may report WouldBlock before data
        // arrives; retry a bounded number of times instead of sleeping.
        let mut got = 0;
        for _ in 0..10_000 {
            match server_transport.recv(&mut buf) {
                Ok(n) => {
                    got = n;
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(&buf[..got], b"hello");
    }
}
