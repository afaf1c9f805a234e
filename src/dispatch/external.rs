// Copyright (c) 2017 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! External dispatch (§4.6): the daemon never spawns a thread. The host
//! calls [`ExternalDispatch::poll`] from its own event loop, the same role
//! `Server::poll` plays for a caller that wants to drive `tiny_http` from an
//! existing loop instead of letting `Server::run` block forever.

use crate::config::DaemonConfig;
use crate::reactor::{ItcHandle, Reactor};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

pub struct ExternalDispatch {
    reactor: Reactor,
}

impl ExternalDispatch {
    pub fn new(reactor: Reactor) -> ExternalDispatch {
        ExternalDispatch { reactor }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.reactor.local_addr()
    }

    pub fn itc_handle(&self) -> ItcHandle {
        self.reactor.itc_handle()
    }

    /// Runs exactly one reactor iteration and returns. The host is
    /// responsible for calling this repeatedly (e.g. from its own poll
    /// loop, or in a dedicated thread it manages itself).
    pub fn poll(&mut self, config: &DaemonConfig) -> io::Result<()> {
        self.reactor.run_once(config)
    }

    pub fn resume(&mut self, conn_key: usize) {
        self.reactor.mark_resuming(conn_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::config::DaemonBuilder;
    use crate::reactor::BackendKind;
    use crate::response::Response;
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::AtomicBool;

    #[test]
    fn host_driven_poll_serves_a_request() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let reactor = Reactor::from_listener(listener, BackendKind::Poll, Arc::new(AtomicBool::new(false))).unwrap();
        let mut dispatch = ExternalDispatch::new(reactor);
        let addr = dispatch.local_addr().unwrap();
        let config = DaemonBuilder::new(addr, |_req, _buf, _body| Action::Respond(Response::text("ok"))).build().unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        use std::io::Write;
        client.write_all(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").unwrap();

        let mut responded = false;
        for _ in 0..20 {
            dispatch.poll(&config).unwrap();
            client.set_nonblocking(true).unwrap();
            let mut buf = [0u8; 128];
            use std::io::Read;
            if let Ok(n) = client.read(&mut buf) {
                if n > 0 {
                    responded = true;
                    break;
                }
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(responded);
    }
}
