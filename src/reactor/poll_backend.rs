// Copyright (c) 2017 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The `poll(2)` backend (§4.5): not bounded by `FD_SETSIZE` like `select`,
//! still O(n) per call in the number of watched descriptors like `select`.

use super::backend::{Interest, ReadinessBackend, ReadyEvent};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub struct PollBackend {
    tokens: HashMap<RawFd, usize>,
    fds: Vec<libc::pollfd>,
}

impl PollBackend {
    pub fn new() -> PollBackend {
        PollBackend { tokens: HashMap::new(), fds: Vec::new() }
    }

    fn events_for(interest: Interest) -> libc::c_short {
        match interest {
            Interest::Read => libc::POLLIN,
            Interest::Write => libc::POLLOUT,
            Interest::Both => libc::POLLIN | libc::POLLOUT,
        }
    }
}

impl Default for PollBackend {
    fn default() -> PollBackend {
        PollBackend::new()
    }
}

impl ReadinessBackend for PollBackend {
    fn register(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.tokens.insert(fd, token);
        self.fds.push(libc::pollfd { fd, events: Self::events_for(interest), revents: 0 });
        Ok(())
    }

    fn reregister(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.tokens.insert(fd, token);
        if let Some(entry) = self.fds.iter_mut().find(|p| p.fd == fd) {
            entry.events = Self::events_for(interest);
        } else {
            self.fds.push(libc::pollfd { fd, events: Self::events_for(interest), revents: 0 });
        }
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.tokens.remove(&fd);
        self.fds.retain(|p| p.fd != fd);
        Ok(())
    }

    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<ReadyEvent>) -> io::Result<()> {
        if self.fds.is_empty() {
            if let Some(t) = timeout {
                std::thread::sleep(t);
            }
            return Ok(());
        }

        let timeout_ms: libc::c_int = match timeout {
            Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };

        let rc = unsafe { libc::poll(self.fds.as_mut_ptr(), self.fds.len() as libc::nfds_t, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        for entry in self.fds.iter_mut() {
            if entry.revents == 0 {
                continue;
            }
            let token = match self.tokens.get(&entry.fd) {
                Some(&t) => t,
                None => continue,
            };
            out.push(ReadyEvent {
                token,
                readable: entry.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0,
                writable: entry.revents & (libc::POLLOUT | libc::POLLERR) != 0,
            });
            entry.revents = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::io::AsRawFd;

    #[test]
    fn reports_readable_once_data_arrives() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();

        let mut backend = PollBackend::new();
        backend.register(server.as_raw_fd(), 42, Interest::Read).unwrap();

        let mut events = Vec::new();
        backend.poll(Some(Duration::from_millis(50)), &mut events).unwrap();
        assert!(events.is_empty());

        use std::io::Write;
        let mut client = client;
        client.write_all(b"hi").unwrap();

        events.clear();
        backend.poll(Some(Duration::from_secs(2)), &mut events).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token, 42);
        assert!(events[0].readable);
    }
}
