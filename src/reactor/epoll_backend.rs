// Copyright (c) 2017 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The `epoll(2)` backend (§4.5), built on `mio::Poll`, which already
//! multiplexes epoll/kqueue/IOCP under one API the way the teacher's
//! `socket_handler/http1.rs` depends on it (`mio::Registration`) for exactly
//! this concern.

use super::backend::{Interest, ReadinessBackend, ReadyEvent};
use mio::unix::SourceFd;
use mio::{Events, Token};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub struct EpollBackend {
    poll: mio::Poll,
    events: Events,
}

impl EpollBackend {
    pub fn new() -> io::Result<EpollBackend> {
        Ok(EpollBackend { poll: mio::Poll::new()?, events: Events::with_capacity(1024) })
    }

    fn mio_interest(interest: Interest) -> mio::Interest {
        match interest {
            Interest::Read => mio::Interest::READABLE,
            Interest::Write => mio::Interest::WRITABLE,
            Interest::Both => mio::Interest::READABLE | mio::Interest::WRITABLE,
        }
    }
}

impl ReadinessBackend for EpollBackend {
    fn register(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.poll.registry().register(&mut SourceFd(&fd), Token(token), Self::mio_interest(interest))
    }

    fn reregister(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.poll.registry().reregister(&mut SourceFd(&fd), Token(token), Self::mio_interest(interest))
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.poll.registry().deregister(&mut SourceFd(&fd))
    }

    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<ReadyEvent>) -> io::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }
        for event in self.events.iter() {
            out.push(ReadyEvent {
                token: event.token().0,
                readable: event.is_readable(),
                writable: event.is_writable(),
            });
        }
        Ok(())
    }
}
