// Copyright (c) 2017 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The readiness-backend trait (§4.5): the three concrete backends
//! (`select`, `poll`, `epoll`) all drive the same `Reactor` loop through
//! this one seam, the direct descendant of libmicrohttpd's build-time
//! `MHD_USE_SELECT_INTERNALLY`/`MHD_USE_POLL`/`MHD_USE_EPOLL` switch —
//! except here it's a runtime choice (`ConcurrencyMode` doesn't care which
//! backend drives it) rather than a compile flag.

use std::os::unix::io::RawFd;
use std::time::Duration;

/// Which direction(s) a registered descriptor should be watched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
    Both,
}

/// One descriptor's readiness after a `poll` call.
#[derive(Debug, Clone, Copy)]
pub struct ReadyEvent {
    pub token: usize,
    pub readable: bool,
    pub writable: bool,
}

/// A readiness-polling mechanism: register/reregister/deregister descriptors
/// by an opaque `token`, then block in `poll` until at least one is ready (or
/// `timeout` elapses).
pub trait ReadinessBackend {
    fn register(&mut self, fd: RawFd, token: usize, interest: Interest) -> std::io::Result<()>;
    fn reregister(&mut self, fd: RawFd, token: usize, interest: Interest) -> std::io::Result<()>;
    fn deregister(&mut self, fd: RawFd) -> std::io::Result<()>;

    /// Blocks until readiness or `timeout`, appending ready events to `out`.
    /// `out` is cleared by the caller between calls, not by the backend.
    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<ReadyEvent>) -> std::io::Result<()>;
}
