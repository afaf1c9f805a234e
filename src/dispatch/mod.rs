// Copyright (c) 2017 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The four concurrency dispatch strategies (§4.6). Each wraps one or more
//! [`Reactor`](crate::reactor::Reactor)s with whatever thread-ownership model
//! its mode implies; `Daemon` only ever talks to the `Running` enum this
//! module produces, never to a `Reactor` directly, mirroring how
//! `server.rs::Server` hides whether `tiny_http` is polled inline (`poll`)
//! or driven by its own background machinery.

mod external;
mod single_thread;
mod thread_per_connection;
mod thread_pool;

pub use external::ExternalDispatch;
pub use single_thread::SingleThreadDispatch;
pub use thread_per_connection::ThreadPerConnectionDispatch;
pub use thread_pool::ThreadPoolDispatch;

use crate::config::{ConcurrencyMode, DaemonConfig};
use crate::reactor::{BackendKind, ItcHandle, Reactor};
use std::io;
use std::net::TcpListener;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Whichever dispatch strategy `DaemonBuilder::concurrency_mode` picked,
/// already bound and (for every mode but `External`) already running.
pub enum Running {
    External(ExternalDispatch),
    SingleThread(SingleThreadDispatch),
    ThreadPerConnection(ThreadPerConnectionDispatch),
    ThreadPool(ThreadPoolDispatch),
}

impl Running {
    pub fn start(
        listener: TcpListener,
        config: Arc<DaemonConfig>,
        shutdown: Arc<AtomicBool>,
    ) -> io::Result<Running> {
        match config.concurrency_mode {
            ConcurrencyMode::External => {
                let reactor = Reactor::from_listener(listener, BackendKind::Poll, shutdown)?;
                Ok(Running::External(ExternalDispatch::new(reactor)))
            }
            ConcurrencyMode::SingleThread => {
                let reactor = Reactor::from_listener(listener, BackendKind::Epoll, shutdown.clone())?;
                Ok(Running::SingleThread(SingleThreadDispatch::spawn(reactor, config, shutdown)))
            }
            ConcurrencyMode::ThreadPerConnection => {
                Ok(Running::ThreadPerConnection(ThreadPerConnectionDispatch::spawn(listener, config, shutdown)?))
            }
            ConcurrencyMode::ThreadPool { size } => {
                let size = size.unwrap_or_else(num_cpus::get).max(1);
                Ok(Running::ThreadPool(ThreadPoolDispatch::spawn(listener, config, shutdown, size)?))
            }
        }
    }

    /// A handle to wake a blocked reactor thread; `None` for `External`,
    /// where the host already owns the loop and never blocks inside it on
    /// our behalf.
    pub fn itc_handle(&self) -> Option<ItcHandle> {
        match self {
            Running::External(d) => Some(d.itc_handle()),
            Running::SingleThread(d) => Some(d.itc_handle()),
            Running::ThreadPerConnection(_) => None,
            Running::ThreadPool(d) => Some(d.itc_handle()),
        }
    }

    pub fn join(self) {
        match self {
            Running::External(_) => {}
            Running::SingleThread(d) => d.join(),
            Running::ThreadPerConnection(d) => d.join(),
            Running::ThreadPool(d) => d.join(),
        }
    }
}
