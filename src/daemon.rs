// Copyright (c) 2017 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The public lifecycle object (§5, §6): binds a listen socket, starts
//! whichever [`dispatch::Running`] strategy the config picked, and exposes
//! `stop`/`resume`/`local_addr`. This generalizes `server.rs::Server::new`'s
//! single `(addr, handler) -> Server` constructor the same way
//! `DaemonBuilder` generalizes its bare handler parameter — far more knobs
//! in, one object out.

use crate::config::{ConcurrencyMode, DaemonConfig};
use crate::dispatch::Running;
use crate::error::{Error, Result};
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A bound, running daemon. Dropping it calls [`Daemon::stop`] if the caller
/// didn't already.
pub struct Daemon {
    config: Arc<DaemonConfig>,
    listen_addr: SocketAddr,
    running: Option<Running>,
    shutdown: Arc<AtomicBool>,
}

impl Daemon {
    /// Binds `config.listen_addr` and starts the configured dispatch
    /// strategy (§4.6). The only call that can fail synchronously outside
    /// `DaemonBuilder::build` itself (§7.1).
    pub fn start(config: DaemonConfig) -> Result<Daemon> {
        let config = Arc::new(config);
        let listener = TcpListener::bind(config.listen_addr).map_err(Error::Bind)?;
        let listen_addr = listener.local_addr().map_err(Error::Bind)?;
        let shutdown = Arc::new(AtomicBool::new(false));

        let running = Running::start(listener, config.clone(), shutdown.clone()).map_err(Error::Bind)?;

        Ok(Daemon { config, listen_addr, running: Some(running), shutdown })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// For `ConcurrencyMode::External` only: advances the reactor by exactly
    /// one iteration. Panics if this daemon isn't in external mode, the same
    /// contract libmicrohttpd's `MHD_run` has against a daemon started with
    /// `MHD_USE_INTERNAL_POLLING_THREAD` (§4.6).
    pub fn poll(&mut self) {
        match &mut self.running {
            Some(Running::External(dispatch)) => {
                if let Err(e) = dispatch.poll(&self.config) {
                    crate::log_warn!("external poll iteration failed: {}", e);
                }
            }
            _ => panic!("Daemon::poll is only valid in ConcurrencyMode::External"),
        }
    }

    /// Resumes a connection suspended by a handler returning
    /// `Action::Suspend` (§4.4). `conn_key` is whatever opaque identifier the
    /// host tracked from its own bookkeeping of a connection it suspended —
    /// not exposed by this crate directly, since nothing upstream of
    /// `dispatch` yet threads a stable connection handle out to callers; this
    /// is the resolved-shape placeholder for that API (§9 Open Question:
    /// "stable connection identity for suspend/resume across dispatch
    /// modes"). Only `External` and `SingleThread` can honor this today: a
    /// `conn_key` is only meaningful to the one reactor that accepted it, and
    /// `ThreadPerConnection`/`ThreadPool` don't expose theirs.
    pub fn resume(&mut self, conn_key: usize) -> Result<()> {
        match &mut self.running {
            Some(Running::External(dispatch)) => {
                dispatch.resume(conn_key);
                Ok(())
            }
            Some(Running::SingleThread(dispatch)) => {
                dispatch.resume_handle().resume(conn_key);
                Ok(())
            }
            Some(_) | None => Err(Error::NotSuspended),
        }
    }

    /// Signals shutdown and blocks until every reactor/worker thread has
    /// drained its connections and exited (§5 "Cancellation"). Forced
    /// connections close with `TerminationReason::Shutdown`.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(running) = &self.running {
            if let Some(itc) = running.itc_handle() {
                itc.wake();
            }
        }
        if let Some(running) = self.running.take() {
            running.join();
        }
    }

    pub fn concurrency_mode_is_external(&self) -> bool {
        matches!(self.config.concurrency_mode, ConcurrencyMode::External)
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        if self.running.is_some() {
            self.stop();
        }
    }
}
