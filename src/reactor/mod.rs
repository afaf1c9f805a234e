// Copyright (c) 2017 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The reactor (§4.5): owns the listen socket, the accepted connections, and
//! the readiness backend that drives them. `Daemon` (in `dispatch`/`daemon`)
//! decides *which thread* calls [`Reactor::run_once`]; this module only
//! decides *what happens* on one iteration.
//!
//! Bookkeeping is split across three [`Dll`]s keyed into the one owning
//! `connections` table: `io_need` tracks recently-touched connections
//! (reregistered with the backend whenever their wait direction changes),
//! `timeout` is swept head-first every iteration for connections idle past
//! `connection_timeout`, and `cleanup` holds connections that reached
//! [`ConnState::Closed`] and are waiting for their termination callback and
//! socket teardown. A single timeout list stands in for libmicrohttpd's
//! separate normal/manual timeout lists (§9.1: no per-connection timeout
//! override is exposed, so there is only ever one list to sweep).

mod backend;
mod epoll_backend;
mod poll_backend;
mod select_backend;

pub use backend::{Interest, ReadinessBackend, ReadyEvent};
pub use epoll_backend::EpollBackend;
pub use poll_backend::PollBackend;
pub use select_backend::SelectBackend;

use crate::config::DaemonConfig;
use crate::connection::{Connection, StepResult};
use crate::dll::Dll;
use crate::fsm::EventLoopInfo;
use crate::io_capability::PlainTransport;
use crate::logging::{ConnectionEvent, TerminationReason};
use crate::{log_debug, log_warn};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Which readiness mechanism backs a reactor (§4.5's build-time switch, made
/// a runtime choice here).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Select,
    Poll,
    Epoll,
}

const LISTENER_TOKEN: usize = usize::MAX;
const ITC_TOKEN: usize = usize::MAX - 1;
const ACCEPT_BATCH: usize = 64;

/// A cloneable handle other threads use to wake a blocked [`Reactor::run_once`]
/// call — writing `queue_response`, `resume`, or `stop_daemon` all need this,
/// since the reactor may be parked in `poll()` with no socket activity.
#[derive(Clone)]
pub struct ItcHandle {
    write_end: Arc<Mutex<UnixStream>>,
}

impl ItcHandle {
    pub fn wake(&self) {
        let mut guard = match self.write_end.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = guard.write_all(&[0u8]);
    }
}

/// A cloneable handle a thread that does not own the [`Reactor`] uses to
/// queue a suspended connection for resumption (§4.4 "Suspend/resume"),
/// paired with an [`ItcHandle`] so a reactor parked in `poll` notices it.
#[derive(Clone)]
pub struct ResumeHandle {
    queue: Arc<Mutex<Vec<usize>>>,
    itc: ItcHandle,
}

impl ResumeHandle {
    pub fn resume(&self, conn_key: usize) {
        self.queue.lock().unwrap().push(conn_key);
        self.itc.wake();
    }
}

pub struct Reactor {
    listener: TcpListener,
    backend: Box<dyn ReadinessBackend + Send>,
    itc_read: UnixStream,
    itc_write: Arc<Mutex<UnixStream>>,
    connections: Dll<Connection>,
    io_need: Dll<usize>,
    timeout_dll: Dll<usize>,
    cleanup_dll: Dll<(usize, TerminationReason)>,
    per_ip_counts: HashMap<IpAddr, usize>,
    shutdown: Arc<AtomicBool>,
    accept_only: bool,
    handoff: Vec<Connection>,
    resume_queue: Arc<Mutex<Vec<usize>>>,
}

impl Reactor {
    pub fn bind(addr: SocketAddr, kind: BackendKind, shutdown: Arc<AtomicBool>) -> io::Result<Reactor> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Reactor::from_listener(listener, kind, shutdown)
    }

    pub fn from_listener(listener: TcpListener, kind: BackendKind, shutdown: Arc<AtomicBool>) -> io::Result<Reactor> {
        listener.set_nonblocking(true)?;
        let (itc_read, itc_write) = UnixStream::pair()?;
        itc_read.set_nonblocking(true)?;

        let mut backend: Box<dyn ReadinessBackend + Send> = match kind {
            BackendKind::Select => Box::new(SelectBackend::new()),
            BackendKind::Poll => Box::new(PollBackend::new()),
            BackendKind::Epoll => Box::new(EpollBackend::new()?),
        };
        backend.register(listener.as_raw_fd(), LISTENER_TOKEN, Interest::Read)?;
        backend.register(itc_read.as_raw_fd(), ITC_TOKEN, Interest::Read)?;

        Ok(Reactor {
            listener,
            backend,
            itc_read,
            itc_write: Arc::new(Mutex::new(itc_write)),
            connections: Dll::new(),
            io_need: Dll::new(),
            timeout_dll: Dll::new(),
            cleanup_dll: Dll::new(),
            per_ip_counts: HashMap::new(),
            shutdown,
            accept_only: false,
            handoff: Vec::new(),
            resume_queue: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn itc_handle(&self) -> ItcHandle {
        ItcHandle { write_end: self.itc_write.clone() }
    }

    /// A handle a thread that doesn't own this reactor can use to resume a
    /// suspended connection, for dispatch modes where the reactor runs on a
    /// thread of its own (`SingleThread`).
    pub fn resume_handle(&self) -> ResumeHandle {
        ResumeHandle { queue: self.resume_queue.clone(), itc: self.itc_handle() }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Marks a suspended connection for resumption. Takes effect the next
    /// time `run_once` drains the ITC (§6's `resume_connection`); callers
    /// must also call `itc_handle().wake()` if the reactor may already be
    /// parked in `poll`.
    pub fn mark_resuming(&mut self, conn_key: usize) {
        if let Some(conn) = self.connections.get_mut(conn_key) {
            conn.resuming = true;
        }
    }

    /// Runs one full iteration of the §4.5 algorithm: compute the wait
    /// deadline, poll readiness, accept, drain the ITC, step every ready
    /// connection, then sweep the timeout and cleanup lists.
    pub fn run_once(&mut self, config: &DaemonConfig) -> io::Result<()> {
        let deadline = self.compute_wait_deadline(config);
        let mut events = Vec::new();
        self.backend.poll(deadline, &mut events)?;

        for ev in &events {
            if ev.token == LISTENER_TOKEN {
                self.accept_loop(config)?;
            } else if ev.token == ITC_TOKEN {
                self.drain_itc()?;
            } else {
                self.step_connection(ev.token, config);
            }
        }

        // Drained unconditionally, not just on an ITC wakeup: `ExternalDispatch::resume`
        // marks a connection resuming directly (it already owns `&mut Reactor`,
        // unlike `SingleThread`'s `ResumeHandle`) without going through the ITC pipe at
        // all, so the next `run_once` must still pick it up even if no event fired.
        let pending: Vec<usize> = std::mem::take(&mut *self.resume_queue.lock().unwrap());
        for key in pending {
            self.mark_resuming(key);
        }
        self.rescan_control_flags(config);

        self.sweep_timeouts(config);
        self.sweep_cleanup(config);
        Ok(())
    }

    fn compute_wait_deadline(&self, config: &DaemonConfig) -> Option<Duration> {
        let head_key = self.timeout_dll.head_key()?;
        let conn_key = *self.timeout_dll.get(head_key)?;
        let conn = self.connections.get(conn_key)?;
        let deadline = conn.last_activity + config.connection_timeout;
        Some(deadline.saturating_duration_since(Instant::now()))
    }

    fn accept_loop(&mut self, config: &DaemonConfig) -> io::Result<()> {
        for _ in 0..ACCEPT_BATCH {
            let (stream, addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            };

            if let Some(policy) = &config.accept_policy {
                if !policy(addr) {
                    continue;
                }
            }
            if let Some(limit) = config.max_connections_per_ip {
                let count = self.per_ip_counts.entry(addr.ip()).or_insert(0);
                if *count >= limit {
                    log_warn!("rejecting {}: per-IP connection limit reached", addr);
                    continue;
                }
            }
            if let Some(max) = config.max_connections {
                if self.connections.len() >= max {
                    log_warn!("rejecting {}: connection limit reached", addr);
                    continue;
                }
            }

            let transport = match PlainTransport::from_std(stream) {
                Ok(t) => t,
                Err(e) => {
                    log_warn!("failed to prepare accepted socket from {}: {}", addr, e);
                    continue;
                }
            };

            let conn = Connection::new(Box::new(transport), addr, config.connection_memory_limit_b);
            if self.accept_only {
                self.handoff.push(conn);
            } else {
                self.admit(conn, addr, config);
            }
        }
        Ok(())
    }

    /// Links a connection (freshly accepted, or handed off from an
    /// accept-only reactor in thread-pool mode, §4.6) into this reactor's
    /// bookkeeping and registers it with the backend.
    fn admit(&mut self, conn: Connection, addr: SocketAddr, config: &DaemonConfig) {
        let fd = conn.raw_fd();
        let conn_key = self.connections.push_tail(conn);
        let io_key = self.io_need.push_tail(conn_key);
        let timeout_key = self.timeout_dll.push_tail(conn_key);
        if let Some(c) = self.connections.get_mut(conn_key) {
            c.io_dll_key = Some(io_key);
            c.timeout_dll_key = Some(timeout_key);
            c.conn_key = Some(conn_key);
        }
        *self.per_ip_counts.entry(addr.ip()).or_insert(0) += 1;

        if let Err(e) = self.backend.register(fd, conn_key, Interest::Read) {
            log_warn!("failed to register connection {}: {}", addr, e);
            self.move_to_cleanup(conn_key, TerminationReason::Error);
            return;
        }
        if let Some(cb) = &config.notify_connection {
            cb(addr, ConnectionEvent::Started);
        }
        log_debug!("admitted connection from {}", addr);
    }

    /// Marks this reactor as accept-only: `accept_loop` stops admitting
    /// connections into its own DLLs and instead buffers them for
    /// `drain_handoff` (§4.6's thread-pool mode: "listen socket handled by
    /// one designated thread, round-robin hand-off to workers").
    pub fn set_accept_only(&mut self, accept_only: bool) {
        self.accept_only = accept_only;
    }

    /// Drains connections accepted while `accept_only` is set, for a
    /// dispatcher to hand off to worker reactors.
    pub fn drain_handoff(&mut self) -> Vec<Connection> {
        std::mem::take(&mut self.handoff)
    }

    /// Admits a connection accepted by a different reactor's listen socket
    /// (§4.6 thread-pool hand-off).
    pub fn adopt(&mut self, conn: Connection, config: &DaemonConfig) {
        let addr = conn.remote_addr();
        self.admit(conn, addr, config);
    }

    fn drain_itc(&mut self) -> io::Result<()> {
        let mut buf = [0u8; 256];
        loop {
            match self.itc_read.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn rescan_control_flags(&mut self, config: &DaemonConfig) {
        if self.shutdown.load(Ordering::SeqCst) {
            let keys: Vec<usize> = self.connections.iter().map(|(k, _)| k).collect();
            for key in keys {
                if let Some(conn) = self.connections.get_mut(key) {
                    conn.force_close();
                }
                self.move_to_cleanup(key, TerminationReason::Shutdown);
            }
            return;
        }

        let resuming: Vec<usize> = self
            .connections
            .iter()
            .filter(|(_, c)| c.resuming)
            .map(|(k, _)| k)
            .collect();
        for key in resuming {
            if let Some(conn) = self.connections.get_mut(key) {
                conn.suspended = false;
                conn.resuming = false;
                conn.last_activity = Instant::now();
            }
            // Un-suspending alone can't get the connection anywhere: its
            // state is wherever `Action::Suspend` left it, usually
            // `EventLoopInfo::Block`, which would just get deregistered
            // again by `rearm`. Drive it forward once here so the handler
            // (or whatever I/O progress was pending) actually runs now.
            self.step_connection(key, config);
        }
    }

    fn step_connection(&mut self, conn_key: usize, config: &DaemonConfig) {
        let result = match self.connections.get_mut(conn_key) {
            Some(conn) => conn.idle_step(config),
            None => return,
        };

        if let Some(conn) = self.connections.get(conn_key) {
            if let Some(tkey) = conn.timeout_dll_key {
                self.timeout_dll.move_to_tail(tkey);
            }
        }

        match result {
            StepResult::Blocked(info) => self.rearm(conn_key, info),
            StepResult::Closed(reason) => self.move_to_cleanup(conn_key, reason),
        }
    }

    fn rearm(&mut self, conn_key: usize, info: EventLoopInfo) {
        let fd = match self.connections.get(conn_key) {
            Some(c) => c.raw_fd(),
            None => return,
        };
        let result = match info {
            EventLoopInfo::Read => self.backend.reregister(fd, conn_key, Interest::Read),
            EventLoopInfo::Write => self.backend.reregister(fd, conn_key, Interest::Write),
            EventLoopInfo::Block => self.backend.deregister(fd),
            EventLoopInfo::Cleanup => return,
        };
        if let Err(e) = result {
            log_warn!("failed to rearm connection {}: {}", conn_key, e);
        }
    }

    fn move_to_cleanup(&mut self, conn_key: usize, reason: TerminationReason) {
        let (io_key, timeout_key, fd) = match self.connections.get(conn_key) {
            Some(c) => (c.io_dll_key, c.timeout_dll_key, c.raw_fd()),
            None => return,
        };
        if let Some(k) = io_key {
            self.io_need.remove(k);
        }
        if let Some(k) = timeout_key {
            self.timeout_dll.remove(k);
        }
        let _ = self.backend.deregister(fd);
        self.cleanup_dll.push_tail((conn_key, reason));
    }

    fn sweep_timeouts(&mut self, config: &DaemonConfig) {
        loop {
            let head_key = match self.timeout_dll.head_key() {
                Some(k) => k,
                None => break,
            };
            let conn_key = *self.timeout_dll.get(head_key).unwrap();
            let conn = match self.connections.get(conn_key) {
                Some(c) => c,
                None => {
                    self.timeout_dll.remove(head_key);
                    continue;
                }
            };
            if conn.last_activity.elapsed() < config.connection_timeout {
                break;
            }
            log_debug!("connection {} timed out", conn_key);
            if let Some(c) = self.connections.get_mut(conn_key) {
                c.force_close();
            }
            self.move_to_cleanup(conn_key, TerminationReason::Timeout);
        }
    }

    fn sweep_cleanup(&mut self, config: &DaemonConfig) {
        while let Some(key) = self.cleanup_dll.head_key() {
            let (conn_key, reason) = self.cleanup_dll.remove(key);
            if let Some(conn) = self.connections.remove(conn_key) {
                let addr = conn.remote_addr();
                if let Some(count) = self.per_ip_counts.get_mut(&addr.ip()) {
                    *count = count.saturating_sub(1);
                }
                if let Some(cb) = &config.notify_connection {
                    cb(addr, ConnectionEvent::Closed(reason));
                }
                log_debug!("closed connection from {} ({:?})", addr, reason);
            }
        }
    }
}
