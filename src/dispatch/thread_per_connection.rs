// Copyright (c) 2017 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Thread-per-connection dispatch (§4.6): one acceptor thread, and a
//! dedicated thread per accepted connection running a private single-socket
//! reactor over just that one descriptor. This is the most direct
//! generalization of `server.rs::Server::process`, which already
//! `thread::spawn`s per accepted request — the difference is that here the
//! whole connection's FSM (not just one handler invocation) runs on that
//! thread, since a connection can carry more than one request across
//! keep-alive.
//!
//! Suspend/resume (§4.4) has no effect in this mode: there is no reactor
//! outliving the connection's own thread for a host to call `resume` against,
//! so a handler that returns `Action::Suspend` here just parks that
//! connection's thread forever — nothing ever un-suspends it. Hosts that need
//! suspend/resume should pick `SingleThread` or `ThreadPool` instead; this is
//! recorded as an accepted restriction of the mode, not a bug.

use crate::config::DaemonConfig;
use crate::connection::{Connection, StepResult};
use crate::fsm::EventLoopInfo;
use crate::io_capability::PlainTransport;
use crate::log_warn;
use crate::reactor::{Interest, PollBackend, ReadinessBackend};
use std::io;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub struct ThreadPerConnectionDispatch {
    acceptor: JoinHandle<()>,
}

impl ThreadPerConnectionDispatch {
    pub fn spawn(listener: TcpListener, config: Arc<DaemonConfig>, shutdown: Arc<AtomicBool>) -> io::Result<ThreadPerConnectionDispatch> {
        listener.set_nonblocking(true)?;
        let acceptor = std::thread::Builder::new()
            .name("mhttpd-acceptor".into())
            .spawn(move || accept_loop(listener, config, shutdown))
            .expect("spawning the acceptor thread");
        Ok(ThreadPerConnectionDispatch { acceptor })
    }

    pub fn join(self) {
        let _ = self.acceptor.join();
    }
}

fn accept_loop(listener: TcpListener, config: Arc<DaemonConfig>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                if let Some(policy) = &config.accept_policy {
                    if !policy(addr) {
                        continue;
                    }
                }
                let config = config.clone();
                std::thread::Builder::new()
                    .name(format!("mhttpd-conn-{}", addr))
                    .spawn(move || drive_connection(stream, addr, config))
                    .ok();
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => {
                log_warn!("acceptor thread stopping after accept error: {}", e);
                break;
            }
        }
    }
}

fn drive_connection(stream: std::net::TcpStream, addr: std::net::SocketAddr, config: Arc<DaemonConfig>) {
    let transport = match PlainTransport::from_std(stream) {
        Ok(t) => t,
        Err(e) => {
            log_warn!("failed to prepare connection from {}: {}", addr, e);
            return;
        }
    };
    let mut conn = Connection::new(Box::new(transport), addr, config.connection_memory_limit_b);
    let mut backend = PollBackend::new();
    let fd = conn.raw_fd();
    if backend.register(fd, 0, Interest::Read).is_err() {
        return;
    }

    if let Some(cb) = &config.notify_connection {
        cb(addr, crate::logging::ConnectionEvent::Started);
    }

    let mut reason = crate::logging::TerminationReason::Completed;
    loop {
        let remaining = config
            .connection_timeout
            .checked_sub(conn.last_activity.elapsed())
            .unwrap_or(Duration::from_millis(0));
        let mut events = Vec::new();
        if backend.poll(Some(remaining), &mut events).is_err() {
            reason = crate::logging::TerminationReason::ReadError;
            break;
        }

        if events.is_empty() && conn.last_activity.elapsed() >= config.connection_timeout {
            conn.force_close();
        }

        match conn.idle_step(&config) {
            StepResult::Blocked(EventLoopInfo::Read) => {
                let _ = backend.reregister(fd, 0, Interest::Read);
            }
            StepResult::Blocked(EventLoopInfo::Write) => {
                let _ = backend.reregister(fd, 0, Interest::Write);
            }
            StepResult::Blocked(EventLoopInfo::Block) => {
                // Suspended with nothing to wait on in this mode; spin slowly
                // rather than never invoking the handler again.
                std::thread::sleep(Duration::from_millis(20));
            }
            StepResult::Blocked(EventLoopInfo::Cleanup) => break,
            StepResult::Closed(r) => {
                reason = r;
                break;
            }
        }
    }

    if let Some(cb) = &config.notify_connection {
        cb(addr, crate::logging::ConnectionEvent::Closed(reason));
    }
}
