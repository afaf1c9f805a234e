// Copyright (c) 2017 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Thread-pool dispatch (§4.6): one reactor thread owns the listen socket in
//! accept-only mode and hands each new connection off through a
//! `crossbeam-channel` work queue; `size` worker reactor threads (default
//! `num_cpus::get()`, §9.1) pull from the shared receiver and adopt whatever
//! they get into their own DLLs. This is the teacher's `task_pool.rs` shape —
//! a fixed worker count draining one shared queue — generalized from
//! one-shot closures to whole connections that keep reappearing in the queue
//! only once, at admission.
//!
//! Suspend/resume (§4.4) has no story here either: a `conn_key` is only
//! meaningful to the one worker reactor that admitted it, and this dispatch
//! never hands a worker's `ResumeHandle` back out to `Daemon`. Hosts that
//! need suspend/resume should pick `SingleThread` instead.

use crate::config::DaemonConfig;
use crate::connection::Connection;
use crate::reactor::{BackendKind, ItcHandle, Reactor};
use crossbeam_channel::{Receiver, Sender};
use std::io;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

pub struct ThreadPoolDispatch {
    acceptor_itc: ItcHandle,
    worker_itcs: Vec<ItcHandle>,
    acceptor: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPoolDispatch {
    pub fn spawn(listener: TcpListener, config: Arc<DaemonConfig>, shutdown: Arc<AtomicBool>, size: usize) -> io::Result<ThreadPoolDispatch> {
        let (tx, rx): (Sender<Connection>, Receiver<Connection>) = crossbeam_channel::unbounded();

        let mut worker_itcs = Vec::with_capacity(size);
        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let rx = rx.clone();
            let worker_config = config.clone();
            let worker_shutdown = shutdown.clone();
            // Each worker is a connection-only reactor: bind to an unused
            // loopback port purely so it has a listener to satisfy `Reactor`'s
            // constructor. Nobody ever connects to it; every connection this
            // worker serves arrives pre-accepted through `adopt`.
            let placeholder = TcpListener::bind("127.0.0.1:0")?;
            let mut worker_reactor = Reactor::from_listener(placeholder, BackendKind::Poll, worker_shutdown.clone())?;
            let worker_itc = worker_reactor.itc_handle();
            worker_itcs.push(worker_itc);

            let handle = std::thread::Builder::new()
                .name(format!("mhttpd-pool-worker-{}", index))
                .spawn(move || {
                    loop {
                        while let Ok(conn) = rx.try_recv() {
                            worker_reactor.adopt(conn, &worker_config);
                        }
                        if let Err(e) = worker_reactor.run_once(&worker_config) {
                            crate::log_warn!("pool worker iteration failed: {}", e);
                        }
                        if worker_shutdown.load(Ordering::SeqCst) && worker_reactor.connection_count() == 0 && rx.is_empty() {
                            break;
                        }
                    }
                })
                .expect("spawning a pool worker thread");
            workers.push(handle);
        }

        let mut acceptor_reactor = Reactor::from_listener(listener, BackendKind::Poll, shutdown.clone())?;
        acceptor_reactor.set_accept_only(true);
        let acceptor_itc = acceptor_reactor.itc_handle();

        let acceptor_config = config.clone();
        let acceptor_shutdown = shutdown.clone();
        let round_robin_itcs = worker_itcs.clone();
        let acceptor = std::thread::Builder::new()
            .name("mhttpd-pool-acceptor".into())
            .spawn(move || {
                let mut next_worker = 0usize;
                loop {
                    if let Err(e) = acceptor_reactor.run_once(&acceptor_config) {
                        crate::log_warn!("pool acceptor iteration failed: {}", e);
                    }
                    for conn in acceptor_reactor.drain_handoff() {
                        if tx.send(conn).is_ok() {
                            // Wake the worker this connection is likely to
                            // land on (`try_recv` is a shared MPMC pull, so
                            // this is a hint, not a guarantee) — otherwise a
                            // worker already parked in `poll` with no other
                            // activity would never notice the new item.
                            round_robin_itcs[next_worker % round_robin_itcs.len()].wake();
                            next_worker = next_worker.wrapping_add(1);
                        }
                    }
                    if acceptor_shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                }
            })
            .expect("spawning the pool acceptor thread");

        Ok(ThreadPoolDispatch { acceptor_itc, worker_itcs, acceptor, workers })
    }

    /// Wakes every worker plus the acceptor; stopping the daemon needs all of
    /// them to notice the shared shutdown flag promptly even if they're
    /// parked in `poll` with nothing else to do.
    pub fn itc_handle(&self) -> ItcHandle {
        self.acceptor_itc.clone()
    }

    pub fn join(self) {
        self.acceptor_itc.wake();
        for itc in &self.worker_itcs {
            itc.wake();
        }
        let _ = self.acceptor.join();
        for w in self.workers {
            let _ = w.join();
        }
    }
}
