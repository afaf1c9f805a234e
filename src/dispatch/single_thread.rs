// Copyright (c) 2017 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Single-internal-thread dispatch (§4.6): one thread owns the reactor for
//! the daemon's whole lifetime, the closest analogue to `Server::run`'s
//! blocking `for request in self.server.incoming_requests()` loop, except
//! the loop runs on a thread the daemon itself spawns rather than blocking
//! the caller.

use crate::config::DaemonConfig;
use crate::reactor::{ItcHandle, Reactor, ResumeHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

pub struct SingleThreadDispatch {
    itc_handle: ItcHandle,
    resume_handle: ResumeHandle,
    join_handle: JoinHandle<()>,
}

impl SingleThreadDispatch {
    pub fn spawn(mut reactor: Reactor, config: Arc<DaemonConfig>, shutdown: Arc<AtomicBool>) -> SingleThreadDispatch {
        let itc_handle = reactor.itc_handle();
        let resume_handle = reactor.resume_handle();
        let join_handle = std::thread::Builder::new()
            .name("mhttpd-reactor".into())
            .spawn(move || {
                loop {
                    if let Err(e) = reactor.run_once(&config) {
                        crate::log_warn!("reactor iteration failed: {}", e);
                    }
                    if shutdown.load(Ordering::SeqCst) && reactor.connection_count() == 0 {
                        break;
                    }
                }
            })
            .expect("spawning the reactor thread");
        SingleThreadDispatch { itc_handle, resume_handle, join_handle }
    }

    pub fn itc_handle(&self) -> ItcHandle {
        self.itc_handle.clone()
    }

    pub fn resume_handle(&self) -> ResumeHandle {
        self.resume_handle.clone()
    }

    pub fn join(self) {
        let _ = self.join_handle.join();
    }
}
