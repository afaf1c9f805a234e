// Copyright (c) 2017 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! An embeddable HTTP/1.0 and HTTP/1.1 server core built around a
//! per-connection state machine and a pluggable I/O reactor, in the
//! tradition of libmicrohttpd: a host process links this crate in, builds a
//! [`DaemonConfig`] with a handler closure, and gets back a running
//! [`Daemon`] without ever seeing a socket directly.
//!
//! The pieces, roughly bottom-up:
//!
//! - [`pool`] / [`header`] / [`parser`] / [`request`] / [`body_analyzer`]:
//!   zero-copy parsing over a bump-allocated per-connection arena.
//! - [`response`]: the refcounted, mutex-guarded outbound side.
//! - [`fsm`] / [`connection`]: the twenty-state per-transaction driver.
//! - [`reactor`]: readiness polling (select/poll/epoll) and DLL bookkeeping.
//! - [`dispatch`]: the four concurrency modes layered on top of a reactor.
//! - [`daemon`] / [`config`]: the public lifecycle and builder.
//!
//! None of this configures a logging subscriber, a TLS stack, or a
//! metrics exporter — see [`logging`] and the `tls` feature for the seams a
//! host wires those in through.

pub mod action;
pub mod body_analyzer;
pub mod config;
pub mod connection;
pub mod daemon;
mod date;
mod dll;
pub mod dispatch;
pub mod error;
pub mod fsm;
pub mod header;
pub mod io_capability;
pub mod logging;
pub mod parser;
pub mod pool;
pub mod reactor;
pub mod request;
pub mod response;
pub mod upgrade;

pub use action::Action;
pub use config::{ConcurrencyMode, DaemonBuilder, DaemonConfig};
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use request::{HttpVersion, Method, Request};
pub use response::{CallbackOutcome, Response, ResponseBody};
pub use upgrade::Upgrade;
