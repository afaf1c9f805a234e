// Copyright (c) 2017 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Layered configuration (§10.3): a builder accumulating tunables, immutable
//! once `build()` succeeds, matching §5's "configuration struct (immutable
//! after start)".

use crate::action::Action;
use crate::request::Request;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Which of the four dispatch strategies (§4.6) drives the reactor.
#[derive(Clone)]
pub enum ConcurrencyMode {
    /// The host drives iteration; the daemon never spawns a thread of its
    /// own.
    External,
    /// One internally owned thread spins the reactor loop.
    SingleThread,
    /// Each accepted connection gets a dedicated thread running a
    /// miniature reactor over just its socket.
    ThreadPerConnection,
    /// `size` reactor threads share a work queue. `None` defaults to
    /// `num_cpus::get()` (§9.1's resolved open question: no cap is imposed).
    ThreadPool { size: Option<usize> },
}

/// `(request, request's connection buffer, upload chunk) -> Action`. The
/// buffer is needed to resolve `req.target`/`req.header` — a `Request`
/// carries only byte offsets into it (§3.1), since the buffer itself can
/// grow (and move) across the handler's own lifetime.
pub type HandlerFn = dyn Fn(&Request, &[u8], &[u8]) -> Action + Send + Sync;
pub type AcceptPolicyFn = dyn Fn(SocketAddr) -> bool + Send + Sync;
pub type NotifyConnectionFn = dyn Fn(SocketAddr, crate::logging::ConnectionEvent) + Send + Sync;
pub type EarlyUriLoggerFn = dyn Fn(&str) + Send + Sync;
pub type UnescapeFn = dyn Fn(&str) -> String + Send + Sync;

/// Immutable daemon configuration, produced by [`DaemonBuilder::build`].
pub struct DaemonConfig {
    pub listen_addr: SocketAddr,
    pub concurrency_mode: ConcurrencyMode,
    pub connection_timeout: Duration,
    pub connection_memory_limit_b: usize,
    pub connection_memory_increment_b: usize,
    pub max_connections: Option<usize>,
    pub max_connections_per_ip: Option<usize>,
    pub protocol_strict_level: u8,
    pub suppress_date_header: bool,
    pub handler: Arc<HandlerFn>,
    pub accept_policy: Option<Arc<AcceptPolicyFn>>,
    pub notify_connection: Option<Arc<NotifyConnectionFn>>,
    pub early_uri_logger: Option<Arc<EarlyUriLoggerFn>>,
    pub unescape: Option<Arc<UnescapeFn>>,
}

/// Accumulates a [`DaemonConfig`]'s tunables before a one-shot `build()`.
/// Generalizes `server.rs::Server::new`'s single `(addr, handler)`
/// constructor into a builder, since §5's resource model needs far more
/// knobs than a bare address and handler pair.
pub struct DaemonBuilder {
    listen_addr: SocketAddr,
    handler: Arc<HandlerFn>,
    concurrency_mode: ConcurrencyMode,
    connection_timeout: Duration,
    connection_memory_limit_b: usize,
    connection_memory_increment_b: usize,
    max_connections: Option<usize>,
    max_connections_per_ip: Option<usize>,
    protocol_strict_level: u8,
    suppress_date_header: bool,
    accept_policy: Option<Arc<AcceptPolicyFn>>,
    notify_connection: Option<Arc<NotifyConnectionFn>>,
    early_uri_logger: Option<Arc<EarlyUriLoggerFn>>,
    unescape: Option<Arc<UnescapeFn>>,
}

impl DaemonBuilder {
    pub fn new<F>(listen_addr: SocketAddr, handler: F) -> DaemonBuilder
    where
        F: Fn(&Request, &[u8], &[u8]) -> Action + Send + Sync + 'static,
    {
        DaemonBuilder {
            listen_addr,
            handler: Arc::new(handler),
            concurrency_mode: ConcurrencyMode::SingleThread,
            connection_timeout: Duration::from_secs(120),
            connection_memory_limit_b: 32 * 1024,
            connection_memory_increment_b: 4 * 1024,
            max_connections: None,
            max_connections_per_ip: None,
            protocol_strict_level: 0,
            suppress_date_header: false,
            accept_policy: None,
            notify_connection: None,
            early_uri_logger: None,
            unescape: None,
        }
    }

    pub fn concurrency_mode(mut self, mode: ConcurrencyMode) -> DaemonBuilder {
        self.concurrency_mode = mode;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> DaemonBuilder {
        self.connection_timeout = timeout;
        self
    }

    pub fn connection_memory_limit_b(mut self, bytes: usize) -> DaemonBuilder {
        self.connection_memory_limit_b = bytes;
        self
    }

    pub fn connection_memory_increment_b(mut self, bytes: usize) -> DaemonBuilder {
        self.connection_memory_increment_b = bytes;
        self
    }

    pub fn max_connections(mut self, n: usize) -> DaemonBuilder {
        self.max_connections = Some(n);
        self
    }

    pub fn max_connections_per_ip(mut self, n: usize) -> DaemonBuilder {
        self.max_connections_per_ip = Some(n);
        self
    }

    pub fn protocol_strict_level(mut self, level: u8) -> DaemonBuilder {
        self.protocol_strict_level = level;
        self
    }

    pub fn suppress_date_header(mut self, suppress: bool) -> DaemonBuilder {
        self.suppress_date_header = suppress;
        self
    }

    pub fn accept_policy<F>(mut self, f: F) -> DaemonBuilder
    where
        F: Fn(SocketAddr) -> bool + Send + Sync + 'static,
    {
        self.accept_policy = Some(Arc::new(f));
        self
    }

    pub fn notify_connection<F>(mut self, f: F) -> DaemonBuilder
    where
        F: Fn(SocketAddr, crate::logging::ConnectionEvent) + Send + Sync + 'static,
    {
        self.notify_connection = Some(Arc::new(f));
        self
    }

    pub fn early_uri_logger<F>(mut self, f: F) -> DaemonBuilder
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.early_uri_logger = Some(Arc::new(f));
        self
    }

    pub fn unescape<F>(mut self, f: F) -> DaemonBuilder
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.unescape = Some(Arc::new(f));
        self
    }

    /// Validates the accumulated tunables and produces an immutable
    /// [`DaemonConfig`]. Binding the listen socket happens later, in
    /// `Daemon::start` — `build()` only rejects contradictory configuration.
    pub fn build(self) -> crate::error::Result<DaemonConfig> {
        if self.connection_memory_limit_b == 0 {
            return Err(crate::error::Error::InvalidConfig("connection_memory_limit_b must be nonzero"));
        }
        if let ConcurrencyMode::ThreadPool { size: Some(0) } = self.concurrency_mode {
            return Err(crate::error::Error::InvalidConfig("thread pool size must be nonzero"));
        }
        Ok(DaemonConfig {
            listen_addr: self.listen_addr,
            concurrency_mode: self.concurrency_mode,
            connection_timeout: self.connection_timeout,
            connection_memory_limit_b: self.connection_memory_limit_b,
            connection_memory_increment_b: self.connection_memory_increment_b,
            max_connections: self.max_connections,
            max_connections_per_ip: self.max_connections_per_ip,
            protocol_strict_level: self.protocol_strict_level,
            suppress_date_header: self.suppress_date_header,
            handler: self.handler,
            accept_policy: self.accept_policy,
            notify_connection: self.notify_connection,
            early_uri_logger: self.early_uri_logger,
            unescape: self.unescape,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_memory_limit_is_rejected() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let result = DaemonBuilder::new(addr, |_req, _buf, _body| crate::response::Response::empty_404().into())
            .connection_memory_limit_b(0)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn default_config_builds_successfully() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let config = DaemonBuilder::new(addr, |_req, _buf, _body| crate::response::Response::empty_404().into()).build().unwrap();
        assert_eq!(config.connection_memory_limit_b, 32 * 1024);
    }

    #[test]
    fn zero_sized_thread_pool_is_rejected() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let result = DaemonBuilder::new(addr, |_req, _buf, _body| crate::response::Response::empty_404().into())
            .concurrency_mode(ConcurrencyMode::ThreadPool { size: Some(0) })
            .build();
        assert!(result.is_err());
    }
}
