// Copyright (c) 2017 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The per-connection driver (§4.4): owns one socket, one in-flight
//! `Request`, and the pool backing both. `idle_step` is the non-reentrant
//! function that advances the FSM as far as non-blocking I/O allows, the
//! direct generalization of `http1.rs`'s `Http1Handler::update` loop (which
//! `mem::replace`s its own five-state enum until it can't make progress
//! without blocking) to all twenty states of §4.4.
//!
//! The read buffer is never compacted mid-request: request-line and header
//! `Slice`s are byte offsets into it that must stay valid for the whole
//! transaction, so bytes are only ever appended, never shifted down, until
//! `pool.reset()` wipes the arena at the next keep-alive `Init`. Chunked
//! decoding's own internal byte-shifting (`body_analyzer::feed`) only ever
//! rearranges the unprocessed body tail, which nothing else holds a `Slice`
//! into.

use crate::action::Action;
use crate::body_analyzer::{BodyAnalyzer, Framing};
use crate::config::DaemonConfig;
use crate::date::http_date_now;
use crate::fsm::{ConnState, EventLoopInfo, Keepalive};
use crate::header::HeaderKind;
use crate::io_capability::Transport;
use crate::log_error;
use crate::logging::TerminationReason;
use crate::parser::{self, ParseOutcome};
use crate::pool::MemoryPool;
use crate::request::{HttpVersion, Method, Request};
use crate::response::{CallbackOutcome, Response, ResponseBody};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

const INITIAL_READ_CHUNK: usize = 4096;
const BODY_CHUNK: usize = 8192;
const MAX_HEADERS: usize = 64;

/// Outcome of one `idle_step` call, telling the reactor what to do next.
pub enum StepResult {
    /// The connection needs more readiness before it can progress further.
    Blocked(EventLoopInfo),
    /// The connection transitioned to `Closed`; the reactor should move it
    /// to the cleanup list with the given reason.
    Closed(TerminationReason),
}

/// One TCP session, possibly hosting several sequential keep-alive requests.
pub struct Connection {
    transport: Box<dyn Transport>,
    remote_addr: SocketAddr,
    pool: MemoryPool,

    state: ConnState,
    keepalive: Keepalive,
    in_idle: bool,
    in_cleanup: bool,

    read_region: (usize, usize),
    read_filled: usize,
    read_closed: bool,

    request: Option<Request>,
    /// Offset within `read_region` where the body starts; everything before
    /// it belongs to the header block and is never touched again.
    body_pending_start: usize,
    body_analyzer: Option<BodyAnalyzer>,
    body_done: bool,

    response: Option<Response>,
    write_region: (usize, usize),
    write_filled: usize,
    write_sent: usize,
    body_cursor: BodyCursor,
    response_headers_only: bool,

    pub last_activity: Instant,
    pub suspended: bool,
    pub resuming: bool,

    /// Keys into the reactor's bookkeeping `Dll`s (§4.5), set by the
    /// reactor once it links this connection in; `None` while suspended.
    pub io_dll_key: Option<usize>,
    pub timeout_dll_key: Option<usize>,
    /// This connection's key in the reactor's own `connections` table — the
    /// same token `mark_resuming`/`ResumeHandle::resume` expect. Set once by
    /// the reactor at admit time and handed to the handler through
    /// `Request::conn_key` so a suspending handler has something to resume
    /// later with.
    pub conn_key: Option<usize>,
}

enum BodyCursor {
    None,
    Buffer { data: Vec<u8>, pos: usize },
    Shared { data: Arc<[u8]>, pos: usize },
    Fd { file: std::fs::File, pos: u64, end: u64 },
    Callback { pull: Box<dyn FnMut(&mut [u8]) -> CallbackOutcome + Send>, scratch: Vec<u8>, eof: bool },
}

enum BodyProgress {
    Blocked,
    Invalid,
}

enum BodyRefill {
    Ready,
    Done,
}

impl Connection {
    pub fn new(transport: Box<dyn Transport>, remote_addr: SocketAddr, pool_capacity: usize) -> Connection {
        Connection {
            transport,
            remote_addr,
            pool: MemoryPool::new(pool_capacity),
            state: ConnState::Init,
            keepalive: Keepalive::Unknown,
            in_idle: false,
            in_cleanup: false,
            read_region: (0, 0),
            read_filled: 0,
            read_closed: false,
            request: None,
            body_pending_start: 0,
            body_analyzer: None,
            body_done: false,
            response: None,
            write_region: (0, 0),
            write_filled: 0,
            write_sent: 0,
            body_cursor: BodyCursor::None,
            response_headers_only: false,
            last_activity: Instant::now(),
            suspended: false,
            resuming: false,
            io_dll_key: None,
            timeout_dll_key: None,
            conn_key: None,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn event_loop_info(&self) -> EventLoopInfo {
        if self.suspended {
            EventLoopInfo::Block
        } else {
            self.state.event_loop_info()
        }
    }

    /// The descriptor the reactor registers with its readiness backend.
    pub fn raw_fd(&self) -> std::os::unix::io::RawFd {
        self.transport.raw_fd()
    }

    /// Advances the FSM as far as it can go without blocking on I/O. The
    /// `in_idle` guard forbids reentrant invocation (§3 invariant); a
    /// nested call is a harmless no-op rather than a panic, matching the
    /// teacher's `mem::replace(&mut self.state, Poisonned)` trick of making
    /// reentry observably safe.
    pub fn idle_step(&mut self, config: &DaemonConfig) -> StepResult {
        if self.in_idle || self.in_cleanup || self.suspended {
            return StepResult::Blocked(self.event_loop_info());
        }
        self.in_idle = true;
        self.last_activity = Instant::now();
        let result = self.drive(config);
        self.in_idle = false;
        result
    }

    fn drive(&mut self, config: &DaemonConfig) -> StepResult {
        loop {
            if self.suspended {
                return StepResult::Blocked(EventLoopInfo::Block);
            }
            match self.state {
                ConnState::Init => {
                    self.reset_for_new_request();
                    self.state = ConnState::HeaderPartReceived;
                }

                ConnState::HeaderPartReceived | ConnState::UrlReceived => match self.progress_header_parse(config) {
                    Ok(true) => self.state = ConnState::HeadersReceived,
                    Ok(false) => return self.block_on_read(),
                    Err(status) => {
                        self.build_error_response(status);
                        self.state = ConnState::HeadersSending;
                    }
                },

                ConnState::HeadersReceived => {
                    let framing = {
                        let req = self.request.as_ref().expect("HeadersReceived implies a parsed request");
                        let buffer = self.pool.slice(self.read_region.0, self.read_filled);
                        req.body_framing(buffer)
                    };
                    match framing {
                        Ok(framing) => {
                            self.body_done = matches!(framing, Framing::Empty);
                            self.body_analyzer = Some(BodyAnalyzer::new(framing));
                            self.state = ConnState::HeadersProcessed;
                        }
                        Err(_) => {
                            self.build_error_response(400);
                            self.state = ConnState::HeadersSending;
                        }
                    }
                }

                ConnState::HeadersProcessed => {
                    self.invoke_handler(config, &[]);
                    if self.response.is_some() {
                        // Route through `FooterPartReceived` even though the
                        // body was never read, so `compute_keepalive` always
                        // runs before `HeadersSending` (matches the
                        // `ContinueSent|BodyReceived` arm below).
                        self.state = ConnState::FooterPartReceived;
                    } else if self.expects_100_continue() {
                        self.state = ConnState::ContinueSending;
                    } else {
                        self.state = ConnState::ContinueSent;
                    }
                }

                ConnState::ContinueSending => match self.send_literal(b"HTTP/1.1 100 Continue\r\n\r\n") {
                    Ok(true) => self.state = ConnState::ContinueSent,
                    Ok(false) => return self.block_on_write(),
                    Err(_) => return self.fail_closed(TerminationReason::WriteError),
                },

                ConnState::ContinueSent | ConnState::BodyReceived => {
                    if self.response.is_some() {
                        self.state = ConnState::FooterPartReceived;
                        continue;
                    }
                    if self.body_done {
                        self.state = ConnState::FooterPartReceived;
                        continue;
                    }
                    match self.progress_body_read(config) {
                        Ok(()) => self.state = ConnState::BodyReceived,
                        Err(BodyProgress::Blocked) => return self.block_on_read(),
                        Err(BodyProgress::Invalid) => {
                            self.build_error_response(400);
                            self.state = ConnState::HeadersSending;
                        }
                    }
                }

                ConnState::FooterPartReceived | ConnState::FootersReceived => {
                    if self.response.is_none() {
                        self.build_error_response(500);
                    }
                    self.keepalive = self.keepalive.lower_to(self.compute_keepalive());
                    self.state = ConnState::HeadersSending;
                }

                ConnState::HeadersSending => match self.prepare_response_headers() {
                    Ok(()) => match self.flush_write_buffer() {
                        Ok(true) => self.state = ConnState::HeadersSent,
                        Ok(false) => return self.block_on_write(),
                        Err(_) => return self.fail_closed(TerminationReason::WriteError),
                    },
                    Err(_) => return self.fail_closed(TerminationReason::Error),
                },

                ConnState::HeadersSent => {
                    self.state = if self.response_headers_only {
                        ConnState::BodySent
                    } else if self.response_uses_chunked() {
                        ConnState::ChunkedBodyUnready
                    } else {
                        ConnState::NormalBodyUnready
                    };
                }

                ConnState::NormalBodyUnready | ConnState::ChunkedBodyUnready => {
                    let chunked = matches!(self.state, ConnState::ChunkedBodyUnready);
                    match self.refill_body_write_buffer() {
                        Ok(BodyRefill::Ready) => {
                            self.state = if chunked { ConnState::ChunkedBodyReady } else { ConnState::NormalBodyReady }
                        }
                        Ok(BodyRefill::Done) => self.state = ConnState::BodySent,
                        Err(_) => return self.fail_closed(TerminationReason::Error),
                    }
                }

                ConnState::NormalBodyReady | ConnState::ChunkedBodyReady => {
                    let chunked = matches!(self.state, ConnState::ChunkedBodyReady);
                    match self.flush_write_buffer() {
                        Ok(true) => self.state = if chunked { ConnState::ChunkedBodyUnready } else { ConnState::NormalBodyUnready },
                        Ok(false) => return self.block_on_write(),
                        Err(_) => return self.fail_closed(TerminationReason::WriteError),
                    }
                }

                ConnState::BodySent => self.state = ConnState::FootersSending,

                ConnState::FootersSending => {
                    if self.response_uses_chunked() && !self.response_headers_only {
                        match self.send_literal(b"0\r\n\r\n") {
                            Ok(true) => self.state = ConnState::FootersSent,
                            Ok(false) => return self.block_on_write(),
                            Err(_) => return self.fail_closed(TerminationReason::WriteError),
                        }
                    } else {
                        self.state = ConnState::FootersSent;
                    }
                }

                ConnState::FootersSent => {
                    self.response = None;
                    self.state = ConnState::after_footers_sent(self.keepalive);
                }

                ConnState::Closed => {
                    self.in_cleanup = true;
                    return StepResult::Closed(TerminationReason::Completed);
                }

                ConnState::InCleanup => return StepResult::Closed(TerminationReason::Completed),
            }
        }
    }

    fn fail_closed(&mut self, reason: TerminationReason) -> StepResult {
        self.force_close();
        StepResult::Closed(reason)
    }

    fn block_on_read(&self) -> StepResult {
        if self.read_closed {
            StepResult::Blocked(EventLoopInfo::Cleanup)
        } else {
            StepResult::Blocked(EventLoopInfo::Read)
        }
    }

    fn block_on_write(&self) -> StepResult {
        StepResult::Blocked(EventLoopInfo::Write)
    }

    fn reset_for_new_request(&mut self) {
        self.pool.reset();
        self.read_region = (0, 0);
        self.read_filled = 0;
        self.request = None;
        self.body_pending_start = 0;
        self.body_analyzer = None;
        self.body_done = false;
        self.response = None;
        self.write_region = (0, 0);
        self.write_filled = 0;
        self.write_sent = 0;
        self.body_cursor = BodyCursor::None;
        self.response_headers_only = false;
        self.keepalive = Keepalive::Unknown;
    }

    /// Reads more bytes and attempts to parse a request line plus headers.
    /// Returns `Ok(true)` once complete, `Ok(false)` if more data is needed,
    /// or `Err(status)` on a parse error (§4.2 "Error policy").
    fn progress_header_parse(&mut self, config: &DaemonConfig) -> Result<bool, u16> {
        if !self.grow_read_buffer_if_needed(config) {
            return Err(431);
        }
        if !self.recv_more() {
            return Ok(false);
        }

        let (start, _) = self.read_region;
        match parser::parse_head(self.pool.slice_mut(start, self.read_filled), MAX_HEADERS) {
            ParseOutcome::Incomplete => Ok(false),
            ParseOutcome::Invalid => Err(400),
            ParseOutcome::Complete { consumed, parsed } => {
                let expects_100_continue = {
                    let buffer = self.pool.slice(start, self.read_filled);
                    parsed
                        .headers
                        .find(HeaderKind::Request, "Expect", buffer)
                        .map(|s| s.resolve_str(buffer).eq_ignore_ascii_case("100-continue"))
                        .unwrap_or(false)
                };
                self.request = Some(Request {
                    method: parsed.method,
                    version: parsed.version,
                    target: parsed.target,
                    headers: parsed.headers,
                    remote_addr: self.remote_addr,
                    parse_checkpoint: consumed,
                    expects_100_continue,
                    conn_key: self.conn_key,
                });
                self.body_pending_start = consumed;
                Ok(true)
            }
        }
    }

    fn expects_100_continue(&self) -> bool {
        self.request.as_ref().map(|r| r.expects_100_continue).unwrap_or(false)
    }

    /// Reads more bytes, feeds them through the body decoder, and invokes
    /// the handler with whatever chunk decoded out (§4.2, §6 "Handler
    /// callback": one invocation per chunk, plus a final empty one).
    fn progress_body_read(&mut self, config: &DaemonConfig) -> Result<(), BodyProgress> {
        if !self.grow_read_buffer_if_needed(config) {
            return Err(BodyProgress::Invalid);
        }
        if !self.recv_more() {
            return Err(BodyProgress::Blocked);
        }

        let (start, _) = self.read_region;
        let pending_len = self.read_filled - self.body_pending_start;
        let outcome = {
            let analyzer = self.body_analyzer.as_mut().expect("body framing decided before BodyReceived");
            let slice = self.pool.slice_mut(start + self.body_pending_start, pending_len);
            analyzer.feed(slice)
        };

        let chunk = {
            let buffer = self.pool.slice(start + self.body_pending_start, outcome.body_data);
            buffer.to_vec()
        };
        self.body_pending_start += outcome.body_data + outcome.unused_trailing;

        if !chunk.is_empty() {
            self.invoke_handler(config, &chunk);
        }
        if outcome.finished {
            self.body_done = true;
            self.invoke_handler(config, &[]);
        }
        Ok(())
    }

    /// Calls the handler, turning a panic into a 500 the same way the
    /// teacher's `server.rs::process` turns a panicking closure into an
    /// error response instead of taking the whole reactor down with it.
    fn invoke_handler(&mut self, config: &DaemonConfig, chunk: &[u8]) {
        if self.response.is_some() {
            return;
        }
        let handler = &config.handler;
        let req = self.request.as_ref().expect("handler invoked only after request line parsed");
        let (start, _) = self.read_region;
        let buffer = self.pool.slice(start, self.read_filled);
        let guarded = std::panic::AssertUnwindSafe(|| (handler)(req, buffer, chunk));
        let action = match std::panic::catch_unwind(guarded) {
            Ok(action) => action,
            Err(_) => {
                log_error!("handler panicked, responding 500 and closing the connection");
                self.keepalive = Keepalive::MustClose;
                Action::Respond(Response::empty_500())
            }
        };
        match action {
            Action::Respond(response) => self.response = Some(response),
            Action::Suspend => self.suspended = true,
            Action::Upgrade(upgrade) => {
                let transport = std::mem::replace(&mut self.transport, Box::new(NullTransport));
                upgrade.build(transport);
                self.state = ConnState::Closed;
            }
            Action::Continue => {}
        }
    }

    /// The request's own HTTP version, defaulting to 1.1 if no request has
    /// been parsed yet (shouldn't happen by the time this matters: status
    /// line and framing are only ever decided once a response is queued).
    fn request_version(&self) -> HttpVersion {
        self.request.as_ref().map(|r| r.version).unwrap_or(HttpVersion::Http11)
    }

    /// §4.4 "Keep-alive decision": a handler-added `Connection: close`
    /// always wins (§9.1's resolved open question), otherwise it's the
    /// request's own version/header-driven default. An HTTP/1.0 response
    /// whose body size isn't known in advance has no framing left but
    /// connection-close (§4.3): HTTP/1.0 has no chunked encoding, so
    /// keep-alive is never an option there regardless of what the request
    /// asked for.
    fn compute_keepalive(&self) -> Keepalive {
        let response_forces_close = self.response.as_ref().map(response_has_connection_close).unwrap_or(false);
        if response_forces_close {
            return Keepalive::MustClose;
        }
        let unknown_size = self.response.as_ref().map(|r| r.known_size().is_none()).unwrap_or(false);
        if unknown_size && self.request_version() == HttpVersion::Http10 {
            return Keepalive::MustClose;
        }
        let (start, _) = self.read_region;
        let buffer = self.pool.slice(start, self.read_filled);
        match self.request.as_ref() {
            Some(req) if req.wants_keep_alive(buffer) => Keepalive::KeepAlive,
            _ => Keepalive::MustClose,
        }
    }

    fn build_error_response(&mut self, status: u16) {
        self.response = Some(Response::new(status, vec![], ResponseBody::empty()));
        self.keepalive = Keepalive::MustClose;
    }

    /// Chunked framing is an HTTP/1.1-only mechanism (§4.3): an unknown-size
    /// body on an HTTP/1.0 request falls back to connection-close framing
    /// instead, handled by `compute_keepalive` forcing `MustClose`.
    fn response_uses_chunked(&self) -> bool {
        let unknown_size = self.response.as_ref().map(|r| r.known_size().is_none()).unwrap_or(false);
        unknown_size && self.request_version() == HttpVersion::Http11
    }

    /// Serializes status line, headers (already in caller insertion order —
    /// unlike the original's reverse-then-reverse-once dance, `HeaderChain`
    /// here is only ever appended to in call order so no reversal step is
    /// needed), framing, `Connection:`, and `Date:` into the write buffer.
    fn prepare_response_headers(&mut self) -> io::Result<()> {
        let response = self.response.as_ref().expect("HeadersSending implies a queued response");
        let status = response.status_code();
        let request_version = self.request_version();
        self.response_headers_only = self.request.as_ref().map(|r| matches!(r.method, Method::Head)).unwrap_or(false);

        let mut text = Vec::new();
        text.extend_from_slice(if request_version == HttpVersion::Http10 { b"HTTP/1.0 " } else { b"HTTP/1.1 " });
        let mut code_buf = itoa::Buffer::new();
        text.extend_from_slice(code_buf.format(status).as_bytes());
        text.push(b' ');
        text.extend_from_slice(reason_phrase(status).as_bytes());
        text.extend_from_slice(b"\r\n");

        for (name, value) in response.headers() {
            // The canonical `Connection:` line below always wins; skip a
            // handler-supplied one so it never appears twice on the wire.
            if name.eq_ignore_ascii_case("connection") {
                continue;
            }
            text.extend_from_slice(name.as_bytes());
            text.extend_from_slice(b": ");
            text.extend_from_slice(value.as_bytes());
            text.extend_from_slice(b"\r\n");
        }

        match response.known_size() {
            Some(len) => {
                text.extend_from_slice(b"Content-Length: ");
                let mut len_buf = itoa::Buffer::new();
                text.extend_from_slice(len_buf.format(len).as_bytes());
                text.extend_from_slice(b"\r\n");
            }
            // HTTP/1.0 has no chunked encoding (§4.3): an unknown-size body
            // there carries no framing header at all and runs to
            // connection close instead, which `compute_keepalive` already
            // forces.
            None if request_version == HttpVersion::Http11 => text.extend_from_slice(b"Transfer-Encoding: chunked\r\n"),
            None => {}
        }

        text.extend_from_slice(b"Connection: ");
        text.extend_from_slice(if self.keepalive == Keepalive::KeepAlive { b"keep-alive" } else { b"close" });
        text.extend_from_slice(b"\r\n");

        text.extend_from_slice(b"Date: ");
        text.extend_from_slice(http_date_now().as_bytes());
        text.extend_from_slice(b"\r\n\r\n");

        self.stage_write(&text)
    }

    fn stage_write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let (start, len) = self
            .pool
            .alloc(bytes.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "pool exhausted while building response"))?;
        self.pool.slice_mut(start, len).copy_from_slice(bytes);
        self.write_region = (start, len);
        self.write_filled = len;
        self.write_sent = 0;
        Ok(())
    }

    /// Pulls the next chunk from the response body source into the write
    /// buffer, applying chunk framing if the response is being sent
    /// chunked (§4.4 "Body emission").
    fn refill_body_write_buffer(&mut self) -> io::Result<BodyRefill> {
        if self.response_headers_only {
            return Ok(BodyRefill::Done);
        }
        if matches!(self.body_cursor, BodyCursor::None) {
            let body = match self.response.as_ref() {
                Some(r) => r.take_body(),
                None => None,
            };
            self.body_cursor = match body {
                None => return Ok(BodyRefill::Done),
                Some(ResponseBody::Buffer(data)) => BodyCursor::Buffer { data, pos: 0 },
                Some(ResponseBody::Shared(data)) => BodyCursor::Shared { data, pos: 0 },
                Some(ResponseBody::Fd { file, offset, size }) => BodyCursor::Fd { file, pos: offset, end: offset + size },
                Some(ResponseBody::Callback { pull, .. }) => BodyCursor::Callback { pull, scratch: vec![0u8; BODY_CHUNK], eof: false },
            };
        }

        let chunk = self.pull_next_body_chunk()?;
        if chunk.is_empty() {
            return Ok(BodyRefill::Done);
        }

        if self.response_uses_chunked() {
            let mut framed = Vec::with_capacity(chunk.len() + 16);
            write!(framed, "{:x}\r\n", chunk.len()).expect("writing into a Vec<u8> cannot fail");
            framed.extend_from_slice(&chunk);
            framed.extend_from_slice(b"\r\n");
            self.stage_write(&framed)?;
        } else {
            self.stage_write(&chunk)?;
        }
        Ok(BodyRefill::Ready)
    }

    fn pull_next_body_chunk(&mut self) -> io::Result<Vec<u8>> {
        match &mut self.body_cursor {
            BodyCursor::None => Ok(Vec::new()),
            BodyCursor::Buffer { data, pos } => Ok(take_chunk(data, pos)),
            BodyCursor::Shared { data, pos } => Ok(take_chunk(data, pos)),
            BodyCursor::Fd { file, pos, end } => {
                if *pos >= *end {
                    return Ok(Vec::new());
                }
                file.seek(SeekFrom::Start(*pos))?;
                let want = std::cmp::min(BODY_CHUNK as u64, *end - *pos) as usize;
                let mut buf = vec![0u8; want];
                let n = file.read(&mut buf)?;
                buf.truncate(n);
                *pos += n as u64;
                Ok(buf)
            }
            BodyCursor::Callback { pull, scratch, eof } => {
                if *eof {
                    return Ok(Vec::new());
                }
                match pull(scratch) {
                    CallbackOutcome::Data(n) => Ok(scratch[..n].to_vec()),
                    CallbackOutcome::EndOfStream => {
                        *eof = true;
                        Ok(Vec::new())
                    }
                    CallbackOutcome::Error => Err(io::Error::new(io::ErrorKind::Other, "response body callback failed")),
                }
            }
        }
    }

    fn send_literal(&mut self, bytes: &[u8]) -> io::Result<bool> {
        match self.transport.send(bytes) {
            Ok(n) if n == bytes.len() => Ok(true),
            Ok(_) => Ok(false),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Drains `write_region[write_sent..write_filled]` to the transport.
    fn flush_write_buffer(&mut self) -> io::Result<bool> {
        let (start, _) = self.write_region;
        while self.write_sent < self.write_filled {
            let slice = self.pool.slice(start, self.write_filled);
            match self.transport.send(&slice[self.write_sent..]) {
                Ok(0) => return Ok(false),
                Ok(n) => self.write_sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    fn recv_more(&mut self) -> bool {
        let (start, cap) = self.read_region;
        if self.read_filled >= cap {
            return false;
        }
        let dst = self.pool.slice_mut(start, cap);
        match self.transport.recv(&mut dst[self.read_filled..]) {
            Ok(0) => {
                self.read_closed = true;
                false
            }
            Ok(n) => {
                self.read_filled += n;
                true
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(_) => {
                self.read_closed = true;
                false
            }
        }
    }

    /// Allocates the read buffer on first use (§4.4 "Read buffer growth"),
    /// or grows it additively by `connection_memory_increment_b` once the
    /// parser or body decoder is starved for space.
    fn grow_read_buffer_if_needed(&mut self, config: &DaemonConfig) -> bool {
        let (start, cap) = self.read_region;
        if cap == 0 {
            let initial = std::cmp::min(INITIAL_READ_CHUNK, std::cmp::max(self.pool.capacity() / 2, 256));
            return match self.pool.alloc(initial) {
                Some((s, l)) => {
                    self.read_region = (s, l);
                    true
                }
                None => false,
            };
        }
        if self.read_filled < cap {
            return true;
        }
        let new_len = cap + config.connection_memory_increment_b;
        if self.pool.try_extend(start, cap, new_len) {
            self.read_region = (start, new_len);
            true
        } else {
            false
        }
    }

    pub fn force_close(&mut self) {
        self.state = ConnState::Closed;
        self.in_cleanup = true;
    }
}

fn take_chunk<T: AsRef<[u8]>>(data: &T, pos: &mut usize) -> Vec<u8> {
    let data = data.as_ref();
    if *pos >= data.len() {
        return Vec::new();
    }
    let end = std::cmp::min(*pos + BODY_CHUNK, data.len());
    let out = data[*pos..end].to_vec();
    *pos = end;
    out
}

fn response_has_connection_close(r: &Response) -> bool {
    r.headers().iter().any(|(k, v)| k.eq_ignore_ascii_case("connection") && v.eq_ignore_ascii_case("close"))
}

struct NullTransport;
impl Transport for NullTransport {
    fn recv(&mut self, _dst: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::NotConnected))
    }
    fn send(&mut self, _src: &[u8]) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::NotConnected))
    }
    fn raw_fd(&self) -> std::os::unix::io::RawFd {
        -1
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
