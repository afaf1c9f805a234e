// Copyright (c) 2017 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The per-transaction request state (§3 "Request", §4.3's data model).
//!
//! A `Request` borrows nothing; every string it exposes is a [`crate::header::Slice`]
//! that must be resolved against the owning connection's read buffer.

use crate::header::{Header, HeaderChain, HeaderKind, HeaderValue, Slice};
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
    Other,
}

impl Method {
    pub fn from_bytes(b: &[u8]) -> Method {
        match b {
            b"GET" => Method::Get,
            b"HEAD" => Method::Head,
            b"POST" => Method::Post,
            b"PUT" => Method::Put,
            b"DELETE" => Method::Delete,
            b"CONNECT" => Method::Connect,
            b"OPTIONS" => Method::Options,
            b"TRACE" => Method::Trace,
            b"PATCH" => Method::Patch,
            _ => Method::Other,
        }
    }

    /// A HEAD response must carry the headers of the equivalent GET but never
    /// a body (§4.4 "Body emission").
    pub fn suppresses_response_body(self) -> bool {
        matches!(self, Method::Head)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    /// HTTP/1.1 defaults to keep-alive; HTTP/1.0 defaults to close, unless
    /// overridden by a `Connection` header (§5 "Keep-alive decision").
    pub fn default_keep_alive(self) -> bool {
        matches!(self, HttpVersion::Http11)
    }
}

/// One parsed HTTP request, valid only while the connection's read buffer it
/// was sliced from is alive and unreset (§3.1).
pub struct Request {
    pub method: Method,
    pub version: HttpVersion,
    pub target: Slice,
    pub headers: HeaderChain,
    pub remote_addr: SocketAddr,
    /// Byte offset, within the connection's read buffer, where header
    /// parsing stopped and body data begins. Generalizes `http1.rs`'s
    /// `Http1HandlerState::new_data_start` checkpoint to a field usable
    /// across the whole FSM rather than one `mem::replace` arm.
    pub parse_checkpoint: usize,
    pub expects_100_continue: bool,
    /// This connection's key in whichever reactor accepted it, if any —
    /// `None` until a reactor has admitted the connection. A handler
    /// returning `Action::Suspend` stashes this to pass to a later
    /// `Daemon::resume` call (§4.4 "Suspend/resume"), since nothing else
    /// hands a suspended connection's identity back out to the host.
    pub conn_key: Option<usize>,
}

impl Request {
    pub fn target<'a>(&self, buffer: &'a [u8]) -> &'a str {
        self.target.resolve_str(buffer)
    }

    /// Splits `target` into the path and an optional raw query string,
    /// without unescaping (percent-decoding happens lazily via
    /// [`crate::parser::query_pairs`]).
    pub fn path_and_query<'a>(&self, buffer: &'a [u8]) -> (&'a str, Option<&'a str>) {
        let full = self.target(buffer);
        match full.find('?') {
            Some(idx) => (&full[..idx], Some(&full[idx + 1..])),
            None => (full, None),
        }
    }

    pub fn header<'a>(&'a self, name: &str, buffer: &'a [u8]) -> Option<&'a str> {
        self.headers.find(HeaderKind::Request, name, buffer).map(|s| s.resolve_str(buffer))
    }

    pub fn headers_named<'a>(&'a self, name: &'a str, buffer: &'a [u8]) -> impl Iterator<Item = &'a str> {
        self.headers.find_all(HeaderKind::Request, name, buffer).map(move |s| s.resolve_str(buffer))
    }

    /// Decides the body framing from the `Transfer-Encoding`/`Content-Length`
    /// headers already parsed onto this request (§4.2).
    pub fn body_framing(&self, buffer: &[u8]) -> Result<crate::body_analyzer::Framing, crate::body_analyzer::FramingError> {
        crate::body_analyzer::decide_framing(
            self.header("Transfer-Encoding", buffer),
            self.header("Content-Length", buffer),
        )
    }

    /// §5's keep-alive decision: HTTP/1.1 defaults open, HTTP/1.0 defaults
    /// closed, and either is overridden by an explicit `Connection` header.
    pub fn wants_keep_alive(&self, buffer: &[u8]) -> bool {
        match self.header("Connection", buffer).map(|v| v.to_ascii_lowercase()) {
            Some(ref v) if v.split(',').any(|tok| tok.trim() == "close") => false,
            Some(ref v) if v.split(',').any(|tok| tok.trim() == "keep-alive") => true,
            _ => self.version.default_keep_alive(),
        }
    }

    /// Lazily parses the query string into a chain of `HeaderKind::GetArgument`
    /// entries, matching the lookup shape `header`/`headers_named` already
    /// give request headers (§4.2, §8). Percent-decoded values don't exist
    /// anywhere in `buffer`, so they're stored as owned strings rather than
    /// slices of it; the returned chain can be resolved against any buffer
    /// (including an empty one) since none of its entries are `Slice`-backed.
    pub fn get_arguments(&self, buffer: &[u8]) -> HeaderChain {
        let mut chain = HeaderChain::new();
        if let (_, Some(query)) = self.path_and_query(buffer) {
            for (name, value) in crate::parser::query_pairs(query) {
                chain.push(Header {
                    kind: HeaderKind::GetArgument,
                    name: HeaderValue::Owned(name.into()),
                    value: HeaderValue::Owned(value.into()),
                });
            }
        }
        chain
    }

    /// A single decoded GET argument by name, or `None` if absent.
    pub fn get_argument(&self, name: &str, buffer: &[u8]) -> Option<String> {
        self.get_arguments(buffer).find(HeaderKind::GetArgument, name, &[]).map(|v| v.resolve_str(&[]).to_owned())
    }
}

/// Builds a request's header chain from parsed `httparse::Header`s, copying
/// nothing: each (name, value) pair is recorded as a pair of [`Slice`]s into
/// `buffer`, computed from the raw pointer offsets `httparse` hands back.
pub fn push_parsed_header(chain: &mut HeaderChain, buffer: &[u8], name: &[u8], value: &[u8]) {
    let name_start = offset_of(buffer, name);
    let value_start = offset_of(buffer, value);
    chain.push(Header {
        kind: HeaderKind::Request,
        name: Slice::new(name_start, name.len()).into(),
        value: Slice::new(value_start, value.len()).into(),
    });
}

/// `httparse` returns sub-slices of the buffer we gave it; recovering the
/// offset is pointer arithmetic guarded by a bounds check.
fn offset_of(buffer: &[u8], sub: &[u8]) -> usize {
    let base = buffer.as_ptr() as usize;
    let ptr = sub.as_ptr() as usize;
    debug_assert!(ptr >= base && ptr + sub.len() <= base + buffer.len());
    ptr - base
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_addr() -> SocketAddr {
        "127.0.0.1:1234".parse().unwrap()
    }

    #[test]
    fn method_parsing_recognizes_standard_verbs() {
        assert_eq!(Method::from_bytes(b"GET"), Method::Get);
        assert_eq!(Method::from_bytes(b"POST"), Method::Post);
        assert_eq!(Method::from_bytes(b"WEIRD"), Method::Other);
    }

    #[test]
    fn head_suppresses_body_get_does_not() {
        assert!(Method::Head.suppresses_response_body());
        assert!(!Method::Get.suppresses_response_body());
    }

    #[test]
    fn path_and_query_split_on_first_question_mark() {
        let buffer = b"/a/b?x=1&y=2".to_vec();
        let req = Request {
            method: Method::Get,
            version: HttpVersion::Http11,
            target: Slice::new(0, buffer.len()),
            headers: HeaderChain::new(),
            remote_addr: dummy_addr(),
            parse_checkpoint: 0,
            expects_100_continue: false,
            conn_key: None,
        };
        let (path, query) = req.path_and_query(&buffer);
        assert_eq!(path, "/a/b");
        assert_eq!(query, Some("x=1&y=2"));
    }

    #[test]
    fn get_arguments_are_percent_decoded_and_found_by_name() {
        let buffer = b"/search?q=a%20b&tag=rust".to_vec();
        let req = Request {
            method: Method::Get,
            version: HttpVersion::Http11,
            target: Slice::new(0, buffer.len()),
            headers: HeaderChain::new(),
            remote_addr: dummy_addr(),
            parse_checkpoint: 0,
            expects_100_continue: false,
            conn_key: None,
        };
        assert_eq!(req.get_argument("q", &buffer), Some("a b".to_string()));
        assert_eq!(req.get_argument("tag", &buffer), Some("rust".to_string()));
        assert_eq!(req.get_argument("missing", &buffer), None);
    }

    #[test]
    fn get_arguments_empty_when_target_has_no_query() {
        let buffer = b"/no-query".to_vec();
        let req = Request {
            method: Method::Get,
            version: HttpVersion::Http11,
            target: Slice::new(0, buffer.len()),
            headers: HeaderChain::new(),
            remote_addr: dummy_addr(),
            parse_checkpoint: 0,
            expects_100_continue: false,
            conn_key: None,
        };
        assert!(req.get_arguments(&buffer).is_empty());
    }

    #[test]
    fn keep_alive_defaults_follow_version_unless_overridden() {
        let mut buffer = Vec::new();
        let mut headers = HeaderChain::new();
        push_parsed_header(&mut headers, &buffer, &[], &[]);
        headers.clear();

        let mut req = Request {
            method: Method::Get,
            version: HttpVersion::Http11,
            target: Slice::new(0, 0),
            headers,
            remote_addr: dummy_addr(),
            parse_checkpoint: 0,
            expects_100_continue: false,
            conn_key: None,
        };
        assert!(req.wants_keep_alive(&buffer));

        let name_start = buffer.len();
        buffer.extend_from_slice(b"Connection");
        let value_start = buffer.len();
        buffer.extend_from_slice(b"close");
        req.headers.push(Header {
            kind: HeaderKind::Request,
            name: Slice::new(name_start, 10).into(),
            value: Slice::new(value_start, 5).into(),
        });
        assert!(!req.wants_keep_alive(&buffer));
    }

    #[test]
    fn http_1_0_defaults_to_close() {
        assert!(!HttpVersion::Http10.default_keep_alive());
        assert!(HttpVersion::Http11.default_keep_alive());
    }
}
