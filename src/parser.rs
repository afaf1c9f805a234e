// Copyright (c) 2017 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Request-line and header parsing off a pool-backed read buffer (§4.2).
//!
//! Everything here is pure: it reads a byte slice, and the only state it
//! carries across a partial parse is a byte offset the caller stores on the
//! `Request` (`parse_checkpoint`). This keeps the parser itself free of any
//! socket or reactor concerns, the same separation `http1.rs` draws between
//! `parse_request_line` and the connection-driving `update` loop.

use crate::header::{Header, HeaderChain, HeaderKind, Slice};
use crate::request::{HttpVersion, Method};
use std::net::SocketAddr;

/// Rewrites obs-fold continuation lines (a line beginning with SP/HT that
/// continues the previous header's value, RFC 7230 §3.2.4, SPEC_FULL.md
/// §4.2) into plain whitespace, in place. `httparse` rejects these lines
/// outright rather than folding them, so this has to run first.
///
/// Folding only ever turns a header's terminating `\r\n` into two spaces when
/// the following line starts with SP/HT, so no byte anywhere else in the
/// buffer moves — every `Slice` offset computed afterwards still lines up
/// with the original connection read buffer.
fn unfold_obsolete_lines(buffer: &mut [u8]) {
    let end = header_block_end(buffer).unwrap_or(buffer.len());
    let mut i = 0;
    while i + 2 < end {
        if buffer[i] == b'\r' && buffer[i + 1] == b'\n' && (buffer[i + 2] == b' ' || buffer[i + 2] == b'\t') {
            buffer[i] = b' ';
            buffer[i + 1] = b' ';
        }
        i += 1;
    }
}

/// Byte offset just past the blank line ending the header block, if one has
/// arrived yet. Bounds `unfold_obsolete_lines` so it never touches body bytes
/// that happened to arrive in the same read as the headers.
fn header_block_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// A request line plus headers parsed so far. `None` result variants mean
/// "not enough data yet" rather than an error; callers keep buffering.
pub enum ParseOutcome {
    /// More bytes are needed before parsing can make progress.
    Incomplete,
    /// The request line and all headers parsed successfully.
    Complete { consumed: usize, parsed: ParsedHead },
    /// The data is structurally invalid HTTP; the connection should answer
    /// 400 and close (§4.2 "Error policy").
    Invalid,
}

pub struct ParsedHead {
    pub method: Method,
    pub version: HttpVersion,
    pub target: Slice,
    pub headers: HeaderChain,
}

/// Parses a request line plus header block from `buffer[..]`, using
/// `httparse` for tokenizing (as `http1.rs` does) and converting its
/// sub-slices back into `(start, len)` pairs via [`push_header`].
///
/// `max_headers` bounds the fixed-size header array `httparse` requires;
/// exceeding it is reported as `Invalid` rather than silently truncating.
pub fn parse_head(buffer: &mut [u8], max_headers: usize) -> ParseOutcome {
    unfold_obsolete_lines(buffer);
    let buffer: &[u8] = buffer;

    let mut raw_headers = vec![httparse::EMPTY_HEADER; max_headers];
    let mut req = httparse::Request::new(&mut raw_headers);

    match req.parse(buffer) {
        Ok(httparse::Status::Complete(consumed)) => {
            let method_bytes = match req.method {
                Some(m) => m.as_bytes(),
                None => return ParseOutcome::Invalid,
            };
            let path = match req.path {
                Some(p) => p,
                None => return ParseOutcome::Invalid,
            };
            let version = match req.version {
                Some(0) => HttpVersion::Http10,
                Some(1) => HttpVersion::Http11,
                _ => return ParseOutcome::Invalid,
            };

            let target_start = offset_of(buffer, path.as_bytes());
            let target = Slice::new(target_start, path.len());

            let mut headers = HeaderChain::new();
            for h in req.headers.iter() {
                if h.name.is_empty() && h.value.is_empty() {
                    continue;
                }
                push_header(&mut headers, buffer, h.name.as_bytes(), h.value);
            }

            ParseOutcome::Complete {
                consumed,
                parsed: ParsedHead { method: Method::from_bytes(method_bytes), version, target, headers },
            }
        }
        Ok(httparse::Status::Partial) => ParseOutcome::Incomplete,
        Err(_) => ParseOutcome::Invalid,
    }
}

fn push_header(chain: &mut HeaderChain, buffer: &[u8], name: &[u8], value: &[u8]) {
    let name_start = offset_of(buffer, name);
    let value_start = offset_of(buffer, value);
    chain.push(Header {
        kind: HeaderKind::Request,
        name: Slice::new(name_start, name.len()).into(),
        value: Slice::new(value_start, value.len()).into(),
    });
    if name.eq_ignore_ascii_case(b"cookie") {
        push_cookie_crumbs(chain, buffer, value);
    }
}

/// `Cookie: a=1; b=2` additionally becomes one `HeaderKind::Cookie` entry per
/// crumb, alongside the untouched `HeaderKind::Request` entry `push_header`
/// already pushed (§3, §4.2). Crumbs are never percent-decoded, so each stays
/// a genuine zero-copy slice of the original buffer rather than needing the
/// owned `HeaderValue` variant GET arguments do.
fn push_cookie_crumbs(chain: &mut HeaderChain, buffer: &[u8], value: &[u8]) {
    for crumb in value.split(|&b| b == b';') {
        let crumb = trim_ascii_ws(crumb);
        if crumb.is_empty() {
            continue;
        }
        let (name, val) = match crumb.iter().position(|&b| b == b'=') {
            Some(eq) => (&crumb[..eq], &crumb[eq + 1..]),
            None => (crumb, &crumb[crumb.len()..]),
        };
        chain.push(Header {
            kind: HeaderKind::Cookie,
            name: Slice::new(offset_of(buffer, name), name.len()).into(),
            value: Slice::new(offset_of(buffer, val), val.len()).into(),
        });
    }
}

fn trim_ascii_ws(b: &[u8]) -> &[u8] {
    let start = b.iter().position(|&c| c != b' ' && c != b'\t').unwrap_or(b.len());
    let end = b.iter().rposition(|&c| c != b' ' && c != b'\t').map(|i| i + 1).unwrap_or(start);
    &b[start..end]
}

fn offset_of(buffer: &[u8], sub: &[u8]) -> usize {
    let base = buffer.as_ptr() as usize;
    let ptr = sub.as_ptr() as usize;
    debug_assert!(ptr >= base && ptr + sub.len() <= base + buffer.len());
    ptr - base
}

/// Tokenizes a raw query string (the substring after `?`, not yet
/// percent-decoded) on `&`/`;` and decodes each `name=value` pair, per §4.2's
/// lazy GET-argument parsing.
pub fn query_pairs(raw: &str) -> impl Iterator<Item = (String, String)> + '_ {
    let normalized: std::borrow::Cow<str> =
        if raw.contains(';') { raw.replace(';', "&").into() } else { raw.into() };
    url::form_urlencoded::parse(normalized.into_owned().as_bytes())
        .into_owned()
        .collect::<Vec<_>>()
        .into_iter()
}

/// Resolves the remote peer's address into the form the `Request`'s
/// `remote_addr` field stores; a thin wrapper kept so callers never touch
/// `std::net` directly outside `connection.rs`.
pub fn socket_addr_of(addr: std::net::SocketAddr) -> SocketAddr {
    addr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get_request() {
        let mut buf = b"GET /hello HTTP/1.1\r\nHost: example.com\r\n\r\n".to_vec();
        let len = buf.len();
        match parse_head(&mut buf, 16) {
            ParseOutcome::Complete { consumed, parsed } => {
                assert_eq!(consumed, len);
                assert_eq!(parsed.method, Method::Get);
                assert_eq!(parsed.version, HttpVersion::Http11);
                assert_eq!(parsed.target.resolve_str(&buf), "/hello");
                let host = parsed.headers.find(HeaderKind::Request, "host", &buf).unwrap();
                assert_eq!(host.resolve_str(&buf), "example.com");
            }
            _ => panic!("expected Complete"),
        }
    }

    #[test]
    fn partial_request_line_is_incomplete() {
        let mut buf = b"GET /hel".to_vec();
        assert!(matches!(parse_head(&mut buf, 16), ParseOutcome::Incomplete));
    }

    #[test]
    fn request_line_split_across_two_feeds_parses_like_one() {
        // §8 boundary behavior.
        let mut buf = b"GET /a".to_vec();
        assert!(matches!(parse_head(&mut buf, 16), ParseOutcome::Incomplete));
        buf.extend_from_slice(b" HTTP/1.1\r\nHost: h\r\n\r\n");
        match parse_head(&mut buf, 16) {
            ParseOutcome::Complete { parsed, .. } => assert_eq!(parsed.target.resolve_str(&buf), "/a"),
            _ => panic!("expected Complete"),
        }
    }

    #[test]
    fn malformed_request_line_is_invalid() {
        let mut buf = b"not a valid request line\r\n\r\n".to_vec();
        assert!(matches!(parse_head(&mut buf, 16), ParseOutcome::Invalid));
    }

    #[test]
    fn duplicate_header_names_preserved() {
        let mut buf = b"GET / HTTP/1.1\r\nX-A: 1\r\nX-A: 2\r\n\r\n".to_vec();
        match parse_head(&mut buf, 16) {
            ParseOutcome::Complete { parsed, .. } => {
                let values: Vec<&str> = parsed.headers.find_all(HeaderKind::Request, "X-A", &buf).map(|s| s.resolve_str(&buf)).collect();
                assert_eq!(values, vec!["1", "2"]);
            }
            _ => panic!("expected Complete"),
        }
    }

    #[test]
    fn folded_continuation_line_joins_previous_headers_value() {
        let mut buf = b"GET / HTTP/1.1\r\nX-Long: first\r\n second\r\n\r\n".to_vec();
        match parse_head(&mut buf, 16) {
            ParseOutcome::Complete { parsed, .. } => {
                let value = parsed.headers.find(HeaderKind::Request, "X-Long", &buf).unwrap();
                assert_eq!(value.resolve_str(&buf), "first   second");
            }
            _ => panic!("expected Complete, folding should avoid a parse error"),
        }
    }

    #[test]
    fn folded_continuation_line_does_not_touch_body_bytes() {
        let mut buf = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\n abcd".to_vec();
        match parse_head(&mut buf, 16) {
            ParseOutcome::Complete { consumed, .. } => {
                assert_eq!(&buf[consumed..], b" abcd");
            }
            _ => panic!("expected Complete"),
        }
    }

    #[test]
    fn cookie_header_kept_as_request_header_and_split_into_crumbs() {
        let mut buf = b"GET / HTTP/1.1\r\nCookie: a=1; b=2\r\n\r\n".to_vec();
        match parse_head(&mut buf, 16) {
            ParseOutcome::Complete { parsed, .. } => {
                let whole = parsed.headers.find(HeaderKind::Request, "Cookie", &buf).unwrap();
                assert_eq!(whole.resolve_str(&buf), "a=1; b=2");

                let a = parsed.headers.find(HeaderKind::Cookie, "a", &buf).unwrap();
                assert_eq!(a.resolve_str(&buf), "1");
                let b = parsed.headers.find(HeaderKind::Cookie, "b", &buf).unwrap();
                assert_eq!(b.resolve_str(&buf), "2");
            }
            _ => panic!("expected Complete"),
        }
    }

    #[test]
    fn query_string_percent_decoded_and_semicolons_treated_as_separators() {
        let pairs: Vec<(String, String)> = query_pairs("a=%26&b=c;d=e").collect();
        assert_eq!(pairs, vec![("a".into(), "&".into()), ("b".into(), "c".into()), ("d".into(), "e".into())]);
    }
}
