// Copyright (c) 2017 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Decodes the body of an incoming request in place, per §4.2's "Body
//! framing" and "Chunked decoder" rules.
//!
//! The chunked state machine mirrors the three named phases of §4.2:
//! *need-size-line*, *in-chunk*, *need-trailer-crlf* (the CRLF that RFC 7230
//! §4.1 requires after every chunk's data, before the next size line or, for
//! the terminal zero-size chunk, before the footer block starts).

use atoi::atoi;
use std::cmp;

pub struct BodyAnalyzer {
    inner: Inner,
}

enum Inner {
    ContentLength { remaining: u64 },
    Chunked { phase: ChunkPhase },
    Empty,
}

enum ChunkPhase {
    NeedSizeLine,
    InChunk { remaining: usize },
    NeedTrailerCrlf { was_terminal: bool },
    Done,
}

/// How the body should be framed, decided once right after `HEADERS_RECEIVED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    ContentLength(u64),
    Chunked,
    Empty,
}

/// Raised when the request announces an unparseable or self-contradictory
/// framing (§4.2 "Invalid combinations... ⇒ 400").
#[derive(Debug)]
pub struct FramingError;

/// Inspects `Transfer-Encoding`/`Content-Length` header values and decides
/// how the body is framed.
pub fn decide_framing(transfer_encoding: Option<&str>, content_length: Option<&str>) -> Result<Framing, FramingError> {
    let chunked = transfer_encoding
        .map(|v| v.trim().to_ascii_lowercase().ends_with("chunked"))
        .unwrap_or(false);

    match (chunked, content_length) {
        (true, None) => Ok(Framing::Chunked),
        // Transfer-Encoding: chunked takes priority over Content-Length per
        // RFC 7230 §3.3.3, but a well-formed implementation doesn't silently
        // ignore a conflicting header: refuse rather than guess (§4.2).
        (true, Some(_)) => Err(FramingError),
        (false, Some(raw)) => {
            let len: u64 = atoi(raw.trim().as_bytes()).ok_or(FramingError)?;
            Ok(Framing::ContentLength(len))
        }
        (false, None) => Ok(Framing::Empty),
    }
}

impl BodyAnalyzer {
    pub fn new(framing: Framing) -> BodyAnalyzer {
        BodyAnalyzer {
            inner: match framing {
                Framing::ContentLength(len) => Inner::ContentLength { remaining: len },
                Framing::Chunked => Inner::Chunked { phase: ChunkPhase::NeedSizeLine },
                Framing::Empty => Inner::Empty,
            },
        }
    }

    /// Decodes `data` in place. The decoded form is always no larger than the
    /// input, so no separate buffer is needed.
    pub fn feed(&mut self, data: &mut [u8]) -> FeedOutcome {
        match self.inner {
            Inner::ContentLength { ref mut remaining } => {
                if (data.len() as u64) < *remaining {
                    *remaining -= data.len() as u64;
                    FeedOutcome { body_data: data.len(), unused_trailing: 0, finished: *remaining == 0 }
                } else {
                    let consumed = *remaining as usize;
                    *remaining = 0;
                    FeedOutcome { body_data: consumed, unused_trailing: 0, finished: true }
                }
            }

            Inner::Chunked { ref mut phase } => feed_chunked(phase, data),

            Inner::Empty => FeedOutcome { body_data: 0, unused_trailing: 0, finished: true },
        }
    }
}

fn feed_chunked(phase: &mut ChunkPhase, data: &mut [u8]) -> FeedOutcome {
    let mut body_data = 0;
    let mut unused_trailing = 0;

    loop {
        let cursor = body_data + unused_trailing;
        match phase {
            ChunkPhase::NeedSizeLine => match try_read_chunk_size(&data[cursor..]) {
                Some((consumed, 0)) => {
                    unused_trailing += consumed;
                    *phase = ChunkPhase::NeedTrailerCrlf { was_terminal: true };
                }
                Some((consumed, size)) => {
                    unused_trailing += consumed;
                    *phase = ChunkPhase::InChunk { remaining: size };
                }
                None => return FeedOutcome { body_data, unused_trailing, finished: false },
            },

            ChunkPhase::InChunk { remaining } => {
                let available = data.len() - cursor;
                if available == 0 {
                    return FeedOutcome { body_data, unused_trailing, finished: false };
                }
                let copy_len = cmp::min(available, *remaining);
                if unused_trailing != 0 {
                    // Shift the live body bytes down over the framing bytes
                    // (size line, previous chunk's trailer CRLF) skipped so far.
                    for n in 0..copy_len {
                        data[body_data + n] = data[cursor + n];
                    }
                }
                body_data += copy_len;
                *remaining -= copy_len;
                if *remaining == 0 {
                    *phase = ChunkPhase::NeedTrailerCrlf { was_terminal: false };
                } else {
                    return FeedOutcome { body_data, unused_trailing, finished: false };
                }
            }

            ChunkPhase::NeedTrailerCrlf { was_terminal } => {
                let rest = &data[body_data + unused_trailing..];
                if rest.len() < 2 {
                    return FeedOutcome { body_data, unused_trailing, finished: false };
                }
                if &rest[..2] != b"\r\n" {
                    return FeedOutcome { body_data, unused_trailing, finished: false };
                }
                unused_trailing += 2;
                if *was_terminal {
                    *phase = ChunkPhase::Done;
                    return FeedOutcome { body_data, unused_trailing, finished: true };
                }
                *phase = ChunkPhase::NeedSizeLine;
            }

            ChunkPhase::Done => return FeedOutcome { body_data, unused_trailing, finished: true },
        }
    }
}

pub struct FeedOutcome {
    /// Bytes from the start of the buffer that are decoded body content.
    pub body_data: usize,
    /// Bytes right after `body_data` that are framing overhead to discard.
    pub unused_trailing: usize,
    /// True once the body (and, for chunked, the terminal zero-chunk plus
    /// its trailer CRLF) is complete.
    pub finished: bool,
}

fn try_read_chunk_size(data: &[u8]) -> Option<(usize, usize)> {
    // A chunk size line is hex digits, optionally followed by `;extension`,
    // terminated by CRLF (§4.2).
    let crlf_pos = data.windows(2).position(|w| w == b"\r\n")?;
    let size_part = match data[..crlf_pos].iter().position(|&b| b == b';') {
        Some(semi) => &data[..semi],
        None => &data[..crlf_pos],
    };
    let chunk_size = usize::from_str_radix(std::str::from_utf8(size_part).ok()?.trim(), 16).ok()?;
    Some((crlf_pos + 2, chunk_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_length_framing() {
        assert_eq!(decide_framing(None, Some("42")).unwrap(), Framing::ContentLength(42));
    }

    #[test]
    fn chunked_framing_wins_and_rejects_conflicting_length() {
        assert_eq!(decide_framing(Some("chunked"), None).unwrap(), Framing::Chunked);
        assert!(decide_framing(Some("chunked"), Some("10")).is_err());
    }

    #[test]
    fn no_headers_means_empty_body() {
        assert_eq!(decide_framing(None, None).unwrap(), Framing::Empty);
    }

    #[test]
    fn malformed_content_length_is_an_error() {
        assert!(decide_framing(None, Some("not-a-number")).is_err());
    }

    #[test]
    fn chunked_decode_full_body_in_one_feed() {
        // SPEC_FULL.md §8 scenario 4.
        let mut analyzer = BodyAnalyzer::new(Framing::Chunked);
        let mut buffer = b"5\r\nHello\r\n6\r\n World\r\n0\r\n\r\n".to_vec();
        let outcome = analyzer.feed(&mut buffer);

        assert!(outcome.finished);
        assert_eq!(outcome.body_data, 11);
        assert_eq!(&buffer[..5], b"Hello");
    }

    // `feed`'s contract: of the slice passed in, `[0, body_data+unused_trailing)`
    // is now fully processed (decoded or discarded) and may be dropped by the
    // caller; everything from `body_data+unused_trailing` onward was *not*
    // examined and must be carried forward verbatim, prefixed onto whatever
    // arrives on the next `recv()` (§4.2), exactly as `connection::idle_step`
    // carries forward a read buffer's unparsed tail.
    #[test]
    fn chunked_decode_split_mid_chunk_body() {
        // The first recv() ends mid chunk-body ("Wor" of "World"): every raw
        // byte is nonetheless fully accounted for (copied to body_data),
        // so the next recv() arrives as an unrelated fresh slice.
        let mut analyzer = BodyAnalyzer::new(Framing::Chunked);

        let mut first = b"5\r\nHello\r\n6\r\n Wor".to_vec();
        let outcome1 = analyzer.feed(&mut first);
        assert!(!outcome1.finished);
        assert_eq!(outcome1.body_data + outcome1.unused_trailing, first.len());
        assert_eq!(&first[..outcome1.body_data], b"Hello Wor");

        let mut second = b"ld\r\n0\r\n\r\n".to_vec();
        let outcome2 = analyzer.feed(&mut second);
        assert!(outcome2.finished);
        assert_eq!(&second[..outcome2.body_data], b"ld");
    }

    #[test]
    fn chunked_decode_split_mid_size_line() {
        // The first recv() ends mid chunk-size-line ("5\r" of "5\r\n"): those
        // two bytes are unexamined and must be carried forward.
        let mut analyzer = BodyAnalyzer::new(Framing::Chunked);
        let mut buffer = b"5\r".to_vec();
        let outcome1 = analyzer.feed(&mut buffer);
        assert!(!outcome1.finished);
        assert_eq!(outcome1.body_data + outcome1.unused_trailing, 0);

        buffer.extend_from_slice(b"\nHello\r\n0\r\n\r\n");
        let outcome2 = analyzer.feed(&mut buffer);
        assert!(outcome2.finished);
        assert_eq!(&buffer[..outcome2.body_data], b"Hello");
    }

    #[test]
    fn content_length_zero_finishes_immediately() {
        let mut analyzer = BodyAnalyzer::new(Framing::ContentLength(0));
        let mut buffer: Vec<u8> = Vec::new();
        let outcome = analyzer.feed(&mut buffer);
        assert!(outcome.finished);
        assert_eq!(outcome.body_data, 0);
    }
}
