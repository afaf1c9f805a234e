// Copyright (c) 2017 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The twenty-state connection FSM (§4.4).
//!
//! This module only holds the state tag and the pure predicates/transitions
//! that don't need socket access; the actual idle-step loop that drives
//! bytes through these states lives in `connection.rs`, the same split
//! `http1.rs` draws between its `Http1HandlerState` enum and the
//! `Http1Handler::update` loop that advances it with `mem::replace`.

/// What the reactor should next poll this connection for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLoopInfo {
    Read,
    Write,
    Block,
    Cleanup,
}

/// The keep-alive decision, computed once at `FootersReceived` and never
/// raised back up once lowered to `MustClose` (§4.4 "Keep-alive decision").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keepalive {
    Unknown,
    KeepAlive,
    MustClose,
}

impl Keepalive {
    pub fn lower_to(self, other: Keepalive) -> Keepalive {
        match (self, other) {
            (Keepalive::MustClose, _) | (_, Keepalive::MustClose) => Keepalive::MustClose,
            (Keepalive::KeepAlive, _) | (_, Keepalive::KeepAlive) => Keepalive::KeepAlive,
            _ => Keepalive::Unknown,
        }
    }
}

/// One HTTP transaction's position in the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Init,
    UrlReceived,
    HeaderPartReceived,
    HeadersReceived,
    HeadersProcessed,
    ContinueSending,
    ContinueSent,
    BodyReceived,
    FooterPartReceived,
    FootersReceived,
    HeadersSending,
    HeadersSent,
    NormalBodyReady,
    NormalBodyUnready,
    ChunkedBodyReady,
    ChunkedBodyUnready,
    BodySent,
    FootersSending,
    FootersSent,
    Closed,
    InCleanup,
}

impl ConnState {
    /// True for states that read from the socket.
    pub fn is_reading(self) -> bool {
        matches!(
            self,
            ConnState::Init
                | ConnState::UrlReceived
                | ConnState::HeaderPartReceived
                | ConnState::HeadersReceived
                | ConnState::ContinueSent
                | ConnState::BodyReceived
                | ConnState::FooterPartReceived
        )
    }

    /// True for states that write to the socket.
    pub fn is_writing(self) -> bool {
        matches!(
            self,
            ConnState::ContinueSending
                | ConnState::HeadersSending
                | ConnState::HeadersSent
                | ConnState::NormalBodyReady
                | ConnState::ChunkedBodyReady
                | ConnState::BodySent
                | ConnState::FootersSending
        )
    }

    /// States that are waiting on application-side work rather than I/O
    /// (the handler producing a response, or a streaming callback refilling
    /// its buffer) map to `Block` rather than `Read`/`Write`.
    pub fn event_loop_info(self) -> EventLoopInfo {
        match self {
            ConnState::Closed | ConnState::InCleanup => EventLoopInfo::Cleanup,
            ConnState::HeadersProcessed | ConnState::FootersReceived | ConnState::NormalBodyUnready | ConnState::ChunkedBodyUnready => {
                EventLoopInfo::Block
            }
            s if s.is_reading() => EventLoopInfo::Read,
            s if s.is_writing() => EventLoopInfo::Write,
            ConnState::FootersSent => EventLoopInfo::Block,
            _ => EventLoopInfo::Block,
        }
    }

    /// The state following a full keep-alive reset, or `Closed` if the
    /// connection must not be reused.
    pub fn after_footers_sent(keepalive: Keepalive) -> ConnState {
        match keepalive {
            Keepalive::KeepAlive => ConnState::Init,
            _ => ConnState::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn must_close_is_sticky() {
        assert_eq!(Keepalive::MustClose.lower_to(Keepalive::KeepAlive), Keepalive::MustClose);
        assert_eq!(Keepalive::KeepAlive.lower_to(Keepalive::MustClose), Keepalive::MustClose);
    }

    #[test]
    fn keepalive_wins_over_unknown() {
        assert_eq!(Keepalive::Unknown.lower_to(Keepalive::KeepAlive), Keepalive::KeepAlive);
    }

    #[test]
    fn footers_sent_transitions_to_init_or_closed() {
        assert_eq!(ConnState::after_footers_sent(Keepalive::KeepAlive), ConnState::Init);
        assert_eq!(ConnState::after_footers_sent(Keepalive::MustClose), ConnState::Closed);
        assert_eq!(ConnState::after_footers_sent(Keepalive::Unknown), ConnState::Closed);
    }

    #[test]
    fn reading_and_writing_states_are_disjoint() {
        for state in [
            ConnState::Init,
            ConnState::UrlReceived,
            ConnState::HeadersSending,
            ConnState::NormalBodyReady,
            ConnState::Closed,
        ] {
            assert!(!(state.is_reading() && state.is_writing()));
        }
    }

    #[test]
    fn closed_and_cleanup_map_to_cleanup_event() {
        assert_eq!(ConnState::Closed.event_loop_info(), EventLoopInfo::Cleanup);
        assert_eq!(ConnState::InCleanup.event_loop_info(), EventLoopInfo::Cleanup);
    }
}
