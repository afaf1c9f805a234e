// Copyright (c) 2016 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The response model (§3, §4.3): a refcounted, shareable producer of
//! status/headers/body.

use std::borrow::Cow;
use std::fs::File;
use std::io;
use std::io::Read;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Outcome of pulling more bytes from a [`ResponseBody::Callback`] source
/// (§4.4 "Body emission"): `crc` returning `-1`/`-2` in the original design
/// becomes this three-way enum.
pub enum CallbackOutcome {
    /// `n` fresh bytes are now available at the front of the caller-supplied
    /// buffer.
    Data(usize),
    /// No more data will ever come; the body is complete.
    EndOfStream,
    /// The source failed; the connection must be force-closed.
    Error,
}

/// A response body's data source.
pub enum ResponseBody {
    /// An owned, in-memory buffer (§4.3 `from_buffer`: the `must-copy`/
    /// `must-free` ownership modes collapse to this, since Rust's ownership
    /// makes the "who frees it" distinction moot once the `Vec` is moved in).
    Buffer(Vec<u8>),
    /// A buffer shared across responses that outlive a single queuing
    /// (§4.3 `from_buffer`'s `persistent` ownership mode).
    Shared(Arc<[u8]>),
    /// A pull-based streaming source: `total_size` (if known in advance) and
    /// a closure invoked to refill a caller buffer, matching `from_callback`.
    Callback {
        total_size: Option<u64>,
        pull: Box<dyn FnMut(&mut [u8]) -> CallbackOutcome + Send>,
    },
    /// A file descriptor window: `(file, offset, size)` per `from_fd`.
    Fd { file: File, offset: u64, size: u64 },
}

impl ResponseBody {
    pub fn empty() -> ResponseBody {
        ResponseBody::Buffer(Vec::new())
    }

    pub fn from_data<D: Into<Vec<u8>>>(data: D) -> ResponseBody {
        ResponseBody::Buffer(data.into())
    }

    pub fn from_string<S: Into<String>>(data: S) -> ResponseBody {
        ResponseBody::Buffer(data.into().into_bytes())
    }

    pub fn from_shared(data: Arc<[u8]>) -> ResponseBody {
        ResponseBody::Shared(data)
    }

    /// `total_size = None` forces chunked (HTTP/1.1) or connection-close
    /// (HTTP/1.0) framing, per §4.3.
    pub fn from_callback<F>(total_size: Option<u64>, pull: F) -> ResponseBody
    where
        F: FnMut(&mut [u8]) -> CallbackOutcome + Send + 'static,
    {
        ResponseBody::Callback { total_size, pull: Box::new(pull) }
    }

    pub fn from_file(file: File) -> io::Result<ResponseBody> {
        let size = file.metadata()?.len();
        Ok(ResponseBody::Fd { file, offset: 0, size })
    }

    pub fn from_file_range(file: File, offset: u64, size: u64) -> ResponseBody {
        ResponseBody::Fd { file, offset, size }
    }

    /// The content length if known without consuming the body, per §4.3's
    /// `total_size = unknown` framing rule.
    pub fn known_size(&self) -> Option<u64> {
        match self {
            ResponseBody::Buffer(b) => Some(b.len() as u64),
            ResponseBody::Shared(b) => Some(b.len() as u64),
            ResponseBody::Callback { total_size, .. } => *total_size,
            ResponseBody::Fd { size, .. } => Some(*size),
        }
    }
}

/// Shared, refcounted response state (§3 "Response"). Cloning a [`Response`]
/// bumps the refcount; the last drop runs the termination callback.
pub struct Response {
    inner: Arc<Inner>,
}

struct Inner {
    status_code: AtomicU16,
    headers: Vec<(Cow<'static, str>, Cow<'static, str>)>,
    body: Mutex<Option<ResponseBody>>,
    refcount: AtomicUsize,
    termination: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Response {
    pub fn new(status_code: u16, headers: Vec<(Cow<'static, str>, Cow<'static, str>)>, body: ResponseBody) -> Response {
        Response {
            inner: Arc::new(Inner {
                status_code: AtomicU16::new(status_code),
                headers,
                body: Mutex::new(Some(body)),
                refcount: AtomicUsize::new(1),
                termination: Mutex::new(None),
            }),
        }
    }

    pub fn status_code(&self) -> u16 {
        self.inner.status_code.load(Ordering::SeqCst)
    }

    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status_code())
    }

    pub fn is_error(&self) -> bool {
        !self.is_success()
    }

    pub fn headers(&self) -> &[(Cow<'static, str>, Cow<'static, str>)] {
        &self.inner.headers
    }

    /// Registers a callback invoked when the last reference to this response
    /// is dropped (§4.3 "Refcount... zero triggers body-source free").
    pub fn on_termination<F: FnOnce() + Send + 'static>(&self, f: F) {
        *self.inner.termination.lock().unwrap() = Some(Box::new(f));
    }

    /// Takes ownership of the body source, leaving `None` behind. Valid to
    /// call exactly once per queuing, from the connection that is about to
    /// transmit this response.
    pub fn take_body(&self) -> Option<ResponseBody> {
        self.inner.body.lock().unwrap().take()
    }

    pub fn known_size(&self) -> Option<u64> {
        self.inner.body.lock().unwrap().as_ref().and_then(ResponseBody::known_size)
    }

    /// Current refcount, for the invariant in SPEC_FULL.md §8:
    /// `refcount == (#requests referencing) + (#application holders)`.
    pub fn refcount(&self) -> usize {
        self.inner.refcount.load(Ordering::SeqCst)
    }

    pub fn text<S: Into<String>>(text: S) -> Response {
        Response::new(
            200,
            vec![("Content-Type".into(), "text/plain; charset=utf-8".into())],
            ResponseBody::from_string(text),
        )
    }

    pub fn html<S: Into<String>>(html: S) -> Response {
        Response::new(
            200,
            vec![("Content-Type".into(), "text/html; charset=utf-8".into())],
            ResponseBody::from_string(html),
        )
    }

    pub fn empty_400() -> Response {
        Response::new(400, vec![], ResponseBody::empty())
    }

    pub fn empty_404() -> Response {
        Response::new(404, vec![], ResponseBody::empty())
    }

    pub fn empty_413() -> Response {
        Response::new(413, vec![], ResponseBody::empty())
    }

    pub fn empty_431() -> Response {
        Response::new(431, vec![], ResponseBody::empty())
    }

    pub fn empty_500() -> Response {
        Response::new(500, vec![], ResponseBody::empty())
    }

    pub fn empty_503() -> Response {
        Response::new(503, vec![], ResponseBody::empty())
    }

    pub fn with_status_code(self, code: u16) -> Response {
        self.inner.status_code.store(code, Ordering::SeqCst);
        self
    }
}

impl Clone for Response {
    fn clone(&self) -> Response {
        self.inner.refcount.fetch_add(1, Ordering::SeqCst);
        Response { inner: self.inner.clone() }
    }
}

impl Drop for Response {
    fn drop(&mut self) {
        if self.inner.refcount.fetch_sub(1, Ordering::SeqCst) == 1 {
            if let Some(f) = self.inner.termination.lock().unwrap().take() {
                f();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_range_is_200_to_399() {
        assert!(Response::new(200, vec![], ResponseBody::empty()).is_success());
        assert!(Response::new(399, vec![], ResponseBody::empty()).is_success());
        assert!(Response::empty_404().is_error());
    }

    #[test]
    fn clone_bumps_refcount_drop_decrements() {
        let r1 = Response::text("hi");
        assert_eq!(r1.refcount(), 1);
        let r2 = r1.clone();
        assert_eq!(r1.refcount(), 2);
        drop(r2);
        assert_eq!(r1.refcount(), 1);
    }

    #[test]
    fn termination_callback_runs_on_last_drop() {
        use std::sync::atomic::AtomicBool;
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();

        let r1 = Response::empty_404();
        r1.on_termination(move || fired2.store(true, Ordering::SeqCst));
        let r2 = r1.clone();

        drop(r1);
        assert!(!fired.load(Ordering::SeqCst));
        drop(r2);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn unknown_size_callback_forces_chunked_framing_decision_upstream() {
        let body = ResponseBody::from_callback(None, |_buf| CallbackOutcome::EndOfStream);
        assert_eq!(body.known_size(), None);
    }

    #[test]
    fn take_body_is_one_shot() {
        let r = Response::text("hi");
        assert!(r.take_body().is_some());
        assert!(r.take_body().is_none());
    }
}
