// Copyright (c) 2017 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The `select(2)` backend (§4.5): libmicrohttpd's original, most portable
//! polling strategy, and the one most bounded by `FD_SETSIZE` — callers that
//! expect more than 1024 concurrent connections should prefer `poll` or
//! `epoll`.

use super::backend::{Interest, ReadinessBackend, ReadyEvent};
use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub struct SelectBackend {
    watched: HashMap<RawFd, (usize, Interest)>,
}

impl SelectBackend {
    pub fn new() -> SelectBackend {
        SelectBackend { watched: HashMap::new() }
    }
}

impl Default for SelectBackend {
    fn default() -> SelectBackend {
        SelectBackend::new()
    }
}

/// Sets bit `fd` in `set`, viewing the POSIX `fd_set` as a flat byte array.
/// This matches glibc's little-endian `unsigned long[]` layout; it's the
/// same assumption libmicrohttpd's own `MHD_socket_` select fallback makes.
fn fd_set_bit(set: &mut libc::fd_set, fd: RawFd) {
    let bytes: &mut [u8] = unsafe {
        std::slice::from_raw_parts_mut(set as *mut _ as *mut u8, mem::size_of::<libc::fd_set>())
    };
    let fd = fd as usize;
    bytes[fd / 8] |= 1 << (fd % 8);
}

fn fd_set_is_set(set: &libc::fd_set, fd: RawFd) -> bool {
    let bytes: &[u8] = unsafe { std::slice::from_raw_parts(set as *const _ as *const u8, mem::size_of::<libc::fd_set>()) };
    let fd = fd as usize;
    bytes[fd / 8] & (1 << (fd % 8)) != 0
}

impl ReadinessBackend for SelectBackend {
    fn register(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        if fd as usize >= libc::FD_SETSIZE {
            return Err(io::Error::new(io::ErrorKind::Other, "fd exceeds FD_SETSIZE for the select backend"));
        }
        self.watched.insert(fd, (token, interest));
        Ok(())
    }

    fn reregister(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.register(fd, token, interest)
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.watched.remove(&fd);
        Ok(())
    }

    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<ReadyEvent>) -> io::Result<()> {
        if self.watched.is_empty() {
            if let Some(t) = timeout {
                std::thread::sleep(t);
            }
            return Ok(());
        }

        let mut read_set: libc::fd_set = unsafe { mem::zeroed() };
        let mut write_set: libc::fd_set = unsafe { mem::zeroed() };
        let mut max_fd: RawFd = 0;

        for (&fd, &(_, interest)) in self.watched.iter() {
            if matches!(interest, Interest::Read | Interest::Both) {
                fd_set_bit(&mut read_set, fd);
            }
            if matches!(interest, Interest::Write | Interest::Both) {
                fd_set_bit(&mut write_set, fd);
            }
            max_fd = max_fd.max(fd);
        }

        let mut tv;
        let tv_ptr = match timeout {
            Some(d) => {
                tv = libc::timeval { tv_sec: d.as_secs() as libc::time_t, tv_usec: d.subsec_micros() as libc::suseconds_t };
                &mut tv as *mut libc::timeval
            }
            None => std::ptr::null_mut(),
        };

        let rc = unsafe {
            libc::select(max_fd + 1, &mut read_set, &mut write_set, std::ptr::null_mut(), tv_ptr)
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        for (&fd, &(token, _)) in self.watched.iter() {
            let readable = fd_set_is_set(&read_set, fd);
            let writable = fd_set_is_set(&write_set, fd);
            if readable || writable {
                out.push(ReadyEvent { token, readable, writable });
            }
        }
        Ok(())
    }
}
