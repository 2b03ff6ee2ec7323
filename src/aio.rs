//! Asynchronous page-aligned block I/O.
//!
//! A thin submit/poll layer over `io_uring`. Every request owns exactly one
//! page-aligned [`PageBuf`] for its lifetime: reads allocate their buffer at
//! submit, writes take ownership of the caller's, and [`IoContext::poll`]
//! hands the buffer back with the completion. A request that fails to queue
//! releases its buffer immediately and surfaces the OS error as
//! [`Error::IoSubmit`].
//!
//! The context is single-threaded: submissions from concurrent threads must
//! be externally serialized. `submit_*` may block briefly flushing a full
//! submission queue; `poll` never blocks (it only drains completions that
//! have already landed). The layer imposes no ordering between in-flight
//! requests — callers that need phases (the two-phase stripe rewrite) only
//! submit phase 2 after `poll` has reported every phase-1 completion.

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::ops::{Deref, DerefMut};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr::NonNull;

use io_uring::{opcode, types, IoUring};
use tracing::{debug, trace};

use crate::{Error, Result};

/// I/O unit: one 4 KiB page, the size of one block.
pub const PAGE_SIZE: usize = crate::block::BLOCK_SIZE;

/// An owned buffer aligned to [`PAGE_SIZE`], as direct I/O requires.
pub struct PageBuf {
    ptr: NonNull<u8>,
    len: usize,
}

// The buffer is uniquely owned heap memory.
unsafe impl Send for PageBuf {}

impl PageBuf {
    /// Allocate a zeroed buffer of `num_pages` pages.
    pub fn new(num_pages: usize) -> Self {
        assert!(num_pages > 0, "empty page buffer");
        let len = num_pages * PAGE_SIZE;
        let layout = Layout::from_size_align(len, PAGE_SIZE).expect("page-aligned layout");
        let ptr = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            handle_alloc_error(layout);
        };
        Self { ptr, len }
    }

    pub fn num_pages(&self) -> usize {
        self.len / PAGE_SIZE
    }
}

impl Deref for PageBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for PageBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for PageBuf {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.len, PAGE_SIZE).expect("page-aligned layout");
        unsafe { dealloc(self.ptr.as_ptr(), layout) };
    }
}

impl std::fmt::Debug for PageBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageBuf")
            .field("num_pages", &self.num_pages())
            .finish()
    }
}

/// Direction of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    Read,
    Write,
}

struct InFlight {
    kind: IoKind,
    start_page: u64,
    num_pages: usize,
    buf: PageBuf,
}

/// A drained request, buffer ownership returned to the caller.
#[derive(Debug)]
pub struct Completion {
    /// Token the matching `submit_*` call returned.
    pub token: u64,
    pub kind: IoKind,
    pub start_page: u64,
    pub num_pages: usize,
    pub buffer: PageBuf,
    /// `Err(IoComplete)` carries the kernel's error for this request;
    /// short transfers are reported the same way.
    pub result: Result<()>,
}

/// Owner of the ring and of every in-flight request.
///
/// There is no cancellation: a dropped context drains whatever is still in
/// flight before releasing the buffers, since the kernel may touch them
/// until their completions land.
pub struct IoContext {
    ring: IoUring,
    in_flight: HashMap<u64, InFlight>,
    next_token: u64,
}

impl IoContext {
    /// Set up a ring with `entries` submission slots.
    pub fn new(entries: u32) -> Result<Self> {
        let ring = IoUring::new(entries).map_err(Error::IoSubmit)?;
        Ok(Self {
            ring,
            in_flight: HashMap::new(),
            next_token: 0,
        })
    }

    /// Number of requests submitted but not yet drained.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Queue a read of `num_pages` pages at page offset `start_page` into a
    /// freshly allocated buffer. Returns the completion-matching token.
    pub fn submit_read(&mut self, file: &File, start_page: u64, num_pages: usize) -> Result<u64> {
        self.submit(file, start_page, PageBuf::new(num_pages), IoKind::Read)
    }

    /// Queue a write of `buf` at page offset `start_page`, taking ownership
    /// of the buffer until completion. Returns the completion-matching
    /// token; on queue failure the buffer is released and the underlying
    /// error surfaced.
    pub fn submit_write(&mut self, file: &File, start_page: u64, buf: PageBuf) -> Result<u64> {
        self.submit(file, start_page, buf, IoKind::Write)
    }

    fn submit(
        &mut self,
        file: &File,
        start_page: u64,
        mut buf: PageBuf,
        kind: IoKind,
    ) -> Result<u64> {
        let token = self.next_token;
        let num_pages = buf.num_pages();
        let offset = start_page * PAGE_SIZE as u64;
        let fd = types::Fd(file.as_raw_fd());

        let entry = match kind {
            IoKind::Read => opcode::Read::new(fd, buf.as_mut_ptr(), buf.len() as u32)
                .offset(offset)
                .build()
                .user_data(token),
            IoKind::Write => opcode::Write::new(fd, buf.as_ptr(), buf.len() as u32)
                .offset(offset)
                .build()
                .user_data(token),
        };

        // SAFETY: the buffer the entry points at stays alive in
        // `in_flight` until the completion for `token` is drained.
        let pushed = unsafe { self.ring.submission().push(&entry).is_ok() };
        if !pushed {
            // Queue full: flush it and retry once.
            self.ring.submit().map_err(Error::IoSubmit)?;
            unsafe { self.ring.submission().push(&entry) }.map_err(|_| {
                Error::IoSubmit(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "submission queue full after flush",
                ))
            })?;
        }
        self.ring.submit().map_err(Error::IoSubmit)?;

        trace!(?kind, token, start_page, num_pages, "queued");
        self.next_token += 1;
        self.in_flight.insert(
            token,
            InFlight {
                kind,
                start_page,
                num_pages,
                buf,
            },
        );
        Ok(token)
    }

    /// Drain whatever completions have landed, without blocking.
    ///
    /// Each drained request is appended to `completions` with its buffer;
    /// the return value is the total pages completed successfully across
    /// the drained events. Per-request failures ride along in
    /// [`Completion::result`] rather than aborting the drain.
    pub fn poll(&mut self, completions: &mut Vec<Completion>) -> Result<usize> {
        if !self.in_flight.is_empty() {
            // Zero-wait enter: lets the kernel move any completions it had
            // to buffer past the ring's capacity back into the ring.
            self.ring.submit().map_err(Error::IoComplete)?;
        }
        let drained: Vec<(u64, i32)> = self
            .ring
            .completion()
            .map(|cqe| (cqe.user_data(), cqe.result()))
            .collect();

        let mut pages = 0;
        for (token, res) in drained {
            let Some(req) = self.in_flight.remove(&token) else {
                debug!(token, "completion for unknown request");
                continue;
            };

            let expected = (req.num_pages * PAGE_SIZE) as i32;
            let result = if res < 0 {
                Err(Error::IoComplete(io::Error::from_raw_os_error(-res)))
            } else if res != expected {
                Err(Error::IoComplete(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("short transfer: {res} of {expected} bytes"),
                )))
            } else {
                pages += req.num_pages;
                Ok(())
            };
            trace!(
                kind = ?req.kind,
                token,
                start_page = req.start_page,
                ok = result.is_ok(),
                "completed"
            );

            completions.push(Completion {
                token,
                kind: req.kind,
                start_page: req.start_page,
                num_pages: req.num_pages,
                buffer: req.buf,
                result,
            });
        }
        Ok(pages)
    }
}

impl Drop for IoContext {
    fn drop(&mut self) {
        // In-flight buffers must outlive kernel access: drain whatever is
        // still pending before the ring and the buffers go away.
        let mut discard = Vec::new();
        while !self.in_flight.is_empty() {
            if self.poll(&mut discard).is_err() {
                break;
            }
            std::hint::spin_loop();
        }
    }
}

impl std::fmt::Debug for IoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoContext")
            .field("in_flight", &self.in_flight.len())
            .field("next_token", &self.next_token)
            .finish()
    }
}

/// Open a volume file for direct I/O (`O_DIRECT`), creating it if asked.
///
/// Filesystems without direct-I/O support (tmpfs) reject the flag at open
/// or at first transfer; buffered files work with this layer too, direct
/// I/O is only required for production durability behavior.
pub fn open_direct(path: &Path, create: bool) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(create)
        .custom_flags(libc::O_DIRECT)
        .open(path)
        .map_err(Error::IoSubmit)
}
