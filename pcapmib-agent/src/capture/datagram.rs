//! Capture backend over Unix datagram socket pairs
//!
//! Every handle opened on a device is one end of a socket pair; the backend
//! keeps the other end, and each datagram written through
//! [`DatagramBackend::inject`] is one captured frame on that device. This
//! drives the agent through the same readiness path as live capture, without
//! needing an interface or privileges.
//!
//! Devices can be told to fail at a given construction step with
//! [`DatagramBackend::fail`], and [`DatagramBackend::live_handles`] tells how
//! many handles have not been released yet.

use super::{is_would_block, CaptureBackend, CaptureError, CaptureHandle};
use crate::filter::Filter;
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixDatagram;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const RECV_BUFFER_SIZE: usize = 65536;

/// Construction or capture step at which a device's handles fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Open,
    AttachFilter,
    NonBlocking,
    Descriptor,
    /// Hand out a descriptor the reactor refuses to watch
    Watch,
    /// Report the first pending frame, then fail
    Drain,
}

#[derive(Default)]
struct State {
    default_device: Option<String>,
    failing: HashMap<String, FailAt>,
    peers: HashMap<String, Vec<UnixDatagram>>,
}

/// Capture backend fed by the caller
#[derive(Clone, Default)]
pub struct DatagramBackend {
    state: Arc<Mutex<State>>,
    live: Arc<AtomicUsize>,
}

impl DatagramBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device returned by [`CaptureBackend::default_device`]
    pub fn with_default_device(self, device: &str) -> Self {
        self.state().default_device = Some(device.to_string());
        self
    }

    /// Make every handle on `device` fail at `step`
    pub fn fail(&self, device: &str, step: FailAt) {
        self.state().failing.insert(device.to_string(), step);
    }

    /// Deliver one frame to every open handle on `device`
    ///
    /// Returns how many handles received it. A handle whose queue is full
    /// misses the frame, like a capture buffer overflowing.
    pub fn inject(&self, device: &str, frame: &[u8]) -> usize {
        let mut state = self.state();
        let Some(peers) = state.peers.get_mut(device) else {
            return 0;
        };

        let mut delivered = 0;
        peers.retain(|peer| match peer.send(frame) {
            Ok(_) => {
                delivered += 1;
                true
            }
            Err(e) => is_would_block(&e),
        });
        delivered
    }

    /// Deliver a zero-filled frame of `len` bytes
    pub fn inject_len(&self, device: &str, len: usize) -> usize {
        self.inject(device, &vec![0u8; len])
    }

    /// Handles opened and not yet dropped
    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CaptureBackend for DatagramBackend {
    type Handle = DatagramHandle;

    fn default_device(&self) -> Result<String, CaptureError> {
        self.state()
            .default_device
            .clone()
            .ok_or_else(|| CaptureError::NoDefaultDevice("no device registered".to_string()))
    }

    fn open(&self, device: &str) -> Result<DatagramHandle, CaptureError> {
        let mut state = self.state();
        let fail_at = state.failing.get(device).copied();
        if fail_at == Some(FailAt::Open) {
            return Err(CaptureError::UnknownDevice(device.to_string()));
        }

        // epoll rejects character devices without poll support
        let unwatchable = match fail_at {
            Some(FailAt::Watch) => {
                Some(File::open("/dev/null").map_err(|e| CaptureError::io("open", e))?)
            }
            _ => None,
        };

        let (socket, peer) = UnixDatagram::pair().map_err(|e| CaptureError::io("socketpair", e))?;
        peer.set_nonblocking(true)
            .map_err(|e| CaptureError::io("set_nonblocking", e))?;
        state.peers.entry(device.to_string()).or_default().push(peer);

        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(DatagramHandle {
            socket,
            unwatchable,
            filter: None,
            fail_at,
            buffer: vec![0u8; RECV_BUFFER_SIZE],
            live: Arc::clone(&self.live),
        })
    }
}

/// Receiving end of a datagram capture
pub struct DatagramHandle {
    socket: UnixDatagram,
    unwatchable: Option<File>,
    filter: Option<Filter>,
    fail_at: Option<FailAt>,
    buffer: Vec<u8>,
    live: Arc<AtomicUsize>,
}

impl DatagramHandle {
    fn injected_failure(&self, step: FailAt, op: &'static str) -> Result<(), CaptureError> {
        if self.fail_at == Some(step) {
            return Err(CaptureError::io(
                op,
                io::Error::new(io::ErrorKind::Other, "injected failure"),
            ));
        }
        Ok(())
    }
}

impl CaptureHandle for DatagramHandle {
    fn attach_filter(&mut self, filter: Filter) -> Result<(), CaptureError> {
        self.injected_failure(FailAt::AttachFilter, "attach_filter")?;
        self.filter = Some(filter);
        Ok(())
    }

    fn set_nonblocking(&mut self) -> Result<(), CaptureError> {
        self.injected_failure(FailAt::NonBlocking, "set_nonblocking")?;
        self.socket
            .set_nonblocking(true)
            .map_err(|e| CaptureError::io("set_nonblocking", e))
    }

    fn selectable_fd(&self) -> Result<BorrowedFd<'_>, CaptureError> {
        self.injected_failure(FailAt::Descriptor, "selectable_fd")?;
        match &self.unwatchable {
            Some(file) => Ok(file.as_fd()),
            None => Ok(self.socket.as_fd()),
        }
    }

    fn drain(&mut self, on_frame: &mut dyn FnMut(u32)) -> Result<usize, CaptureError> {
        let mut reported = 0;
        loop {
            let len = match self.socket.recv(&mut self.buffer) {
                Ok(len) => len,
                Err(e) if is_would_block(&e) => return Ok(reported),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CaptureError::io("recv", e)),
            };

            let frame = &self.buffer[..len];
            if self.filter.as_ref().is_some_and(|f| !f.matches(frame)) {
                continue;
            }

            on_frame(len as u32);
            reported += 1;

            if self.fail_at == Some(FailAt::Drain) {
                return Err(CaptureError::io(
                    "recv",
                    io::Error::new(io::ErrorKind::Other, "injected failure"),
                ));
            }
        }
    }
}

impl Drop for DatagramHandle {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
