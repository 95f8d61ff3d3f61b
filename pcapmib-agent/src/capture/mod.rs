//! Capture collaborators
//!
//! A [`CaptureBackend`] opens [`CaptureHandle`]s on devices. A handle is
//! switched to non-blocking mode, exposes a descriptor the event loop
//! watches for readability, and on each wakeup drains every frame that is
//! pending, reporting the on-wire length of each one.
//!
//! Backends:
//! - [`packet_socket`] - Linux `AF_PACKET` raw sockets (live capture)
//! - [`datagram`] - Unix datagram socket pairs fed by the caller

use crate::filter::Filter;
use std::io;
use std::os::fd::BorrowedFd;
use thiserror::Error;

pub mod datagram;
#[cfg(target_os = "linux")]
pub mod packet_socket;

/// Device name meaning "every interface"
pub const ANY_DEVICE: &str = "any";

/// Length of the link-layer header stripped from every counted frame
pub const ETHERNET_HEADER_LENGTH: u32 = 14;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no default capture device: {0}")]
    NoDefaultDevice(String),

    #[error("unknown capture device '{0}'")]
    UnknownDevice(String),

    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl CaptureError {
    pub(crate) fn io(op: &'static str, source: io::Error) -> Self {
        CaptureError::Io { op, source }
    }

    #[cfg(target_os = "linux")]
    pub(crate) fn last_os_error(op: &'static str) -> Self {
        CaptureError::Io {
            op,
            source: io::Error::last_os_error(),
        }
    }
}

/// Opens capture handles
pub trait CaptureBackend {
    type Handle: CaptureHandle;

    /// Device used when a monitor does not name one
    fn default_device(&self) -> Result<String, CaptureError>;

    /// Open a capture on `device`
    fn open(&self, device: &str) -> Result<Self::Handle, CaptureError>;
}

/// An open capture on one device
///
/// Dropping the handle releases it.
pub trait CaptureHandle {
    /// Only report frames accepted by `filter` from now on
    fn attach_filter(&mut self, filter: Filter) -> Result<(), CaptureError>;

    fn set_nonblocking(&mut self) -> Result<(), CaptureError>;

    /// Descriptor that becomes readable when frames are pending
    fn selectable_fd(&self) -> Result<BorrowedFd<'_>, CaptureError>;

    /// Report the length of every frame pending right now
    ///
    /// Returns the number of frames reported. Frames reported before an
    /// error stay reported.
    fn drain(&mut self, on_frame: &mut dyn FnMut(u32)) -> Result<usize, CaptureError>;
}

/// True for the errno values meaning "nothing more to read right now"
pub(crate) fn is_would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}
