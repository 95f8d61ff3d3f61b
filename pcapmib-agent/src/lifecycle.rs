//! Monitor construction
//!
//! Turns a [`MonitorDefinition`] into a live [`Monitor`] plus the readiness
//! stream the event loop watches for it. Each step either succeeds or
//! fails only this monitor; whatever was acquired before the failing step
//! is released on the way out.

use crate::capture::{CaptureBackend, CaptureError, CaptureHandle, ANY_DEVICE};
use crate::filter::{Filter, FilterError};
use crate::monitor::{Monitor, MonitorDefinition};
use crate::registry::RegistryError;
use futures::Stream;
use log::{debug, warn};
use std::io;
use std::os::fd::BorrowedFd;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

/// Yields once each time the watched descriptor turns readable
pub type ReadinessStream = Pin<Box<dyn Stream<Item = io::Result<()>> + Send>>;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("monitor index {0} is not a positive integer")]
    InvalidIndex(u32),

    #[error("monitor {index}: cannot open capture on '{device}': {source}")]
    CaptureOpen {
        index: u32,
        device: String,
        #[source]
        source: CaptureError,
    },

    #[error("monitor {index}: cannot compile filter '{filter}': {source}")]
    FilterCompile {
        index: u32,
        filter: String,
        #[source]
        source: FilterError,
    },

    #[error("monitor {index}: cannot attach filter: {source}")]
    FilterAttach {
        index: u32,
        #[source]
        source: CaptureError,
    },

    #[error("monitor {index}: cannot switch capture to non-blocking mode: {source}")]
    NonBlocking {
        index: u32,
        #[source]
        source: CaptureError,
    },

    #[error("monitor {index}: capture has no selectable descriptor: {source}")]
    Descriptor {
        index: u32,
        #[source]
        source: CaptureError,
    },

    #[error("monitor {index}: cannot watch capture descriptor: {source}")]
    WatcherRegistration {
        index: u32,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Resolve the capture device for a definition
///
/// An explicit device wins, then the backend's default; when neither is
/// available the capture listens on every interface.
pub fn resolve_device<B: CaptureBackend>(backend: &B, def: &MonitorDefinition) -> String {
    if let Some(device) = def.device() {
        return device.to_string();
    }
    match backend.default_device() {
        Ok(device) => device,
        Err(e) => {
            warn!(
                "monitor {}: {}; capturing on '{}'",
                def.index, e, ANY_DEVICE
            );
            ANY_DEVICE.to_string()
        }
    }
}

/// Open the capture for `def` and start watching it
///
/// The returned monitor is not registered yet; the caller inserts it and
/// keeps the stream alongside it.
pub fn open_monitor<B: CaptureBackend>(
    backend: &B,
    def: &MonitorDefinition,
) -> Result<(Monitor<B::Handle>, ReadinessStream), MonitorError> {
    let index = def.index;
    let device = resolve_device(backend, def);

    let mut handle = backend
        .open(&device)
        .map_err(|source| MonitorError::CaptureOpen {
            index,
            device: device.clone(),
            source,
        })?;

    let filter = match def.filter() {
        Some(expr) => {
            let compiled = Filter::compile(expr).map_err(|source| MonitorError::FilterCompile {
                index,
                filter: expr.to_string(),
                source,
            })?;
            handle
                .attach_filter(compiled)
                .map_err(|source| MonitorError::FilterAttach { index, source })?;
            expr.to_string()
        }
        None => String::new(),
    };

    handle
        .set_nonblocking()
        .map_err(|source| MonitorError::NonBlocking { index, source })?;

    let readiness = {
        let fd = handle
            .selectable_fd()
            .map_err(|source| MonitorError::Descriptor { index, source })?;
        watch(fd).map_err(|source| MonitorError::WatcherRegistration { index, source })?
    };

    debug!(
        "monitor {}: capturing on '{}' with filter '{}'",
        index, device, filter
    );

    let monitor = Monitor::new(
        index,
        def.description().to_string(),
        device,
        filter,
        handle,
    );
    Ok((monitor, readiness))
}

/// Register `fd` with the runtime's reactor
///
/// The watcher holds its own duplicate of the descriptor, so it stays valid
/// for as long as the stream lives. Must be called inside a tokio runtime.
pub fn watch(fd: BorrowedFd<'_>) -> io::Result<ReadinessStream> {
    let owned = fd.try_clone_to_owned()?;
    // SAFETY: the AsyncFd owns `owned` and never swaps it for another descriptor.
    let async_fd = unsafe { AsyncFd::register_with_interest(owned, Interest::READABLE) }?;

    let stream = futures::stream::unfold(async_fd, |async_fd| async move {
        let ready = match async_fd.readable().await {
            Ok(mut guard) => {
                guard.clear_ready();
                Ok(())
            }
            Err(e) => Err(e),
        };
        Some((ready, async_fd))
    });
    Ok(Box::pin(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::datagram::{DatagramBackend, FailAt};
    use futures::StreamExt;
    use std::time::Duration;

    fn def(index: u32, device: &str, filter: &str) -> MonitorDefinition {
        MonitorDefinition {
            index,
            description: Some(format!("monitor {}", index)),
            device: Some(device.to_string()),
            filter: Some(filter.to_string()),
        }
    }

    #[tokio::test]
    async fn test_open_monitor_watches_capture() {
        let backend = DatagramBackend::new();
        let (mut monitor, mut readiness) = open_monitor(&backend, &def(7, "eth0", "")).unwrap();

        assert_eq!(monitor.device(), "eth0");
        assert_eq!(monitor.description(), "monitor 7");
        assert_eq!(monitor.filter(), "");

        backend.inject_len("eth0", 114);
        let ready = tokio::time::timeout(Duration::from_secs(5), readiness.next())
            .await
            .expect("readiness within timeout");
        assert!(matches!(ready, Some(Ok(()))));

        assert_eq!(monitor.drain().unwrap(), 1);
        assert_eq!(monitor.counters().seen_octets, 100);
    }

    #[tokio::test]
    async fn test_device_falls_back_to_default_then_any() {
        let backend = DatagramBackend::new().with_default_device("eth9");
        let (monitor, _readiness) = open_monitor(&backend, &MonitorDefinition::new(1)).unwrap();
        assert_eq!(monitor.device(), "eth9");

        let backend = DatagramBackend::new();
        let (monitor, _readiness) = open_monitor(&backend, &MonitorDefinition::new(2)).unwrap();
        assert_eq!(monitor.device(), ANY_DEVICE);
    }

    #[tokio::test]
    async fn test_failures_release_the_handle() {
        let backend = DatagramBackend::new();
        backend.fail("open0", FailAt::Open);
        backend.fail("attach0", FailAt::AttachFilter);
        backend.fail("nb0", FailAt::NonBlocking);
        backend.fail("fd0", FailAt::Descriptor);
        backend.fail("watch0", FailAt::Watch);

        let err = open_monitor(&backend, &def(1, "open0", "")).err().unwrap();
        assert!(matches!(err, MonitorError::CaptureOpen { index: 1, .. }));

        let err = open_monitor(&backend, &def(2, "eth0", "tcp port")).err().unwrap();
        assert!(matches!(err, MonitorError::FilterCompile { index: 2, .. }));
        assert_eq!(backend.live_handles(), 0);

        let err = open_monitor(&backend, &def(3, "attach0", "tcp")).err().unwrap();
        assert!(matches!(err, MonitorError::FilterAttach { index: 3, .. }));
        assert_eq!(backend.live_handles(), 0);

        let err = open_monitor(&backend, &def(4, "nb0", "")).err().unwrap();
        assert!(matches!(err, MonitorError::NonBlocking { index: 4, .. }));
        assert_eq!(backend.live_handles(), 0);

        let err = open_monitor(&backend, &def(5, "fd0", "")).err().unwrap();
        assert!(matches!(err, MonitorError::Descriptor { index: 5, .. }));
        assert_eq!(backend.live_handles(), 0);

        let err = open_monitor(&backend, &def(6, "watch0", "udp")).err().unwrap();
        assert!(matches!(err, MonitorError::WatcherRegistration { index: 6, .. }));
        assert_eq!(backend.live_handles(), 0);
    }

    #[tokio::test]
    async fn test_filter_only_attached_when_not_empty() {
        let backend = DatagramBackend::new();
        backend.fail("attach0", FailAt::AttachFilter);

        let (monitor, _readiness) = open_monitor(&backend, &def(1, "attach0", "  ")).unwrap();
        assert_eq!(monitor.filter(), "");
        assert_eq!(backend.live_handles(), 1);
    }
}
