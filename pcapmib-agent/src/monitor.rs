//! Monitor entries
//!
//! A [`Monitor`] is one capture point: its identity and descriptive fields,
//! the counters its capture callback advances, and the capture handle it
//! owns. Dropping the monitor releases the handle.

use crate::capture::{CaptureError, CaptureHandle, ETHERNET_HEADER_LENGTH};
use crate::registry::Indexed;
use pcapmib_common::MonitorRow;

/// One monitor as read from the configuration
///
/// Empty strings are treated the same as absent fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorDefinition {
    pub index: u32,
    pub description: Option<String>,
    pub device: Option<String>,
    pub filter: Option<String>,
}

impl MonitorDefinition {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }

    /// Device, if one was given and is not empty
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref().filter(|d| !d.is_empty())
    }

    /// Filter expression, if one was given and is not empty
    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref().map(str::trim).filter(|f| !f.is_empty())
    }
}

/// Traffic seen by a monitor since it was opened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub seen_octets: u64,
    pub seen_packets: u64,
}

impl Counters {
    /// Account for one captured frame of `len` bytes on the wire
    ///
    /// The link-layer header is not counted; frames shorter than it are
    /// ignored entirely. Returns whether the frame was counted.
    pub fn record(&mut self, len: u32) -> bool {
        if len < ETHERNET_HEADER_LENGTH {
            return false;
        }
        self.seen_octets = self
            .seen_octets
            .saturating_add(u64::from(len - ETHERNET_HEADER_LENGTH));
        self.seen_packets = self.seen_packets.saturating_add(1);
        true
    }
}

/// A registered capture point
pub struct Monitor<H> {
    index: u32,
    description: String,
    device: String,
    filter: String,
    counters: Counters,
    handle: H,
}

impl<H: CaptureHandle> Monitor<H> {
    pub(crate) fn new(
        index: u32,
        description: String,
        device: String,
        filter: String,
        handle: H,
    ) -> Self {
        Self {
            index,
            description,
            device,
            filter,
            counters: Counters::default(),
            handle,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Device the capture is open on, after defaulting
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    /// Count every frame pending on the handle
    ///
    /// Frames counted before a capture error stay counted. Returns the
    /// number of frames that were counted.
    pub fn drain(&mut self) -> Result<usize, CaptureError> {
        let counters = &mut self.counters;
        let mut counted = 0;
        self.handle.drain(&mut |len| {
            if counters.record(len) {
                counted += 1;
            }
        })?;
        Ok(counted)
    }

    pub fn row(&self) -> MonitorRow {
        MonitorRow {
            index: self.index,
            description: self.description.clone(),
            device: self.device.clone(),
            filter: self.filter.clone(),
            seen_octets: self.counters.seen_octets,
            seen_packets: self.counters.seen_packets,
        }
    }
}

impl<H> Indexed for Monitor<H> {
    fn index(&self) -> u32 {
        self.index
    }
}

impl<H> std::fmt::Debug for Monitor<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("index", &self.index)
            .field("device", &self.device)
            .field("filter", &self.filter)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::datagram::{DatagramBackend, DatagramHandle, FailAt};
    use crate::capture::CaptureBackend;

    fn monitor_on(backend: &DatagramBackend, device: &str) -> Monitor<DatagramHandle> {
        let mut handle = backend.open(device).unwrap();
        handle.set_nonblocking().unwrap();
        Monitor::new(1, "test".into(), device.into(), String::new(), handle)
    }

    #[test]
    fn test_counters_strip_link_header() {
        let mut counters = Counters::default();

        assert!(counters.record(150));
        assert_eq!(counters.seen_octets, 136);
        assert_eq!(counters.seen_packets, 1);

        assert!(!counters.record(10));
        assert_eq!(counters.seen_octets, 136);
        assert_eq!(counters.seen_packets, 1);

        assert!(counters.record(14));
        assert_eq!(counters.seen_octets, 136);
        assert_eq!(counters.seen_packets, 2);
    }

    #[test]
    fn test_counters_saturate() {
        let mut counters = Counters {
            seen_octets: u64::MAX - 1,
            seen_packets: u64::MAX,
        };
        counters.record(1514);
        assert_eq!(counters.seen_octets, u64::MAX);
        assert_eq!(counters.seen_packets, u64::MAX);
    }

    #[test]
    fn test_drain_counts_pending_frames() {
        let backend = DatagramBackend::new();
        let mut monitor = monitor_on(&backend, "eth0");

        backend.inject_len("eth0", 150);
        backend.inject_len("eth0", 10);
        backend.inject_len("eth0", 64);

        assert_eq!(monitor.drain().unwrap(), 2);
        assert_eq!(
            monitor.counters(),
            Counters {
                seen_octets: 136 + 50,
                seen_packets: 2
            }
        );

        let row = monitor.row();
        assert_eq!(row.index, 1);
        assert_eq!(row.device, "eth0");
        assert_eq!(row.seen_octets, 186);
    }

    #[test]
    fn test_drain_error_keeps_earlier_frames() {
        let backend = DatagramBackend::new();
        backend.fail("eth0", FailAt::Drain);
        let mut monitor = monitor_on(&backend, "eth0");

        backend.inject_len("eth0", 114);
        backend.inject_len("eth0", 114);

        assert!(monitor.drain().is_err());
        assert_eq!(monitor.counters().seen_packets, 1);
        assert_eq!(monitor.counters().seen_octets, 100);
    }

    #[test]
    fn test_definition_treats_empty_as_absent() {
        let def = MonitorDefinition {
            index: 3,
            description: None,
            device: Some(String::new()),
            filter: Some("  ".into()),
        };
        assert_eq!(def.description(), "");
        assert_eq!(def.device(), None);
        assert_eq!(def.filter(), None);
    }
}
