//! Shared types between the pcapmib agent and its clients
//!
//! This crate defines the shape of the monitor table:
//! - object identifiers ([`Oid`]) and their ordering
//! - the table columns and where they live under the base OID
//! - the public row of a monitor and the typed values a cell can hold

pub mod oid;

pub use oid::{Oid, ParseOidError};

/// Base OID the table is served from unless configured otherwise
pub const DEFAULT_BASE_OID: &str = ".1.3.6.1.4.1.12325.1.1112";

/// Sub-identifiers below the base OID
///
/// Layout:
/// - `<base>.1.0` - number of live monitors (scalar)
/// - `<base>.2.1.<column>.<row>` - monitor table cells
pub mod layout {
    pub const MONITOR_COUNT: u32 = 1;
    pub const MONITOR_TABLE: u32 = 2;
    pub const MONITOR_ENTRY: u32 = 1;
    /// Instance sub-identifier of a scalar object
    pub const SCALAR_INSTANCE: u32 = 0;
}

/// Columns of the monitor table, in walk order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Column {
    Index = 1,
    Description = 2,
    Device = 3,
    Filter = 4,
    SeenOctets = 5,
    SeenPackets = 6,
}

impl Column {
    pub const ALL: [Column; 6] = [
        Column::Index,
        Column::Description,
        Column::Device,
        Column::Filter,
        Column::SeenOctets,
        Column::SeenPackets,
    ];

    pub const fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Column> {
        Column::ALL.into_iter().find(|c| c.id() == id)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Column::Index => "pcapIndex",
            Column::Description => "pcapDescr",
            Column::Device => "pcapDevice",
            Column::Filter => "pcapFilter",
            Column::SeenOctets => "pcapSeenOctets",
            Column::SeenPackets => "pcapSeenPackets",
        }
    }
}

impl core::fmt::Display for Column {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Value held by a table cell or scalar
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Value {
    Integer(u32),
    OctetString(String),
    Counter64(u64),
}

impl core::fmt::Display for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "INTEGER: {}", v),
            Value::OctetString(v) => write!(f, "STRING: \"{}\"", v),
            Value::Counter64(v) => write!(f, "Counter64: {}", v),
        }
    }
}

/// A resolved object and its value
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct VarBind {
    pub oid: Oid,
    pub value: Value,
}

/// Public fields of one monitor, as served and exported
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MonitorRow {
    pub index: u32,
    pub description: String,
    pub device: String,
    pub filter: String,
    pub seen_octets: u64,
    pub seen_packets: u64,
}

impl MonitorRow {
    /// Value of a single column of this row
    pub fn cell(&self, column: Column) -> Value {
        match column {
            Column::Index => Value::Integer(self.index),
            Column::Description => Value::OctetString(self.description.clone()),
            Column::Device => Value::OctetString(self.device.clone()),
            Column::Filter => Value::OctetString(self.filter.clone()),
            Column::SeenOctets => Value::Counter64(self.seen_octets),
            Column::SeenPackets => Value::Counter64(self.seen_packets),
        }
    }
}
