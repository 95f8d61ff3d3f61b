//! Command-line client for pcapmib
//!
//! Commands:
//! - `pcapmib get <OID>...` - Exact lookups
//! - `pcapmib next <OID>` - Get-next lookup
//! - `pcapmib walk [ROOT]` - Every object below a root
//! - `pcapmib table` - The monitor table, one line per monitor
//! - `pcapmib status` - Agent status
//!
//! OIDs are given numerically (`.1.3.6.1...`) or by name relative to the
//! agent's base OID (`pcapSeenOctets.3`, `pcapCount.0`, `pcapDescr`).

use pcapmib_common::{layout, Column, MonitorRow, Oid, Value, VarBind};
use pcapmib_proto as proto;
use std::collections::BTreeMap;
use thiserror::Error;

/// Name of the monitor count scalar
pub const COUNT_NAME: &str = "pcapCount";

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid OID '{0}'")]
    InvalidOid(String),

    #[error("unknown object name '{0}'")]
    UnknownName(String),

    #[error("agent returned {0} without a value")]
    MissingValue(Oid),
}

/// Turn a command-line OID argument into an OID
pub fn resolve_oid(arg: &str, base: &Oid) -> Result<Oid, CliError> {
    if !arg.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return arg
            .parse()
            .map_err(|_| CliError::InvalidOid(arg.to_string()));
    }

    let (name, instance) = match arg.split_once('.') {
        Some((name, instance)) => (name, Some(instance)),
        None => (arg, None),
    };

    let mut oid = if name == COUNT_NAME {
        base.join(&[layout::MONITOR_COUNT])
    } else {
        let column = Column::ALL
            .into_iter()
            .find(|column| column.name() == name)
            .ok_or_else(|| CliError::UnknownName(name.to_string()))?;
        base.join(&[layout::MONITOR_TABLE, layout::MONITOR_ENTRY, column.id()])
    };

    if let Some(instance) = instance {
        let suffix: Oid = instance
            .parse()
            .map_err(|_| CliError::InvalidOid(arg.to_string()))?;
        oid = oid.join(suffix.as_slice());
    }
    Ok(oid)
}

/// Symbolic name of an OID under `base`, or its numeric form
pub fn oid_name(oid: &Oid, base: &Oid) -> String {
    let Some(suffix) = oid.strip_prefix(base) else {
        return oid.to_string();
    };

    let (name, instance) = match suffix {
        [layout::MONITOR_COUNT, instance @ ..] => (COUNT_NAME, instance),
        [layout::MONITOR_TABLE, layout::MONITOR_ENTRY, column, instance @ ..] => {
            match Column::from_id(*column) {
                Some(column) => (column.name(), instance),
                None => return oid.to_string(),
            }
        }
        _ => return oid.to_string(),
    };

    if instance.is_empty() {
        name.to_string()
    } else {
        format!("{}{}", name, Oid::from(instance))
    }
}

pub fn decode_value(value: proto::Value) -> Option<Value> {
    match value.kind? {
        proto::value::Kind::Integer(v) => Some(Value::Integer(v)),
        proto::value::Kind::OctetString(v) => Some(Value::OctetString(v)),
        proto::value::Kind::Counter64(v) => Some(Value::Counter64(v)),
    }
}

pub fn decode_var_bind(var_bind: proto::VarBind) -> Result<VarBind, CliError> {
    let oid = Oid::from(var_bind.oid);
    match var_bind.value.and_then(decode_value) {
        Some(value) => Ok(VarBind { oid, value }),
        None => Err(CliError::MissingValue(oid)),
    }
}

/// Message for a lookup that resolved no object
pub fn exception_message(exception: i32) -> &'static str {
    match proto::Exception::try_from(exception) {
        Ok(proto::Exception::NoSuchObject) => {
            "No Such Object available on this agent at this OID"
        }
        Ok(proto::Exception::NoSuchInstance) => "No Such Instance currently exists at this OID",
        Ok(proto::Exception::EndOfMibView) => {
            "No more variables left in this MIB View (It is past the end of the MIB tree)"
        }
        _ => "Unknown error",
    }
}

/// Rebuild table rows from the cells of a walk
pub fn rows_from_cells(var_binds: &[VarBind], base: &Oid) -> Vec<MonitorRow> {
    let mut rows: BTreeMap<u32, MonitorRow> = BTreeMap::new();

    for var_bind in var_binds {
        let Some(
            [layout::MONITOR_TABLE, layout::MONITOR_ENTRY, column, index],
        ) = var_bind.oid.strip_prefix(base)
        else {
            continue;
        };
        let Some(column) = Column::from_id(*column) else {
            continue;
        };

        let row = rows.entry(*index).or_insert_with(|| MonitorRow {
            index: *index,
            description: String::new(),
            device: String::new(),
            filter: String::new(),
            seen_octets: 0,
            seen_packets: 0,
        });

        match (column, &var_bind.value) {
            (Column::Description, Value::OctetString(v)) => row.description = v.clone(),
            (Column::Device, Value::OctetString(v)) => row.device = v.clone(),
            (Column::Filter, Value::OctetString(v)) => row.filter = v.clone(),
            (Column::SeenOctets, Value::Counter64(v)) => row.seen_octets = *v,
            (Column::SeenPackets, Value::Counter64(v)) => row.seen_packets = *v,
            _ => {}
        }
    }

    rows.into_values().collect()
}

pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1}GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Oid {
        pcapmib_common::DEFAULT_BASE_OID.parse().unwrap()
    }

    #[test]
    fn test_resolve_oid() {
        let base = base();
        let b = pcapmib_common::DEFAULT_BASE_OID;

        assert_eq!(
            resolve_oid("pcapSeenOctets.3", &base).unwrap().to_string(),
            format!("{}.2.1.5.3", b)
        );
        assert_eq!(
            resolve_oid("pcapCount.0", &base).unwrap().to_string(),
            format!("{}.1.0", b)
        );
        assert_eq!(
            resolve_oid("pcapDescr", &base).unwrap().to_string(),
            format!("{}.2.1.2", b)
        );
        assert_eq!(
            resolve_oid(".1.3.6.1", &base).unwrap().to_string(),
            ".1.3.6.1"
        );
        assert!(matches!(
            resolve_oid("pcapColor.1", &base),
            Err(CliError::UnknownName(_))
        ));
        assert!(matches!(
            resolve_oid("pcapDescr.x", &base),
            Err(CliError::InvalidOid(_))
        ));
        assert!(matches!(
            resolve_oid(".1..3", &base),
            Err(CliError::InvalidOid(_))
        ));
    }

    #[test]
    fn test_oid_name() {
        let base = base();
        let named = |suffix: &[u32]| oid_name(&base.join(suffix), &base);

        assert_eq!(named(&[1, 0]), "pcapCount.0");
        assert_eq!(named(&[2, 1, 6, 12]), "pcapSeenPackets.12");
        assert_eq!(named(&[2, 1, 3]), "pcapDevice");
        assert_eq!(named(&[2, 1, 9, 1]), format!("{}.2.1.9.1", base));

        let outside: Oid = ".1.3.6.1.2.1".parse().unwrap();
        assert_eq!(oid_name(&outside, &base), ".1.3.6.1.2.1");
    }

    #[test]
    fn test_decode_var_bind() {
        let decoded = decode_var_bind(proto::VarBind {
            oid: vec![1, 3, 6],
            value: Some(proto::Value {
                kind: Some(proto::value::Kind::OctetString("eth0".into())),
            }),
        })
        .unwrap();
        assert_eq!(decoded.oid.to_string(), ".1.3.6");
        assert_eq!(decoded.value, Value::OctetString("eth0".into()));

        let missing = decode_var_bind(proto::VarBind {
            oid: vec![1, 3, 6],
            value: None,
        });
        assert!(matches!(missing, Err(CliError::MissingValue(_))));
    }

    #[test]
    fn test_rows_from_cells() {
        let base = base();
        let cell = |column: u32, index: u32, value: Value| VarBind {
            oid: base.join(&[2, 1, column, index]),
            value,
        };

        let cells = vec![
            VarBind {
                oid: base.join(&[1, 0]),
                value: Value::Integer(2),
            },
            cell(1, 1, Value::Integer(1)),
            cell(1, 4, Value::Integer(4)),
            cell(2, 1, Value::OctetString("web".into())),
            cell(2, 4, Value::OctetString("dns".into())),
            cell(5, 1, Value::Counter64(136)),
            cell(5, 4, Value::Counter64(0)),
            cell(6, 1, Value::Counter64(1)),
        ];

        let rows = rows_from_cells(&cells, &base);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].index, 1);
        assert_eq!(rows[0].description, "web");
        assert_eq!(rows[0].seen_octets, 136);
        assert_eq!(rows[0].seen_packets, 1);
        assert_eq!(rows[1].index, 4);
        assert_eq!(rows[1].description, "dns");
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0MB");
        assert_eq!(truncate("eth0", 10), "eth0");
        assert_eq!(truncate("a very long description", 10), "a very ...");
        assert!(exception_message(3).starts_with("No more variables"));
    }
}
