//! Index-addressed queries over the monitor table
//!
//! The table is served below a base OID:
//!
//! ```text
//! <base>.1.0                 monitor count
//! <base>.2.1.<column>.<row>  monitor table cells
//! ```
//!
//! where `<row>` is the monitor index and `<column>` one of the
//! [`Column`] ids. Objects are ordered column by column, so a walk returns
//! every row's index, then every row's description, and so on. Lookups go
//! straight to the registry's exact and successor lookups; nothing here
//! keeps state between requests.

use crate::capture::CaptureHandle;
use crate::monitor::Monitor;
use crate::registry::{Indexed, Registry, RegistryError};
use pcapmib_common::{layout, Column, MonitorRow, Oid, Value, VarBind};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("no such object: {0}")]
    NoSuchObject(Oid),

    #[error("no such instance: {0}")]
    NoSuchInstance(Oid),

    #[error("end of MIB view")]
    EndOfMibView,
}

/// Read-only view of the registry under a base OID
pub struct MibView<'a, H> {
    base: &'a Oid,
    registry: &'a Registry<Monitor<H>>,
}

impl<'a, H: CaptureHandle> MibView<'a, H> {
    pub fn new(base: &'a Oid, registry: &'a Registry<Monitor<H>>) -> Self {
        Self { base, registry }
    }

    /// Row with exactly this index
    pub fn row(&self, index: u32) -> Result<MonitorRow, RegistryError> {
        self.registry.get(index).map(Monitor::row)
    }

    /// First row with an index greater than `index`
    pub fn next_row(&self, index: u32) -> Result<MonitorRow, RegistryError> {
        self.registry.successor(index).map(Monitor::row)
    }

    /// Every row in index order
    pub fn rows(&self) -> Vec<MonitorRow> {
        self.registry.iter().map(Monitor::row).collect()
    }

    fn count_oid(&self) -> Oid {
        self.base
            .join(&[layout::MONITOR_COUNT, layout::SCALAR_INSTANCE])
    }

    fn column_oid(&self, column: Column) -> Oid {
        self.base
            .join(&[layout::MONITOR_TABLE, layout::MONITOR_ENTRY, column.id()])
    }

    fn count(&self) -> Value {
        Value::Integer(u32::try_from(self.registry.len()).unwrap_or(u32::MAX))
    }

    /// Value of exactly `oid`
    pub fn get(&self, oid: &Oid) -> Result<VarBind, QueryError> {
        let Some(suffix) = oid.strip_prefix(self.base) else {
            return Err(QueryError::NoSuchObject(oid.clone()));
        };

        match suffix {
            [layout::MONITOR_COUNT, layout::SCALAR_INSTANCE] => Ok(VarBind {
                oid: oid.clone(),
                value: self.count(),
            }),
            [layout::MONITOR_COUNT, ..] => Err(QueryError::NoSuchInstance(oid.clone())),
            [layout::MONITOR_TABLE, layout::MONITOR_ENTRY, column, rest @ ..] => {
                let Some(column) = Column::from_id(*column) else {
                    return Err(QueryError::NoSuchObject(oid.clone()));
                };
                let [index] = rest else {
                    return Err(QueryError::NoSuchInstance(oid.clone()));
                };
                let monitor = self
                    .registry
                    .get(*index)
                    .map_err(|_| QueryError::NoSuchInstance(oid.clone()))?;
                Ok(VarBind {
                    oid: oid.clone(),
                    value: monitor.row().cell(column),
                })
            }
            _ => Err(QueryError::NoSuchObject(oid.clone())),
        }
    }

    /// First object strictly after `oid`
    pub fn get_next(&self, oid: &Oid) -> Result<VarBind, QueryError> {
        let count_oid = self.count_oid();
        if *oid < count_oid {
            return Ok(VarBind {
                oid: count_oid,
                value: self.count(),
            });
        }

        for column in Column::ALL {
            let prefix = self.column_oid(column);
            let next = if *oid < prefix {
                self.registry.first()
            } else if let Some(rest) = oid.strip_prefix(&prefix) {
                match rest.first() {
                    None => self.registry.first(),
                    Some(&index) => self.registry.successor(index),
                }
            } else {
                continue;
            };

            if let Ok(monitor) = next {
                return Ok(VarBind {
                    oid: prefix.join(&[monitor.index()]),
                    value: monitor.row().cell(column),
                });
            }
        }

        Err(QueryError::EndOfMibView)
    }

    /// Every object below `root`, in order
    pub fn walk(&self, root: &Oid) -> Vec<VarBind> {
        let mut found = Vec::new();
        let mut cursor = root.clone();
        while let Ok(var_bind) = self.get_next(&cursor) {
            if !var_bind.oid.starts_with(root) {
                break;
            }
            cursor = var_bind.oid.clone();
            found.push(var_bind);
        }
        found
    }
}
