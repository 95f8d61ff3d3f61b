//! Agent configuration
//!
//! Two layers: [`AgentConfig`] holds the process options (from the command
//! line or the environment), and the monitor definitions file lists the
//! capture points, one field per line:
//!
//! ```text
//! # comment
//! pcapDescr.1  = "web traffic"
//! pcapDevice.1 = "eth0"
//! pcapFilter.1 = "tcp port 80 or tcp port 443"
//! ```
//!
//! Lines starting with `#` or `%`, and lines that do not mention `pcap`,
//! are ignored. A malformed line is logged with its line number and
//! skipped; it never prevents the other definitions from loading.

use crate::exporter::ExportFormat;
use crate::monitor::MonitorDefinition;
use log::warn;
use pcapmib_common::Oid;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default monitor definitions file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/snmp/pcap.conf";

/// Default query service address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:9161";

/// Highest monitor index accepted from the definitions file
pub const MAX_DEFINITIONS: u32 = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error on line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

impl ConfigError {
    fn parse(line: usize, reason: impl Into<String>) -> Self {
        ConfigError::Parse {
            line,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Description,
    Device,
    Filter,
}

impl Field {
    fn from_name(name: &str) -> Option<Field> {
        match name {
            "pcapDescr" => Some(Field::Description),
            "pcapDevice" => Some(Field::Device),
            "pcapFilter" => Some(Field::Filter),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Setting {
    field: Field,
    index: u32,
    value: String,
}

/// Parse one line; `Ok(None)` for lines that carry no setting
fn parse_line(number: usize, line: &str) -> Result<Option<Setting>, ConfigError> {
    if line.starts_with('#') || line.starts_with('%') || !line.contains("pcap") {
        return Ok(None);
    }

    let line = line.trim();
    let (name, rest) = line
        .split_once('.')
        .ok_or_else(|| ConfigError::parse(number, "expected '<name>.<index>'"))?;

    let field = Field::from_name(name.trim())
        .ok_or_else(|| ConfigError::parse(number, format!("unknown setting '{}'", name.trim())))?;

    let index_end = rest
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(rest.len());
    let (index, rest) = rest.split_at(index_end);
    let index: u32 = index
        .parse()
        .map_err(|_| ConfigError::parse(number, format!("invalid index '{}'", index)))?;
    if !(1..=MAX_DEFINITIONS).contains(&index) {
        return Err(ConfigError::parse(
            number,
            format!("index {} out of range 1..={}", index, MAX_DEFINITIONS),
        ));
    }

    let rest = rest
        .trim_start()
        .strip_prefix('=')
        .ok_or_else(|| ConfigError::parse(number, "expected '='"))?
        .trim();
    let value = rest
        .strip_prefix('"')
        .and_then(|v| v.split_once('"'))
        .map(|(value, _)| value)
        .ok_or_else(|| ConfigError::parse(number, "expected a quoted value"))?;

    Ok(Some(Setting {
        field,
        index,
        value: value.to_string(),
    }))
}

/// Parse a definitions file's contents
///
/// Settings for the same index are merged into one definition; a later
/// line for the same field replaces an earlier one. Definitions come back
/// in ascending index order.
pub fn parse_definitions(text: &str) -> Vec<MonitorDefinition> {
    let mut defs: BTreeMap<u32, MonitorDefinition> = BTreeMap::new();

    for (i, line) in text.lines().enumerate() {
        let setting = match parse_line(i + 1, line) {
            Ok(Some(setting)) => setting,
            Ok(None) => continue,
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };

        let def = defs
            .entry(setting.index)
            .or_insert_with(|| MonitorDefinition::new(setting.index));
        let slot = match setting.field {
            Field::Description => &mut def.description,
            Field::Device => &mut def.device,
            Field::Filter => &mut def.filter,
        };
        *slot = Some(setting.value);
    }

    defs.into_values().collect()
}

/// Read and parse a definitions file
pub fn load_definitions(path: &Path) -> Result<Vec<MonitorDefinition>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_definitions(&text))
}

/// Process options of the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Monitor definitions file
    pub config_path: PathBuf,

    /// Root of the monitor subtree
    pub base_oid: Oid,

    /// Query service address
    pub listen: SocketAddr,

    /// Snapshot destination (None = no export)
    pub export_path: Option<PathBuf>,

    pub export_format: ExportFormat,

    pub export_interval: Duration,
}

impl AgentConfig {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_oid.is_empty() {
            anyhow::bail!("Base OID must not be empty");
        }

        if self.export_path.is_some() && self.export_interval.is_zero() {
            anyhow::bail!("Export interval must be greater than 0");
        }

        if let Some(path) = &self.export_path {
            if path.as_os_str().is_empty() {
                anyhow::bail!("Export path must not be empty");
            }
        }

        Ok(())
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            base_oid: pcapmib_common::DEFAULT_BASE_OID
                .parse()
                .unwrap_or_default(),
            listen: SocketAddr::from(([127, 0, 0, 1], 9161)),
            export_path: None,
            export_format: ExportFormat::Json,
            export_interval: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_line() {
        let setting = parse_line(1, "pcapDescr.1 = \"web traffic\"").unwrap().unwrap();
        assert_eq!(
            setting,
            Setting {
                field: Field::Description,
                index: 1,
                value: "web traffic".to_string()
            }
        );

        let setting = parse_line(1, "pcapFilter.12=\"udp port 53\"\n").unwrap().unwrap();
        assert_eq!(setting.field, Field::Filter);
        assert_eq!(setting.index, 12);
        assert_eq!(setting.value, "udp port 53");

        let setting = parse_line(1, "pcapDevice.3\t= \"\"").unwrap().unwrap();
        assert_eq!(setting.value, "");
    }

    #[test]
    fn test_ignored_lines() {
        assert!(parse_line(1, "# pcapDescr.1 = \"x\"").unwrap().is_none());
        assert!(parse_line(1, "% pcapDescr.1 = \"x\"").unwrap().is_none());
        assert!(parse_line(1, "").unwrap().is_none());
        assert!(parse_line(1, "agentAddress udp:161").unwrap().is_none());
    }

    #[test]
    fn test_malformed_lines() {
        let cases = [
            "pcapDescr",
            "pcapColor.1 = \"red\"",
            "pcapDescr.x = \"a\"",
            "pcapDescr.0 = \"a\"",
            "pcapDescr.65 = \"a\"",
            "pcapDescr.1 \"a\"",
            "pcapDescr.1 = a",
            "pcapDescr.1 = \"a",
        ];
        for line in cases {
            let err = parse_line(7, line).unwrap_err();
            assert!(
                matches!(err, ConfigError::Parse { line: 7, .. }),
                "{:?} -> {:?}",
                line,
                err
            );
        }
    }

    #[test]
    fn test_parse_definitions_merges_and_orders() {
        let text = "\
# capture points
pcapDescr.3 = \"dns\"
pcapFilter.3 = \"udp port 53\"
pcapDescr.1 = \"all\"
pcapDevice.1 = \"eth0\"
pcapDescr.2 = broken
pcapDevice.3 = \"eth1\"
pcapDevice.3 = \"eth2\"
";
        let defs = parse_definitions(text);
        assert_eq!(defs.len(), 2);

        assert_eq!(defs[0].index, 1);
        assert_eq!(defs[0].description(), "all");
        assert_eq!(defs[0].device(), Some("eth0"));
        assert_eq!(defs[0].filter(), None);

        assert_eq!(defs[1].index, 3);
        assert_eq!(defs[1].description(), "dns");
        assert_eq!(defs[1].device(), Some("eth2"));
        assert_eq!(defs[1].filter(), Some("udp port 53"));
    }

    #[test]
    fn test_load_definitions() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "pcapDescr.5 = \"five\"").unwrap();
        file.flush().unwrap();

        let defs = load_definitions(file.path()).unwrap();
        assert_eq!(defs, vec![MonitorDefinition {
            index: 5,
            description: Some("five".to_string()),
            device: None,
            filter: None,
        }]);

        let missing = load_definitions(Path::new("/nonexistent/pcap.conf"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_validation() {
        let valid = AgentConfig::default();
        assert!(valid.validate().is_ok());
        assert_eq!(valid.base_oid.to_string(), pcapmib_common::DEFAULT_BASE_OID);

        let invalid = AgentConfig {
            base_oid: Oid::default(),
            ..AgentConfig::default()
        };
        assert!(invalid.validate().is_err());

        let invalid = AgentConfig {
            export_path: Some(PathBuf::from("/tmp/pcap.json")),
            export_interval: Duration::ZERO,
            ..AgentConfig::default()
        };
        assert!(invalid.validate().is_err());
    }
}
