//! Periodic table snapshots
//!
//! On every tick the event loop hands the exporter the rows of the whole
//! table, in index order, and the exporter rewrites its destination file
//! with them. Two formats: a JSON array with one object per monitor, and
//! the Prometheus text exposition format.

use pcapmib_common::MonitorRow;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("can't write export file '{}': {source}", path.display())]
    Destination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("can't encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Snapshot encoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Json,
    Prometheus,
}

impl std::str::FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "prometheus" | "prom" => Ok(ExportFormat::Prometheus),
            _ => anyhow::bail!("Invalid export format: {}", s),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportFormat::Json => f.write_str("json"),
            ExportFormat::Prometheus => f.write_str("prometheus"),
        }
    }
}

/// Writes table snapshots to a file
#[derive(Debug, Clone)]
pub struct Exporter {
    path: PathBuf,
    format: ExportFormat,
}

impl Exporter {
    pub fn new(path: impl Into<PathBuf>, format: ExportFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ExportFormat {
        self.format
    }

    /// Replace the destination's contents with a snapshot of `rows`
    pub fn export(&self, rows: &[MonitorRow]) -> Result<(), ExportError> {
        let body = self.render(rows)?;
        std::fs::write(&self.path, body).map_err(|source| ExportError::Destination {
            path: self.path.clone(),
            source,
        })
    }

    pub fn render(&self, rows: &[MonitorRow]) -> Result<String, ExportError> {
        match self.format {
            ExportFormat::Json => {
                let mut body = serde_json::to_string_pretty(rows)?;
                body.push('\n');
                Ok(body)
            }
            ExportFormat::Prometheus => Ok(format_metrics(rows)),
        }
    }
}

/// Prometheus text exposition of the table
pub fn format_metrics(rows: &[MonitorRow]) -> String {
    let mut out = String::new();

    out.push_str(
        "# HELP pcapmib_monitors Monitors currently registered\n\
         # TYPE pcapmib_monitors gauge\n",
    );
    let _ = writeln!(out, "pcapmib_monitors {}", rows.len());

    out.push_str(
        "\n\
         # HELP pcapmib_seen_octets_total Octets captured, link-layer header excluded\n\
         # TYPE pcapmib_seen_octets_total counter\n",
    );
    for row in rows {
        let _ = writeln!(
            out,
            "pcapmib_seen_octets_total{{{}}} {}",
            labels(row),
            row.seen_octets
        );
    }

    out.push_str(
        "\n\
         # HELP pcapmib_seen_packets_total Frames captured\n\
         # TYPE pcapmib_seen_packets_total counter\n",
    );
    for row in rows {
        let _ = writeln!(
            out,
            "pcapmib_seen_packets_total{{{}}} {}",
            labels(row),
            row.seen_packets
        );
    }

    out
}

fn labels(row: &MonitorRow) -> String {
    format!(
        "index=\"{}\",description=\"{}\",device=\"{}\",filter=\"{}\"",
        row.index,
        escape_label(&row.description),
        escape_label(&row.device),
        escape_label(&row.filter)
    )
}

fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<MonitorRow> {
        vec![
            MonitorRow {
                index: 1,
                description: "all".into(),
                device: "eth0".into(),
                filter: String::new(),
                seen_octets: 136,
                seen_packets: 1,
            },
            MonitorRow {
                index: 4,
                description: "say \"dns\"".into(),
                device: "any".into(),
                filter: "udp port 53".into(),
                seen_octets: 0,
                seen_packets: 0,
            },
        ]
    }

    #[test]
    fn test_json_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(dir.path().join("pcap.json"), ExportFormat::Json);

        exporter.export(&rows()).unwrap();
        let written = std::fs::read_to_string(exporter.path()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&written).unwrap();

        let records = parsed.as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["index"], 1);
        assert_eq!(records[0]["device"], "eth0");
        assert_eq!(records[0]["seen_octets"], 136);
        assert_eq!(records[1]["filter"], "udp port 53");

        exporter.export(&[]).unwrap();
        let written = std::fs::read_to_string(exporter.path()).unwrap();
        assert_eq!(written.trim(), "[]");
    }

    #[test]
    fn test_prometheus_snapshot() {
        let text = format_metrics(&rows());

        assert!(text.contains("pcapmib_monitors 2\n"));
        assert!(text.contains("# TYPE pcapmib_seen_octets_total counter"));
        assert!(text.contains(
            "pcapmib_seen_octets_total{index=\"1\",description=\"all\",device=\"eth0\",filter=\"\"} 136"
        ));
        assert!(text.contains("description=\"say \\\"dns\\\"\""));
        assert!(text.contains("pcapmib_seen_packets_total{index=\"4\""));
    }

    #[test]
    fn test_unwritable_destination_is_an_error() {
        let exporter = Exporter::new("/nonexistent/dir/pcap.json", ExportFormat::Json);
        let err = exporter.export(&rows()).unwrap_err();
        assert!(matches!(err, ExportError::Destination { .. }));
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!(
            "Prometheus".parse::<ExportFormat>().unwrap(),
            ExportFormat::Prometheus
        );
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
