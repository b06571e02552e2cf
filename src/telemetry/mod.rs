//! Maintains the set of telemetry streamers, reconciled against the
//! configured `influxdb_url` set, and emits labeled records.

mod influx;

use std::collections::{HashMap, HashSet};

pub use influx::InfluxSink;

/// A single field value in a telemetry record.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}i"),
            Self::Float(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Str(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
        }
    }
}

/// One emitted telemetry record: an InfluxDB-line-protocol measurement.
#[derive(Debug, Clone)]
pub struct Record {
    pub series: &'static str,
    pub tags: Vec<(&'static str, String)>,
    pub fields: Vec<(&'static str, Field)>,
}

impl Record {
    pub fn new(series: &'static str) -> Self {
        Self {
            series,
            tags: Vec::new(),
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn tag(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.tags.push((key, value.into()));
        self
    }

    #[must_use]
    pub fn field(mut self, key: &'static str, value: impl Into<Field>) -> Self {
        self.fields.push((key, value.into()));
        self
    }

    /// Render as a single InfluxDB line-protocol line, timestamp omitted
    /// (the sink lets the server stamp arrival time).
    fn to_line(&self) -> String {
        let mut line = self.series.to_owned();
        for (k, v) in &self.tags {
            line.push(',');
            line.push_str(k);
            line.push('=');
            line.push_str(&escape_tag_value(v));
        }
        line.push(' ');
        let fields = self
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        line.push_str(&fields);
        line
    }
}

fn escape_tag_value(v: &str) -> String {
    v.replace(' ', "\\ ").replace(',', "\\,").replace('=', "\\=")
}

impl From<i64> for Field {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Field {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Field {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Field {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Field {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// The reconciled set of telemetry streamers, keyed by `baseurl#database`.
pub struct Fanout {
    sinks: HashMap<String, InfluxSink>,
    client: reqwest::Client,
}

impl Fanout {
    pub fn new() -> Self {
        Self {
            sinks: HashMap::new(),
            client: reqwest::Client::new(),
        }
    }

    /// Reconcile the streamer set against `urls`: drop sinks whose identity
    /// is no longer present, construct one for each new entry.
    pub fn reconcile(&mut self, urls: &HashSet<String>) {
        self.sinks.retain(|identity, _| urls.contains(identity));
        for identity in urls {
            if !self.sinks.contains_key(identity) {
                if let Some(sink) = InfluxSink::parse(identity) {
                    self.sinks.insert(identity.clone(), sink);
                }
            }
        }
    }

    /// Emit `record` to every reconciled sink. Fire-and-forget: a failing
    /// sink is logged and does not stall the caller.
    pub fn emit(&self, record: Record) {
        if self.sinks.is_empty() {
            return;
        }
        let line = record.to_line();
        for sink in self.sinks.values() {
            let client = self.client.clone();
            let sink = sink.clone();
            let line = line.clone();
            tokio::spawn(async move {
                sink.push(&client, &line).await;
            });
        }
    }
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_to_line_basic() {
        let record = Record::new("daemon")
            .tag("hostname", "box1")
            .field("uptime", 42_i64);
        assert_eq!(record.to_line(), "daemon,hostname=box1 uptime=42i");
    }

    #[test]
    fn test_record_to_line_multiple_fields() {
        let record = Record::new("container")
            .tag("hostname", "box1")
            .tag("started", "true")
            .field("uptime", 12.5_f64);
        assert_eq!(
            record.to_line(),
            "container,hostname=box1,started=true uptime=12.5"
        );
    }

    #[test]
    fn test_escape_tag_value() {
        assert_eq!(escape_tag_value("a b"), "a\\ b");
        assert_eq!(escape_tag_value("a,b"), "a\\,b");
    }

    #[test]
    fn test_reconcile_adds_and_drops() {
        let mut fanout = Fanout::new();
        let mut urls = HashSet::new();
        urls.insert("http://localhost:8086#plancton".to_owned());
        fanout.reconcile(&urls);
        assert_eq!(fanout.sinks.len(), 1);

        urls.clear();
        fanout.reconcile(&urls);
        assert!(fanout.sinks.is_empty());
    }

    #[test]
    fn test_reconcile_ignores_malformed_identity() {
        let mut fanout = Fanout::new();
        let mut urls = HashSet::new();
        urls.insert("no-hash-here".to_owned());
        fanout.reconcile(&urls);
        assert!(fanout.sinks.is_empty());
    }

    #[test]
    fn test_emit_with_no_sinks_does_not_panic() {
        let fanout = Fanout::new();
        fanout.emit(Record::new("daemon").field("uptime", 1_i64));
    }
}
