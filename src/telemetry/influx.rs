//! A single InfluxDB line-protocol HTTP sink, identified by `baseurl#database`.

/// One telemetry destination. Cheap to clone: only the two owned strings.
#[derive(Debug, Clone)]
pub struct InfluxSink {
    write_url: String,
}

impl InfluxSink {
    /// Parse a `<baseurl>#<database>` identity. Entries missing the `#`
    /// separator are rejected by the caller before this is reached.
    pub fn parse(identity: &str) -> Option<Self> {
        let (base, database) = identity.split_once('#')?;
        if base.is_empty() || database.is_empty() {
            return None;
        }
        Some(Self {
            write_url: format!("{}/write?db={database}", base.trim_end_matches('/')),
        })
    }

    /// POST a single line-protocol line. Any failure is logged and
    /// swallowed: telemetry never stalls the caller.
    pub async fn push(&self, client: &reqwest::Client, line: &str) {
        if let Err(e) = client
            .post(&self.write_url)
            .body(line.to_owned())
            .send()
            .await
        {
            tracing::debug!(url = %self.write_url, error = %e, "telemetry push failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trims_trailing_slash() {
        let sink = InfluxSink::parse("http://localhost:8086/#plancton").unwrap();
        assert_eq!(sink.write_url, "http://localhost:8086/write?db=plancton");
    }

    #[test]
    fn test_parse_without_hash_is_none() {
        assert!(InfluxSink::parse("http://localhost:8086").is_none());
    }

    #[test]
    fn test_parse_empty_database_is_none() {
        assert!(InfluxSink::parse("http://localhost:8086#").is_none());
    }
}
