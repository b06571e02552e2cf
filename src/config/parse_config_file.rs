use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::app_error::AppError;

/// One `devices` entry: `host:container:perms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    pub host: String,
    pub container: String,
    pub perms: String,
}

impl DeviceSpec {
    /// Parse a `host:container:perms` triple. Malformed entries are
    /// dropped rather than rejecting the whole config, matching the
    /// "any key absent keeps its default" tolerance of the rest of
    /// this file.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, ':');
        let host = parts.next()?.to_owned();
        let container = parts.next()?.to_owned();
        let perms = parts.next()?.to_owned();
        Some(Self {
            host,
            container,
            perms,
        })
    }
}

/// Raw YAML shape of `config.yaml`. Every field is optional: an absent
/// key keeps the previous/default value.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ConfigFile {
    pub updateconfig: Option<u64>,
    pub image_expiration: Option<u64>,
    pub main_sleep: Option<u64>,
    pub grace_kill: Option<u64>,
    pub grace_spawn: Option<u64>,
    pub cpus_per_dock: Option<f64>,
    pub max_docks: Option<MaxDocksExpr>,
    pub docks_per_loop: Option<u32>,
    pub max_ttl: Option<u64>,
    pub docker_image: Option<String>,
    pub docker_cmd: Option<DockerCmd>,
    pub docker_privileged: Option<bool>,
    pub max_dock_mem: Option<u64>,
    pub max_dock_swap: Option<u64>,
    pub user_group: Option<String>,
    pub binds: Option<Vec<String>>,
    pub devices: Option<Vec<String>>,
    pub capabilities: Option<Vec<String>>,
    pub security_opts: Option<Vec<String>>,
    pub influxdb_url: Option<InfluxUrls>,
}

/// `max_docks` may be given as a bare integer or as a string expression;
/// normalize both to the expression text fed to `config::max_docks`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaxDocksExpr(pub String);

impl<'de> Deserialize<'de> for MaxDocksExpr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Int(i64),
            Text(String),
        }
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Int(n) => Self(n.to_string()),
            Repr::Text(s) => Self(s),
        })
    }
}

/// `docker_cmd` may be a scalar string (split on spaces) or a list
/// (used verbatim).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerCmd(pub Vec<String>);

impl<'de> Deserialize<'de> for DockerCmd {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Scalar(String),
            List(Vec<String>),
        }
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Scalar(s) => {
                Self(s.split(' ').filter(|p| !p.is_empty()).map(str::to_owned).collect())
            }
            Repr::List(v) => Self(v),
        })
    }
}

/// `influxdb_url` may be a scalar string, a list, or absent; entries
/// without a `#` are discarded, and the result is a set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InfluxUrls(pub std::collections::HashSet<String>);

impl<'de> Deserialize<'de> for InfluxUrls {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Scalar(String),
            List(Vec<String>),
        }
        let raw = match Repr::deserialize(deserializer)? {
            Repr::Scalar(s) => vec![s],
            Repr::List(v) => v,
        };
        Ok(Self(raw.into_iter().filter(|s| s.contains('#')).collect()))
    }
}

impl ConfigFile {
    /// Read and parse `<confdir>/config.yaml`.
    pub fn try_parse(confdir: &Path) -> Result<Self, AppError> {
        let path = confdir.join("config.yaml");
        let mut file = std::fs::File::open(&path)
            .map_err(|e| AppError::ConfigIo(format!("{}: {e}", path.display())))?;
        let mut raw = String::new();
        file.read_to_string(&mut raw)
            .map_err(|e| AppError::ConfigIo(e.to_string()))?;
        serde_yaml::from_str(&raw).map_err(|e| AppError::ConfigParse(e.to_string()))
    }
}

pub use DeviceSpec as Device;
