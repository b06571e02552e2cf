//! Parses `config.yaml`, evaluates `max_docks`, normalizes shapes, and is
//! hot-reloaded every `updateconfig` seconds.

use std::collections::HashSet;
use std::path::Path;

use crate::app_error::AppError;
use crate::host;

mod max_docks;
mod parse_args;
mod parse_config_file;

pub use max_docks::Bindings as MaxDocksBindings;
pub use parse_args::{DaemonArgs, PlanctlArgs, PlanctlCommand};
pub use parse_config_file::{ConfigFile, Device};

/// A parsed `+cap`/`-cap` capability entry; a bare name (no sign) is
/// treated as an add.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    Add(String),
    Drop(String),
}

impl Capability {
    fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        if let Some(name) = raw.strip_prefix('-') {
            Some(Self::Drop(name.to_owned()))
        } else if let Some(name) = raw.strip_prefix('+') {
            Some(Self::Add(name.to_owned()))
        } else {
            Some(Self::Add(raw.to_owned()))
        }
    }
}

/// Process-wide hot-reloadable configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub updateconfig: u64,
    pub image_expiration: u64,
    pub main_sleep: u64,
    pub grace_kill: u64,
    pub grace_spawn: u64,
    pub cpus_per_dock: f64,
    pub max_docks_expr: String,
    pub max_docks: i64,
    pub docks_per_loop: u32,
    pub max_ttl: u64,
    pub docker_image: String,
    pub docker_cmd: Vec<String>,
    pub docker_privileged: bool,
    pub max_dock_mem: u64,
    pub max_dock_swap: u64,
    pub user_group: String,
    pub binds: Vec<String>,
    pub devices: Vec<Device>,
    pub capabilities: Vec<Capability>,
    pub security_opts: Vec<String>,
    pub influxdb_url: HashSet<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            updateconfig: 60,
            image_expiration: 43_200,
            main_sleep: 30,
            grace_kill: 120,
            grace_spawn: 60,
            cpus_per_dock: 1.0,
            max_docks_expr: "ncpus - 2".to_owned(),
            max_docks: 0,
            docks_per_loop: 4,
            max_ttl: 43_200,
            docker_image: "busybox".to_owned(),
            docker_cmd: vec!["/bin/sleep".to_owned(), "60".to_owned()],
            docker_privileged: false,
            max_dock_mem: 2_000_000_000,
            max_dock_swap: 0,
            user_group: "0:0".to_owned(),
            binds: Vec::new(),
            devices: Vec::new(),
            capabilities: Vec::new(),
            security_opts: Vec::new(),
            influxdb_url: HashSet::new(),
        }
    }
}

impl Config {
    /// Apply a parsed `ConfigFile` on top of `self`, keeping every
    /// previous value for keys absent from the file, then evaluate
    /// `max_docks` in the restricted namespace.
    fn merge(&mut self, file: ConfigFile) {
        if let Some(v) = file.updateconfig {
            self.updateconfig = v;
        }
        if let Some(v) = file.image_expiration {
            self.image_expiration = v;
        }
        if let Some(v) = file.main_sleep {
            self.main_sleep = v;
        }
        if let Some(v) = file.grace_kill {
            self.grace_kill = v;
        }
        if let Some(v) = file.grace_spawn {
            self.grace_spawn = v;
        }
        if let Some(v) = file.cpus_per_dock {
            self.cpus_per_dock = v;
        }
        if let Some(v) = file.max_docks {
            self.max_docks_expr = v.0;
        }
        if let Some(v) = file.docks_per_loop {
            self.docks_per_loop = v;
        }
        if let Some(v) = file.max_ttl {
            self.max_ttl = v;
        }
        if let Some(v) = file.docker_image {
            self.docker_image = v;
        }
        if let Some(v) = file.docker_cmd {
            self.docker_cmd = v.0;
        }
        if let Some(v) = file.docker_privileged {
            self.docker_privileged = v;
        }
        if let Some(v) = file.max_dock_mem {
            self.max_dock_mem = v;
        }
        if let Some(v) = file.max_dock_swap {
            self.max_dock_swap = v;
        }
        if let Some(v) = file.user_group {
            self.user_group = v;
        }
        if let Some(v) = file.binds {
            self.binds = v;
        }
        if let Some(v) = file.devices {
            self.devices = v.iter().filter_map(|d| Device::parse(d)).collect();
        }
        if let Some(v) = file.capabilities {
            self.capabilities = v.iter().filter_map(|c| Capability::parse(c)).collect();
        }
        if let Some(v) = file.security_opts {
            self.security_opts = v;
        }
        if let Some(v) = file.influxdb_url {
            self.influxdb_url = v.0;
        }

        let bindings = MaxDocksBindings {
            ram_bytes: i64::try_from(host::mem_bytes()).unwrap_or(i64::MAX),
            swap_bytes: i64::try_from(host::swap_bytes()).unwrap_or(i64::MAX),
            ncpus: i64::from(host::cpu_count()),
            max_dock_mem: i64::try_from(self.max_dock_mem).unwrap_or(i64::MAX),
            max_dock_swap: i64::try_from(self.max_dock_swap).unwrap_or(i64::MAX),
        };
        match max_docks::evaluate(&self.max_docks_expr, bindings) {
            Ok(n) => self.max_docks = n,
            Err(e) => {
                AppError::MaxDocksExpr(e).disp();
                self.max_docks = 0;
            }
        }
    }

    /// Load `<confdir>/config.yaml` on top of `previous`. An unreadable
    /// or malformed file keeps `previous` entirely, only logging the
    /// error.
    pub fn load(confdir: &Path, previous: &Self) -> Self {
        let mut next = previous.clone();
        match ConfigFile::try_parse(confdir) {
            Ok(file) => next.merge(file),
            Err(e) => e.disp(),
        }
        next
    }

    /// Cap on concurrent workers: `max(0, max_docks)`.
    pub fn max_docks_cap(&self) -> u32 {
        u32::try_from(self.max_docks.max(0)).unwrap_or(0)
    }
}
